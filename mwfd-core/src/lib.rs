use log::info;

pub mod lp;
pub mod name;
pub mod packets;
pub mod tlv;

pub use lp::{LpPacket, Nack, NackReason, NetPacket, PitToken};
pub use name::Name;
pub use packets::{Data, Interest};

pub fn init() {
    info!("mwfd core initialized");
}
