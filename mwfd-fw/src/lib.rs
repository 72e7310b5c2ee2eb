use log::info;

pub mod clock;
pub mod counters;
pub mod dispatch;
pub mod face;
pub mod fw;
pub mod internal;
pub mod tables;

pub use clock::Clock;
pub use counters::{CountersSnapshot, WorkerCounters};
pub use dispatch::{DispatchConfig, Dispatcher, WorkerPool};
pub use face::{Face, FaceId, FaceTable};
pub use fw::forwarder::{WorkerCommand, WorkerContext};
pub use fw::strategy::StrategyRegistry;
pub use internal::{internal_pair, InternalClient};
pub use tables::cs::CsConfig;

pub fn init() {
    info!("mwfd forwarding core initialized");
}
