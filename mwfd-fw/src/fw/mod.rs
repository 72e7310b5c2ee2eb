pub mod best_route;
pub mod forwarder;
pub mod multicast;
pub mod strategy;
