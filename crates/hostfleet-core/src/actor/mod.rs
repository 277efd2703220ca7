//! Actor implementations

pub mod fleet;

pub use fleet::{FleetActor, FleetActorArgs};
