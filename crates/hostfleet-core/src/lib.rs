//! hostfleet-core: Executor pool, fan-out coordination and fleet actor
//!
//! Caches one executor per host, fans operations out to many hosts at once
//! and reduces per-host outcomes into an aggregate. The `FleetActor` wraps
//! both behind a kameo actor holding the host inventory.

pub mod actor;
pub mod config;
pub mod error;
pub mod factory;
pub mod fanout;
pub mod message;
pub mod pool;

pub use actor::{FleetActor, FleetActorArgs};
pub use config::{FanOutConfig, FleetConfig, PoolConfig};
pub use error::CoreError;
pub use factory::SessionExecutorFactory;
pub use fanout::{AggregateResult, FanOut, HostLogEvent, Operation, PerHostOutcome};
pub use message::{Dispatch, DispatchStreaming, HostSummary, ListHosts, RegisterHost, UnregisterHost};
pub use pool::{ExecutorFactory, ExecutorPool};
