//! Message types for actor communication
//!
//! Message handlers are implemented in the actor module.

use kameo_macros::Reply;
use serde::Serialize;
use tokio::sync::mpsc;

use hostfleet_exec::{HostIdentity, Transport};

use crate::fanout::{HostLogEvent, Operation};

/// Register a host with the fleet
#[derive(Debug)]
pub struct RegisterHost {
    /// Host identity
    pub host: HostIdentity,
}

/// Remove a host and close its pooled session
#[derive(Debug)]
pub struct UnregisterHost {
    /// Host name to remove
    pub name: String,
}

/// List registered hosts
#[derive(Debug)]
pub struct ListHosts;

/// Summary of a registered host
#[derive(Debug, Clone, Serialize, Reply)]
pub struct HostSummary {
    /// Host name
    pub name: String,
    /// Network address
    pub address: String,
    /// SSH port
    pub port: u16,
    /// Login user
    pub user: String,
    /// Transport used to reach the host
    pub transport: Transport,
}

impl From<&HostIdentity> for HostSummary {
    fn from(host: &HostIdentity) -> Self {
        Self {
            name: host.name().to_string(),
            address: host.address().to_string(),
            port: host.port(),
            user: host.user().to_string(),
            transport: host.transport(),
        }
    }
}

/// Apply an operation to a set of registered hosts
#[derive(Debug)]
pub struct Dispatch {
    /// Operation to apply
    pub operation: Operation,
    /// Host names; empty means every registered host
    pub targets: Vec<String>,
}

/// Stream a command on a set of registered hosts
#[derive(Debug)]
pub struct DispatchStreaming {
    /// Command text
    pub command: String,
    /// Run with root privileges
    pub elevate: bool,
    /// Host names; empty means every registered host
    pub targets: Vec<String>,
    /// Receives host-tagged log events
    pub relay: mpsc::Sender<HostLogEvent>,
}
