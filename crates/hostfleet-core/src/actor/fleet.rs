//! `FleetActor`: host registry and fan-out dispatch
//!
//! Owns the registered inventory and a [`FanOut`] coordinator over a shared
//! executor pool. Stopping the actor closes every pooled session.

use std::sync::Arc;
use std::time::Duration;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tracing::info;

use hostfleet_exec::HostIdentity;

use crate::error::CoreError;
use crate::fanout::{AggregateResult, FanOut};
use crate::message::{Dispatch, DispatchStreaming, HostSummary, ListHosts, RegisterHost, UnregisterHost};
use crate::pool::{ExecutorFactory, ExecutorPool};

/// Arguments for spawning a `FleetActor`
pub struct FleetActorArgs {
    /// Factory used by the executor pool
    pub factory: Arc<dyn ExecutorFactory>,
    /// Deadline applied to every host of a dispatch
    pub per_host_timeout: Option<Duration>,
    /// Hosts registered at startup
    pub hosts: Vec<HostIdentity>,
}

impl FleetActorArgs {
    /// Arguments with no deadline and an empty inventory
    pub fn new(factory: Arc<dyn ExecutorFactory>) -> Self {
        Self {
            factory,
            per_host_timeout: None,
            hosts: Vec::new(),
        }
    }
}

/// Fleet registry dispatching operations through the executor pool
pub struct FleetActor {
    /// Registered hosts in registration order
    hosts: Vec<HostIdentity>,
    fanout: FanOut,
}

impl FleetActor {
    /// Get number of registered hosts
    #[must_use]
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    fn register(&mut self, host: HostIdentity) -> Result<(), CoreError> {
        if self.hosts.iter().any(|h| h.name() == host.name()) {
            return Err(CoreError::HostAlreadyExists(host.name().to_string()));
        }
        info!(host = %host.name(), address = %host.address(), "registered host");
        self.hosts.push(host);
        Ok(())
    }

    /// Resolve target names; empty selects every host
    fn resolve(&self, targets: &[String]) -> Result<Vec<HostIdentity>, CoreError> {
        if targets.is_empty() {
            return Ok(self.hosts.clone());
        }
        targets
            .iter()
            .map(|name| {
                self.hosts
                    .iter()
                    .find(|h| h.name() == name)
                    .cloned()
                    .ok_or_else(|| CoreError::HostNotFound(name.clone()))
            })
            .collect()
    }
}

impl Actor for FleetActor {
    type Args = FleetActorArgs;
    type Error = CoreError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        info!(id = %actor_ref.id(), hosts = args.hosts.len(), "FleetActor starting");

        let pool = Arc::new(ExecutorPool::new(args.factory));
        let mut actor = Self {
            hosts: Vec::with_capacity(args.hosts.len()),
            fanout: FanOut::new(pool).with_per_host_timeout(args.per_host_timeout),
        };
        for host in args.hosts {
            actor.register(host)?;
        }
        Ok(actor)
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(reason = ?reason, "FleetActor stopping");
        self.fanout.pool().close().await;
        Ok(())
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Message<RegisterHost> for FleetActor {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        msg: RegisterHost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.register(msg.host)
    }
}

impl Message<UnregisterHost> for FleetActor {
    type Reply = Result<(), CoreError>;

    async fn handle(
        &mut self,
        msg: UnregisterHost,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let name = &msg.name;
        let Some(index) = self.hosts.iter().position(|h| h.name() == name) else {
            return Err(CoreError::HostNotFound(name.clone()));
        };

        self.hosts.remove(index);
        self.fanout.pool().evict(name).await;
        info!(host = %name, "unregistered host");
        Ok(())
    }
}

impl Message<ListHosts> for FleetActor {
    type Reply = Vec<HostSummary>;

    async fn handle(
        &mut self,
        _msg: ListHosts,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.hosts.iter().map(HostSummary::from).collect()
    }
}

impl Message<Dispatch> for FleetActor {
    type Reply = Result<AggregateResult, CoreError>;

    async fn handle(
        &mut self,
        msg: Dispatch,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let hosts = self.resolve(&msg.targets)?;
        Ok(self.fanout.run(&msg.operation, &hosts).await)
    }
}

impl Message<DispatchStreaming> for FleetActor {
    type Reply = Result<AggregateResult, CoreError>;

    async fn handle(
        &mut self,
        msg: DispatchStreaming,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let hosts = self.resolve(&msg.targets)?;
        Ok(self
            .fanout
            .run_streaming(&msg.command, msg.elevate, &hosts, msg.relay)
            .await)
    }
}
