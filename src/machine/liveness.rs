//! Machine liveness: delete machines that never registered.
//!
//! A machine whose instance has not registered as a node within the TTL is
//! assumed lost (bad AMI, failed boot, misconfigured userdata) and deleted so
//! its capacity request is not carried forever.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::DeleteParams;
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use tracing::{error, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::clock::Clock;
use crate::crd::Machine;
use crate::Error;

/// Machine operations the liveness sweep needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MachineClient: Send + Sync {
    /// Delete a machine; not-found is success
    async fn delete_machine(&self, name: &str) -> Result<(), Error>;
}

/// Production implementation backed by a [`kube::Client`]
pub struct KubeMachineClient {
    client: Client,
}

impl KubeMachineClient {
    /// Create a client wrapping the given kube connection
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MachineClient for KubeMachineClient {
    async fn delete_machine(&self, name: &str) -> Result<(), Error> {
        let api: Api<Machine> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Shared context for machine liveness reconciliation
pub struct Context {
    /// Machine API operations
    pub machines: Arc<dyn MachineClient>,
    /// Injected wall clock
    pub clock: Arc<dyn Clock>,
    /// How long an unregistered machine may linger; `None` disables the sweep
    pub ttl_after_not_registered: Option<Duration>,
}

/// Reconcile one machine: delete it if it failed to register within the TTL,
/// otherwise requeue for the moment the TTL would expire.
#[instrument(skip(machine, ctx), fields(machine = %machine.name_any()))]
pub async fn reconcile(machine: Arc<Machine>, ctx: Arc<Context>) -> Result<Action, Error> {
    let Some(ttl) = ctx.ttl_after_not_registered else {
        return Ok(Action::await_change());
    };
    if machine.is_registered() {
        return Ok(Action::await_change());
    }
    let Some(created) = machine.metadata.creation_timestamp.as_ref() else {
        return Ok(Action::await_change());
    };

    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(15));
    let age = ctx.clock.now() - created.0;
    if age >= ttl {
        info!(age_secs = age.num_seconds(), "deleting machine that never registered");
        ctx.machines.delete_machine(&machine.name_any()).await?;
        return Ok(Action::await_change());
    }

    let remaining = (ttl - age).to_std().unwrap_or(Duration::from_secs(1));
    Ok(Action::requeue(remaining))
}

/// Requeue failed machines with a flat delay.
pub fn error_policy(machine: Arc<Machine>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(?error, machine = %machine.name_any(), "machine liveness reconciliation failed");
    Action::requeue(Duration::from_secs(5))
}
