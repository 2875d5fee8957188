//! The deprovisioning controller: strategy pipeline plus command executor.
//!
//! The controller is a singleton; at most one tick runs at a time. Within a
//! tick the only parallelism is the readiness fan-out, one waiter per
//! replacement node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::Clock;
use crate::cloud::CloudProvider;
use crate::cluster::{ClusterState, NodeExt};
use crate::config::Settings;
use crate::events::{self, Recorder};
use crate::kubernetes::NodeClient;
use crate::provisioning::ProvisioningEngine;
use crate::retry::retry_with_backoff;
use crate::{Error, Result};

use super::command::{Action, Command};
use super::consolidation::Consolidation;
use super::{
    candidate_nodes, Deprovisioner, Drift, Emptiness, EmptyNodeConsolidation, Expiration,
    MultiNodeConsolidation, Reporter, SingleNodeConsolidation,
};

/// What the reconcile loop should do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requeue {
    /// Run another tick right away; the last one acted or hit a transient
    Immediately,
    /// Nothing to do; poll again after the given interval
    After(Duration),
}

/// The deprovisioning controller.
pub struct Controller {
    kube: Arc<dyn NodeClient>,
    cluster: Arc<ClusterState>,
    engine: Arc<dyn ProvisioningEngine>,
    cloud: Arc<dyn CloudProvider>,
    recorder: Arc<Recorder>,
    reporter: Arc<Reporter>,
    settings: Settings,
    deprovisioners: Vec<Box<dyn Deprovisioner>>,
}

impl Controller {
    /// Wire up the controller and its strategy pipeline in the fixed order.
    pub fn new(
        clock: Arc<dyn Clock>,
        kube: Arc<dyn NodeClient>,
        cluster: Arc<ClusterState>,
        engine: Arc<dyn ProvisioningEngine>,
        cloud: Arc<dyn CloudProvider>,
        recorder: Arc<Recorder>,
        settings: Settings,
    ) -> Self {
        let reporter = Arc::new(Reporter::new(recorder.clone()));
        let consolidation = Consolidation::new(
            clock.clone(),
            cluster.clone(),
            kube.clone(),
            engine.clone(),
            cloud.clone(),
            recorder.clone(),
            reporter.clone(),
            settings.clone(),
        );
        let deprovisioners: Vec<Box<dyn Deprovisioner>> = vec![
            // Expire nodes past their pool ttl; pods reschedule naturally.
            Box::new(Expiration::new(clock.clone())),
            // Remove nodes that no longer match their pool spec.
            Box::new(Drift::new(clock.clone())),
            // Delete nodes that sat empty past their ttl. Emptiness and
            // empty-node consolidation are mutually exclusive per pool.
            Box::new(Emptiness::new(clock)),
            Box::new(EmptyNodeConsolidation::new(consolidation.clone())),
            // Remove several nodes at once to cut pod churn.
            Box::new(MultiNodeConsolidation::new(consolidation.clone())),
            // Per-node fallback for whatever the batch passes missed.
            Box::new(SingleNodeConsolidation::new(consolidation)),
        ];
        Self {
            kube,
            cluster,
            engine,
            cloud,
            recorder,
            reporter,
            settings,
            deprovisioners,
        }
    }

    /// Strategy names in consultation order (exposed for tests)
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.deprovisioners.iter().map(|d| d.name()).collect()
    }

    /// Drive reconcile until shutdown, honoring each tick's requeue hint.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("deprovisioning controller started");
        loop {
            let delay = match self.reconcile().await {
                Ok(Requeue::Immediately) => Duration::ZERO,
                Ok(Requeue::After(delay)) => delay,
                Err(e) => {
                    error!(error = %e, "deprovisioning tick failed");
                    // Back off a little before retrying a failed tick
                    Duration::from_secs(5)
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("deprovisioning controller stopped");
    }

    /// One tick: consult the strategies in order and execute at most one
    /// command.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<Requeue> {
        for strategy in &self.deprovisioners {
            let candidates = candidate_nodes(
                &self.cluster,
                self.cloud.as_ref(),
                self.kube.as_ref(),
                &self.reporter,
                |node, pool, pods| strategy.should_deprovision(node, pool, pods),
            )
            .await?;
            if candidates.is_empty() {
                continue;
            }
            debug!(
                strategy = strategy.name(),
                candidates = candidates.len(),
                "evaluating deprovisioner"
            );

            let cmd = strategy.compute_command(candidates).await?;
            match cmd.action {
                Action::DoNothing => continue,
                Action::Retry => return Ok(Requeue::Immediately),
                Action::Delete | Action::Replace => {
                    self.execute_command(strategy.name(), &cmd).await?;
                    return Ok(Requeue::Immediately);
                }
            }
        }

        // Every deprovisioner passed: remember that until something changes.
        self.cluster.set_consolidated(true);
        Ok(Requeue::After(self.settings.polling_period))
    }

    /// Run a command to completion: events, cordon, launch, mark, wait,
    /// delete, wait.
    async fn execute_command(&self, strategy: &str, cmd: &Command) -> Result<()> {
        info!(strategy, command = %cmd, "deprovisioning nodes");

        for old in &cmd.nodes_to_remove {
            self.recorder
                .publish(events::terminating_node(&old.node, cmd));
        }

        let names: Vec<String> = cmd
            .nodes_to_remove
            .iter()
            .map(|n| n.name().to_string())
            .collect();

        if cmd.action == Action::Replace {
            self.launch_replacements(cmd, &names).await?;
        } else {
            self.cluster.mark_for_deletion(&names);
        }

        for old in &cmd.nodes_to_remove {
            if let Err(e) = self.kube.delete_node(old.name()).await {
                // The next tick retries whatever is left behind.
                error!(node = %old.name(), error = %e, "deleting node");
            }
        }

        // Hold the loop until the old nodes are really gone so the next tick
        // does not plan against capacity that is still draining.
        for old in &cmd.nodes_to_remove {
            self.wait_for_deletion(&old.node).await;
        }
        Ok(())
    }

    /// Cordon, launch, mark, and wait for replacements to initialize.
    /// Unwinds cordons and marks on failure so the old nodes keep serving.
    async fn launch_replacements(&self, cmd: &Command, old_names: &[String]) -> Result<()> {
        self.set_unschedulable(old_names, true).await?;

        let launched = match self.engine.launch_machines(&cmd.replacement_machines).await {
            Ok(launched) => launched,
            Err(e) => {
                // Launch can fail for good (capacity, incompatible types);
                // leave the workloads where they are.
                let mut errs = vec![e];
                if let Err(undo) = self.set_unschedulable(old_names, false).await {
                    errs.push(undo);
                }
                return Err(Error::aggregate(errs)
                    .unwrap_or_else(|| Error::launch("launching replacement machines")));
            }
        };
        if launched.len() != cmd.replacement_machines.len() {
            // Should not happen: a partially failed launch must error.
            let mut errs = vec![Error::launch(format!(
                "expected {} machine names, got {}",
                cmd.replacement_machines.len(),
                launched.len()
            ))];
            if let Err(undo) = self.set_unschedulable(old_names, false).await {
                errs.push(undo);
            }
            return Err(Error::aggregate(errs)
                .unwrap_or_else(|| Error::launch("launching replacement machines")));
        }

        self.cluster.mark_for_deletion(old_names);

        if let Err(e) = self.wait_for_readiness(&launched, cmd).await {
            self.cluster.unmark_for_deletion(old_names);
            let mut errs = vec![Error::readiness(format!(
                "timed out checking node readiness: {e}"
            ))];
            if let Err(undo) = self.set_unschedulable(old_names, false).await {
                errs.push(undo);
            }
            return Err(Error::aggregate(errs)
                .unwrap_or_else(|| Error::readiness("checking node readiness")));
        }
        Ok(())
    }

    /// Wait for every replacement to carry the initialized label, one
    /// concurrent waiter per node under the shared retry envelope.
    async fn wait_for_readiness(&self, names: &[String], cmd: &Command) -> Result<()> {
        let waits = names.iter().map(|name| {
            let announced = AtomicBool::new(false);
            async move {
                let announced = &announced;
                retry_with_backoff(&self.settings.wait_retry, "node_readiness", || async move {
                    let node = self
                        .kube
                        .get_node(name)
                        .await?
                        .ok_or_else(|| Error::readiness(format!("node {name} not found")))?;
                    if !announced.swap(true, Ordering::SeqCst) {
                        self.recorder.publish(events::launching_node(&node, cmd));
                    }
                    if !node.is_initialized() {
                        self.recorder.publish(events::waiting_on_readiness(&node));
                        return Err(Error::readiness(format!("node {name} is not initialized")));
                    }
                    Ok(())
                })
                .await
            }
        });
        let errs: Vec<Error> = join_all(waits)
            .await
            .into_iter()
            .filter_map(std::result::Result::err)
            .collect();
        Error::aggregate(errs).map_or(Ok(()), Err)
    }

    /// Wait for the API server to forget the node. Timeouts are logged, not
    /// fatal: a PDB-throttled drain finishes on its own time.
    async fn wait_for_deletion(&self, node: &k8s_openapi::api::core::v1::Node) {
        let name = node.node_name();
        let result = retry_with_backoff(&self.settings.wait_retry, "node_deletion", || async move {
            match self.kube.get_node(name).await {
                Ok(None) => Ok(()),
                Ok(Some(_)) => {
                    self.recorder.publish(events::waiting_on_deletion(node));
                    Err(Error::validation(format!("node {name} still exists")))
                }
                Err(e) => {
                    self.recorder.publish(events::waiting_on_deletion(node));
                    Err(e)
                }
            }
        })
        .await;
        if let Err(e) = result {
            warn!(node = %name, error = %e, "waiting on node deletion");
        }
    }

    /// Cordon or uncordon nodes; skips nodes already in the desired state
    /// and never uncordons a node that is being deleted.
    async fn set_unschedulable(&self, names: &[String], unschedulable: bool) -> Result<()> {
        let mut errs = Vec::new();
        for name in names {
            let node = match self.kube.get_node(name).await {
                Ok(Some(node)) => node,
                Ok(None) => {
                    errs.push(Error::validation(format!("node {name} not found")));
                    continue;
                }
                Err(e) => {
                    errs.push(e);
                    continue;
                }
            };
            if !unschedulable && node.is_deleting() {
                continue;
            }
            if node.is_unschedulable() == unschedulable {
                continue;
            }
            if let Err(e) = self.kube.patch_unschedulable(name, unschedulable).await {
                errs.push(e);
            }
        }
        Error::aggregate(errs).map_or(Ok(()), Err)
    }
}
