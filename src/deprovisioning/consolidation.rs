//! Shared consolidation machinery.
//!
//! The three consolidation strategies differ only in how they pick the node
//! set to consider; the simulation, pricing, and validation logic is this
//! plain value each of them holds.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::debug;

use crate::cloud::{CloudProvider, InstanceType};
use crate::cluster::{ClusterState, NodeExt};
use crate::config::Settings;
use crate::crd::NodePool;
use crate::events::{self, Recorder};
use crate::kubernetes::NodeClient;
use crate::provisioning::{MachineRequest, ProvisioningEngine};
use crate::{Error, Result};

use super::command::Command;
use super::reporter::Reporter;
use super::validation::Validation;
use super::CandidateNode;

/// Consolidation context shared by the consolidation strategies.
#[derive(Clone)]
pub struct Consolidation {
    pub(super) clock: Arc<dyn crate::clock::Clock>,
    pub(super) cluster: Arc<ClusterState>,
    pub(super) kube: Arc<dyn NodeClient>,
    pub(super) engine: Arc<dyn ProvisioningEngine>,
    pub(super) cloud: Arc<dyn CloudProvider>,
    pub(super) recorder: Arc<Recorder>,
    pub(super) reporter: Arc<Reporter>,
    pub(super) settings: Settings,
}

impl Consolidation {
    /// Bundle the collaborators consolidation needs
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<dyn crate::clock::Clock>,
        cluster: Arc<ClusterState>,
        kube: Arc<dyn NodeClient>,
        engine: Arc<dyn ProvisioningEngine>,
        cloud: Arc<dyn CloudProvider>,
        recorder: Arc<Recorder>,
        reporter: Arc<Reporter>,
        settings: Settings,
    ) -> Self {
        Self {
            clock,
            cluster,
            kube,
            engine,
            cloud,
            recorder,
            reporter,
            settings,
        }
    }

    /// The filter every consolidation strategy shares: the owning pool has
    /// opted into consolidation
    pub fn should_deprovision(&self, _node: &Node, pool: &NodePool, _pods: &[Pod]) -> bool {
        pool.spec.consolidation_enabled()
    }

    /// Sort candidates most-expensive first so savings are found early
    pub fn sort_candidates(&self, mut candidates: Vec<CandidateNode>) -> Vec<CandidateNode> {
        candidates.sort_by(|a, b| {
            b.price()
                .partial_cmp(&a.price())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates
    }

    /// Compute the consolidation option for removing `nodes` together.
    ///
    /// Returns [`Error::CandidateDeleting`] when a candidate starts deleting
    /// mid-evaluation; callers translate that into a retry command.
    pub async fn compute_consolidation(&self, nodes: &[CandidateNode]) -> Result<Command> {
        self.ensure_candidates_alive(nodes)?;

        let results = self.engine.simulate_scheduling(nodes).await?;

        if !results.all_pods_scheduled() {
            for key in &results.unplaced {
                if let Some(pod) = find_pod(nodes, key) {
                    self.recorder.publish(events::pod_failed_to_schedule(
                        pod,
                        "no capacity for this pod if its node is removed",
                    ));
                }
            }
            for node in nodes {
                self.reporter.record_unconsolidatable(
                    &node.node,
                    "not all of the node's pods would reschedule",
                );
            }
            return Ok(Command::do_nothing());
        }

        // Everything fits on what already exists: pure delete.
        if results.new_machines.is_empty() {
            return Ok(Command::delete(nodes.to_vec(), self.clock.now()));
        }

        // Removing N nodes for M>1 replacements churns pods without a clear
        // saving; only a single consolidated replacement is considered.
        if results.new_machines.len() > 1 {
            for node in nodes {
                self.reporter.record_unconsolidatable(
                    &node.node,
                    "removal would require more than one replacement node",
                );
            }
            return Ok(Command::do_nothing());
        }

        let current_price = total_price(nodes);
        let machine = &results.new_machines[0];
        let cheaper = filter_by_price(&machine.instance_type_options, current_price);
        if cheaper.is_empty() {
            for node in nodes {
                self.reporter
                    .record_unconsolidatable(&node.node, "no replacement is cheaper than the node");
            }
            return Ok(Command::do_nothing());
        }

        debug!(
            nodes = nodes.len(),
            current_price,
            cheapest = cheaper[0].price,
            "consolidation found a cheaper replacement"
        );
        Ok(Command::replace(
            nodes.to_vec(),
            vec![MachineRequest {
                pods: machine.pods.clone(),
                instance_type_options: cheaper,
            }],
            self.clock.now(),
        ))
    }

    /// A validator configured with this consolidation's settling delay
    pub fn validator(&self) -> Validation {
        Validation::new(self.clone())
    }

    fn ensure_candidates_alive(&self, nodes: &[CandidateNode]) -> Result<()> {
        for candidate in nodes {
            let name = candidate.name();
            let gone = match self.cluster.node(name) {
                None => true,
                Some(node) => node.is_deleting(),
            };
            if gone || self.cluster.is_marked_for_deletion(name) {
                return Err(Error::CandidateDeleting);
            }
        }
        Ok(())
    }
}

/// Total hourly price of a candidate set
pub fn total_price(nodes: &[CandidateNode]) -> f64 {
    nodes.iter().map(|n| n.price()).sum()
}

/// Instance types strictly cheaper than `max_price`, ascending by price
pub fn filter_by_price(options: &[InstanceType], max_price: f64) -> Vec<InstanceType> {
    let mut cheaper: Vec<InstanceType> = options
        .iter()
        .filter(|it| it.price < max_price)
        .cloned()
        .collect();
    cheaper.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
    cheaper
}

fn find_pod<'a>(nodes: &'a [CandidateNode], key: &str) -> Option<&'a Pod> {
    nodes
        .iter()
        .flat_map(|n| n.pods.iter())
        .find(|p| crate::pods::pod_key(p) == key)
}
