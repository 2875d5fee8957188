//! Empty-node consolidation: batch-delete empty consolidation-enabled nodes.
//!
//! The cheapest consolidation there is: nodes with no reschedulable pods are
//! deleted together, no simulation needed. The decision still settles and
//! re-validates so a pod that lands during the delay saves its node.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::info;

use crate::crd::NodePool;
use crate::Result;

use super::command::Command;
use super::consolidation::Consolidation;
use super::{CandidateNode, Deprovisioner};

/// Batch-deletes currently-empty consolidation-eligible nodes.
pub struct EmptyNodeConsolidation {
    consolidation: Consolidation,
}

impl EmptyNodeConsolidation {
    /// Create the strategy over the shared consolidation context
    pub fn new(consolidation: Consolidation) -> Self {
        Self { consolidation }
    }
}

#[async_trait]
impl Deprovisioner for EmptyNodeConsolidation {
    fn name(&self) -> &'static str {
        "empty-node-consolidation"
    }

    fn should_deprovision(&self, node: &Node, pool: &NodePool, pods: &[Pod]) -> bool {
        self.consolidation.should_deprovision(node, pool, pods)
    }

    async fn compute_command(&self, candidates: Vec<CandidateNode>) -> Result<Command> {
        if self.consolidation.cluster.consolidated() {
            return Ok(Command::do_nothing());
        }
        let candidates = self.consolidation.sort_candidates(candidates);
        let empty: Vec<CandidateNode> =
            candidates.into_iter().filter(|c| c.is_empty()).collect();
        if empty.is_empty() {
            return Ok(Command::do_nothing());
        }

        let cmd = Command::delete(empty, self.consolidation.clock.now());
        match self.consolidation.validator().is_valid(&cmd).await {
            Ok(true) => {
                info!(nodes = cmd.nodes_to_remove.len(), "consolidating empty nodes");
                Ok(cmd)
            }
            Ok(false) => Ok(Command::retry()),
            Err(e) if e.is_candidate_deleting() => Ok(Command::retry()),
            Err(e) => Err(e),
        }
    }
}
