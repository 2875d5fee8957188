//! Single-node consolidation: the per-candidate fallback.
//!
//! Walks candidates most-expensive first and takes the first one whose
//! removal simulates to a delete or a cheaper replacement and survives
//! validation. Runs last in the pipeline, after the batch strategies found
//! nothing.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::{error, info};

use crate::crd::NodePool;
use crate::Result;

use super::command::Command;
use super::consolidation::Consolidation;
use super::{CandidateNode, Deprovisioner};

/// Consolidates one node at a time, best saving first.
pub struct SingleNodeConsolidation {
    consolidation: Consolidation,
}

impl SingleNodeConsolidation {
    /// Create the strategy over the shared consolidation context
    pub fn new(consolidation: Consolidation) -> Self {
        Self { consolidation }
    }
}

#[async_trait]
impl Deprovisioner for SingleNodeConsolidation {
    fn name(&self) -> &'static str {
        "single-node-consolidation"
    }

    fn should_deprovision(&self, node: &Node, pool: &NodePool, pods: &[Pod]) -> bool {
        self.consolidation.should_deprovision(node, pool, pods)
    }

    async fn compute_command(&self, candidates: Vec<CandidateNode>) -> Result<Command> {
        if self.consolidation.cluster.consolidated() {
            return Ok(Command::do_nothing());
        }
        let candidates = self.consolidation.sort_candidates(candidates);
        let validator = self.consolidation.validator();
        let mut failed_validation = false;

        for candidate in &candidates {
            let cmd = match self
                .consolidation
                .compute_consolidation(std::slice::from_ref(candidate))
                .await
            {
                Ok(cmd) => cmd,
                Err(e) if e.is_candidate_deleting() => return Ok(Command::retry()),
                Err(e) => {
                    error!(node = %candidate.name(), error = %e, "computing consolidation");
                    continue;
                }
            };
            if !cmd.is_actionable() {
                continue;
            }

            match validator.is_valid(&cmd).await {
                Ok(true) => {
                    info!(node = %candidate.name(), command = %cmd, "single-node consolidation found an option");
                    return Ok(cmd);
                }
                Ok(false) => {
                    failed_validation = true;
                    continue;
                }
                Err(e) if e.is_candidate_deleting() => return Ok(Command::retry()),
                Err(e) => {
                    error!(node = %candidate.name(), error = %e, "validating consolidation");
                    continue;
                }
            }
        }

        if failed_validation {
            return Ok(Command::retry());
        }
        Ok(Command::do_nothing())
    }
}
