//! Re-validation of a consolidation command before commit.
//!
//! Cluster state keeps moving while a command is computed, and consolidation
//! decisions are destructive. Validation waits out a settling delay, then
//! re-derives the decision against fresh state; any divergence rejects the
//! command and the tick retries.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::Result;

use super::command::{Action, Command};
use super::consolidation::{filter_by_price, total_price, Consolidation};
use super::{candidate_nodes, CandidateNode};

/// Validates commands for the consolidation strategies.
pub struct Validation {
    consolidation: Consolidation,
}

impl Validation {
    /// Create a validator over the given consolidation context
    pub fn new(consolidation: Consolidation) -> Self {
        Self { consolidation }
    }

    /// Whether the command still holds against fresh cluster state.
    ///
    /// Waits out whatever remains of the settling delay since the command
    /// was created, then checks that:
    /// - every node to remove is still a live, selectable candidate (a new
    ///   do-not-evict pod or a deletion in progress disqualifies it),
    /// - re-simulation still places every pod,
    /// - any replacement still needed is a subset of the command's
    ///   instance-type options and still strictly cheaper than the nodes
    ///   being removed.
    pub async fn is_valid(&self, cmd: &Command) -> Result<bool> {
        self.settle(cmd).await;

        let c = &self.consolidation;
        let candidates = candidate_nodes(
            &c.cluster,
            c.cloud.as_ref(),
            c.kube.as_ref(),
            &c.reporter,
            |node, pool, pods| c.should_deprovision(node, pool, pods),
        )
        .await?;
        let by_name: HashMap<&str, &CandidateNode> =
            candidates.iter().map(|cand| (cand.name(), cand)).collect();

        let mut current = Vec::with_capacity(cmd.nodes_to_remove.len());
        for old in &cmd.nodes_to_remove {
            match by_name.get(old.name()) {
                Some(cand) => current.push((*cand).clone()),
                None => {
                    debug!(node = %old.name(), "node is no longer a candidate, rejecting command");
                    return Ok(false);
                }
            }
        }

        let results = c.engine.simulate_scheduling(&current).await?;
        if !results.all_pods_scheduled() {
            return Ok(false);
        }
        // Still absorbable by existing capacity: a delete stays a delete and
        // a replace only got cheaper.
        if results.new_machines.is_empty() {
            return Ok(true);
        }
        if cmd.action == Action::Delete {
            debug!("delete command now requires replacement capacity, rejecting");
            return Ok(false);
        }
        if results.new_machines.len() > cmd.replacement_machines.len() {
            return Ok(false);
        }

        // The replacement we would launch must be one the command already
        // promised (by instance type) and must still beat the removed price.
        let allowed: HashSet<&str> = cmd.replacement_machines[0]
            .instance_type_options
            .iter()
            .map(|it| it.name.as_str())
            .collect();
        let surviving: Vec<_> = results.new_machines[0]
            .instance_type_options
            .iter()
            .filter(|it| allowed.contains(it.name.as_str()))
            .cloned()
            .collect();
        Ok(!filter_by_price(&surviving, total_price(&current)).is_empty())
    }

    async fn settle(&self, cmd: &Command) {
        let settle = chrono::Duration::from_std(self.consolidation.settings.consolidation_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(15));
        let elapsed = self.consolidation.clock.now() - cmd.created;
        if elapsed < settle {
            let remaining = (settle - elapsed)
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(remaining).await;
        }
    }
}
