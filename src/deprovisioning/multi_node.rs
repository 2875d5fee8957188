//! Multi-node consolidation: remove several nodes at once.
//!
//! Tries to find the largest prefix of the price-sorted candidate list whose
//! combined removal still simulates to a delete or a single cheaper
//! replacement. A bounded binary search keeps simulation cost at
//! O(log N) rather than O(2^N), and a wall-clock budget caps the whole
//! search on large clusters.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::{debug, info};

use crate::crd::NodePool;
use crate::{Error, Result};

use super::command::Command;
use super::consolidation::Consolidation;
use super::{CandidateNode, Deprovisioner};

/// Removes two or more nodes for at most one cheaper replacement.
pub struct MultiNodeConsolidation {
    consolidation: Consolidation,
}

impl MultiNodeConsolidation {
    /// Create the strategy over the shared consolidation context
    pub fn new(consolidation: Consolidation) -> Self {
        Self { consolidation }
    }

    /// Binary-search the price-sorted candidates for the largest actionable
    /// prefix. Single nodes are left to single-node consolidation, which
    /// enumerates every option anyway.
    async fn first_n_consolidation_option(
        &self,
        candidates: &[CandidateNode],
    ) -> Result<Command> {
        if candidates.len() < 2 {
            return Ok(Command::do_nothing());
        }
        let budget = chrono::Duration::from_std(
            self.consolidation.settings.multi_node_consolidation_budget,
        )
        .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let started = self.consolidation.clock.now();

        // Search over prefix lengths 2..=len; lo/hi are the last index of
        // the prefix under consideration.
        let mut lo = 1usize;
        let mut hi = candidates.len() - 1;
        let mut best = Command::do_nothing();

        while lo <= hi {
            if self.consolidation.clock.now() - started > budget {
                debug!("multi-node consolidation timed out, returning the best option so far");
                break;
            }
            let mid = (lo + hi) / 2;
            let prefix = &candidates[0..=mid];
            let cmd = self.consolidation.compute_consolidation(prefix).await?;
            if cmd.is_actionable() {
                best = cmd;
                lo = mid + 1;
            } else {
                if mid == 0 {
                    break;
                }
                hi = mid - 1;
            }
        }
        Ok(best)
    }
}

#[async_trait]
impl Deprovisioner for MultiNodeConsolidation {
    fn name(&self) -> &'static str {
        "multi-node-consolidation"
    }

    fn should_deprovision(&self, node: &Node, pool: &NodePool, pods: &[Pod]) -> bool {
        self.consolidation.should_deprovision(node, pool, pods)
    }

    async fn compute_command(&self, candidates: Vec<CandidateNode>) -> Result<Command> {
        if self.consolidation.cluster.consolidated() {
            return Ok(Command::do_nothing());
        }
        let candidates = self.consolidation.sort_candidates(candidates);

        let cmd = match self.first_n_consolidation_option(&candidates).await {
            Ok(cmd) => cmd,
            Err(Error::CandidateDeleting) => return Ok(Command::retry()),
            Err(e) => return Err(e),
        };
        if !cmd.is_actionable() {
            return Ok(Command::do_nothing());
        }

        match self.consolidation.validator().is_valid(&cmd).await {
            Ok(true) => {
                info!(
                    nodes = cmd.nodes_to_remove.len(),
                    command = %cmd,
                    "multi-node consolidation found an option"
                );
                Ok(cmd)
            }
            Ok(false) => Ok(Command::retry()),
            Err(e) if e.is_candidate_deleting() => Ok(Command::retry()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::cloud::StaticCloudProvider;
    use crate::cluster::ClusterState;
    use crate::config::Settings;
    use crate::deprovisioning::command::Action;
    use crate::deprovisioning::reporter::Reporter;
    use crate::provisioning::SimulationResults;
    use crate::test_support::{
        candidate, consolidating_pool, instance_type, test_recorder, unplaced_results,
        FakeClock, FakeEngine, FakeNodeClient,
    };

    fn strategy(engine: Arc<FakeEngine>) -> (MultiNodeConsolidation, Arc<FakeClock>) {
        let (recorder, _sink, clock) = test_recorder();
        let reporter = Arc::new(Reporter::new(recorder.clone()));
        let s = MultiNodeConsolidation::new(Consolidation::new(
            clock.clone(),
            Arc::new(ClusterState::new()),
            Arc::new(FakeNodeClient::default()),
            engine,
            Arc::new(StaticCloudProvider::new(vec![instance_type(
                "m5.large", 0.096,
            )])),
            recorder,
            reporter,
            Settings {
                consolidation_ttl: Duration::ZERO,
                ..Settings::default()
            },
        ));
        (s, clock)
    }

    fn register(s: &MultiNodeConsolidation, candidates: &[CandidateNode]) {
        let cluster = &s.consolidation.cluster;
        cluster.apply_node_pool(consolidating_pool("general"));
        for c in candidates {
            cluster.apply_node(c.node.clone());
            for pod in &c.pods {
                cluster.apply_pod(pod.clone());
            }
        }
    }

    /// An engine that can absorb the pods of at most `limit` nodes at once.
    fn engine_with_capacity(limit: usize) -> Arc<FakeEngine> {
        Arc::new(FakeEngine::with_fn(move |candidates| {
            if candidates.len() <= limit {
                Ok(SimulationResults::default())
            } else {
                Ok(unplaced_results(vec!["default/overflow".to_string()]))
            }
        }))
    }

    #[tokio::test]
    async fn finds_the_largest_deletable_prefix() {
        let (s, _clock) = strategy(engine_with_capacity(3));
        let candidates: Vec<CandidateNode> = (0..6)
            .map(|i| candidate(&format!("node-{i}"), 0.10, 0))
            .collect();
        register(&s, &candidates);

        let cmd = s.compute_command(candidates).await.unwrap();
        assert_eq!(cmd.action, Action::Delete);
        assert_eq!(cmd.nodes_to_remove.len(), 3);
    }

    #[tokio::test]
    async fn search_cost_stays_logarithmic() {
        let engine = engine_with_capacity(5);
        let (s, _clock) = strategy(engine.clone());
        let candidates: Vec<CandidateNode> = (0..32)
            .map(|i| candidate(&format!("node-{i}"), 0.10, 0))
            .collect();
        register(&s, &candidates);

        let cmd = s.compute_command(candidates).await.unwrap();
        assert_eq!(cmd.action, Action::Delete);
        // ceil(log2(31)) = 5 probes, plus one validation re-simulation
        let calls = engine.simulate_calls.load(Ordering::SeqCst);
        assert!(calls <= 7, "expected <= 7 simulate calls, saw {calls}");
    }

    #[tokio::test]
    async fn fewer_than_two_candidates_is_nothing() {
        let (s, _clock) = strategy(engine_with_capacity(5));
        let candidates = vec![candidate("only", 0.10, 0)];
        register(&s, &candidates);
        let cmd = s.compute_command(candidates).await.unwrap();
        assert_eq!(cmd.action, Action::DoNothing);
    }

    #[tokio::test]
    async fn no_absorbable_prefix_is_nothing() {
        let (s, _clock) = strategy(engine_with_capacity(0));
        let candidates: Vec<CandidateNode> = (0..4)
            .map(|i| candidate(&format!("node-{i}"), 0.10, 1))
            .collect();
        register(&s, &candidates);
        let cmd = s.compute_command(candidates).await.unwrap();
        assert_eq!(cmd.action, Action::DoNothing);
    }

    #[tokio::test]
    async fn consolidated_cluster_short_circuits() {
        let engine = engine_with_capacity(5);
        let (s, _clock) = strategy(engine.clone());
        let candidates: Vec<CandidateNode> = (0..4)
            .map(|i| candidate(&format!("node-{i}"), 0.10, 0))
            .collect();
        register(&s, &candidates);
        s.consolidation.cluster.set_consolidated(true);

        let cmd = s.compute_command(candidates).await.unwrap();
        assert_eq!(cmd.action, Action::DoNothing);
        assert_eq!(engine.simulate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_budget_returns_the_best_found_so_far() {
        let (recorder, _sink, clock) = test_recorder();
        let reporter = Arc::new(Reporter::new(recorder.clone()));
        // Every simulation call burns 30 seconds of fake time; the one-minute
        // budget allows roughly two probes.
        let probe_clock = clock.clone();
        let engine = Arc::new(FakeEngine::with_fn(move |_| {
            probe_clock.advance(chrono::Duration::seconds(30));
            Ok(SimulationResults::default())
        }));
        let s = MultiNodeConsolidation::new(Consolidation::new(
            clock,
            Arc::new(ClusterState::new()),
            Arc::new(FakeNodeClient::default()),
            engine,
            Arc::new(StaticCloudProvider::new(vec![instance_type(
                "m5.large", 0.096,
            )])),
            recorder,
            reporter,
            Settings {
                consolidation_ttl: Duration::ZERO,
                ..Settings::default()
            },
        ));
        let candidates: Vec<CandidateNode> = (0..16)
            .map(|i| candidate(&format!("node-{i}"), 0.10, 0))
            .collect();
        register(&s, &candidates);

        let cmd = s.compute_command(candidates).await.unwrap();
        // The search stopped early but still returns an actionable command
        // from the probes it managed.
        assert_eq!(cmd.action, Action::Delete);
        assert!(cmd.nodes_to_remove.len() >= 2);
    }

    #[tokio::test]
    async fn vanished_candidate_retries() {
        let (s, _clock) = strategy(engine_with_capacity(5));
        let candidates: Vec<CandidateNode> = (0..3)
            .map(|i| candidate(&format!("node-{i}"), 0.10, 0))
            .collect();
        // not registered: the liveness precheck fails inside the search
        let cmd = s.compute_command(candidates).await.unwrap();
        assert_eq!(cmd.action, Action::Retry);
    }
}
