//! Emptiness: delete nodes that have sat empty past their pool's TTL.
//!
//! Zero disruption: there is nothing on the node to reschedule. Pools use
//! either this TTL or consolidation, never both; the exclusion is enforced
//! at pool validation and again during candidate selection.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::info;

use crate::clock::Clock;
use crate::cluster::NodeExt;
use crate::crd::NodePool;
use crate::pods;
use crate::Result;

use super::command::Command;
use super::{CandidateNode, Deprovisioner};

/// Deletes nodes empty of reschedulable pods for at least
/// `ttlSecondsAfterEmpty`.
pub struct Emptiness {
    clock: Arc<dyn Clock>,
}

impl Emptiness {
    /// Create the emptiness strategy
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl Deprovisioner for Emptiness {
    fn name(&self) -> &'static str {
        "emptiness"
    }

    fn should_deprovision(&self, node: &Node, pool: &NodePool, pods_on_node: &[Pod]) -> bool {
        let Some(ttl) = pool.spec.ttl_seconds_after_empty else {
            return false;
        };
        if pods_on_node.iter().any(pods::is_reschedulable) {
            return false;
        }
        let Some(empty_since) = node.empty_since() else {
            return false;
        };
        self.clock.now() - empty_since >= Duration::seconds(ttl)
    }

    async fn compute_command(&self, candidates: Vec<CandidateNode>) -> Result<Command> {
        // Re-check emptiness against the pods captured at selection; a pod
        // may have landed between the cheap filter and now.
        let empty: Vec<CandidateNode> =
            candidates.into_iter().filter(|c| c.is_empty()).collect();
        if empty.is_empty() {
            return Ok(Command::do_nothing());
        }
        info!(nodes = empty.len(), "deleting empty nodes past their ttl");
        Ok(Command::delete(empty, self.clock.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::crd::NodePoolSpec;
    use crate::deprovisioning::command::Action;
    use crate::test_support::{candidate, pod_on_node, FakeClock, NodeBuilder};

    fn empty_pool(ttl: i64) -> NodePool {
        NodePool::new(
            "batch",
            NodePoolSpec {
                ttl_seconds_after_empty: Some(ttl),
                ..Default::default()
            },
        )
    }

    fn node_empty_for(secs: i64) -> Node {
        NodeBuilder::new("idle")
            .pool("batch")
            .instance_type("m5.large")
            .empty_since(Utc::now() - Duration::seconds(secs))
            .build()
    }

    #[test]
    fn empty_past_the_ttl_qualifies() {
        let strategy = Emptiness::new(Arc::new(FakeClock::default()));
        let pool = empty_pool(30);
        assert!(strategy.should_deprovision(&node_empty_for(40), &pool, &[]));
        assert!(!strategy.should_deprovision(&node_empty_for(10), &pool, &[]));
    }

    #[test]
    fn any_reschedulable_pod_disqualifies() {
        let strategy = Emptiness::new(Arc::new(FakeClock::default()));
        let pool = empty_pool(30);
        let pod = pod_on_node("web-0", "idle");
        assert!(!strategy.should_deprovision(&node_empty_for(40), &pool, &[pod]));
    }

    #[test]
    fn nodes_without_an_emptiness_timestamp_wait() {
        let strategy = Emptiness::new(Arc::new(FakeClock::default()));
        let pool = empty_pool(30);
        let node = NodeBuilder::new("idle")
            .pool("batch")
            .instance_type("m5.large")
            .build();
        assert!(!strategy.should_deprovision(&node, &pool, &[]));
    }

    #[tokio::test]
    async fn compute_drops_candidates_that_gained_pods() {
        let strategy = Emptiness::new(Arc::new(FakeClock::default()));
        let cmd = strategy
            .compute_command(vec![candidate("idle", 1.0, 0), candidate("busy", 1.0, 1)])
            .await
            .unwrap();
        assert_eq!(cmd.action, Action::Delete);
        assert_eq!(cmd.nodes_to_remove.len(), 1);
        assert_eq!(cmd.nodes_to_remove[0].name(), "idle");
    }

    #[tokio::test]
    async fn no_empty_candidates_means_nothing_to_do() {
        let strategy = Emptiness::new(Arc::new(FakeClock::default()));
        let cmd = strategy
            .compute_command(vec![candidate("busy", 1.0, 2)])
            .await
            .unwrap();
        assert_eq!(cmd.action, Action::DoNothing);
    }
}
