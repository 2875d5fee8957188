//! Drift: delete nodes whose recorded pool hash no longer matches.
//!
//! Nodes are stamped with their pool's spec hash at launch. When the pool
//! spec changes, existing nodes have drifted and are deleted so their pods
//! land on conformant capacity. Drift is delete-only.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::info;

use crate::clock::Clock;
use crate::cluster::NodeExt;
use crate::crd::NodePool;
use crate::Result;

use super::command::Command;
use super::{CandidateNode, Deprovisioner};

/// Deletes nodes launched from a superseded pool spec.
pub struct Drift {
    clock: Arc<dyn Clock>,
}

impl Drift {
    /// Create the drift strategy
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl Deprovisioner for Drift {
    fn name(&self) -> &'static str {
        "drift"
    }

    fn should_deprovision(&self, node: &Node, pool: &NodePool, _pods: &[Pod]) -> bool {
        // Nodes that never recorded a hash predate drift detection; leave
        // them to the other strategies.
        match node.pool_hash() {
            Some(recorded) => recorded != pool.spec.hash(),
            None => false,
        }
    }

    async fn compute_command(&self, candidates: Vec<CandidateNode>) -> Result<Command> {
        info!(nodes = candidates.len(), "deleting drifted nodes");
        Ok(Command::delete(candidates, self.clock.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::NodePoolSpec;
    use crate::deprovisioning::command::Action;
    use crate::test_support::{candidate, FakeClock, NodeBuilder};

    #[test]
    fn hash_mismatch_is_drift() {
        let strategy = Drift::new(Arc::new(FakeClock::default()));
        let pool = NodePool::new("general", NodePoolSpec::default());
        let current_hash = pool.spec.hash();

        let conformant = NodeBuilder::new("ok")
            .pool("general")
            .instance_type("m5.large")
            .pool_hash(&current_hash)
            .build();
        let drifted = NodeBuilder::new("stale")
            .pool("general")
            .instance_type("m5.large")
            .pool_hash("0123456789abcdef")
            .build();

        assert!(!strategy.should_deprovision(&conformant, &pool, &[]));
        assert!(strategy.should_deprovision(&drifted, &pool, &[]));
    }

    #[test]
    fn unstamped_nodes_are_not_drifted() {
        let strategy = Drift::new(Arc::new(FakeClock::default()));
        let pool = NodePool::new("general", NodePoolSpec::default());
        let unstamped = NodeBuilder::new("old-gen")
            .pool("general")
            .instance_type("m5.large")
            .build();
        assert!(!strategy.should_deprovision(&unstamped, &pool, &[]));
    }

    #[tokio::test]
    async fn drift_is_delete_only() {
        let strategy = Drift::new(Arc::new(FakeClock::default()));
        let cmd = strategy
            .compute_command(vec![candidate("stale", 1.0, 2)])
            .await
            .unwrap();
        assert_eq!(cmd.action, Action::Delete);
        assert!(cmd.replacement_machines.is_empty());
    }
}
