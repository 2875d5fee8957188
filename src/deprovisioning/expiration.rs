//! Expiration: delete nodes past their pool's age TTL.
//!
//! Expired nodes are removed without replacement; their pods reschedule
//! naturally onto remaining or newly provisioned capacity.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::info;

use crate::clock::Clock;
use crate::cluster::NodeExt;
use crate::crd::NodePool;
use crate::Result;

use super::command::Command;
use super::{CandidateNode, Deprovisioner};

/// Deletes nodes whose age exceeds `ttlSecondsUntilExpired`.
pub struct Expiration {
    clock: Arc<dyn Clock>,
}

impl Expiration {
    /// Create the expiration strategy
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn is_expired(&self, node: &Node, pool: &NodePool) -> bool {
        let Some(ttl) = pool.spec.ttl_seconds_until_expired else {
            return false;
        };
        let Some(created) = node.created_at() else {
            return false;
        };
        self.clock.now() - created >= Duration::seconds(ttl)
    }
}

#[async_trait]
impl Deprovisioner for Expiration {
    fn name(&self) -> &'static str {
        "expiration"
    }

    fn should_deprovision(&self, node: &Node, pool: &NodePool, _pods: &[Pod]) -> bool {
        self.is_expired(node, pool)
    }

    async fn compute_command(&self, candidates: Vec<CandidateNode>) -> Result<Command> {
        info!(
            nodes = candidates.len(),
            "expiring nodes past their pool ttl"
        );
        Ok(Command::delete(candidates, self.clock.now()))
    }
}
