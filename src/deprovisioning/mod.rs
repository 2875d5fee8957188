//! The deprovisioning control loop and its strategy pipeline.
//!
//! Every tick walks an ordered list of deprovisioners; the first one that
//! yields an actionable command executes it and the loop requeues
//! immediately. A sweep with no action latches the cluster's consolidated
//! flag and requeues after the polling period.
//!
//! Strategy order is fixed: expiration, drift, emptiness, empty-node
//! consolidation, multi-node consolidation, single-node consolidation.

mod candidates;
mod command;
mod consolidation;
mod controller;
mod drift;
mod emptiness;
mod empty_node;
mod expiration;
mod multi_node;
mod reporter;
mod single_node;
mod validation;

pub use candidates::{candidate_nodes, CandidateNode};
pub use command::{Action, Command};
pub use consolidation::Consolidation;
pub use controller::{Controller, Requeue};
pub use drift::Drift;
pub use emptiness::Emptiness;
pub use empty_node::EmptyNodeConsolidation;
pub use expiration::Expiration;
pub use multi_node::MultiNodeConsolidation;
pub use reporter::Reporter;
pub use single_node::SingleNodeConsolidation;
pub use validation::Validation;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};

use crate::crd::NodePool;
use crate::Result;

/// One deprovisioning strategy.
///
/// `should_deprovision` is the cheap per-node filter used during candidate
/// selection; `compute_command` may be expensive (scheduling simulation,
/// validation settling).
#[async_trait]
pub trait Deprovisioner: Send + Sync {
    /// Human-readable strategy name for logs and metrics labels
    fn name(&self) -> &'static str;

    /// Cheap filter: may this strategy consider the node at all?
    fn should_deprovision(&self, node: &Node, pool: &NodePool, pods: &[Pod]) -> bool;

    /// Decide what to do with the selected candidates this tick
    async fn compute_command(&self, candidates: Vec<CandidateNode>) -> Result<Command>;
}
