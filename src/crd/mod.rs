//! Custom Resource Definitions and well-known node metadata keys.
//!
//! Scythe owns two cluster-scoped CRDs:
//! - [`NodePool`] - the disruption policy attached to a group of nodes
//! - [`Machine`] - bookkeeping for a launched-but-not-yet-registered node

mod machine;
mod node_pool;

pub use machine::{Machine, MachineSpec, MachineStatus};
pub use node_pool::{ConsolidationSpec, NodePool, NodePoolSpec};

/// API group for Scythe resources
pub const API_GROUP: &str = "scythe.sh";

/// Node label naming the owning [`NodePool`]
pub const LABEL_NODE_POOL: &str = "scythe.sh/nodepool";

/// Node label set once the node has joined the cluster and registered all of
/// its expected resources. Replacement nodes are not considered ready until
/// this label appears.
pub const LABEL_INITIALIZED: &str = "scythe.sh/initialized";

/// Standard Kubernetes label carrying the node's instance type name
pub const LABEL_INSTANCE_TYPE: &str = "node.kubernetes.io/instance-type";

/// Node annotation recording the [`NodePool`] spec hash the node was launched
/// with; a mismatch against the pool's current hash means the node has drifted
pub const ANNOTATION_NODE_POOL_HASH: &str = "scythe.sh/nodepool-hash";

/// Node annotation recording the RFC 3339 instant the node last became empty
pub const ANNOTATION_EMPTINESS_TIMESTAMP: &str = "scythe.sh/emptiness-timestamp";

/// Pod annotation that blocks eviction, and therefore disruption of the
/// pod's node, while present
pub const ANNOTATION_DO_NOT_EVICT: &str = "scythe.sh/do-not-evict";
