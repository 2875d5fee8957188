//! In-memory view of cluster state.
//!
//! [`ClusterState`] is a read-mostly snapshot of nodes, their pods, and the
//! NodePools that own them, kept current by the watcher tasks in [`sync`].
//! It may lag the API server; destructive decisions re-read through the API
//! client at execution time and re-validate before committing.
//!
//! The deprovisioner owns two pieces of state here: the `marked for deletion`
//! set that hides nodes mid-removal from later ticks, and the `consolidated`
//! flag that short-circuits expensive strategies until something changes.

mod node;
pub mod sync;

pub use node::NodeExt;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use k8s_openapi::api::core::v1::{Node, Pod};
use parking_lot::RwLock;

use crate::crd::NodePool;
use crate::pods::pod_key;

/// Shared snapshot of nodes, pods, and pools.
///
/// All lookups return freshly cloned values; callers never hold references
/// into the snapshot.
#[derive(Default)]
pub struct ClusterState {
    inner: RwLock<Inner>,
    consolidated: AtomicBool,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, Node>,
    pools: HashMap<String, NodePool>,
    pods: HashMap<String, Pod>,
    pods_by_node: HashMap<String, BTreeSet<String>>,
    marked_for_deletion: HashSet<String>,
}

impl ClusterState {
    /// Create an empty cluster state
    pub fn new() -> Self {
        Self::default()
    }

    /// All known nodes, cloned
    pub fn nodes(&self) -> Vec<Node> {
        self.inner.read().nodes.values().cloned().collect()
    }

    /// A single node by name, cloned
    pub fn node(&self, name: &str) -> Option<Node> {
        self.inner.read().nodes.get(name).cloned()
    }

    /// Pods currently bound to the named node, cloned
    pub fn pods_on_node(&self, name: &str) -> Vec<Pod> {
        let inner = self.inner.read();
        inner
            .pods_by_node
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|key| inner.pods.get(key))
            .cloned()
            .collect()
    }

    /// A NodePool by name, cloned
    pub fn node_pool(&self, name: &str) -> Option<NodePool> {
        self.inner.read().pools.get(name).cloned()
    }

    /// Hide the named nodes from future strategy consideration
    pub fn mark_for_deletion<S: AsRef<str>>(&self, names: &[S]) {
        let mut inner = self.inner.write();
        for name in names {
            inner.marked_for_deletion.insert(name.as_ref().to_string());
        }
        self.consolidated.store(false, Ordering::SeqCst);
    }

    /// Return previously hidden nodes to consideration
    pub fn unmark_for_deletion<S: AsRef<str>>(&self, names: &[S]) {
        let mut inner = self.inner.write();
        for name in names {
            inner.marked_for_deletion.remove(name.as_ref());
        }
        self.consolidated.store(false, Ordering::SeqCst);
    }

    /// True when a prior tick already decided to remove the node
    pub fn is_marked_for_deletion(&self, name: &str) -> bool {
        self.inner.read().marked_for_deletion.contains(name)
    }

    /// Latch or clear the consolidated flag.
    ///
    /// Set to true by the controller after a full sweep yielded no action;
    /// cleared by every observed cluster mutation.
    pub fn set_consolidated(&self, consolidated: bool) {
        self.consolidated.store(consolidated, Ordering::SeqCst);
    }

    /// Whether the cluster is known consolidated since the last mutation
    pub fn consolidated(&self) -> bool {
        self.consolidated.load(Ordering::SeqCst)
    }

    /// Insert or update a node observed from the API server
    pub fn apply_node(&self, node: Node) {
        let Some(name) = node.metadata.name.clone() else {
            return;
        };
        self.inner.write().nodes.insert(name, node);
        self.consolidated.store(false, Ordering::SeqCst);
    }

    /// Forget a node removed at the API server
    pub fn delete_node(&self, name: &str) {
        let mut inner = self.inner.write();
        inner.nodes.remove(name);
        inner.marked_for_deletion.remove(name);
        self.consolidated.store(false, Ordering::SeqCst);
    }

    /// Insert or update a pod observed from the API server
    pub fn apply_pod(&self, pod: Pod) {
        let key = pod_key(&pod);
        let node_name = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .unwrap_or_default();

        let mut inner = self.inner.write();
        // Rebind if the pod moved nodes
        if let Some(previous) = inner.pods.get(&key) {
            let previous_node = previous
                .spec
                .as_ref()
                .and_then(|s| s.node_name.clone())
                .unwrap_or_default();
            if previous_node != node_name {
                if let Some(set) = inner.pods_by_node.get_mut(&previous_node) {
                    set.remove(&key);
                }
            }
        }
        if !node_name.is_empty() {
            inner
                .pods_by_node
                .entry(node_name)
                .or_default()
                .insert(key.clone());
        }
        inner.pods.insert(key, pod);
        self.consolidated.store(false, Ordering::SeqCst);
    }

    /// Forget a pod removed at the API server
    pub fn delete_pod(&self, pod: &Pod) {
        let key = pod_key(pod);
        let mut inner = self.inner.write();
        if let Some(previous) = inner.pods.remove(&key) {
            let node_name = previous
                .spec
                .as_ref()
                .and_then(|s| s.node_name.clone())
                .unwrap_or_default();
            if let Some(set) = inner.pods_by_node.get_mut(&node_name) {
                set.remove(&key);
            }
        }
        self.consolidated.store(false, Ordering::SeqCst);
    }

    /// Insert or update a NodePool
    pub fn apply_node_pool(&self, pool: NodePool) {
        let Some(name) = pool.metadata.name.clone() else {
            return;
        };
        self.inner.write().pools.insert(name, pool);
        self.consolidated.store(false, Ordering::SeqCst);
    }

    /// Forget a NodePool
    pub fn delete_node_pool(&self, name: &str) {
        self.inner.write().pools.remove(name);
        self.consolidated.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{node, pod_on_node};

    #[test]
    fn lookups_return_clones() {
        let state = ClusterState::new();
        state.apply_node(node("node-1", "general", "m5.large"));

        let mut copy = state.node("node-1").unwrap();
        copy.metadata.name = Some("mutated".to_string());
        assert_eq!(
            state.node("node-1").unwrap().metadata.name.as_deref(),
            Some("node-1")
        );
    }

    #[test]
    fn pods_are_indexed_by_node() {
        let state = ClusterState::new();
        state.apply_pod(pod_on_node("a", "node-1"));
        state.apply_pod(pod_on_node("b", "node-1"));
        state.apply_pod(pod_on_node("c", "node-2"));

        assert_eq!(state.pods_on_node("node-1").len(), 2);
        assert_eq!(state.pods_on_node("node-2").len(), 1);
        assert!(state.pods_on_node("node-3").is_empty());
    }

    #[test]
    fn pod_rebinds_when_it_moves_nodes() {
        let state = ClusterState::new();
        state.apply_pod(pod_on_node("a", "node-1"));
        state.apply_pod(pod_on_node("a", "node-2"));

        assert!(state.pods_on_node("node-1").is_empty());
        assert_eq!(state.pods_on_node("node-2").len(), 1);
    }

    #[test]
    fn deleting_a_pod_unbinds_it() {
        let state = ClusterState::new();
        let pod = pod_on_node("a", "node-1");
        state.apply_pod(pod.clone());
        state.delete_pod(&pod);
        assert!(state.pods_on_node("node-1").is_empty());
    }

    #[test]
    fn mark_for_deletion_round_trips() {
        let state = ClusterState::new();
        state.mark_for_deletion(&["node-1", "node-2"]);
        assert!(state.is_marked_for_deletion("node-1"));
        state.unmark_for_deletion(&["node-1"]);
        assert!(!state.is_marked_for_deletion("node-1"));
        assert!(state.is_marked_for_deletion("node-2"));
    }

    #[test]
    fn node_deletion_clears_the_mark() {
        let state = ClusterState::new();
        state.apply_node(node("node-1", "general", "m5.large"));
        state.mark_for_deletion(&["node-1"]);
        state.delete_node("node-1");
        assert!(!state.is_marked_for_deletion("node-1"));
    }

    #[test]
    fn mutations_clear_the_consolidated_flag() {
        let state = ClusterState::new();
        state.set_consolidated(true);
        assert!(state.consolidated());

        state.apply_node(node("node-1", "general", "m5.large"));
        assert!(!state.consolidated());

        state.set_consolidated(true);
        state.apply_pod(pod_on_node("a", "node-1"));
        assert!(!state.consolidated());

        state.set_consolidated(true);
        state.mark_for_deletion(&["node-1"]);
        assert!(!state.consolidated());
    }
}
