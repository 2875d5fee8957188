//! Candidate selection.
//!
//! Filters the cluster snapshot down to the nodes a strategy may act on this
//! tick. Selection is deliberately conservative: a node must have a known,
//! valid owning pool, a resolvable price, and no pod that would permanently
//! block its drain.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::{Node, Pod};
use tracing::{debug, warn};

use crate::cloud::{CloudProvider, InstanceType};
use crate::cluster::{ClusterState, NodeExt};
use crate::crd::NodePool;
use crate::kubernetes::NodeClient;
use crate::pdb::PdbLimits;
use crate::pods::{self, pod_key};
use crate::Result;

use super::reporter::Reporter;

/// A node eligible for deprovisioning, with the facts strategies need.
#[derive(Clone, Debug)]
pub struct CandidateNode {
    /// The node, cloned from the cluster snapshot
    pub node: Node,
    /// The owning pool, cloned
    pub pool: NodePool,
    /// The node's instance type, with its current price
    pub instance_type: InstanceType,
    /// Pods currently bound to the node
    pub pods: Vec<Pod>,
}

impl CandidateNode {
    /// Node name
    pub fn name(&self) -> &str {
        self.node.node_name()
    }

    /// Hourly price of the node
    pub fn price(&self) -> f64 {
        self.instance_type.price
    }

    /// Pods that need capacity elsewhere if this node goes away
    pub fn reschedulable_pods(&self) -> Vec<&Pod> {
        self.pods
            .iter()
            .filter(|p| pods::is_reschedulable(p))
            .collect()
    }

    /// "namespace/name" keys of the reschedulable pods
    pub fn reschedulable_pod_keys(&self) -> Vec<String> {
        self.reschedulable_pods().iter().map(|p| pod_key(p)).collect()
    }

    /// True when nothing on the node needs rescheduling
    pub fn is_empty(&self) -> bool {
        self.reschedulable_pods().is_empty()
    }
}

/// Select the nodes eligible for a strategy this tick.
///
/// `should_deprovision` is the strategy's cheap filter over
/// (node, pool, pods).
pub async fn candidate_nodes<F>(
    cluster: &ClusterState,
    cloud: &dyn CloudProvider,
    kube: &dyn NodeClient,
    reporter: &Reporter,
    should_deprovision: F,
) -> Result<Vec<CandidateNode>>
where
    F: Fn(&Node, &NodePool, &[Pod]) -> bool,
{
    let pdb_limits = PdbLimits::new(kube).await?;
    let mut instance_types: HashMap<String, Vec<InstanceType>> = HashMap::new();
    let mut candidates = Vec::new();

    for node in cluster.nodes() {
        let name = node.node_name().to_string();

        // Nodes that have not finished joining, or are already on their way
        // out, are not candidates.
        if !node.is_initialized() || node.is_deleting() {
            continue;
        }
        if cluster.is_marked_for_deletion(&name) {
            continue;
        }

        let Some(pool_name) = node.node_pool_name().map(str::to_string) else {
            continue;
        };
        let Some(pool) = cluster.node_pool(&pool_name) else {
            debug!(node = %name, pool = %pool_name, "owning nodepool not found");
            continue;
        };
        if let Err(e) = pool.spec.validate() {
            warn!(pool = %pool_name, error = %e, "nodepool misconfigured, skipping its nodes");
            continue;
        }

        let Some(type_name) = node.instance_type_name().map(str::to_string) else {
            debug!(node = %name, "node has no instance type label");
            continue;
        };
        let types = match instance_types.entry(pool_name.clone()) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(cloud.instance_types(&pool).await?)
            }
        };
        let Some(instance_type) = types.iter().find(|it| it.name == type_name).cloned() else {
            debug!(node = %name, instance_type = %type_name, "instance type unknown to the cloud provider");
            continue;
        };

        let pods = cluster.pods_on_node(&name);
        if !should_deprovision(&node, &pool, &pods) {
            continue;
        }

        if let Some(reason) = blocking_pod_reason(&pods, &pdb_limits) {
            reporter.record_unconsolidatable(&node, &reason);
            continue;
        }

        candidates.push(CandidateNode {
            node,
            pool,
            instance_type,
            pods,
        });
    }

    Ok(candidates)
}

/// Why draining this pod set would block forever, if it would
fn blocking_pod_reason(pods: &[Pod], pdb_limits: &PdbLimits) -> Option<String> {
    for pod in pods {
        if !pods::is_reschedulable(pod) {
            continue;
        }
        if pods::has_do_not_evict(pod) {
            return Some(format!(
                "pod {} has the do-not-evict annotation",
                pod_key(pod)
            ));
        }
        if !pods::is_replicated(pod) {
            return Some(format!(
                "pod {} is not owned by a controller and would not be recreated",
                pod_key(pod)
            ));
        }
        if let Some(pdb) = pdb_limits.blocking(pod) {
            return Some(format!(
                "pod {} is protected by pdb {} which allows no disruptions",
                pod_key(pod),
                pdb
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cloud::StaticCloudProvider;
    use crate::crd::{NodePool, NodePoolSpec};
    use crate::test_support::{
        consolidating_pool, daemonset_pod, instance_type, node, pod_on_node,
        pod_with_annotations, test_recorder, FakeNodeClient, NodeBuilder,
    };

    fn cloud() -> StaticCloudProvider {
        StaticCloudProvider::new(vec![
            instance_type("m5.large", 0.096),
            instance_type("m5.xlarge", 0.192),
        ])
    }

    fn cluster_with(pool: NodePool, nodes: Vec<Node>) -> ClusterState {
        let cluster = ClusterState::new();
        cluster.apply_node_pool(pool);
        for n in nodes {
            cluster.apply_node(n);
        }
        cluster
    }

    async fn select_all(cluster: &ClusterState) -> Vec<CandidateNode> {
        let (recorder, _sink, _clock) = test_recorder();
        let reporter = Reporter::new(recorder);
        candidate_nodes(
            cluster,
            &cloud(),
            &FakeNodeClient::default(),
            &reporter,
            |_, _, _| true,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn selects_initialized_owned_nodes() {
        let cluster = cluster_with(
            consolidating_pool("general"),
            vec![node("node-1", "general", "m5.large")],
        );
        let candidates = select_all(&cluster).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name(), "node-1");
        assert!((candidates[0].price() - 0.096).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn skips_nodes_without_a_known_pool() {
        let cluster = ClusterState::new();
        cluster.apply_node(node("node-1", "missing-pool", "m5.large"));
        assert!(select_all(&cluster).await.is_empty());
    }

    #[tokio::test]
    async fn skips_uninitialized_and_deleting_nodes() {
        let cluster = cluster_with(
            consolidating_pool("general"),
            vec![
                NodeBuilder::new("raw")
                    .pool("general")
                    .instance_type("m5.large")
                    .uninitialized()
                    .build(),
                NodeBuilder::new("dying")
                    .pool("general")
                    .instance_type("m5.large")
                    .deleting()
                    .build(),
            ],
        );
        assert!(select_all(&cluster).await.is_empty());
    }

    #[tokio::test]
    async fn skips_nodes_already_marked_for_deletion() {
        let cluster = cluster_with(
            consolidating_pool("general"),
            vec![node("node-1", "general", "m5.large")],
        );
        cluster.mark_for_deletion(&["node-1"]);
        assert!(select_all(&cluster).await.is_empty());
    }

    #[tokio::test]
    async fn skips_nodes_with_unknown_instance_types() {
        let cluster = cluster_with(
            consolidating_pool("general"),
            vec![node("node-1", "general", "exotic.metal")],
        );
        assert!(select_all(&cluster).await.is_empty());
    }

    #[tokio::test]
    async fn misconfigured_pools_are_skipped_loudly() {
        let pool = NodePool::new(
            "broken",
            NodePoolSpec {
                ttl_seconds_after_empty: Some(30),
                consolidation: Some(crate::crd::ConsolidationSpec { enabled: true }),
                ..Default::default()
            },
        );
        let cluster = cluster_with(pool, vec![node("node-1", "broken", "m5.large")]);
        assert!(select_all(&cluster).await.is_empty());
    }

    #[tokio::test]
    async fn do_not_evict_pods_block_their_node_and_are_reported() {
        let cluster = cluster_with(
            consolidating_pool("general"),
            vec![node("node-1", "general", "m5.large")],
        );
        cluster.apply_pod(pod_with_annotations(
            "pinned",
            "node-1",
            &[(crate::crd::ANNOTATION_DO_NOT_EVICT, "true")],
        ));

        let (recorder, sink, _clock) = test_recorder();
        let reporter = Reporter::new(recorder);
        let candidates = candidate_nodes(
            &cluster,
            &cloud(),
            &FakeNodeClient::default(),
            &reporter,
            |_, _, _| true,
        )
        .await
        .unwrap();

        assert!(candidates.is_empty());
        assert_eq!(sink.count("Unconsolidatable"), 1);
    }

    #[tokio::test]
    async fn at_limit_pdb_blocks_the_node() {
        use k8s_openapi::api::policy::v1::{
            PodDisruptionBudget, PodDisruptionBudgetSpec, PodDisruptionBudgetStatus,
        };
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

        let cluster = cluster_with(
            consolidating_pool("general"),
            vec![node("node-1", "general", "m5.large")],
        );
        cluster.apply_pod(crate::test_support::pod_with_labels(
            "web-0",
            "node-1",
            &[("app", "web")],
        ));

        let kube = FakeNodeClient::default();
        kube.set_pdbs(vec![PodDisruptionBudget {
            metadata: ObjectMeta {
                name: Some("web-pdb".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(PodDisruptionBudgetSpec {
                selector: Some(LabelSelector {
                    match_labels: Some(
                        [("app".to_string(), "web".to_string())].into_iter().collect(),
                    ),
                    match_expressions: None,
                }),
                ..Default::default()
            }),
            status: Some(PodDisruptionBudgetStatus {
                disruptions_allowed: 0,
                ..Default::default()
            }),
        }]);

        let (recorder, sink, _clock) = test_recorder();
        let reporter = Reporter::new(recorder);
        let candidates = candidate_nodes(&cluster, &cloud(), &kube, &reporter, |_, _, _| true)
            .await
            .unwrap();

        assert!(candidates.is_empty());
        assert_eq!(sink.count("Unconsolidatable"), 1);
    }

    #[tokio::test]
    async fn daemonset_pods_do_not_block() {
        let cluster = cluster_with(
            consolidating_pool("general"),
            vec![node("node-1", "general", "m5.large")],
        );
        cluster.apply_pod(daemonset_pod("fluentd", "node-1"));
        let candidates = select_all(&cluster).await;
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].is_empty());
    }

    #[tokio::test]
    async fn predicate_filters_candidates() {
        let cluster = cluster_with(
            consolidating_pool("general"),
            vec![
                node("node-1", "general", "m5.large"),
                node("node-2", "general", "m5.xlarge"),
            ],
        );
        cluster.apply_pod(pod_on_node("web-0", "node-2"));

        let (recorder, _sink, _clock) = test_recorder();
        let reporter = Reporter::new(recorder);
        let candidates = candidate_nodes(
            &cluster,
            &cloud(),
            &FakeNodeClient::default(),
            &reporter,
            |_, _, pods: &[Pod]| pods.is_empty(),
        )
        .await
        .unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name(), "node-1");
    }

    #[test]
    fn reschedulable_pods_exclude_daemonsets() {
        let mut c = crate::test_support::candidate("node-1", 1.0, 2);
        c.pods.push(daemonset_pod("fluentd", "node-1"));
        assert_eq!(c.reschedulable_pods().len(), 2);
        assert!(!c.is_empty());
    }
}
