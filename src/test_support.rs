//! Shared fixtures and fakes for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::{Node, NodeSpec, Pod, PodSpec, PodStatus};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::cloud::InstanceType;
use crate::crd::{
    ConsolidationSpec, NodePool, NodePoolSpec, LABEL_INITIALIZED, LABEL_INSTANCE_TYPE,
    LABEL_NODE_POOL,
};
use crate::deprovisioning::CandidateNode;
use crate::events::{Event, EventSink};
use crate::kubernetes::NodeClient;
use crate::provisioning::{MachineRequest, ProvisioningEngine, SimulationResults};
use crate::{Error, Result};

// =========================================================================
// Clock
// =========================================================================

/// Manually advanced clock
#[derive(Debug)]
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
        }
    }
}

impl FakeClock {
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// =========================================================================
// Event sink
// =========================================================================

/// Sink that remembers every emitted event
#[derive(Default)]
pub struct InMemorySink {
    events: Mutex<Vec<Event>>,
}

impl InMemorySink {
    pub fn count(&self, reason: &str) -> usize {
        self.events.lock().iter().filter(|e| e.reason == reason).count()
    }
}

impl EventSink for InMemorySink {
    fn emit(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

// =========================================================================
// Nodes and pods
// =========================================================================

/// Builder for test nodes
pub struct NodeBuilder {
    name: String,
    labels: Vec<(String, String)>,
    annotations: Vec<(String, String)>,
    created_ago: Option<Duration>,
    deleting: bool,
    unschedulable: bool,
    initialized: bool,
}

impl NodeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            labels: Vec::new(),
            annotations: Vec::new(),
            created_ago: None,
            deleting: false,
            unschedulable: false,
            initialized: true,
        }
    }

    pub fn pool(mut self, pool: &str) -> Self {
        self.labels.push((LABEL_NODE_POOL.to_string(), pool.to_string()));
        self
    }

    pub fn instance_type(mut self, name: &str) -> Self {
        self.labels
            .push((LABEL_INSTANCE_TYPE.to_string(), name.to_string()));
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.push((key.to_string(), value.to_string()));
        self
    }

    pub fn uninitialized(mut self) -> Self {
        self.initialized = false;
        self
    }

    pub fn age(mut self, age: Duration) -> Self {
        self.created_ago = Some(age);
        self
    }

    pub fn empty_since(self, since: DateTime<Utc>) -> Self {
        self.annotation(
            crate::crd::ANNOTATION_EMPTINESS_TIMESTAMP,
            &since.to_rfc3339(),
        )
    }

    pub fn pool_hash(self, hash: &str) -> Self {
        self.annotation(crate::crd::ANNOTATION_NODE_POOL_HASH, hash)
    }

    pub fn deleting(mut self) -> Self {
        self.deleting = true;
        self
    }

    pub fn unschedulable(mut self) -> Self {
        self.unschedulable = true;
        self
    }

    pub fn build(self) -> Node {
        let mut labels: std::collections::BTreeMap<String, String> =
            self.labels.into_iter().collect();
        if self.initialized {
            labels.insert(LABEL_INITIALIZED.to_string(), "true".to_string());
        }
        Node {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                uid: Some(format!("uid-{}", self.name)),
                labels: Some(labels),
                annotations: Some(self.annotations.into_iter().collect()),
                creation_timestamp: Some(Time(
                    Utc::now() - self.created_ago.unwrap_or_else(|| Duration::minutes(30)),
                )),
                deletion_timestamp: self.deleting.then(|| Time(Utc::now())),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                unschedulable: Some(self.unschedulable),
                ..Default::default()
            }),
            status: None,
        }
    }
}

/// An initialized node owned by `pool` running on `instance_type`
pub fn node(name: &str, pool: &str, instance_type: &str) -> Node {
    NodeBuilder::new(name)
        .pool(pool)
        .instance_type(instance_type)
        .build()
}

/// A replicated pod bound to the named node
pub fn pod_on_node(name: &str, node_name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(format!("uid-{name}")),
            owner_references: Some(vec![OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: "ReplicaSet".to_string(),
                name: format!("{name}-rs"),
                uid: format!("uid-{name}-rs"),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node_name.to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

/// A pod controlled by a DaemonSet
pub fn daemonset_pod(name: &str, node_name: &str) -> Pod {
    let mut pod = pod_on_node(name, node_name);
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: "DaemonSet".to_string(),
        name: format!("{name}-ds"),
        uid: format!("uid-{name}-ds"),
        controller: Some(true),
        ..Default::default()
    }]);
    pod
}

/// A pod with extra annotations
pub fn pod_with_annotations(name: &str, node_name: &str, annotations: &[(&str, &str)]) -> Pod {
    let mut pod = pod_on_node(name, node_name);
    pod.metadata.annotations = Some(
        annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    pod
}

/// A pod with the given labels
pub fn pod_with_labels(name: &str, node_name: &str, labels: &[(&str, &str)]) -> Pod {
    let mut pod = pod_on_node(name, node_name);
    pod.metadata.labels = Some(
        labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    pod
}

/// A pod with an explicit UID
pub fn pod_with_uid(name: &str, node_name: &str, uid: &str) -> Pod {
    let mut pod = pod_on_node(name, node_name);
    pod.metadata.uid = Some(uid.to_string());
    pod
}

/// A consolidation-enabled NodePool
pub fn consolidating_pool(name: &str) -> NodePool {
    NodePool::new(
        name,
        NodePoolSpec {
            consolidation: Some(ConsolidationSpec { enabled: true }),
            ..Default::default()
        },
    )
}

/// An instance type priced per hour
pub fn instance_type(name: &str, price: f64) -> InstanceType {
    InstanceType {
        name: name.to_string(),
        price,
    }
}

/// A consolidation candidate on a $`price`/h node with `pod_count` replicated pods
pub fn candidate(name: &str, price: f64, pod_count: usize) -> CandidateNode {
    let pods = (0..pod_count)
        .map(|i| pod_on_node(&format!("{name}-pod-{i}"), name))
        .collect();
    CandidateNode {
        node: node(name, "general", "m5.large"),
        pool: consolidating_pool("general"),
        instance_type: instance_type("m5.large", price),
        pods,
    }
}

// =========================================================================
// Node client
// =========================================================================

/// In-memory node client that journals every mutation in order.
#[derive(Default)]
pub struct FakeNodeClient {
    nodes: Mutex<std::collections::HashMap<String, Node>>,
    pdbs: Mutex<Vec<PodDisruptionBudget>>,
    journal: Mutex<Vec<String>>,
    fail_patch: Mutex<bool>,
}

impl FakeNodeClient {
    pub fn insert(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.nodes.lock().insert(name, node);
    }

    pub fn fail_patches(&self) {
        *self.fail_patch.lock() = true;
    }

    pub fn set_pdbs(&self, pdbs: Vec<PodDisruptionBudget>) {
        *self.pdbs.lock() = pdbs;
    }

    /// Ordered journal of mutations ("cordon node-1", "delete node-1", ...)
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    pub fn unschedulable(&self, name: &str) -> Option<bool> {
        self.nodes
            .lock()
            .get(name)
            .and_then(|n| n.spec.as_ref())
            .and_then(|s| s.unschedulable)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.lock().contains_key(name)
    }
}

#[async_trait]
impl NodeClient for FakeNodeClient {
    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        Ok(self.nodes.lock().get(name).cloned())
    }

    async fn patch_unschedulable(&self, name: &str, unschedulable: bool) -> Result<()> {
        if *self.fail_patch.lock() {
            return Err(Error::validation(format!("patch refused for {name}")));
        }
        let mut nodes = self.nodes.lock();
        let node = nodes
            .get_mut(name)
            .ok_or_else(|| Error::validation(format!("node {name} not found")))?;
        node.spec.get_or_insert_with(Default::default).unschedulable = Some(unschedulable);
        let verb = if unschedulable { "cordon" } else { "uncordon" };
        self.journal.lock().push(format!("{verb} {name}"));
        Ok(())
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        self.nodes.lock().remove(name);
        self.journal.lock().push(format!("delete {name}"));
        Ok(())
    }

    async fn list_pdbs(&self) -> Result<Vec<PodDisruptionBudget>> {
        Ok(self.pdbs.lock().clone())
    }
}

// =========================================================================
// Provisioning engine
// =========================================================================

type SimFn = dyn Fn(&[CandidateNode]) -> Result<SimulationResults> + Send + Sync;

/// Scripted provisioning engine.
#[derive(Default)]
pub struct FakeEngine {
    sim: Option<Box<SimFn>>,
    sim_queue: Mutex<VecDeque<SimulationResults>>,
    launch_error: Mutex<Option<String>>,
    launch_names: Mutex<Vec<String>>,
    pub simulate_calls: AtomicUsize,
    pub launch_calls: AtomicUsize,
}

impl FakeEngine {
    /// Every simulation reports all pods absorbed by existing capacity
    pub fn absorbing() -> Self {
        Self::default()
    }

    /// Every simulation returns a clone of the given results
    pub fn with_results(results: SimulationResults) -> Self {
        Self::with_fn(move |_| Ok(results.clone()))
    }

    /// Simulations are answered by the given function
    pub fn with_fn(
        f: impl Fn(&[CandidateNode]) -> Result<SimulationResults> + Send + Sync + 'static,
    ) -> Self {
        Self {
            sim: Some(Box::new(f)),
            ..Default::default()
        }
    }

    /// Queue one-off results consumed in order before falling back to the
    /// configured function (or absorption)
    pub fn push_result(&self, results: SimulationResults) {
        self.sim_queue.lock().push_back(results);
    }

    /// Make launches fail with the given message
    pub fn fail_launches(&self, msg: &str) {
        *self.launch_error.lock() = Some(msg.to_string());
    }
}

#[async_trait]
impl ProvisioningEngine for FakeEngine {
    async fn simulate_scheduling(&self, candidates: &[CandidateNode]) -> Result<SimulationResults> {
        self.simulate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(results) = self.sim_queue.lock().pop_front() {
            return Ok(results);
        }
        match &self.sim {
            Some(f) => f(candidates),
            None => Ok(SimulationResults::default()),
        }
    }

    async fn launch_machines(&self, machines: &[MachineRequest]) -> Result<Vec<String>> {
        self.launch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.launch_error.lock().clone() {
            return Err(Error::launch(msg));
        }
        let configured = self.launch_names.lock().clone();
        if !configured.is_empty() {
            return Ok(configured);
        }
        Ok((0..machines.len())
            .map(|i| format!("replacement-{i}"))
            .collect())
    }
}

/// A simulation that needs one new machine with the given instance options
pub fn replacement_results(options: Vec<InstanceType>, pods: Vec<String>) -> SimulationResults {
    SimulationResults {
        new_machines: vec![MachineRequest {
            pods,
            instance_type_options: options,
        }],
        inflight_nodes: Vec::new(),
        unplaced: Vec::new(),
    }
}

/// A simulation that could not place the given pods
pub fn unplaced_results(pods: Vec<String>) -> SimulationResults {
    SimulationResults {
        unplaced: pods,
        ..Default::default()
    }
}

/// Recorder wired to an in-memory sink and fake clock, with default settings
pub fn test_recorder() -> (
    Arc<crate::events::Recorder>,
    Arc<InMemorySink>,
    Arc<FakeClock>,
) {
    let clock = Arc::new(FakeClock::default());
    let sink = Arc::new(InMemorySink::default());
    let recorder = Arc::new(crate::events::Recorder::new(
        sink.clone(),
        clock.clone(),
        &crate::config::Settings::default(),
    ));
    (recorder, sink, clock)
}
