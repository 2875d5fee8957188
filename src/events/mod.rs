//! Operator-visible events.
//!
//! Every decision the deprovisioner takes or declines to take is explained
//! through reason-coded Kubernetes Events. Construction lives here; the
//! dedupe and rate-limit pipeline lives in [`recorder`].

mod recorder;

pub use recorder::{EventSink, KubeEventSink, Recorder};

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::cluster::NodeExt;
use crate::pods::pod_key;

/// Event severity, mirroring Kubernetes event types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Expected lifecycle progress
    Normal,
    /// Something operators should look at
    Warning,
}

/// Reference to the entity an event is about
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityRef {
    /// Kubernetes kind ("Node", "Pod")
    pub kind: String,
    /// Entity name
    pub name: String,
    /// Entity namespace, empty for cluster-scoped kinds
    pub namespace: String,
    /// Entity UID; part of the dedupe identity
    pub uid: String,
}

impl EntityRef {
    fn from_meta(kind: &str, meta: &ObjectMeta) -> Self {
        Self {
            kind: kind.to_string(),
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            uid: meta.uid.clone().unwrap_or_default(),
        }
    }
}

/// A reason-coded operator event
#[derive(Clone, Debug)]
pub struct Event {
    /// The entity the event is about
    pub entity: EntityRef,
    /// Severity
    pub kind: EventKind,
    /// Stable reason string; the dedupe and rate-limit key
    pub reason: &'static str,
    /// Human-readable explanation
    pub message: String,
}

/// Stable event reason strings.
///
/// These appear in `kubectl get events` under the REASON column and key the
/// dedupe and rate-limit pipeline.
pub mod reasons {
    /// A node is being removed by the deprovisioner
    pub const TERMINATING_NODE: &str = "TerminatingNode";
    /// A replacement node has been launched
    pub const LAUNCHING_NODE: &str = "LaunchingNode";
    /// Deprovisioning is paused until a replacement initializes
    pub const WAITING_ON_READINESS: &str = "WaitingOnReadiness";
    /// Deprovisioning is paused until an old node drains and disappears
    pub const WAITING_ON_DELETION: &str = "WaitingOnDeletion";
    /// A pod was nominated to schedule onto an in-flight node
    pub const NOMINATE_POD: &str = "NominatePod";
    /// A pod is being evicted from a draining node
    pub const EVICT_POD: &str = "EvictPod";
    /// A pod could not be placed during simulation
    pub const POD_FAILED_TO_SCHEDULE: &str = "PodFailedToSchedule";
    /// A node's drain did not complete
    pub const NODE_FAILED_TO_DRAIN: &str = "NodeFailedToDrain";
    /// A node was considered but cannot be consolidated
    pub const UNCONSOLIDATABLE: &str = "Unconsolidatable";
}

/// A node is being removed; `command` describes the decision
pub fn terminating_node(node: &Node, command: impl std::fmt::Display) -> Event {
    Event {
        entity: EntityRef::from_meta("Node", &node.metadata),
        kind: EventKind::Normal,
        reason: reasons::TERMINATING_NODE,
        message: format!("deprovisioning node via {command}"),
    }
}

/// A replacement node launched for `command` was observed at the API server
pub fn launching_node(node: &Node, command: impl std::fmt::Display) -> Event {
    Event {
        entity: EntityRef::from_meta("Node", &node.metadata),
        kind: EventKind::Normal,
        reason: reasons::LAUNCHING_NODE,
        message: format!("launching replacement node for {command}"),
    }
}

/// A replacement node has not initialized yet
pub fn waiting_on_readiness(node: &Node) -> Event {
    Event {
        entity: EntityRef::from_meta("Node", &node.metadata),
        kind: EventKind::Normal,
        reason: reasons::WAITING_ON_READINESS,
        message: format!(
            "waiting on readiness to continue deprovisioning node {}",
            node.node_name()
        ),
    }
}

/// An old node has not disappeared from the API server yet
pub fn waiting_on_deletion(node: &Node) -> Event {
    Event {
        entity: EntityRef::from_meta("Node", &node.metadata),
        kind: EventKind::Normal,
        reason: reasons::WAITING_ON_DELETION,
        message: format!(
            "waiting on deletion to continue deprovisioning node {}",
            node.node_name()
        ),
    }
}

/// A pod was nominated onto a launching or in-flight node
pub fn nominate_pod(pod: &Pod, node_name: &str) -> Event {
    Event {
        entity: EntityRef::from_meta("Pod", &pod.metadata),
        kind: EventKind::Normal,
        reason: reasons::NOMINATE_POD,
        message: format!("pod should schedule on node {node_name}"),
    }
}

/// A pod is being evicted as part of a drain
pub fn evict_pod(pod: &Pod) -> Event {
    Event {
        entity: EntityRef::from_meta("Pod", &pod.metadata),
        kind: EventKind::Normal,
        reason: reasons::EVICT_POD,
        message: format!("evicting pod {}", pod_key(pod)),
    }
}

/// A pod could not be placed during scheduling simulation
pub fn pod_failed_to_schedule(pod: &Pod, why: impl std::fmt::Display) -> Event {
    Event {
        entity: EntityRef::from_meta("Pod", &pod.metadata),
        kind: EventKind::Warning,
        reason: reasons::POD_FAILED_TO_SCHEDULE,
        message: format!("pod failed to schedule, {why}"),
    }
}

/// A node's drain did not complete in time
pub fn node_failed_to_drain(node: &Node, why: impl std::fmt::Display) -> Event {
    Event {
        entity: EntityRef::from_meta("Node", &node.metadata),
        kind: EventKind::Warning,
        reason: reasons::NODE_FAILED_TO_DRAIN,
        message: format!("node failed to drain, {why}"),
    }
}

/// A node was considered for consolidation but cannot be disrupted
pub fn unconsolidatable(node: &Node, why: impl std::fmt::Display) -> Event {
    Event {
        entity: EntityRef::from_meta("Node", &node.metadata),
        kind: EventKind::Normal,
        reason: reasons::UNCONSOLIDATABLE,
        message: why.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{node, pod_on_node};

    #[test]
    fn node_events_carry_node_identity() {
        let n = node("node-1", "general", "m5.large");
        let event = waiting_on_readiness(&n);
        assert_eq!(event.reason, "WaitingOnReadiness");
        assert_eq!(event.entity.kind, "Node");
        assert_eq!(event.entity.name, "node-1");
    }

    #[test]
    fn pod_events_carry_pod_identity() {
        let pod = pod_on_node("web-0", "node-1");
        let event = nominate_pod(&pod, "node-2");
        assert_eq!(event.reason, "NominatePod");
        assert_eq!(event.entity.kind, "Pod");
        assert!(event.message.contains("node-2"));
    }
}
