//! Pod classification helpers.
//!
//! Deprovisioning decisions hinge on which pods actually need somewhere else
//! to run (reschedulable) and which pods pin their node in place (blocking).

use k8s_openapi::api::core::v1::Pod;

use crate::crd::ANNOTATION_DO_NOT_EVICT;

/// Annotation kubelet places on mirror pods for static manifests
const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Name of the pod, or "" for malformed objects
pub fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or_default()
}

/// "namespace/name" identity used in logs and simulation results
pub fn pod_key(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or("default"),
        pod_name(pod)
    )
}

/// True when the pod carries the do-not-evict annotation
pub fn has_do_not_evict(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_DO_NOT_EVICT))
        .is_some_and(|v| v != "false")
}

/// True when the pod is controlled by a DaemonSet; such pods follow their
/// node and never need replacement capacity
pub fn is_owned_by_daemonset(pod: &Pod) -> bool {
    owner_kinds(pod).any(|kind| kind == "DaemonSet")
}

/// True for kubelet mirror pods of static manifests
pub fn is_mirror(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION))
}

/// True when the pod has run to completion
pub fn is_terminal(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

/// True when the pod is already being deleted
pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// True when something (a controller) will recreate the pod after eviction
pub fn is_replicated(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.controller == Some(true)))
}

/// A pod that needs capacity somewhere else if its node goes away
pub fn is_reschedulable(pod: &Pod) -> bool {
    !is_owned_by_daemonset(pod) && !is_mirror(pod) && !is_terminal(pod) && !is_terminating(pod)
}

fn owner_kinds(pod: &Pod) -> impl Iterator<Item = &str> {
    pod.metadata
        .owner_references
        .iter()
        .flatten()
        .map(|r| r.kind.as_str())
}
