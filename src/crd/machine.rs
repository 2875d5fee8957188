//! Machine Custom Resource Definition
//!
//! A Machine records a capacity request handed to the cloud provider: it is
//! created when a replacement is launched and resolves to a node once the
//! instance joins the cluster. Machines that never register are garbage
//! collected by the liveness sweep.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a Machine
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "scythe.sh",
    version = "v1alpha1",
    kind = "Machine",
    plural = "machines",
    status = "MachineStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Pool","type":"string","jsonPath":".spec.nodePool"}"#,
    printcolumn = r#"{"name":"Node","type":"string","jsonPath":".status.nodeName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// The NodePool the machine is launched for
    pub node_pool: String,

    /// Acceptable instance types, cheapest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_types: Vec<String>,
}

/// Status for a Machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Name of the node that registered for this machine, once it has
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    /// Whether the launched instance has registered as a node
    #[serde(default)]
    pub registered: bool,
}

impl Machine {
    /// True once the launched instance has registered as a node
    pub fn is_registered(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.registered)
    }
}
