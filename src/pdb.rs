//! PodDisruptionBudget limits.
//!
//! A pod covered by a PDB with zero disruptions currently allowed blocks the
//! drain of its node, so nodes carrying such pods are excluded from candidate
//! selection for this tick.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::kubernetes::NodeClient;
use crate::Result;

/// Snapshot of the cluster's PDBs, taken once per candidate-selection pass.
pub struct PdbLimits {
    pdbs: Vec<PodDisruptionBudget>,
}

impl PdbLimits {
    /// List all PDBs through the API client
    pub async fn new(client: &dyn NodeClient) -> Result<Self> {
        Ok(Self {
            pdbs: client.list_pdbs().await?,
        })
    }

    /// Build from an already-listed set (tests)
    pub fn from_pdbs(pdbs: Vec<PodDisruptionBudget>) -> Self {
        Self { pdbs }
    }

    /// The name of a PDB currently at its disruption limit that covers the
    /// pod, if any
    pub fn blocking(&self, pod: &Pod) -> Option<String> {
        let empty = BTreeMap::new();
        let labels = pod.metadata.labels.as_ref().unwrap_or(&empty);
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");

        self.pdbs
            .iter()
            .filter(|pdb| pdb.metadata.namespace.as_deref().unwrap_or("default") == namespace)
            .filter(|pdb| {
                pdb.spec
                    .as_ref()
                    .and_then(|s| s.selector.as_ref())
                    .is_some_and(|sel| selector_matches(sel, labels))
            })
            .find(|pdb| {
                pdb.status
                    .as_ref()
                    .map(|s| s.disruptions_allowed == 0)
                    .unwrap_or(false)
            })
            .map(|pdb| {
                format!(
                    "{}/{}",
                    pdb.metadata.namespace.as_deref().unwrap_or("default"),
                    pdb.metadata.name.as_deref().unwrap_or_default()
                )
            })
    }

    /// True when no at-limit PDB covers the pod
    pub fn can_evict(&self, pod: &Pod) -> bool {
        self.blocking(pod).is_none()
    }
}

/// Standard Kubernetes label-selector matching (matchLabels + matchExpressions).
fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    if let Some(match_labels) = &selector.match_labels {
        for (k, v) in match_labels {
            if labels.get(k) != Some(v) {
                return false;
            }
        }
    }
    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let value = labels.get(&expr.key);
            let values = expr.values.as_deref().unwrap_or_default();
            let matched = match expr.operator.as_str() {
                "In" => value.is_some_and(|v| values.contains(v)),
                "NotIn" => !value.is_some_and(|v| values.contains(v)),
                "Exists" => value.is_some(),
                "DoesNotExist" => value.is_none(),
                _ => false,
            };
            if !matched {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::policy::v1::{PodDisruptionBudgetSpec, PodDisruptionBudgetStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
        LabelSelectorRequirement, ObjectMeta,
    };

    use crate::test_support::pod_with_labels;

    fn pdb(name: &str, match_labels: &[(&str, &str)], disruptions_allowed: i32) -> PodDisruptionBudget {
        PodDisruptionBudget {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(PodDisruptionBudgetSpec {
                selector: Some(LabelSelector {
                    match_labels: Some(
                        match_labels
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                    ),
                    match_expressions: None,
                }),
                ..Default::default()
            }),
            status: Some(PodDisruptionBudgetStatus {
                disruptions_allowed,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn at_limit_pdb_blocks_matching_pods() {
        let limits = PdbLimits::from_pdbs(vec![pdb("web-pdb", &[("app", "web")], 0)]);
        let pod = pod_with_labels("web-0", "node-1", &[("app", "web")]);
        assert_eq!(limits.blocking(&pod).as_deref(), Some("default/web-pdb"));
        assert!(!limits.can_evict(&pod));
    }

    #[test]
    fn pdb_with_headroom_does_not_block() {
        let limits = PdbLimits::from_pdbs(vec![pdb("web-pdb", &[("app", "web")], 1)]);
        let pod = pod_with_labels("web-0", "node-1", &[("app", "web")]);
        assert!(limits.can_evict(&pod));
    }

    #[test]
    fn non_matching_pods_are_unaffected() {
        let limits = PdbLimits::from_pdbs(vec![pdb("web-pdb", &[("app", "web")], 0)]);
        let pod = pod_with_labels("db-0", "node-1", &[("app", "db")]);
        assert!(limits.can_evict(&pod));
    }

    #[test]
    fn match_expressions_are_honored() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![
                LabelSelectorRequirement {
                    key: "tier".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec!["frontend".to_string(), "edge".to_string()]),
                },
                LabelSelectorRequirement {
                    key: "canary".to_string(),
                    operator: "DoesNotExist".to_string(),
                    values: None,
                },
            ]),
        };

        let mut labels = BTreeMap::new();
        labels.insert("tier".to_string(), "frontend".to_string());
        assert!(selector_matches(&selector, &labels));

        labels.insert("canary".to_string(), "true".to_string());
        assert!(!selector_matches(&selector, &labels));
    }
}
