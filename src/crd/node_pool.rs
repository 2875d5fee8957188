//! NodePool Custom Resource Definition
//!
//! A NodePool describes how a group of nodes is provisioned and, relevant to
//! this operator, when those nodes may be disrupted: expired after a TTL,
//! deleted once empty, or consolidated away for cost.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Specification for a NodePool
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "scythe.sh",
    version = "v1alpha1",
    kind = "NodePool",
    plural = "nodepools",
    shortname = "np",
    namespaced = false,
    printcolumn = r#"{"name":"Consolidate","type":"boolean","jsonPath":".spec.consolidation.enabled"}"#,
    printcolumn = r#"{"name":"ExpireAfter","type":"integer","jsonPath":".spec.ttlSecondsUntilExpired"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolSpec {
    /// Cost-driven consolidation policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidation: Option<ConsolidationSpec>,

    /// Nodes older than this are expired and replaced through natural pod
    /// rescheduling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_until_expired: Option<i64>,

    /// Nodes empty of reschedulable pods for this long are deleted.
    /// Mutually exclusive with enabled consolidation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_empty: Option<i64>,

    /// Instance types nodes of this pool may be launched as. Empty means any
    /// type the cloud provider offers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_types: Vec<String>,
}

/// Consolidation policy for a NodePool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationSpec {
    /// Whether cost-driven consolidation may disrupt nodes of this pool
    #[serde(default)]
    pub enabled: bool,
}

impl NodePoolSpec {
    /// True when consolidation may disrupt nodes of this pool
    pub fn consolidation_enabled(&self) -> bool {
        self.consolidation.as_ref().is_some_and(|c| c.enabled)
    }

    /// Validate the pool specification.
    ///
    /// Emptiness TTL and consolidation are separate disruption mechanisms
    /// over the same nodes; a pool opts into exactly one.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.ttl_seconds_after_empty.is_some() && self.consolidation_enabled() {
            return Err(crate::Error::validation(
                "ttlSecondsAfterEmpty and consolidation.enabled are mutually exclusive - a pool opts into exactly one",
            ));
        }
        if let Some(ttl) = self.ttl_seconds_until_expired {
            if ttl < 0 {
                return Err(crate::Error::validation(
                    "ttlSecondsUntilExpired must not be negative",
                ));
            }
        }
        if let Some(ttl) = self.ttl_seconds_after_empty {
            if ttl < 0 {
                return Err(crate::Error::validation(
                    "ttlSecondsAfterEmpty must not be negative",
                ));
            }
        }
        Ok(())
    }

    /// Stable hash of the spec, stamped on nodes at launch time.
    ///
    /// Nodes whose recorded hash differs from the pool's current hash have
    /// drifted from the pool specification.
    pub fn hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        // 16 hex chars is plenty for drift detection and keeps the
        // annotation readable
        digest
            .iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect::<String>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consolidating_spec() -> NodePoolSpec {
        NodePoolSpec {
            consolidation: Some(ConsolidationSpec { enabled: true }),
            ..Default::default()
        }
    }

    #[test]
    fn consolidation_defaults_to_disabled() {
        assert!(!NodePoolSpec::default().consolidation_enabled());
        assert!(consolidating_spec().consolidation_enabled());
    }

    #[test]
    fn emptiness_and_consolidation_are_mutually_exclusive() {
        let spec = NodePoolSpec {
            ttl_seconds_after_empty: Some(30),
            ..consolidating_spec()
        };
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));

        // Either one alone is fine
        assert!(consolidating_spec().validate().is_ok());
        assert!(NodePoolSpec {
            ttl_seconds_after_empty: Some(30),
            ..Default::default()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn negative_ttls_are_rejected() {
        let spec = NodePoolSpec {
            ttl_seconds_until_expired: Some(-1),
            ..Default::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn hash_is_stable_and_spec_sensitive() {
        let a = consolidating_spec();
        let b = consolidating_spec();
        assert_eq!(a.hash(), b.hash());

        let changed = NodePoolSpec {
            instance_types: vec!["m5.large".to_string()],
            ..consolidating_spec()
        };
        assert_ne!(a.hash(), changed.hash());
        assert_eq!(a.hash().len(), 16);
    }
}
