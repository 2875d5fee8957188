//! Accessors for the node metadata the deprovisioner cares about.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;

use crate::crd::{
    ANNOTATION_EMPTINESS_TIMESTAMP, ANNOTATION_NODE_POOL_HASH, LABEL_INITIALIZED,
    LABEL_INSTANCE_TYPE, LABEL_NODE_POOL,
};

/// Derived facts about a [`Node`].
pub trait NodeExt {
    /// Node name, or "" for malformed objects
    fn node_name(&self) -> &str;
    /// The owning NodePool named by the node's labels, if any
    fn node_pool_name(&self) -> Option<&str>;
    /// The node's instance type label, if any
    fn instance_type_name(&self) -> Option<&str>;
    /// True once the node has joined the cluster and registered its resources
    fn is_initialized(&self) -> bool;
    /// True when the API server has begun deleting the node
    fn is_deleting(&self) -> bool;
    /// The node's cordon state
    fn is_unschedulable(&self) -> bool;
    /// Creation instant, if recorded
    fn created_at(&self) -> Option<DateTime<Utc>>;
    /// Instant the node last became empty, from its annotation
    fn empty_since(&self) -> Option<DateTime<Utc>>;
    /// NodePool spec hash the node was launched with
    fn pool_hash(&self) -> Option<&str>;
    /// Node UID, or "" when unset
    fn uid(&self) -> &str;
}

impl NodeExt for Node {
    fn node_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn node_pool_name(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(LABEL_NODE_POOL))
            .map(String::as_str)
    }

    fn instance_type_name(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(LABEL_INSTANCE_TYPE))
            .map(String::as_str)
    }

    fn is_initialized(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .is_some_and(|l| l.contains_key(LABEL_INITIALIZED))
    }

    fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    fn is_unschedulable(&self) -> bool {
        self.spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false)
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.creation_timestamp.as_ref().map(|t| t.0)
    }

    fn empty_since(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_EMPTINESS_TIMESTAMP))
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    fn pool_hash(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_NODE_POOL_HASH))
            .map(String::as_str)
    }

    fn uid(&self) -> &str {
        self.metadata.uid.as_deref().unwrap_or_default()
    }
}
