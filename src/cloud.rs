//! Cloud provider abstraction.
//!
//! The deprovisioning core only needs one thing from the cloud: the catalog
//! of instance types (with hourly prices) a [`NodePool`] may launch. Actual
//! instance lifecycle is handled by the machine controllers behind the
//! Kubernetes API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

use crate::crd::NodePool;
use crate::Result;

/// An instance type offered by the cloud provider
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct InstanceType {
    /// Cloud-specific type name (e.g. "m5.large")
    pub name: String,
    /// On-demand hourly price in USD
    pub price: f64,
}

/// Source of instance types and their prices
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Instance types the given pool may launch, with current prices
    async fn instance_types(&self, pool: &NodePool) -> Result<Vec<InstanceType>>;
}

/// Cloud provider backed by a fixed price catalog.
///
/// The catalog is loaded from a JSON file at startup (`--instance-catalog`)
/// and filtered per pool by its instance-type allowlist.
#[derive(Clone, Debug, Default)]
pub struct StaticCloudProvider {
    catalog: Vec<InstanceType>,
}

impl StaticCloudProvider {
    /// Create a provider serving the given catalog
    pub fn new(catalog: Vec<InstanceType>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl CloudProvider for StaticCloudProvider {
    async fn instance_types(&self, pool: &NodePool) -> Result<Vec<InstanceType>> {
        let allowed = &pool.spec.instance_types;
        Ok(self
            .catalog
            .iter()
            .filter(|it| allowed.is_empty() || allowed.contains(&it.name))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::NodePoolSpec;

    fn catalog() -> Vec<InstanceType> {
        vec![
            InstanceType {
                name: "m5.large".to_string(),
                price: 0.096,
            },
            InstanceType {
                name: "m5.xlarge".to_string(),
                price: 0.192,
            },
            InstanceType {
                name: "t3.medium".to_string(),
                price: 0.0416,
            },
        ]
    }

    #[tokio::test]
    async fn empty_allowlist_serves_the_whole_catalog() {
        let provider = StaticCloudProvider::new(catalog());
        let pool = NodePool::new("general", NodePoolSpec::default());
        let types = provider.instance_types(&pool).await.unwrap();
        assert_eq!(types.len(), 3);
    }

    #[tokio::test]
    async fn allowlist_filters_the_catalog() {
        let provider = StaticCloudProvider::new(catalog());
        let pool = NodePool::new(
            "small",
            NodePoolSpec {
                instance_types: vec!["t3.medium".to_string()],
                ..Default::default()
            },
        );
        let types = provider.instance_types(&pool).await.unwrap();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].name, "t3.medium");
    }
}
