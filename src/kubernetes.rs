//! Kubernetes API client abstraction.
//!
//! The deprovisioner touches the API server directly (rather than through the
//! cluster snapshot) whenever it is about to mutate: cordoning, deleting, and
//! polling nodes during waits. The trait allows the executor and validation
//! paths to run against recording fakes in tests while production uses
//! [`KubeNodeClient`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams};
use kube::{Api, Client};

#[cfg(test)]
use mockall::automock;

use crate::Result;

/// Direct node operations against the API server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Fetch a node; `None` means the API server no longer knows it
    async fn get_node(&self, name: &str) -> Result<Option<Node>>;

    /// Merge-patch the node's unschedulable flag (cordon / uncordon)
    async fn patch_unschedulable(&self, name: &str, unschedulable: bool) -> Result<()>;

    /// Delete a node; not-found is success
    async fn delete_node(&self, name: &str) -> Result<()>;

    /// List all PodDisruptionBudgets in the cluster
    async fn list_pdbs(&self) -> Result<Vec<PodDisruptionBudget>>;
}

/// Production implementation backed by a [`kube::Client`]
pub struct KubeNodeClient {
    client: Client,
}

impl KubeNodeClient {
    /// Create a client wrapping the given kube connection
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl NodeClient for KubeNodeClient {
    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        Ok(self.nodes().get_opt(name).await?)
    }

    async fn patch_unschedulable(&self, name: &str, unschedulable: bool) -> Result<()> {
        let patch = serde_json::json!({
            "spec": { "unschedulable": unschedulable }
        });
        self.nodes()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_node(&self, name: &str) -> Result<()> {
        match self.nodes().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pdbs(&self) -> Result<Vec<PodDisruptionBudget>> {
        let api: Api<PodDisruptionBudget> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }
}
