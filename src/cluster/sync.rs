//! Watcher tasks that keep [`ClusterState`] current.
//!
//! Three watch streams (nodes, pods, node pools) feed the shared snapshot.
//! Watch errors are logged and the stream resumes; the snapshot tolerates
//! staleness because destructive decisions re-read via the API client.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ClusterState;
use crate::crd::NodePool;

/// Run all cluster-state watchers until the token is cancelled.
pub async fn run(client: Client, state: Arc<ClusterState>, shutdown: CancellationToken) {
    tokio::join!(
        watch_nodes(client.clone(), state.clone(), shutdown.clone()),
        watch_pods(client.clone(), state.clone(), shutdown.clone()),
        watch_pools(client, state, shutdown),
    );
}

async fn watch_nodes(client: Client, state: Arc<ClusterState>, shutdown: CancellationToken) {
    let api: Api<Node> = Api::all(client);
    let mut stream = watcher::watcher(api, watcher::Config::default()).boxed();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = stream.next() => match event {
                Some(Ok(Event::Apply(node)) | Ok(Event::InitApply(node))) => state.apply_node(node),
                Some(Ok(Event::Delete(node))) => {
                    let name = node.metadata.name.unwrap_or_default();
                    debug!(node = %name, "node removed from cluster state");
                    state.delete_node(&name);
                }
                Some(Ok(Event::Init | Event::InitDone)) => {}
                Some(Err(e)) => warn!(error = %e, "node watch error"),
                None => break,
            }
        }
    }
}

async fn watch_pods(client: Client, state: Arc<ClusterState>, shutdown: CancellationToken) {
    let api: Api<Pod> = Api::all(client);
    let mut stream = watcher::watcher(api, watcher::Config::default()).boxed();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = stream.next() => match event {
                Some(Ok(Event::Apply(pod)) | Ok(Event::InitApply(pod))) => state.apply_pod(pod),
                Some(Ok(Event::Delete(pod))) => state.delete_pod(&pod),
                Some(Ok(Event::Init | Event::InitDone)) => {}
                Some(Err(e)) => warn!(error = %e, "pod watch error"),
                None => break,
            }
        }
    }
}

async fn watch_pools(client: Client, state: Arc<ClusterState>, shutdown: CancellationToken) {
    let api: Api<NodePool> = Api::all(client);
    let mut stream = watcher::watcher(api, watcher::Config::default()).boxed();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = stream.next() => match event {
                Some(Ok(Event::Apply(pool)) | Ok(Event::InitApply(pool))) => state.apply_node_pool(pool),
                Some(Ok(Event::Delete(pool))) => {
                    let name = pool.metadata.name.unwrap_or_default();
                    state.delete_node_pool(&name);
                }
                Some(Ok(Event::Init | Event::InitDone)) => {}
                Some(Err(e)) => warn!(error = %e, "nodepool watch error"),
                None => break,
            }
        }
    }
}
