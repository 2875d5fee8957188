//! Scythe operator - node deprovisioning for Kubernetes clusters

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller as KubeController;
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use scythe::clock::SystemClock;
use scythe::cloud::{InstanceType, StaticCloudProvider};
use scythe::cluster::{sync, ClusterState};
use scythe::config::{RateLimit, Settings};
use scythe::crd::{Machine, NodePool};
use scythe::deprovisioning::Controller;
use scythe::events::{KubeEventSink, Recorder};
use scythe::kubernetes::KubeNodeClient;
use scythe::machine::{error_policy, reconcile, Context, KubeMachineClient};
use scythe::provisioning::ConservativeEngine;
use scythe::retry::RetryConfig;

/// Scythe - Kubernetes node deprovisioning operator
#[derive(Parser, Debug)]
#[command(name = "scythe", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Idle requeue interval of the deprovisioning loop, in seconds
    #[arg(long, default_value = "10")]
    polling_period_secs: u64,

    /// Settling delay before consolidation commands are re-validated, in
    /// seconds
    #[arg(long, default_value = "15")]
    consolidation_ttl_secs: u64,

    /// Delete machines that never registered a node within this many
    /// seconds (0 disables the sweep)
    #[arg(long, default_value = "900")]
    ttl_after_not_registered_secs: u64,

    /// Path to a JSON instance-type catalog: [{"name":"m5.large","price":0.096},...]
    #[arg(long, env = "SCYTHE_INSTANCE_CATALOG")]
    instance_catalog: Option<PathBuf>,

    /// NominatePod event rate limit as "tokens_per_sec,burst"
    #[arg(long, default_value = "5,10")]
    nominate_pod_rate: String,
}

fn parse_rate(raw: &str) -> anyhow::Result<(f64, f64)> {
    let (tokens, burst) = raw
        .split_once(',')
        .ok_or_else(|| anyhow::anyhow!("rate must look like \"5,10\""))?;
    Ok((tokens.trim().parse()?, burst.trim().parse()?))
}

fn settings_from(cli: &Cli) -> anyhow::Result<Settings> {
    let (tokens_per_sec, burst) = parse_rate(&cli.nominate_pod_rate)?;
    Ok(Settings {
        polling_period: Duration::from_secs(cli.polling_period_secs),
        consolidation_ttl: Duration::from_secs(cli.consolidation_ttl_secs),
        wait_retry: RetryConfig::wait_envelope(),
        event_rate_limits: vec![RateLimit {
            reason: scythe::events::reasons::NOMINATE_POD.to_string(),
            tokens_per_sec,
            burst,
        }],
        ttl_after_not_registered: (cli.ttl_after_not_registered_secs > 0)
            .then(|| Duration::from_secs(cli.ttl_after_not_registered_secs)),
        ..Settings::default()
    })
}

async fn load_catalog(path: Option<&PathBuf>) -> anyhow::Result<Vec<InstanceType>> {
    let Some(path) = path else {
        tracing::warn!("no instance catalog configured; consolidation pricing is disabled");
        return Ok(Vec::new());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("reading instance catalog {}: {}", path.display(), e))?;
    let catalog: Vec<InstanceType> = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("parsing instance catalog {}: {}", path.display(), e))?;
    tracing::info!(types = catalog.len(), "instance catalog loaded");
    Ok(catalog)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        for crd in [
            serde_yaml::to_string(&NodePool::crd())?,
            serde_yaml::to_string(&Machine::crd())?,
        ] {
            println!("---");
            print!("{crd}");
        }
        return Ok(());
    }

    let settings = settings_from(&cli)?;
    let catalog = load_catalog(cli.instance_catalog.as_ref()).await?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kubernetes client: {}", e))?;

    let clock = Arc::new(SystemClock);
    let cluster = Arc::new(ClusterState::new());
    let kube_nodes = Arc::new(KubeNodeClient::new(client.clone()));
    let cloud = Arc::new(StaticCloudProvider::new(catalog));
    let engine = Arc::new(ConservativeEngine);
    let sink = Arc::new(KubeEventSink::new(client.clone(), scythe::CONTROLLER_NAME));
    let recorder = Arc::new(Recorder::new(sink, clock.clone(), &settings));

    let shutdown = CancellationToken::new();

    // Cluster-state watchers
    let sync_task = tokio::spawn(sync::run(
        client.clone(),
        cluster.clone(),
        shutdown.clone(),
    ));

    // Machine liveness controller
    let machines: Api<Machine> = Api::all(client.clone());
    let liveness_ctx = Arc::new(Context {
        machines: Arc::new(KubeMachineClient::new(client.clone())),
        clock: clock.clone(),
        ttl_after_not_registered: settings.ttl_after_not_registered,
    });
    let liveness = KubeController::new(machines, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, liveness_ctx)
        .for_each(|result| async move {
            match result {
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "machine liveness reconciliation error"),
            }
        });
    let liveness_task = tokio::spawn(liveness);

    // The deprovisioning loop itself
    let controller = Controller::new(
        clock,
        kube_nodes,
        cluster,
        engine,
        cloud,
        recorder,
        settings,
    );
    let loop_shutdown = shutdown.clone();
    let deprovisioner_task = tokio::spawn(async move {
        controller.run(loop_shutdown).await;
    });

    tracing::info!("scythe operator started");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("failed to listen for shutdown signal: {}", e))?;
    tracing::info!("shutting down");

    shutdown.cancel();
    let _ = deprovisioner_task.await;
    sync_task.abort();
    liveness_task.abort();

    Ok(())
}
