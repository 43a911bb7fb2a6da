//! RKE2 control plane operator - scales Cluster API control planes running RKE2

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::reflector;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::{Controller, WatchStreamExt};
use kube::{Api, Client, CustomResourceExt};

use rke2cp_common::crd::{Machine, RKE2ControlPlane};
use rke2cp_common::events::KubeEventPublisher;
use rke2cp_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use rke2cp_controlplane::{error_policy, reconcile, Context, KubeStore, ScaleConfig};

/// Controller name reported on Kubernetes Events
const CONTROLLER_NAME: &str = "rke2-control-plane-controller";

/// Server-side watch timeout, kept below the client's read timeout so idle
/// watches end cleanly instead of erroring
const WATCH_TIMEOUT_SECS: u32 = 240;

/// Reconciles RKE2ControlPlane resources into control plane Machines
#[derive(Parser, Debug)]
#[command(name = "rke2cp-operator", version, about, long_about = None)]
struct Cli {
    /// Print the RKE2ControlPlane CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Only watch this namespace (all namespaces when unset)
    #[arg(long, env = "RKE2CP_WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Log output format (json or text)
    #[arg(long, env = "RKE2CP_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    /// Seconds to wait while a control plane Machine is being deleted
    #[arg(long, env = "RKE2CP_DELETE_REQUEUE_SECS", default_value_t = 30)]
    delete_requeue_secs: u64,

    /// Seconds to wait after preflight checks fail
    #[arg(long, env = "RKE2CP_PREFLIGHT_REQUEUE_SECS", default_value_t = 15)]
    preflight_requeue_secs: u64,

    /// Seconds before the follow-up pass after a Machine is created or deleted
    #[arg(long, env = "RKE2CP_REQUEUE_SOON_SECS", default_value_t = 1)]
    requeue_soon_secs: u64,

    /// Seconds to wait after a retryable reconcile error
    #[arg(long, env = "RKE2CP_ERROR_REQUEUE_SECS", default_value_t = 5)]
    error_requeue_secs: u64,
}

impl Cli {
    fn scale_config(&self) -> ScaleConfig {
        ScaleConfig {
            delete_requeue_after: Duration::from_secs(self.delete_requeue_secs),
            preflight_failed_requeue_after: Duration::from_secs(self.preflight_requeue_secs),
            requeue_soon: Duration::from_secs(self.requeue_soon_secs),
            error_requeue_after: Duration::from_secs(self.error_requeue_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&RKE2ControlPlane::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    run_controller(cli).await
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let namespace = cli.namespace.as_deref();
    let control_planes: Api<RKE2ControlPlane> = scoped_api(&client, namespace);
    let machines: Api<Machine> = scoped_api(&client, namespace);
    let watcher_config = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    // Machine cache backing the cached list path of the store
    let (machine_cache, writer) = reflector::store();
    let machine_reflector = watcher::watcher(machines.clone(), watcher_config.clone())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .for_each(|result| async move {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Machine watch error");
            }
        });
    tokio::spawn(machine_reflector);

    tracing::info!("Waiting for the Machine cache to sync...");
    machine_cache
        .wait_until_ready()
        .await
        .map_err(|e| anyhow::anyhow!("Machine cache never became ready: {}", e))?;

    let store = Arc::new(KubeStore::new(client.clone(), machine_cache));
    let events = Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME));
    let ctx = Arc::new(Context::new(store, events, cli.scale_config()));

    tracing::info!(
        namespace = namespace.unwrap_or("<all>"),
        "Starting RKE2ControlPlane controller"
    );

    Controller::new(control_planes, watcher_config.clone())
        .owns(machines, watcher_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(control_plane = %obj.name, ?action, "Reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Controller shut down");
    Ok(())
}
