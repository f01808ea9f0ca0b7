// # aiad - Anycast IP Controller Daemon
//
// Thin integration layer. All reconcile logic lives in aia-core; this binary
// only wires collaborators together:
//
// 1. Reading daemon settings from the environment
// 2. Initializing logging and the runtime
// 3. Loading the YAML values file and applying overrides
// 4. Building the Kubernetes client and the Tencent Cloud provider
// 5. Bootstrapping the cluster identity
// 6. Acquiring leadership
// 7. Running the engine until a signal or leadership loss
//
// ## Configuration
//
// ### Daemon
// - `AIA_CONFIG_PATH`: Values file (default `/app/conf/values.yaml`)
// - `AIA_LOG_LEVEL`: trace, debug, info, warn, error (default `info`)
// - `AIA_LEADER_ELECT`: Use Lease-based leader election (default `true`)
// - `AIA_LEADER_ELECTION_NAMESPACE`: Namespace of the Lease (default `kube-system`)
// - `AIA_POD_NAME` / `HOSTNAME`: Leader identity
//
// ### Overrides applied on top of the values file
// - `AIA_CLUSTER_ID`, `AIA_APP_ID`, `AIA_SECRET_ID`, `AIA_SECRET_KEY`
// - `AIA_MAX_CONCURRENT_RECONCILES`, `AIA_ENABLE_REVERSE_RECONCILE`,
//   `AIA_REVERSE_RECONCILE_INTERVAL_SECS`
//
// ## Example
//
// ```bash
// export AIA_CONFIG_PATH=/app/conf/values.yaml
// export AIA_SECRET_ID=AKID...
// export AIA_SECRET_KEY=...
// export AIA_POD_NAME=aia-ip-controller-0
//
// aiad
// ```

use aia_core::constants::{IDENTITY_NAMESPACE, IDENTITY_RECORD_NAME};
use aia_core::traits::{LeaderLatch, LeadershipStatus};
use aia_core::{
    AddressManager, ControllerConfig, Engine, EngineEvent, ForwardReconciler, GarbageCollector,
    bootstrap_cluster_identity,
};
use aia_kube::{
    ConfigMapRecordStore, KubeEventPublisher, KubeNodeEventSource, KubeNodeStore, LeaderGuard,
    LeaseLeadership,
};
use aia_provider_tencent::TencentCloudProvider;
use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

const DEFAULT_CONFIG_PATH: &str = "/app/conf/values.yaml";

/// Exit codes for different termination scenarios
///
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (including leadership loss)
#[derive(Debug, Clone, Copy)]
enum AiaExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<AiaExitCode> for ExitCode {
    fn from(code: AiaExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Failure of the daemon, classified by exit code
enum DaemonError {
    Startup(anyhow::Error),
    Runtime(anyhow::Error),
}

/// Daemon settings read from the environment
struct Settings {
    config_path: String,
    log_level: String,
    leader_elect: bool,
    leader_election_namespace: String,
    identity: Option<String>,
}

impl Settings {
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let leader_elect = match get("AIA_LEADER_ELECT") {
            Some(v) => v
                .parse()
                .with_context(|| format!("AIA_LEADER_ELECT is not a bool: {v}"))?,
            None => true,
        };

        Ok(Self {
            config_path: get("AIA_CONFIG_PATH").unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string()),
            log_level: get("AIA_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            leader_elect,
            leader_election_namespace: get("AIA_LEADER_ELECTION_NAMESPACE")
                .unwrap_or_else(|| IDENTITY_NAMESPACE.to_string()),
            identity: get("AIA_POD_NAME").or_else(|| get("HOSTNAME")),
        })
    }

    fn log_level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "AIA_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }

    /// Identity used as the Lease holder
    fn leader_identity(&self) -> Result<String> {
        self.identity.clone().context(
            "leader election needs an identity. \
            Set AIA_POD_NAME (or HOSTNAME), or disable it with AIA_LEADER_ELECT=false",
        )
    }
}

fn main() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            return AiaExitCode::ConfigError.into();
        }
    };

    let log_level = match settings.log_level() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            return AiaExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
        return AiaExitCode::ConfigError.into();
    }

    info!("Starting aiad");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return AiaExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        match run_daemon(settings).await {
            Ok(()) => AiaExitCode::CleanShutdown,
            Err(DaemonError::Startup(e)) => {
                error!("Startup failed: {e:#}");
                AiaExitCode::ConfigError
            }
            Err(DaemonError::Runtime(e)) => {
                error!("Daemon error: {e:#}");
                AiaExitCode::RuntimeError
            }
        }
    });

    code.into()
}

/// Load the values file and apply environment overrides
fn load_config(path: &str) -> Result<ControllerConfig> {
    let mut config = ControllerConfig::from_yaml_file(path)
        .with_context(|| format!("loading values file {path}"))?;
    config
        .apply_overrides(|key| env::var(key).ok())
        .context("applying environment overrides")?;
    config.validate().context("validating configuration")?;
    Ok(config)
}

/// Run the daemon
async fn run_daemon(settings: Settings) -> std::result::Result<(), DaemonError> {
    let config = load_config(&settings.config_path).map_err(DaemonError::Startup)?;
    info!(
        cluster_id = %config.credential.cluster_id,
        region = %config.region.long_name,
        address_type = %config.aia.target_type(),
        "Configuration loaded"
    );

    let client = kube::Client::try_default()
        .await
        .context("building Kubernetes client")
        .map_err(DaemonError::Startup)?;

    let provider = Arc::new(
        TencentCloudProvider::from_config(&config)
            .context("building Tencent Cloud provider")
            .map_err(DaemonError::Startup)?,
    );

    let records = ConfigMapRecordStore::new(client.clone());
    let identity = bootstrap_cluster_identity(&records, IDENTITY_RECORD_NAME)
        .await
        .context("bootstrapping cluster identity")
        .map_err(DaemonError::Startup)?;

    let (leadership, mut guard): (Arc<dyn LeadershipStatus>, Option<LeaderGuard>) =
        if settings.leader_elect {
            let identity = settings.leader_identity().map_err(DaemonError::Startup)?;
            let elector = Arc::new(LeaseLeadership::new(
                client.clone(),
                &config.controller.resource_lock_name,
                &settings.leader_election_namespace,
                &identity,
            ));
            let guard = Arc::clone(&elector).acquire().await;
            (elector as Arc<dyn LeadershipStatus>, Some(guard))
        } else {
            info!("Leader election disabled");
            (Arc::new(LeaderLatch::new()) as Arc<dyn LeadershipStatus>, None)
        };

    let nodes = Arc::new(KubeNodeStore::new(client.clone()));
    let manager = Arc::new(AddressManager::new(
        provider.clone(),
        provider,
        nodes.clone(),
        Arc::new(KubeEventPublisher::new(client.clone())),
        identity,
        &config,
    ));

    let reconciler = Arc::new(ForwardReconciler::new(
        manager.clone(),
        nodes.clone(),
        leadership.clone(),
        config.aia.tags.clone(),
    ));

    let collector = config.engine.enable_reverse_reconcile.then(|| {
        GarbageCollector::new(manager.clone(), nodes.clone(), leadership.clone(), &config.engine)
    });

    let (engine, events) = Engine::new(
        Box::new(KubeNodeEventSource::new(client)),
        reconciler,
        collector,
        &config,
    )
    .context("building engine")
    .map_err(DaemonError::Startup)?;

    tokio::spawn(log_engine_events(events));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let mut engine_task =
        tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    tokio::select! {
        signal = wait_for_shutdown_signal() => {
            let signal = signal.map_err(DaemonError::Runtime)?;
            info!("Received shutdown signal: {}", signal);
        }
        _ = leadership_lost(&mut guard) => {
            let _ = shutdown_tx.send(());
            return Err(DaemonError::Runtime(anyhow::anyhow!("leadership lost")));
        }
        result = &mut engine_task => {
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(DaemonError::Runtime(anyhow::Error::new(e).context("engine stopped"))),
                Err(e) => Err(DaemonError::Runtime(anyhow::anyhow!("engine task panicked: {e}"))),
            };
        }
    }

    info!("Shutting down");
    let _ = shutdown_tx.send(());
    match engine_task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(DaemonError::Runtime(anyhow::Error::new(e).context("engine stopped"))),
        Err(e) => Err(DaemonError::Runtime(anyhow::anyhow!("engine task panicked: {e}"))),
    }
}

/// Resolves when the held lease is lost; never resolves without election
async fn leadership_lost(guard: &mut Option<LeaderGuard>) {
    match guard {
        Some(guard) => guard.lost().await,
        None => std::future::pending().await,
    }
}

async fn log_engine_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::ReconcileFailed {
                node,
                error,
                attempt,
                conflict,
            } => {
                warn!(node = %node, attempt, conflict, error = %error, "Reconcile failed");
            }
            EngineEvent::SweepFailed { error } => warn!(error = %error, "Sweep failed"),
            other => debug!(event = ?other, "Engine event"),
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}
