//! Fleet supervisor runtime: builds the worker pool from configuration,
//! bridges its lifecycle events onto the UI broadcast registry, and serves
//! the UI control plane — the single entry point both the CLI binary and
//! any embedder use to start and stop a whole simulator instance, mirroring
//! the teacher's `server::ServerHandle`/`ServerOptions` split.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::broadcast::BroadcastRegistry;
use crate::config::{AppConfig, WorkerPoolModel};
use crate::domain::certificate::CertificateManager;
use crate::interfaces::ui::{build_router, load_templates, UiState, EVENTS_CHANNEL};
use crate::support::shutdown::ShutdownCoordinator;
use crate::worker::factory::FactorySettings;
use crate::worker::{DynamicPool, FixedPool, WorkerPool, WorkerSet};

/// Options for starting a fleet supervisor.
pub struct SupervisorOptions {
    pub config: AppConfig,
}

/// Handle to a running supervisor: the worker pool, the UI control-plane
/// server, and graceful shutdown.
pub struct SupervisorHandle {
    pub pool: Arc<dyn WorkerPool>,
    pub config: AppConfig,
    shutdown: ShutdownCoordinator,
    ui_task: tokio::task::JoinHandle<()>,
}

impl SupervisorHandle {
    /// Start the fleet supervisor with the given options.
    ///
    /// This will:
    /// 1. Install the Prometheus metrics exporter.
    /// 2. Build the worker pool for the configured placement model.
    /// 3. Bridge worker lifecycle events onto the UI's broadcast channel.
    /// 4. Load named station templates and start the UI control-plane server.
    pub async fn start(opts: SupervisorOptions) -> Result<Self, Box<dyn std::error::Error>> {
        let config = opts.config;

        info!("starting OCPP fleet supervisor");

        install_prometheus_exporter(&config.supervisor.metrics_bind_addr)?;

        let certificates = Arc::new(CertificateManager::new(config.supervisor.data_dir.clone()));
        let broadcast = BroadcastRegistry::new();
        let settings = FactorySettings {
            ping_interval: Duration::from_secs(config.supervisor.ping_interval_secs),
            reconnect_max: Duration::from_secs(config.supervisor.reconnect_max_secs),
            action_timeout: Duration::from_secs(config.supervisor.action_timeout_secs),
            auth_cache_lifetime_secs: config.supervisor.auth_cache_lifetime_secs,
            auth_cache_capacity: config.supervisor.auth_cache_capacity,
            offline_authorization_enabled: config.supervisor.offline_authorization_enabled,
            local_pre_authorize: config.supervisor.local_pre_authorize,
            data_dir: config.supervisor.data_dir.clone(),
        };

        let pool: Arc<dyn WorkerPool> = match config.supervisor.worker_pool_model {
            WorkerPoolModel::Fixed => Arc::new(FixedPool::new(
                config.supervisor.fixed_worker_count,
                broadcast.clone(),
                certificates.clone(),
                settings,
            )),
            WorkerPoolModel::WorkerSet => Arc::new(WorkerSet::new(
                config.supervisor.worker_set_capacity,
                broadcast.clone(),
                certificates.clone(),
                settings,
            )),
            WorkerPoolModel::Dynamic => Arc::new(DynamicPool::new(
                config.supervisor.dynamic_max_workers,
                config.supervisor.dynamic_spawn_threshold,
                Duration::from_secs(config.supervisor.dynamic_idle_ttl_secs),
                broadcast.clone(),
                certificates.clone(),
                settings,
            )),
        };
        info!(model = ?config.supervisor.worker_pool_model, "worker pool constructed");

        // Bridge worker/station lifecycle events onto the UI's event channel
        // (§4.14's genuine multi-subscriber use — see DESIGN.md).
        let event_broadcast = broadcast.clone();
        pool.on_message(Arc::new(move |event| match serde_json::to_value(&event) {
            Ok(payload) => event_broadcast.publish(EVENTS_CHANNEL, payload),
            Err(e) => error!(error = %e, "failed to serialize worker event"),
        }));

        let templates = load_templates(&config.supervisor.templates_dir).await;
        info!(count = templates.len(), "loaded named station templates");

        let ui_state = UiState::new(pool.clone(), broadcast, config.ui.clone(), templates);
        let router = build_router(ui_state);

        let listener = tokio::net::TcpListener::bind(&config.ui.bind_addr).await?;
        info!(addr = %config.ui.bind_addr, "UI control-plane server listening");

        let shutdown = ShutdownCoordinator::default();
        let shutdown_signal = shutdown.signal();
        let server = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                shutdown_signal.wait().await;
                info!("UI control-plane server received shutdown signal");
            });

        let ui_task = tokio::spawn(async move {
            if let Err(e) = server.await {
                error!(error = %e, "UI control-plane server error");
            }
        });

        Ok(Self { pool, config, shutdown, ui_task })
    }

    pub fn shutdown_signal(&self) -> crate::support::shutdown::ShutdownSignal {
        self.shutdown.signal()
    }

    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    /// Wait for shutdown to be triggered, then stop every hosted station and
    /// the UI server.
    pub async fn wait(self) {
        self.shutdown.wait_for_shutdown().await;

        if let Err(e) = self.pool.stop().await {
            warn!(error = %e, "error stopping worker pool during shutdown");
        }

        match self.ui_task.await {
            Ok(()) => info!("UI control-plane server stopped"),
            Err(e) => error!(error = %e, "UI control-plane server task panicked"),
        }

        info!("fleet supervisor shutdown complete");
    }

    pub async fn shutdown(self) {
        self.trigger_shutdown();
        self.wait().await;
    }
}

fn install_prometheus_exporter(bind_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = bind_addr.parse()?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!(addr = %bind_addr, "Prometheus exporter installed");
    Ok(())
}

/// Initialize tracing from the application config. Call once at process
/// startup, before `SupervisorHandle::start`.
pub fn init_tracing(config: &AppConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));

    match config.logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
}
