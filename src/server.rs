use anyhow::Result;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    capture::{self, Interceptor, StdioSink},
    config::Config,
    handlers::{self, LogsApiState},
    logs::{LogDb, LogService, LogTrimmer},
    metrics,
    registry::{FunctionRegistry, InMemoryFunctionRegistry},
    settings::{SettingsProvider, SharedSettings},
    signals::{setup_signal_handlers, ReloadTargets},
};

/// Every long-lived component of the log pipeline, wired together
pub struct Pipeline {
    pub db: Arc<LogDb>,
    pub service: LogService,
    pub trimmer: LogTrimmer,
    pub interceptor: Arc<Interceptor>,
    pub settings: Arc<SharedSettings>,
    pub registry: Option<Arc<InMemoryFunctionRegistry>>,
}

impl Pipeline {
    /// Open the database and build the service, retention timer and interceptor
    ///
    /// Nothing is started: the trimmer is idle and the interceptor is neither
    /// registered nor installed.
    pub async fn build(config: &Config) -> Result<Self> {
        let db = Arc::new(LogDb::new(&config.database.url).await?);

        let settings = Arc::new(SharedSettings::new(config.global_settings()));
        let registry = (!config.registry.functions.is_empty()).then(|| {
            Arc::new(InMemoryFunctionRegistry::new(
                config.registry.functions.iter().cloned(),
            ))
        });

        let mut options = config.batching.service_options();
        options.settings = Some(settings.clone() as Arc<dyn SettingsProvider>);
        options.registry = registry.clone().map(|r| r as Arc<dyn FunctionRegistry>);
        let service = LogService::spawn(db.clone(), options);

        let trimmer = LogTrimmer::new(db.clone(), config.trimming);
        let interceptor = Arc::new(Interceptor::new(
            Arc::new(service.clone()),
            Arc::new(StdioSink),
        ));

        Ok(Self {
            db,
            service,
            trimmer,
            interceptor,
            settings,
            registry,
        })
    }

    /// Start retention and make the interceptor the process-wide one
    pub fn start(&self) {
        self.trimmer.start();
        capture::set_global(self.interceptor.clone());
        self.interceptor.install();
    }

    pub fn api_state(&self) -> LogsApiState {
        LogsApiState {
            service: self.service.clone(),
            registry: self.registry.clone().map(|r| r as Arc<dyn FunctionRegistry>),
        }
    }

    /// Stop in dependency order: retention, capture, buffer, then the pool
    pub async fn shutdown(self) {
        self.trimmer.stop().await;

        self.interceptor.uninstall();
        if let Some(current) = capture::global() {
            if Arc::ptr_eq(&current, &self.interceptor) {
                capture::clear_global();
            }
        }

        self.service.shutdown().await;
        self.db.close().await;
        info!("Log pipeline stopped");
    }
}

/// Start the function log server
///
/// This function:
/// 1. Initializes metrics
/// 2. Builds and starts the log pipeline
/// 3. Sets up signal handlers for graceful shutdown and settings reload
/// 4. Serves the log API until a shutdown signal arrives
/// 5. Shuts the pipeline down in order
pub async fn start_server(config: Config, config_path: PathBuf) -> Result<()> {
    let metrics_handle = if config.metrics.enabled {
        info!("Initializing Prometheus metrics...");
        metrics::init_metrics().map(Arc::new)
    } else {
        None
    };

    let pipeline = Pipeline::build(&config).await?;
    pipeline.start();

    // Setup signal handlers (SIGTERM, SIGINT for shutdown; SIGHUP for reload)
    let (shutdown_tx, signal_handle) = setup_signal_handlers(ReloadTargets {
        config_path,
        settings: pipeline.settings.clone(),
        registry: pipeline.registry.clone(),
    });
    let mut shutdown_rx = shutdown_tx.subscribe();

    let metrics_route = metrics_handle.map(|handle| (config.metrics.endpoint.as_str(), handle));
    let app = create_router(pipeline.api_state(), metrics_route);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting function log server on {}", addr);
    info!(
        "Configuration: batch size {}, max delay {}ms, {} registered functions, keep {} logs per function",
        config.batching.max_batch_size,
        config.batching.max_delay_ms,
        config.registry.functions.len(),
        config.trimming.max_logs_per_function
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    pipeline.shutdown().await;

    signal_handle.await?;
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the Axum router with all routes and middleware
pub fn create_router(
    state: LogsApiState,
    metrics: Option<(&str, Arc<PrometheusHandle>)>,
) -> Router {
    use handlers::logs_api;

    let api = Router::new()
        .route("/health", get(logs_api::health))
        .route("/api/v1/logs", get(logs_api::list_logs))
        .route(
            "/api/v1/functions/:function_id/logs",
            get(logs_api::get_function_logs).delete(logs_api::delete_function_logs),
        )
        .route(
            "/api/v1/requests/:request_id/logs",
            get(logs_api::get_request_logs),
        )
        .with_state(state);

    let app = match metrics {
        Some((endpoint, handle)) => api.merge(
            Router::new()
                .route(endpoint, get(handlers::metrics_handler::metrics))
                .with_state(handle),
        ),
        None => api,
    };

    app.layer(TraceLayer::new_for_http())
}
