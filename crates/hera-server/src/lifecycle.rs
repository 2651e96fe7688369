//! Process lifecycle owner.
//!
//! Builds every component from one [`GatewayConfig`], runs the server and
//! the sweep task, and tears them down in order on shutdown:
//!
//! 1. Stop accepting and fail readiness
//! 2. Drain open connections, bounded by `server.shutdown_timeout_secs`
//! 3. Stop the sweeper
//! 4. Close the log sink and wait for it to flush

use std::sync::Arc;
use std::time::Duration;

use hera_config::GatewayConfig;
use hera_telemetry::{LogSink, StructuredLogger};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::ServerError;
use crate::gateway::{Gateway, GatewayBuilder};
use crate::server::Server;
use crate::shutdown::ShutdownSignal;

const SINK_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const SWEEPER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the gateway from startup to shutdown.
///
/// # Example
///
/// ```rust,ignore
/// use hera_config::ConfigLoader;
/// use hera_server::{Lifecycle, ShutdownSignal};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ConfigLoader::new().with_defaults().load()?;
///     Lifecycle::new(config)?.run(ShutdownSignal::with_os_signals()).await?;
///     Ok(())
/// }
/// ```
pub struct Lifecycle {
    config: GatewayConfig,
    gateway: Arc<Gateway>,
    sink_worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("gateway", &self.gateway)
            .field("sink", &self.sink_worker.is_some())
            .finish_non_exhaustive()
    }
}

impl Lifecycle {
    /// Builds the gateway from configuration with default collaborators.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        let gateway = Gateway::builder(config.clone()).build()?;
        Ok(Self::from_gateway(config, gateway))
    }

    /// Builds the gateway with a structured-log sink.
    ///
    /// Must be called inside a Tokio runtime; the sink's delivery task is
    /// spawned immediately.
    pub fn with_sink(config: GatewayConfig, sink: Arc<dyn LogSink>) -> Result<Self, ServerError> {
        let logger_config = config
            .logging
            .logger_config(config.server.is_development());
        let (logger, worker) = StructuredLogger::with_sink(logger_config, sink);
        let gateway = GatewayBuilder::new(config.clone())
            .logger(Arc::new(logger))
            .build()?;
        let mut lifecycle = Self::from_gateway(config, gateway);
        lifecycle.sink_worker = Some(worker);
        Ok(lifecycle)
    }

    /// Wraps an already assembled gateway.
    #[must_use]
    pub fn from_gateway(config: GatewayConfig, gateway: Gateway) -> Self {
        Self {
            config,
            gateway: Arc::new(gateway),
            sink_worker: None,
        }
    }

    /// Returns the gateway.
    #[must_use]
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Serves until `shutdown` triggers, then tears everything down.
    ///
    /// # Errors
    ///
    /// Returns the server error if the listener cannot be bound. Teardown
    /// still runs.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let server = Server::new(Arc::clone(&self.gateway), self.config.server.clone())
            .expose_metrics(self.config.metrics.enabled && self.config.metrics.expose_endpoint);
        let listener = match server.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                self.teardown(None).await;
                return Err(e);
            }
        };
        self.serve(server, listener, shutdown).await
    }

    /// Serves an already bound listener until `shutdown` triggers.
    pub async fn serve_listener(
        self,
        listener: tokio::net::TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let server = Server::new(Arc::clone(&self.gateway), self.config.server.clone())
            .expose_metrics(self.config.metrics.enabled && self.config.metrics.expose_endpoint);
        self.serve(server, listener, shutdown).await
    }

    async fn serve(
        self,
        server: Server,
        listener: tokio::net::TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let interval = Duration::from_secs(self.config.maintenance.sweep_interval_secs.max(1));
        let sweeper = self.gateway.sweeper(interval).spawn(shutdown.clone());
        info!(
            sweep_interval_secs = interval.as_secs(),
            "gateway started"
        );

        let result = server.serve(listener, shutdown.clone()).await;
        shutdown.trigger();
        self.teardown(Some(sweeper)).await;
        result
    }

    async fn teardown(self, sweeper: Option<JoinHandle<()>>) {
        if let Some(sweeper) = sweeper {
            if tokio::time::timeout(SWEEPER_STOP_TIMEOUT, sweeper).await.is_err() {
                warn!("sweeper did not stop in time");
            }
        }

        self.gateway.logger().close_sink();
        if let Some(worker) = self.sink_worker {
            if tokio::time::timeout(SINK_FLUSH_TIMEOUT, worker).await.is_err() {
                warn!("log sink did not flush in time");
            }
        }

        let stats = self.gateway.admission().stats();
        info!(
            admitted = stats.admitted,
            rejected = stats.total_rejections(),
            "gateway stopped"
        );
    }
}
