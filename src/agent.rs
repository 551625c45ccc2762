//! Agent lifecycle
//!
//! Builds the pipeline from a validated [`Config`], runs it until shutdown is
//! requested, then tears it down in dependency order: HTTP server,
//! connections, processor (drain), exporter (flush), store.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, OtelConfig, StorageBackend, StorageConfig};
use crate::connection::ConnectionManager;
use crate::constants::timeout::{SHUTDOWN, STARTUP_VALIDATION};
use crate::exporter::{LogWriter, MetricsExporter, OtelSettings, OtelWriter, QueuedExporter};
use crate::processor::{EventProcessor, ProcessorSettings};
use crate::protocol::commands;
use crate::server::{self, HealthState};
use crate::store::{ChannelStateStore, MemoryStore, RedisStore};

/// Build the configured channel state backend and check it answers
pub async fn build_store(config: &StorageConfig) -> Result<Arc<dyn ChannelStateStore>> {
    let store: Arc<dyn ChannelStateStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::with_sweep(config.sweep_interval)),
        StorageBackend::Redis => {
            let redis = config
                .redis
                .as_ref()
                .ok_or_else(|| anyhow!("storage type is 'redis' but [storage.redis] is missing"))?;
            let store = tokio::time::timeout(STARTUP_VALIDATION, RedisStore::connect(&redis.url(), redis.timeout))
                .await
                .map_err(|_| anyhow!("Redis at {}:{} did not answer within {:?}", redis.host, redis.port, STARTUP_VALIDATION))?
                .with_context(|| format!("Failed to connect to Redis at {}:{}", redis.host, redis.port))?;
            Arc::new(store)
        }
    };

    tokio::time::timeout(STARTUP_VALIDATION, store.ping())
        .await
        .map_err(|_| anyhow!("state store did not answer within {:?}", STARTUP_VALIDATION))?
        .context("State store health check failed")?;
    info!(backend = config.backend.as_str(), ttl = ?config.ttl, "State store ready");
    Ok(store)
}

/// OTLP exporter when an endpoint is configured, logging exporter otherwise
pub fn build_exporter(config: &OtelConfig) -> Result<Arc<dyn MetricsExporter>> {
    if config.is_enabled() {
        let writer = OtelWriter::new(&OtelSettings {
            endpoint: config.endpoint.clone(),
            service_name: config.service_name.clone(),
            export_interval: config.export_interval,
            timeout: config.timeout,
        })?;
        Ok(Arc::new(QueuedExporter::new("otlp", writer, config.queue_capacity)))
    } else {
        info!("No OpenTelemetry endpoint configured, logging metric records");
        Ok(Arc::new(QueuedExporter::new("log", LogWriter, config.queue_capacity)))
    }
}

/// The running pipeline
pub struct Agent {
    config: Config,
    cancel: CancellationToken,
}

struct Running {
    manager: Arc<ConnectionManager>,
    processor: Arc<EventProcessor>,
    exporter: Arc<dyn MetricsExporter>,
    store: Arc<dyn ChannelStateStore>,
    http: Option<(CancellationToken, JoinHandle<std::io::Result<()>>)>,
}

impl Agent {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Root token; cancelling it initiates shutdown
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start everything, wait for `shutdown` (or cancellation), then stop
    ///
    /// Fails fast on invalid configuration, an unusable store or exporter,
    /// and when no instance connects within the startup window.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.config.validate()?;
        let running = self.start().await?;

        let started = running.manager.start().await;
        if let Err(e) = started {
            error!(error = %e, "No FreeSWITCH instance reachable");
            self.cancel.cancel();
            if let Err(stop) = bounded(SHUTDOWN, stop(running)).await {
                warn!(error = %stop, "Shutdown after failed startup was not clean");
            }
            return Err(e).context("Startup failed");
        }
        info!(
            connected = running.manager.connected_count(),
            total = running.manager.len(),
            "Agent running"
        );

        tokio::select! {
            _ = shutdown => info!("Shutdown signal received"),
            _ = self.cancel.cancelled() => info!("Shutdown requested"),
        }
        self.cancel.cancel();

        bounded(SHUTDOWN, stop(running)).await
    }

    async fn start(&self) -> Result<Running> {
        let config = &self.config;

        let store = build_store(&config.storage).await?;

        let exporter = build_exporter(&config.opentelemetry)?;
        exporter
            .start(STARTUP_VALIDATION)
            .await
            .context("Failed to start metrics exporter")?;

        let processor = Arc::new(EventProcessor::new(
            Arc::clone(&store),
            Arc::clone(&exporter),
            ProcessorSettings::from_config(config),
        ));
        processor.start()?;

        let events = commands::subscription(config.events.rtcp, config.events.qos);
        let manager = Arc::new(ConnectionManager::new(
            config.instances.clone(),
            config.connection.settings(),
            &events,
            &self.cancel,
        ));
        manager.set_event_forwarder(processor.clone());
        for instance in &config.instances {
            info!(
                instance = %instance.name,
                host = %instance.host,
                port = instance.port.get(),
                "Configured instance"
            );
        }

        let http = if config.http.enabled {
            let addr = config.http.listen_addr();
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind health endpoint on {}", addr))?;
            let token = CancellationToken::new();
            let state = HealthState::new(manager.clone());
            let handle = tokio::spawn(server::serve(listener, state, token.clone()));
            Some((token, handle))
        } else {
            None
        };

        Ok(Running {
            manager,
            processor,
            exporter,
            store,
            http,
        })
    }
}

/// Run a teardown, giving up once `limit` has passed
async fn bounded<F>(limit: Duration, teardown: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout(limit, teardown).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("shutdown did not complete within {:?}", limit)),
    }
}

/// Tear down in dependency order; every step runs even if an earlier one fails
async fn stop(running: Running) -> Result<()> {
    let started = Instant::now();
    let remaining = || SHUTDOWN.saturating_sub(started.elapsed()).max(Duration::from_secs(1));
    let mut failures = Vec::new();

    if let Some((token, handle)) = running.http {
        token.cancel();
        match tokio::time::timeout(remaining(), handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => failures.push(format!("http server: {e}")),
            Ok(Err(e)) => failures.push(format!("http server task: {e}")),
            Err(_) => failures.push("http server: stop timed out".to_string()),
        }
    }

    if let Err(e) = running.manager.stop().await {
        failures.push(format!("connections: {e}"));
    }

    if let Err(e) = running.processor.stop().await {
        failures.push(format!("processor: {e}"));
    }

    if let Err(e) = running.exporter.stop(remaining()).await {
        failures.push(format!("exporter: {e}"));
    }

    if let Err(e) = running.store.close().await {
        failures.push(format!("store: {e}"));
    }

    info!(elapsed = ?started.elapsed(), "Agent stopped");
    if failures.is_empty() {
        Ok(())
    } else {
        for failure in &failures {
            warn!(%failure, "Shutdown step failed");
        }
        Err(anyhow!("shutdown finished with errors: {}", failures.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_memory_store() {
        let store = build_store(&StorageConfig::default()).await.unwrap();
        store.ping().await.unwrap();
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_without_section_is_error() {
        let config = StorageConfig {
            backend: StorageBackend::Redis,
            ..StorageConfig::default()
        };
        assert!(build_store(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_log_exporter_when_no_endpoint() {
        let exporter = build_exporter(&OtelConfig::default()).unwrap();
        exporter.start(Duration::from_secs(1)).await.unwrap();
        exporter.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_teardown_is_abandoned_after_limit() {
        let begun = Instant::now();
        let err = bounded(SHUTDOWN, std::future::pending::<Result<()>>()).await.unwrap_err();

        assert!(err.to_string().contains("did not complete"), "{err}");
        assert!(begun.elapsed() >= SHUTDOWN);
        assert!(begun.elapsed() < SHUTDOWN + Duration::from_secs(1));
        assert!(bounded(SHUTDOWN, async { Ok(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_config() {
        let agent = Agent::new(Config::default());
        assert!(agent.run(std::future::ready(())).await.is_err());
    }
}
