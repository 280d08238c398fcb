//! Gazette - Campaign engine entry point

use anyhow::{bail, Result};
use gazette_api::AppState;
use gazette_common::config::{Config, LoggingConfig};
use gazette_core::{
    BatchSender, CampaignManager, LogTransport, MailTransport, Metrics, QueueCounters,
    QueueStatusReporter, SmtpMailTransport, StatsAggregator, TemplateRenderer, TrackingCodec,
    TrackingRecorder,
};
use gazette_storage::{DatabasePool, MemoryStore, Repositories};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Gazette...");

    if config.tracking.secret == gazette_common::config::DEFAULT_TRACKING_SECRET {
        warn!("tracking.secret is the built-in default; tracking links can be forged");
    }

    // Initialize storage
    let (repos, db_pool) = match config.database.backend.as_str() {
        "memory" => {
            warn!("Using the in-memory store; campaigns are lost on restart");
            (Repositories::memory(MemoryStore::new()), None)
        }
        "postgres" => {
            let db_pool = DatabasePool::new(&config.database).await?;
            db_pool.migrate().await?;
            (Repositories::postgres(db_pool.clone()), Some(db_pool))
        }
        other => bail!("Unsupported database backend: {}", other),
    };

    let shutdown = CancellationToken::new();
    let counters = Arc::new(QueueCounters::new());
    let metrics = Metrics::new()?;
    let codec = Arc::new(TrackingCodec::new(&config.tracking)?);

    let manager = Arc::new(
        CampaignManager::new(repos.clone(), counters.clone()).with_shutdown(shutdown.clone()),
    );

    // Mail transport
    let transport: Arc<dyn MailTransport> = if config.smtp.enabled {
        Arc::new(SmtpMailTransport::new(&config.smtp))
    } else {
        warn!("SMTP disabled: messages are logged, not relayed");
        Arc::new(LogTransport)
    };

    // Start batch sender
    let sender = BatchSender::from_config(
        repos.clone(),
        manager.clone(),
        TemplateRenderer::new(codec.clone()),
        transport,
        counters.clone(),
        metrics.clone(),
        &config,
    );
    let policy = sender.policy();
    let sender_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = sender.run(shutdown).await {
                error!(error = %e, "Batch sender error");
            }
        })
    };

    // Start API server
    let state = AppState {
        manager,
        recorder: TrackingRecorder::new(codec, repos.clone(), counters.clone(), metrics.clone()),
        reporter: QueueStatusReporter::new(counters, policy),
        stats: StatsAggregator::new(repos),
        metrics,
        api: config.api.clone(),
        db_pool,
    };
    let app = gazette_api::create_router(state);

    let addr = format!("{}:{}", config.server.bind_address, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Starting API server");

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal.cancel();
    });

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
        .await?;

    // The sender releases claimed jobs before returning
    shutdown.cancel();
    if let Err(e) = sender_handle.await {
        error!(error = %e, "Batch sender task failed");
    }

    info!("Gazette shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
