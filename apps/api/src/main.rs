use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use match_pipeline::config::{Config, RegistryBackend};
use match_pipeline::db::{create_pool, run_migrations};
use match_pipeline::features::{EmbeddingProvider, HashingEmbedder, HttpEmbeddingClient};
use match_pipeline::pipeline::{MatchingPipeline, PipelineDeps};
use match_pipeline::registry::{InMemoryModelRegistry, ModelRegistry, PgModelRegistry};
use match_pipeline::routes::build_router;
use match_pipeline::serving::RedisPredictionCache;
use match_pipeline::state::AppState;
use match_pipeline::training::LogisticRegressionTrainer;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing or malformed env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "match_pipeline={},tower_http={}",
                &config.rust_log, &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting match pipeline v{}", env!("CARGO_PKG_VERSION"));

    // Model registry
    let registry: Arc<dyn ModelRegistry> = match config.registry_backend {
        RegistryBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres registry")?;
            let pool = create_pool(url).await?;
            run_migrations(&pool).await?;
            Arc::new(PgModelRegistry::new(pool))
        }
        RegistryBackend::Memory => {
            warn!("Using the in-memory model registry; models do not survive a restart");
            Arc::new(InMemoryModelRegistry::new())
        }
    };

    // Embedding provider
    let settings = &config.pipeline;
    let embedder: Arc<dyn EmbeddingProvider> = match &config.embedding_service_url {
        Some(url) => {
            info!("Embedding service at {url} (model: {})", settings.embedding_model);
            Arc::new(HttpEmbeddingClient::new(
                url.clone(),
                settings.embedding_model.clone(),
                settings.embedding_dimension,
                settings.embedding_timeout,
            )?)
        }
        None => {
            info!("No EMBEDDING_SERVICE_URL; using the local hashing embedder");
            Arc::new(HashingEmbedder::new(
                settings.embedding_model.clone(),
                settings.embedding_dimension,
            ))
        }
    };

    let mut deps = PipelineDeps::new(registry, Arc::new(LogisticRegressionTrainer), embedder);

    // Prediction cache (optional)
    if let Some(url) = &config.redis_url {
        let client = redis::Client::open(url.as_str())?;
        deps = deps.with_prediction_cache(Arc::new(RedisPredictionCache::new(client)));
        info!("Redis prediction cache enabled");
    }

    let pipeline = MatchingPipeline::new(config.pipeline.clone(), deps);
    pipeline.init().await?;

    spawn_monitoring(pipeline.clone(), config.monitor_interval);

    let state = AppState {
        pipeline,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Runs a monitoring cycle every `period`; the first cycle runs one period after startup.
fn spawn_monitoring(pipeline: MatchingPipeline, period: Duration) {
    info!("Model monitoring every {}s", period.as_secs());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = pipeline.monitor_models(Utc::now()).await {
                warn!("Monitoring cycle failed: {e}");
            }
        }
    });
}
