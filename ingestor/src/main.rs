use axum::{routing::get, Router};
use sigfox_ingestor::batching::{self, ChannelArchive};
use sigfox_ingestor::config::Config;
use sigfox_ingestor::db::{self, PgKindStore};
use sigfox_ingestor::{metrics, mqtt, rest, Pipeline};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Sigfox Ingestor");
    info!("MQTT broker: {}:{} ({})", config.mqtt_broker, config.mqtt_port, config.mqtt_topic);
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", config.redacted_database_url());
    info!("Persist mode: {:?}", config.persist_mode);

    let registry = match config.load_registry() {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to load device registry: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = registry.ensure_consistent() {
        error!("Device registry rejected: {}", e);
        std::process::exit(1);
    }
    info!("Device registry ready with {} devices", registry.len());
    let registry = Arc::new(registry);

    if let Err(e) = metrics::init_metrics() {
        error!("Failed to register metrics: {}", e);
        std::process::exit(1);
    }

    let pool = match db::make_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    // Bounded channel feeding the archive batcher
    info!("Channel capacity: {}", config.channel_capacity);
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let batcher_pool = pool.clone();
    let (batch_size, batch_timeout_ms) = (config.batch_size, config.batch_timeout_ms);
    let batcher_handle = tokio::spawn(async move {
        batching::run_batcher(rx, batcher_pool, batch_size, batch_timeout_ms).await;
    });

    let pipeline = Arc::new(Pipeline::new(
        registry.clone(),
        Arc::new(ChannelArchive::new(tx)),
        Arc::new(PgKindStore::new(pool.clone(), config.persist_mode)),
    ));

    let client_id = format!("ingestor-{}", uuid::Uuid::new_v4());
    let mqtt_pipeline = pipeline.clone();
    let (broker, port, topic) = (
        config.mqtt_broker.clone(),
        config.mqtt_port,
        config.mqtt_topic.clone(),
    );
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt::run_mqtt(broker, port, client_id, topic, mqtt_pipeline).await {
            error!("MQTT task failed: {}", e);
        }
    });

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::ingest_router(pipeline))
        .merge(rest::readings_router(pool, registry));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    tokio::select! {
        _ = mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = batcher_handle => {
            error!("Batcher task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
