use media_recognition::{
    config::AppConfig,
    db::{self, media_queries::PgMediaStore, queries::PgJobRegistry},
    routes,
    services::{
        pipeline::AnalysisPipeline, queue::RedisCompletionQueue, rekognition::RekognitionClient,
        submitter::AnalysisSubmitter, worker::CompletionWorker,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting analysis result worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    // The worker serves its own scrape endpoint
    let metrics_addr: SocketAddr = config
        .worker_metrics_addr
        .parse()
        .expect("Invalid WORKER_METRICS_ADDR");
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .expect("Failed to install Prometheus exporter");
    routes::metrics::describe();

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let provider =
        Arc::new(RekognitionClient::from_config(&config).expect("Failed to initialize Rekognition client"));

    let queue = RedisCompletionQueue::new(&config.redis_url)
        .expect("Failed to initialize completion queue");

    let pipeline = AnalysisPipeline::new(
        AnalysisSubmitter::new(config.recognition(), provider.clone()),
        Arc::new(PgJobRegistry::new(db_pool.clone())),
        Arc::new(PgMediaStore::new(db_pool)),
        provider,
        config.provider_timeout(),
    );

    let worker = CompletionWorker::new(Arc::new(pipeline), Arc::new(queue));

    tracing::info!("Worker ready, starting completion processing loop");

    loop {
        match worker.process_next().await {
            Ok(true) => {
                tracing::debug!("Completion processed, checking for next task");
            }
            Ok(false) => {
                tracing::trace!("No completions available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing completion, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}
