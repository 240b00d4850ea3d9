use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use media_recognition::{
    app_state::AppState,
    config::AppConfig,
    db::{self, media_queries::PgMediaStore, queries::PgJobRegistry},
    routes,
    services::{
        certificates::HttpCertificateSource, pipeline::AnalysisPipeline,
        queue::RedisCompletionQueue, rekognition::RekognitionClient,
        submitter::AnalysisSubmitter, webhook::WebhookAuthenticator,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing media-recognition server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Connecting to Redis completion queue");
    let queue = RedisCompletionQueue::new(&config.redis_url)
        .expect("Failed to initialize completion queue");

    tracing::info!(region = %config.aws_region, "Initializing Rekognition client");
    let provider =
        Arc::new(RekognitionClient::from_config(&config).expect("Failed to initialize Rekognition client"));

    let registry = Arc::new(PgJobRegistry::new(db_pool.clone()));
    let media = Arc::new(PgMediaStore::new(db_pool));

    let recognition = config.recognition();
    if let Err(e) = recognition.notification_channel() {
        tracing::warn!(error = %e, "Asynchronous analysis is not configured");
    }

    let pipeline = AnalysisPipeline::new(
        AnalysisSubmitter::new(recognition, provider.clone()),
        registry,
        media,
        provider,
        config.provider_timeout(),
    );

    let certificates = HttpCertificateSource::new(config.provider_timeout())
        .expect("Failed to initialize certificate client");
    let authenticator = WebhookAuthenticator::new(config.webhook(), Arc::new(certificates));

    let http = reqwest::Client::builder()
        .timeout(config.provider_timeout())
        .build()
        .expect("Failed to initialize HTTP client");

    let state = AppState::new(pipeline, authenticator, Arc::new(queue), http);

    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    tracing::info!("Starting media-recognition on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
