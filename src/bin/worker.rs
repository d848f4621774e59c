use photo_findings::{
    config::AppConfig,
    db::{self, queries::PgPhotoStore},
    services::{
        label_detector::LabelDetectorClient,
        orchestrator::VisionOrchestrator,
        storage::R2Client,
        vision::VisionClient,
        worker::Worker,
    },
    shutdown,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting photo analysis worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");
    let worker_id = config.worker_id();

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        tracing::info!(%addr, "Serving worker metrics");
    }

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing services");
    let r2_client = R2Client::new(
        &config.r2_bucket,
        &config.r2_endpoint,
        &config.r2_access_key,
        &config.r2_secret_key,
    )
    .expect("Failed to initialize R2 client");

    let detector = LabelDetectorClient::new(
        &config.detector_endpoint,
        &config.detector_api_key,
        config.detector_settings(),
    )
    .expect("Failed to initialize label detector client");

    let vision = VisionClient::new(
        &config.vision_api_base,
        &config.vision_api_key,
        &config.vision_model,
        Duration::from_secs(config.vision_timeout_secs),
    )
    .expect("Failed to initialize vision client");

    if config.hint_labels_enabled {
        tracing::info!(
            head_start_ms = config.hint_head_start_ms,
            timeout_ms = config.hint_timeout_ms,
            "Detector hint labels enabled; each photo makes two detector calls"
        );
    }

    let orchestrator = VisionOrchestrator::new(
        Arc::new(r2_client),
        Arc::new(detector),
        Arc::new(vision),
        config.orchestrator_settings(),
    );

    let worker = Worker::new(
        worker_id,
        Arc::new(PgPhotoStore::new(db_pool)),
        Arc::new(orchestrator),
        config.worker_settings(),
    );

    tracing::info!(worker_id = %worker.id(), "Worker ready, starting photo processing loop");

    worker.run(shutdown::cancel_on_shutdown()).await;
}
