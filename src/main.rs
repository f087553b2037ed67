use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use mealscan::app_state::AppState;
use mealscan::config::AppConfig;
use mealscan::services::{
    events::EventPublisher,
    nutrition_db::NutritionDb,
    storage::LocalImageStore,
    vision::HttpVisionClient,
    worker::Worker,
};
use mealscan::{db, routes};

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

    tracing::info!("Initializing mealscan server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("analysis_jobs_submitted", "Total analysis jobs submitted");
    metrics::describe_counter!("analysis_jobs_completed", "Total analysis jobs completed");
    metrics::describe_counter!("analysis_jobs_failed", "Total analysis jobs that failed");
    metrics::describe_histogram!(
        "analysis_pipeline_seconds",
        "Time to run one job through the analysis pipeline"
    );
    metrics::describe_gauge!("analysis_queue_depth", "Jobs currently waiting to be claimed");

    // Initialize database connection pool
    tracing::info!("Connecting to SQLite job store");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize image store and nutrition dataset
    let images = Arc::new(
        LocalImageStore::new(&config.upload_dir).expect("Failed to initialize image store"),
    );
    let nutrition = Arc::new(
        NutritionDb::load(&config.nutrition_db_path).expect("Failed to load nutrition dataset"),
    );
    tracing::info!(
        version = nutrition.version(),
        entries = nutrition.len(),
        "Nutrition dataset loaded"
    );

    let events = Arc::new(EventPublisher::new(db_pool.clone(), config.sse_poll_interval()));

    // Optional in-process worker for single-binary deployments
    if config.run_worker {
        tracing::info!("Starting in-process worker loop");
        let worker = Worker::new(
            db_pool.clone(),
            images.clone(),
            HttpVisionClient::new(&config.vision_base_url),
            nutrition.clone(),
            events.clone(),
            config.pipeline_config(),
            config.worker_config(),
        );
        tokio::spawn(async move { worker.run().await });
    }

    // Create shared application state
    let state = AppState::new(db_pool, images, nutrition, events);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/uploads", post(routes::analyze::upload_image))
        .route("/api/v1/analyze", post(routes::analyze::submit_analysis))
        .route("/api/v1/jobs/{job_id}", get(routes::analyze::get_job_status))
        .route("/api/v1/jobs/{job_id}/events", get(routes::analyze::job_events))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes));

    tracing::info!("Starting mealscan on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
