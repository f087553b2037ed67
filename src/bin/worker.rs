use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use mealscan::config::AppConfig;
use mealscan::db;
use mealscan::services::{
    events::EventPublisher, nutrition_db::NutritionDb, storage::LocalImageStore,
    vision::HttpVisionClient, worker::Worker,
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

    tracing::info!("Starting mealscan worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to SQLite job store");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize services
    tracing::info!("Initializing services");
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

    let models = HttpVisionClient::new(&config.vision_base_url);
    let events = Arc::new(EventPublisher::new(db_pool.clone(), config.sse_poll_interval()));

    let worker = Worker::new(
        db_pool,
        images,
        models,
        nutrition,
        events,
        config.pipeline_config(),
        config.worker_config(),
    );

    tracing::info!("Worker ready, starting job processing loop");
    worker.run().await;
}
