use std::sync::Arc;

use sqlx::SqlitePool;

use crate::services::{
    events::EventPublisher, nutrition_db::NutritionDb, storage::LocalImageStore,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub images: Arc<LocalImageStore>,
    pub nutrition: Arc<NutritionDb>,
    pub events: Arc<EventPublisher>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        images: Arc<LocalImageStore>,
        nutrition: Arc<NutritionDb>,
        events: Arc<EventPublisher>,
    ) -> Self {
        Self { db, images, nutrition, events }
    }
}
