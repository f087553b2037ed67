use std::time::Duration;

use serde::Deserialize;

use crate::services::pipeline::PipelineConfig;
use crate::services::worker::WorkerConfig;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address. Unused by worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite connection string; the database doubles as the job queue.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Directory for uploaded images.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// Path to the nutrition reference dataset (JSON).
    #[serde(default = "default_nutrition_db_path")]
    pub nutrition_db_path: String,

    /// Base URL of the vision inference sidecar.
    #[serde(default = "default_vision_base_url")]
    pub vision_base_url: String,

    /// Run a worker loop inside the API server process.
    #[serde(default)]
    pub run_worker: bool,

    /// Maximum accepted upload size in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Minimum gate confidence to treat the image as food.
    #[serde(default = "default_food_threshold")]
    pub food_threshold: f64,

    /// Minimum recognition confidence to keep a specific dish name.
    #[serde(default = "default_dish_threshold")]
    pub dish_threshold: f64,

    /// Minimum fuzzy-match score to bind a dish to a dataset entry.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,

    /// Relative tolerance for the macro-derived calorie cross-check.
    #[serde(default = "default_calorie_tolerance")]
    pub calorie_tolerance: f64,

    /// Longest image side fed to the models.
    #[serde(default = "default_image_max_side")]
    pub image_max_side: u32,

    #[serde(default = "default_gate_timeout_ms")]
    pub gate_timeout_ms: u64,
    #[serde(default = "default_recognition_timeout_ms")]
    pub recognition_timeout_ms: u64,
    #[serde(default = "default_grounding_timeout_ms")]
    pub grounding_timeout_ms: u64,
    #[serde(default = "default_validation_timeout_ms")]
    pub validation_timeout_ms: u64,

    /// Whole-job deadline; a job that exceeds it fails with a timeout error.
    #[serde(default = "default_pipeline_timeout_ms")]
    pub pipeline_timeout_ms: u64,

    /// Worker idle sleep between claim attempts.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Event stream polling fallback interval.
    #[serde(default = "default_sse_poll_interval_ms")]
    pub sse_poll_interval_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_url() -> String {
    "sqlite:data/mealscan.db".to_string()
}

fn default_upload_dir() -> String {
    "data/uploads".to_string()
}

fn default_nutrition_db_path() -> String {
    "data/nutrition.json".to_string()
}

fn default_vision_base_url() -> String {
    "http://127.0.0.1:8089".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_food_threshold() -> f64 {
    0.5
}

fn default_dish_threshold() -> f64 {
    0.6
}

fn default_match_threshold() -> f64 {
    0.75
}

fn default_calorie_tolerance() -> f64 {
    0.25
}

fn default_image_max_side() -> u32 {
    384
}

fn default_gate_timeout_ms() -> u64 {
    20_000
}

fn default_recognition_timeout_ms() -> u64 {
    60_000
}

fn default_grounding_timeout_ms() -> u64 {
    10_000
}

fn default_validation_timeout_ms() -> u64 {
    5_000
}

fn default_pipeline_timeout_ms() -> u64 {
    120_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_sse_poll_interval_ms() -> u64 {
    500
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            food_threshold: self.food_threshold,
            dish_threshold: self.dish_threshold,
            match_threshold: self.match_threshold,
            calorie_tolerance: self.calorie_tolerance,
            image_max_side: self.image_max_side,
            gate_timeout: Duration::from_millis(self.gate_timeout_ms),
            recognition_timeout: Duration::from_millis(self.recognition_timeout_ms),
            grounding_timeout: Duration::from_millis(self.grounding_timeout_ms),
            validation_timeout: Duration::from_millis(self.validation_timeout_ms),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            pipeline_timeout: Duration::from_millis(self.pipeline_timeout_ms),
        }
    }

    pub fn sse_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sse_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> AppConfig {
        envy::from_iter::<_, AppConfig>(std::iter::empty::<(String, String)>())
            .expect("defaults should satisfy the config")
    }

    #[test]
    fn config_loads_entirely_from_defaults() {
        let cfg = defaults();
        assert_eq!(cfg.bind_addr, "0.0.0.0:3000");
        assert_eq!(cfg.food_threshold, 0.5);
        assert_eq!(cfg.match_threshold, 0.75);
        assert!(!cfg.run_worker);
    }

    #[test]
    fn durations_come_from_millisecond_knobs() {
        let cfg = defaults();
        assert_eq!(cfg.pipeline_config().gate_timeout, Duration::from_secs(20));
        assert_eq!(cfg.worker_config().pipeline_timeout, Duration::from_secs(120));
        assert_eq!(cfg.sse_poll_interval(), Duration::from_millis(500));
    }
}
