//! Worker loop: claims queued jobs and drives each through the pipeline to a
//! terminal state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::SqlitePool;

use crate::db::queries;
use crate::services::events::EventPublisher;
use crate::services::nutrition_db::NutritionDb;
use crate::services::pipeline::{self, PipelineConfig, PipelineError};
use crate::services::storage::LocalImageStore;
use crate::services::vision::VisionModels;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle sleep between claim attempts when the queue is empty.
    pub poll_interval: Duration,
    /// Hard deadline for one job, stage timeouts included. A job that blows
    /// it is failed, never left in progress.
    pub pipeline_timeout: Duration,
}

pub struct Worker<M: VisionModels> {
    pool: SqlitePool,
    images: Arc<LocalImageStore>,
    models: M,
    nutrition: Arc<NutritionDb>,
    events: Arc<EventPublisher>,
    pipeline: PipelineConfig,
    cfg: WorkerConfig,
}

impl<M: VisionModels> Worker<M> {
    pub fn new(
        pool: SqlitePool,
        images: Arc<LocalImageStore>,
        models: M,
        nutrition: Arc<NutritionDb>,
        events: Arc<EventPublisher>,
        pipeline: PipelineConfig,
        cfg: WorkerConfig,
    ) -> Self {
        Self { pool, images, models, nutrition, events, pipeline, cfg }
    }

    /// Claim-and-process forever. Store errors are logged and retried after
    /// the idle interval rather than crashing the loop.
    pub async fn run(&self) {
        tracing::info!(poll_interval = ?self.cfg.poll_interval, "worker loop started");
        loop {
            match self.process_next().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.cfg.poll_interval).await,
                Err(e) => {
                    tracing::error!(error = %e, "worker iteration failed");
                    tokio::time::sleep(self.cfg.poll_interval).await;
                }
            }
        }
    }

    /// Process at most one job; the uploaded image is removed once the job
    /// is terminal. Returns `false` when the queue was empty.
    pub async fn process_next(&self) -> Result<bool, queries::StoreError> {
        let Some(job) = queries::claim_next_job(&self.pool).await? else {
            return Ok(false);
        };
        self.events.publish(&job);
        if let Ok(depth) = queries::count_queued(&self.pool).await {
            metrics::gauge!("analysis_queue_depth").set(depth as f64);
        }

        let started = Instant::now();
        tracing::info!(job_id = %job.id, image_key = %job.image_key, "job claimed");

        let outcome = match tokio::time::timeout(
            self.cfg.pipeline_timeout,
            pipeline::analyze_image(
                &self.images,
                &self.models,
                &self.nutrition,
                &job.image_key,
                &self.pipeline,
            ),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(PipelineError::PipelineTimeout(self.cfg.pipeline_timeout)),
        };
        let elapsed = started.elapsed();
        metrics::histogram!("analysis_pipeline_seconds").record(elapsed.as_secs_f64());

        let terminal = match outcome {
            Ok(result) => {
                let done = queries::complete_job(&self.pool, job.id, &result).await?;
                metrics::counter!("analysis_jobs_completed").increment(1);
                tracing::info!(job_id = %job.id, elapsed_ms = elapsed.as_millis() as u64, "job done");
                done
            }
            Err(e) => {
                let error = format!("{}: {e}", e.reason());
                let failed = queries::fail_job(&self.pool, job.id, &error).await?;
                metrics::counter!("analysis_jobs_failed", "reason" => e.reason()).increment(1);
                tracing::warn!(job_id = %job.id, error = %error, "job failed");
                failed
            }
        };
        self.events.publish(&terminal);

        // Terminal records are immutable, so the upload has no further
        // reader. Cleanup failure is not worth failing the iteration over.
        if let Err(e) = self.images.delete(&job.image_key).await {
            tracing::debug!(job_id = %job.id, key = %job.image_key, error = %e, "upload cleanup skipped");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::queries::{create_job, get_job};
    use crate::models::analysis::AnalysisResult;
    use crate::models::job::JobStatus;
    use crate::models::nutrition::PortionLabel;
    use crate::services::pipeline::testutil::{dish, test_config, test_nutrition_db, MockModels};
    use crate::services::vision::FoodCheck;
    use uuid::Uuid;

    async fn test_pool() -> SqlitePool {
        let path = std::env::temp_dir().join(format!("mealscan-worker-{}.db", Uuid::new_v4()));
        let pool = crate::db::init_pool(&format!("sqlite:{}", path.display()))
            .await
            .expect("open test db");
        crate::db::run_migrations(&pool).await.expect("migrate test db");
        pool
    }

    fn test_store() -> Arc<LocalImageStore> {
        let dir = std::env::temp_dir().join(format!("mealscan-worker-img-{}", Uuid::new_v4()));
        Arc::new(LocalImageStore::new(dir).expect("create test store"))
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([180, 120, 40]));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encode test png");
        out.into_inner()
    }

    fn worker_with(pool: SqlitePool, images: Arc<LocalImageStore>, models: MockModels) -> Worker<MockModels> {
        let events = Arc::new(EventPublisher::new(pool.clone(), Duration::from_millis(20)));
        Worker::new(
            pool,
            images,
            models,
            Arc::new(test_nutrition_db()),
            events,
            test_config(),
            WorkerConfig {
                poll_interval: Duration::from_millis(20),
                pipeline_timeout: Duration::from_secs(10),
            },
        )
    }

    #[tokio::test]
    async fn empty_queue_is_a_noop() {
        let pool = test_pool().await;
        let worker = worker_with(
            pool,
            test_store(),
            MockModels::new(
                FoodCheck { is_food: true, confidence: 0.9 },
                dish("pho", PortionLabel::Medium, 0.9),
            ),
        );
        assert!(!worker.process_next().await.unwrap());
    }

    #[tokio::test]
    async fn recognized_dish_completes_with_a_food_result() {
        let pool = test_pool().await;
        let images = test_store();
        let key = images.save_bytes("lunch.png", &png_bytes()).await.unwrap();
        let job = create_job(&pool, &key).await.unwrap();

        let worker = worker_with(
            pool.clone(),
            images,
            MockModels::new(
                FoodCheck { is_food: true, confidence: 0.95 },
                dish("pho", PortionLabel::Medium, 0.9),
            ),
        );
        assert!(worker.process_next().await.unwrap());

        let done = get_job(&pool, job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Done);
        match done.result.unwrap() {
            AnalysisResult::Food(analysis) => {
                assert_eq!(analysis.dish_name, "Pho");
                assert_eq!(
                    analysis.nutrition.get(crate::models::nutrition::Nutrient::Calories),
                    Some(160.0)
                );
            }
            other => panic!("expected Food, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_food_completes_without_running_later_stages() {
        let pool = test_pool().await;
        let images = test_store();
        let key = images.save_bytes("cat.png", &png_bytes()).await.unwrap();
        let job = create_job(&pool, &key).await.unwrap();

        let mut models = MockModels::new(
            FoodCheck { is_food: false, confidence: 0.08 },
            dish("pho", PortionLabel::Medium, 0.9),
        );
        // A broken dish model must not matter once the gate short-circuits.
        models.dish = Err("vlm offline".to_string());

        let worker = worker_with(pool.clone(), images, models);
        assert!(worker.process_next().await.unwrap());

        let done = get_job(&pool, job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Done);
        assert!(matches!(
            done.result,
            Some(AnalysisResult::NotFood { confidence, .. }) if confidence == 0.08
        ));
    }

    #[tokio::test]
    async fn terminal_jobs_release_their_upload() {
        let pool = test_pool().await;
        let images = test_store();
        let key = images.save_bytes("lunch.png", &png_bytes()).await.unwrap();
        create_job(&pool, &key).await.unwrap();

        let worker = worker_with(
            pool,
            images.clone(),
            MockModels::new(
                FoodCheck { is_food: true, confidence: 0.95 },
                dish("pho", PortionLabel::Medium, 0.9),
            ),
        );
        assert!(worker.process_next().await.unwrap());

        assert!(matches!(
            images.read_bytes(&key).await.unwrap_err(),
            crate::services::storage::StorageError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn missing_image_fails_the_job_with_a_reason() {
        let pool = test_pool().await;
        let job = create_job(&pool, "no-such-key.png").await.unwrap();

        let worker = worker_with(
            pool.clone(),
            test_store(),
            MockModels::new(
                FoodCheck { is_food: true, confidence: 0.9 },
                dish("pho", PortionLabel::Medium, 0.9),
            ),
        );
        assert!(worker.process_next().await.unwrap());

        let failed = get_job(&pool, job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error.unwrap().starts_with("unavailable_image"));
        assert!(failed.result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_overrun_fails_with_pipeline_timeout() {
        let pool = test_pool().await;
        let images = test_store();
        let key = images.save_bytes("slow.png", &png_bytes()).await.unwrap();
        let job = create_job(&pool, &key).await.unwrap();

        let mut models = MockModels::new(
            FoodCheck { is_food: true, confidence: 0.9 },
            dish("pho", PortionLabel::Medium, 0.9),
        );
        models.gate_delay = Duration::from_secs(3600);

        let events = Arc::new(EventPublisher::new(pool.clone(), Duration::from_millis(20)));
        let mut pipeline = test_config();
        pipeline.gate_timeout = Duration::from_secs(7200);
        let worker = Worker::new(
            pool.clone(),
            images,
            models,
            Arc::new(test_nutrition_db()),
            events,
            pipeline,
            WorkerConfig {
                poll_interval: Duration::from_millis(20),
                pipeline_timeout: Duration::from_secs(2),
            },
        );
        assert!(worker.process_next().await.unwrap());

        let failed = get_job(&pool, job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error.unwrap().starts_with("pipeline_timeout"));
    }
}
