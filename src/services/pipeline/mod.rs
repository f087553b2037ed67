//! The analysis stage chain: food gate → dish recognition → nutrition
//! grounding → validation.
//!
//! Stages run strictly in order. A stage may short-circuit the chain with a
//! final result, continue with a degradation note, or fail; recognition and
//! grounding failures are absorbed by generic fallbacks, while gate and
//! validation failures (and the image being unavailable) fail the job.

pub mod gate;
pub mod ground;
pub mod recognize;
pub mod validate;

use std::time::Duration;

use tokio::time::timeout;

use crate::models::analysis::AnalysisResult;
use crate::services::nutrition_db::NutritionDb;
use crate::services::storage::LocalImageStore;
use crate::services::vision::VisionModels;

/// Outcome of one pipeline stage.
#[derive(Debug)]
pub enum StageOutcome<T> {
    /// Stage succeeded; hand its output to the next stage.
    Continue(T),
    /// Stage produced the final result; skip all remaining stages.
    ShortCircuit(AnalysisResult),
    /// Stage succeeded with a caveat to record on the final result.
    Degrade(T, String),
    /// Stage failed; subject to the per-stage fallback policy.
    Fail(PipelineError),
}

/// Unrecoverable and stage-local pipeline failures.
///
/// `RecognitionFailure` and `GroundingFailure` never escape the chain: the
/// fallback policy converts them into degraded output plus a note.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("image unavailable: {0}")]
    UnavailableImage(String),

    #[error("food gate failed: {0}")]
    GateFailure(String),

    #[error("dish recognition failed: {0}")]
    RecognitionFailure(String),

    #[error("nutrition grounding failed: {0}")]
    GroundingFailure(String),

    #[error("validation failed: {0}")]
    ValidationFailure(String),

    #[error("pipeline exceeded its {0:?} deadline")]
    PipelineTimeout(Duration),
}

impl PipelineError {
    /// Stable machine-readable reason stored alongside the failed job.
    pub fn reason(&self) -> &'static str {
        match self {
            PipelineError::UnavailableImage(_) => "unavailable_image",
            PipelineError::GateFailure(_) => "gate_failure",
            PipelineError::RecognitionFailure(_) => "recognition_failure",
            PipelineError::GroundingFailure(_) => "grounding_failure",
            PipelineError::ValidationFailure(_) => "validation_failure",
            PipelineError::PipelineTimeout(_) => "pipeline_timeout",
        }
    }
}

/// Tunables shared by every stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub food_threshold: f64,
    pub dish_threshold: f64,
    pub match_threshold: f64,
    /// Relative tolerance for the macro-derived vs. reported calorie check.
    pub calorie_tolerance: f64,
    /// Longest image side fed to the models; larger uploads are downscaled.
    pub image_max_side: u32,
    pub gate_timeout: Duration,
    pub recognition_timeout: Duration,
    pub grounding_timeout: Duration,
    pub validation_timeout: Duration,
}

/// Run the full stage chain for one job image.
pub async fn analyze_image<M: VisionModels>(
    images: &LocalImageStore,
    models: &M,
    nutrition: &NutritionDb,
    image_key: &str,
    cfg: &PipelineConfig,
) -> Result<AnalysisResult, PipelineError> {
    let raw = images
        .read_bytes(image_key)
        .await
        .map_err(|e| PipelineError::UnavailableImage(e.to_string()))?;
    let image = prepare_image(raw, cfg.image_max_side).await?;

    let mut notes: Vec<String> = Vec::new();

    // Food gate: no fallback, nothing downstream is meaningful without it.
    let check = match timeout(cfg.gate_timeout, gate::run(models, &image, cfg)).await {
        Err(_) => {
            return Err(PipelineError::GateFailure(format!(
                "timed out after {:?}",
                cfg.gate_timeout
            )))
        }
        Ok(StageOutcome::ShortCircuit(result)) => return Ok(result),
        Ok(StageOutcome::Fail(e)) => return Err(e),
        Ok(StageOutcome::Continue(check)) => check,
        Ok(StageOutcome::Degrade(check, note)) => {
            notes.push(note);
            check
        }
    };
    tracing::debug!(confidence = check.confidence, "food gate passed");

    // Dish recognition: a failure or timeout degrades to the unknown dish
    // instead of failing the job.
    let dish = match timeout(cfg.recognition_timeout, recognize::run(models, &image, cfg)).await {
        Err(_) => {
            let (dish, note) =
                recognize::fallback(format!("timed out after {:?}", cfg.recognition_timeout));
            tracing::warn!(note = %note, "dish recognition timed out");
            notes.push(note);
            dish
        }
        Ok(StageOutcome::Fail(e)) => {
            let (dish, note) = recognize::fallback(e.to_string());
            tracing::warn!(note = %note, "dish recognition failed");
            notes.push(note);
            dish
        }
        Ok(StageOutcome::Continue(dish)) => dish,
        Ok(StageOutcome::Degrade(dish, note)) => {
            notes.push(note);
            dish
        }
        Ok(StageOutcome::ShortCircuit(result)) => return Ok(result),
    };

    // Nutrition grounding: a failure degrades to the generic entry; once
    // recognition produced anything, the result always carries nutrition.
    let grounded =
        match timeout(cfg.grounding_timeout, async { ground::run(nutrition, &dish, cfg) }).await {
            Err(_) => {
                let (grounded, note) = ground::fallback(
                    nutrition,
                    &dish,
                    cfg,
                    format!("timed out after {:?}", cfg.grounding_timeout),
                );
                tracing::warn!(note = %note, "nutrition grounding timed out");
                notes.push(note);
                grounded
            }
            Ok(StageOutcome::Fail(e)) => {
                let (grounded, note) = ground::fallback(nutrition, &dish, cfg, e.to_string());
                tracing::warn!(note = %note, "nutrition grounding failed");
                notes.push(note);
                grounded
            }
            Ok(StageOutcome::Continue(grounded)) => grounded,
            Ok(StageOutcome::Degrade(grounded, note)) => {
                notes.push(note);
                grounded
            }
            Ok(StageOutcome::ShortCircuit(result)) => return Ok(result),
        };

    // Validation: the terminal safety net before a result is returned, so it
    // has no fallback of its own.
    match timeout(cfg.validation_timeout, async { validate::run(grounded, notes, cfg) }).await {
        Err(_) => Err(PipelineError::ValidationFailure(format!(
            "timed out after {:?}",
            cfg.validation_timeout
        ))),
        Ok(StageOutcome::Fail(e)) => Err(e),
        Ok(StageOutcome::Continue(analysis)) => Ok(AnalysisResult::Food(Box::new(analysis))),
        Ok(StageOutcome::Degrade(mut analysis, note)) => {
            analysis.notes.push(note);
            Ok(AnalysisResult::Food(Box::new(analysis)))
        }
        Ok(StageOutcome::ShortCircuit(result)) => Ok(result),
    }
}

/// Decode and downscale the upload off the async runtime; model input never
/// needs more than `max_side` pixels per side.
async fn prepare_image(raw: Vec<u8>, max_side: u32) -> Result<Vec<u8>, PipelineError> {
    let task = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, image::ImageError> {
        let decoded = image::load_from_memory(&raw)?;
        let decoded = if decoded.width().max(decoded.height()) > max_side {
            decoded.thumbnail(max_side, max_side)
        } else {
            decoded
        };
        let mut out = std::io::Cursor::new(Vec::new());
        decoded.to_rgb8().write_to(&mut out, image::ImageFormat::Jpeg)?;
        Ok(out.into_inner())
    });

    match task.await {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(e)) => Err(PipelineError::UnavailableImage(format!("image decode failed: {e}"))),
        Err(e) => Err(PipelineError::UnavailableImage(format!("image decode task failed: {e}"))),
    }
}
