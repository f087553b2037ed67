//! Food gate: decides whether the image contains food at all.

use crate::models::analysis::AnalysisResult;
use crate::services::vision::{FoodCheck, VisionModels};

use super::{PipelineConfig, PipelineError, StageOutcome};

pub async fn run<M: VisionModels>(
    models: &M,
    image: &[u8],
    cfg: &PipelineConfig,
) -> StageOutcome<FoodCheck> {
    let check = match models.classify_food(image).await {
        Ok(check) => check,
        Err(e) => return StageOutcome::Fail(PipelineError::GateFailure(e.to_string())),
    };

    // Either a not-food verdict or a food verdict below the threshold ends
    // the job here. The raw classifier confidence is surfaced unchanged.
    if !check.is_food || check.confidence < cfg.food_threshold {
        return StageOutcome::ShortCircuit(AnalysisResult::NotFood {
            confidence: check.confidence,
            message: "The image does not appear to contain food.".to_string(),
        });
    }

    StageOutcome::Continue(check)
}
