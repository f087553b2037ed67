//! Dish recognition: names the dish and sizes the portion.

use crate::models::nutrition::PortionLabel;
use crate::services::vision::VisionModels;

use super::{PipelineConfig, PipelineError, StageOutcome};

/// Placeholder dish name when recognition cannot commit to anything specific.
pub const UNKNOWN_DISH: &str = "unknown";

/// What recognition hands to grounding.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedDish {
    /// Name to match against the reference dataset; `UNKNOWN_DISH` when the
    /// model had nothing usable.
    pub dish_name_guess: String,
    /// What the model literally said, for diagnostics.
    pub raw_guess: String,
    pub portion_label: PortionLabel,
    pub confidence: f64,
}

pub async fn run<M: VisionModels>(
    models: &M,
    image: &[u8],
    cfg: &PipelineConfig,
) -> StageOutcome<RecognizedDish> {
    let candidate = match models.describe_dish(image).await {
        Ok(candidate) => candidate,
        Err(e) => return StageOutcome::Fail(PipelineError::RecognitionFailure(e.to_string())),
    };

    let raw_guess = candidate.dish_name_guess.clone();
    let dish = RecognizedDish {
        dish_name_guess: candidate.dish_name_guess,
        raw_guess,
        portion_label: candidate.portion_label,
        confidence: candidate.confidence,
    };

    // A guess below the dish threshold is demoted to unknown so a weak model
    // answer can never surface as a confident, specific dish name. An empty
    // name is demoted regardless of how sure the model claims to be.
    let empty_name = dish.dish_name_guess.trim().is_empty();
    if dish.confidence < cfg.dish_threshold || empty_name {
        let note = if dish.confidence < cfg.dish_threshold {
            format!(
                "dish recognition confidence {:.2} below threshold; treating dish as unknown",
                dish.confidence
            )
        } else {
            "dish recognition returned no dish name; treating dish as unknown".to_string()
        };
        let demoted = RecognizedDish {
            dish_name_guess: UNKNOWN_DISH.to_string(),
            ..dish
        };
        return StageOutcome::Degrade(demoted, note);
    }

    StageOutcome::Continue(dish)
}

/// Fallback dish when the stage failed or timed out outright.
pub fn fallback(cause: String) -> (RecognizedDish, String) {
    (
        RecognizedDish {
            dish_name_guess: UNKNOWN_DISH.to_string(),
            raw_guess: String::new(),
            portion_label: PortionLabel::Unknown,
            confidence: 0.0,
        },
        format!("dish recognition unavailable ({cause}); using generic estimate"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pipeline::testutil::{dish, test_config, MockModels};
    use crate::services::vision::FoodCheck;

    fn food() -> FoodCheck {
        FoodCheck { is_food: true, confidence: 0.9 }
    }

    #[tokio::test]
    async fn confident_guess_continues() {
        let models = MockModels::new(food(), dish("pho", PortionLabel::Medium, 0.85));
        match run(&models, b"img", &test_config()).await {
            StageOutcome::Continue(recognized) => {
                assert_eq!(recognized.dish_name_guess, "pho");
                assert_eq!(recognized.portion_label, PortionLabel::Medium);
            }
            other => panic!("expected Continue, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn weak_guess_is_demoted_to_unknown() {
        let models = MockModels::new(food(), dish("maybe lasagna", PortionLabel::Large, 0.4));
        match run(&models, b"img", &test_config()).await {
            StageOutcome::Degrade(recognized, note) => {
                assert_eq!(recognized.dish_name_guess, UNKNOWN_DISH);
                assert_eq!(recognized.raw_guess, "maybe lasagna");
                // Portion survives the demotion.
                assert_eq!(recognized.portion_label, PortionLabel::Large);
                assert!(note.contains("below threshold"));
            }
            other => panic!("expected Degrade, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_name_at_high_confidence_notes_the_missing_name() {
        let models = MockModels::new(food(), dish("   ", PortionLabel::Medium, 0.95));
        match run(&models, b"img", &test_config()).await {
            StageOutcome::Degrade(recognized, note) => {
                assert_eq!(recognized.dish_name_guess, UNKNOWN_DISH);
                assert!(note.contains("no dish name"), "unexpected note: {note}");
                assert!(!note.contains("below threshold"));
            }
            other => panic!("expected Degrade, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn model_error_is_a_recognition_failure() {
        let mut models = MockModels::new(food(), dish("pho", PortionLabel::Medium, 0.9));
        models.dish = Err("vlm offline".to_string());
        assert!(matches!(
            run(&models, b"img", &test_config()).await,
            StageOutcome::Fail(PipelineError::RecognitionFailure(_))
        ));
    }

    #[test]
    fn fallback_dish_is_fully_unknown() {
        let (dish, note) = fallback("timed out".to_string());
        assert_eq!(dish.dish_name_guess, UNKNOWN_DISH);
        assert_eq!(dish.confidence, 0.0);
        assert_eq!(dish.portion_label, PortionLabel::Unknown);
        assert!(note.contains("timed out"));
    }
}
