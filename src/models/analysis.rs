use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::nutrition::{Nutrient, NutrientVector, PortionEstimate};

/// Final, immutable result of one analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisResult {
    /// The food gate decided the image is not food; no later stage ran.
    NotFood { confidence: f64, message: String },
    Food(Box<FoodAnalysis>),
}

/// Share of total calories contributed by each macro nutrient, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MacroPercent {
    pub carbs_pct: f64,
    pub protein_pct: f64,
    pub fat_pct: f64,
}

/// Grounded nutrition estimate for a recognized dish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodAnalysis {
    /// Matched dish name, or "unknown" when confidence was too low to commit
    /// to a specific dish.
    pub dish_name: String,
    /// Raw model guess, kept for diagnostics even when downgraded.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model_dish_guess: Option<String>,
    /// Calibrated confidence that the estimate is grounded in the right entry.
    pub match_confidence: f64,
    pub portion: PortionEstimate,
    pub nutrition: NutrientVector,
    pub macro_percent_of_calories: MacroPercent,
    pub daily_value_percent: BTreeMap<Nutrient, f64>,
    pub description: String,
    pub health_note: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ingredients: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub potential_allergens: Vec<String>,
    /// Ordered explanations of every approximation and fallback taken.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub assumptions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_food_serializes_with_kind_tag() {
        let result = AnalysisResult::NotFood {
            confidence: 0.2,
            message: "The image does not appear to contain food.".to_string(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["kind"], "not_food");
        assert_eq!(json["confidence"], 0.2);

        let back: AnalysisResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
