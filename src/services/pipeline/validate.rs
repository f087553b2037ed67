//! Validation: last stage before a result is persisted. Rejects malformed
//! estimates, caps physically implausible values, and attaches warnings.

use crate::models::analysis::FoodAnalysis;
use crate::models::nutrition::Nutrient;

use super::ground::{calorie_consistency_gap, GroundedDish};
use super::{PipelineConfig, PipelineError, StageOutcome};

/// Per-serving caps. Values above these are dataset or scaling mistakes, not
/// plausible single servings.
const OUTLIER_CAPS: &[(Nutrient, f64)] = &[
    (Nutrient::Calories, 3000.0),
    (Nutrient::CarbsG, 400.0),
    (Nutrient::ProteinG, 250.0),
    (Nutrient::FatG, 250.0),
    (Nutrient::SatFatG, 120.0),
    (Nutrient::FiberG, 100.0),
    (Nutrient::SugarG, 300.0),
    (Nutrient::SodiumMg, 8000.0),
    (Nutrient::CholesterolMg, 1500.0),
];

/// In-range fractions pass untouched; anything else maps to its nearest
/// bound (non-finite to 0).
fn repair_fraction(value: f64) -> Option<f64> {
    if !value.is_finite() {
        Some(0.0)
    } else if value < 0.0 {
        Some(0.0)
    } else if value > 1.0 {
        Some(1.0)
    } else {
        None
    }
}

pub fn run(
    mut grounded: GroundedDish,
    mut notes: Vec<String>,
    cfg: &PipelineConfig,
) -> StageOutcome<FoodAnalysis> {
    if grounded.dish_name.trim().is_empty() {
        return StageOutcome::Fail(PipelineError::ValidationFailure(
            "estimate has no dish name".to_string(),
        ));
    }
    if grounded.nutrition.is_empty() {
        return StageOutcome::Fail(PipelineError::ValidationFailure(
            "estimate has no nutrition values".to_string(),
        ));
    }
    for (nutrient, value) in grounded.nutrition.iter() {
        if !value.is_finite() || value < 0.0 {
            return StageOutcome::Fail(PipelineError::ValidationFailure(format!(
                "estimate has an invalid value {value} for {nutrient}"
            )));
        }
    }

    let macro_slots = [
        ("carbs", &mut grounded.macro_percent.carbs_pct),
        ("protein", &mut grounded.macro_percent.protein_pct),
        ("fat", &mut grounded.macro_percent.fat_pct),
    ];
    for (name, slot) in macro_slots {
        if let Some(fixed) = repair_fraction(*slot) {
            notes.push(format!(
                "{name} calorie share {} was outside [0, 1] and was reset to {fixed}",
                *slot
            ));
            *slot = fixed;
        }
    }
    for (nutrient, value) in grounded.daily_value_percent.iter_mut() {
        if let Some(fixed) = repair_fraction(*value) {
            notes.push(format!(
                "daily value share {} for {nutrient} was outside [0, 1] and was reset to {fixed}",
                *value
            ));
            *value = fixed;
        }
    }

    for &(nutrient, cap) in OUTLIER_CAPS {
        if let Some(value) = grounded.nutrition.get(nutrient) {
            if value > cap {
                grounded.nutrition.set(nutrient, cap);
                notes.push(format!(
                    "{nutrient} estimate of {value:.0} exceeded the plausible per-serving limit and was capped at {cap:.0}"
                ));
            }
        }
    }

    let mut warnings = Vec::new();
    if let Some(gap) = calorie_consistency_gap(&grounded.nutrition) {
        if gap > cfg.calorie_tolerance {
            warnings.push(format!(
                "Reported calories differ from the macro-derived figure by {:.0}%; treat the totals as approximate.",
                gap * 100.0
            ));
        }
    }
    if !grounded.allergens.is_empty() {
        warnings.push(format!("May contain allergens: {}.", grounded.allergens.join(", ")));
    }

    StageOutcome::Continue(FoodAnalysis {
        dish_name: grounded.dish_name,
        model_dish_guess: grounded.model_dish_guess,
        match_confidence: grounded.match_confidence,
        portion: grounded.portion,
        nutrition: grounded.nutrition,
        macro_percent_of_calories: grounded.macro_percent,
        daily_value_percent: grounded.daily_value_percent,
        description: grounded.description,
        health_note: grounded.health_note,
        ingredients: grounded.ingredients,
        potential_allergens: grounded.allergens,
        notes,
        assumptions: grounded.assumptions,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::nutrition::{NutrientVector, PortionLabel};
    use crate::services::pipeline::ground;
    use crate::services::pipeline::recognize::RecognizedDish;
    use crate::services::pipeline::testutil::{test_config, test_nutrition_db};

    fn grounded_pho() -> GroundedDish {
        let dish = RecognizedDish {
            dish_name_guess: "pho".to_string(),
            raw_guess: "pho".to_string(),
            portion_label: PortionLabel::Medium,
            confidence: 0.9,
        };
        match ground::run(&test_nutrition_db(), &dish, &test_config()) {
            StageOutcome::Continue(grounded) => grounded,
            other => panic!("expected grounded dish, got {other:?}"),
        }
    }

    #[test]
    fn clean_estimate_passes_with_allergen_warning() {
        match run(grounded_pho(), Vec::new(), &test_config()) {
            StageOutcome::Continue(analysis) => {
                assert_eq!(analysis.dish_name, "Pho");
                assert!(analysis.warnings.iter().any(|w| w.contains("soy")));
                assert!(analysis.notes.is_empty());
            }
            other => panic!("expected Continue, got {other:?}"),
        }
    }

    #[test]
    fn implausible_values_are_capped_with_a_note() {
        let mut grounded = grounded_pho();
        grounded.nutrition.set(Nutrient::SodiumMg, 25_000.0);

        match run(grounded, Vec::new(), &test_config()) {
            StageOutcome::Continue(analysis) => {
                assert_eq!(analysis.nutrition.get(Nutrient::SodiumMg), Some(8000.0));
                assert!(analysis.notes.iter().any(|n| n.contains("capped")));
            }
            other => panic!("expected Continue, got {other:?}"),
        }
    }

    #[test]
    fn inconsistent_calories_produce_a_warning() {
        let mut grounded = grounded_pho();
        grounded.nutrition = [
            (Nutrient::Calories, 100.0),
            (Nutrient::CarbsG, 50.0),
            (Nutrient::ProteinG, 20.0),
            (Nutrient::FatG, 20.0),
        ]
        .into_iter()
        .collect::<NutrientVector>();

        match run(grounded, Vec::new(), &test_config()) {
            StageOutcome::Continue(analysis) => {
                assert!(analysis.warnings.iter().any(|w| w.contains("approximate")));
            }
            other => panic!("expected Continue, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_percentages_are_repaired_with_notes() {
        let mut grounded = grounded_pho();
        grounded.macro_percent.carbs_pct = 1.7;
        grounded.macro_percent.fat_pct = -0.2;
        grounded.daily_value_percent.insert(Nutrient::SodiumMg, f64::NAN);

        match run(grounded, Vec::new(), &test_config()) {
            StageOutcome::Continue(analysis) => {
                assert_eq!(analysis.macro_percent_of_calories.carbs_pct, 1.0);
                assert_eq!(analysis.macro_percent_of_calories.fat_pct, 0.0);
                assert_eq!(analysis.daily_value_percent.get(&Nutrient::SodiumMg), Some(&0.0));
                assert_eq!(
                    analysis.notes.iter().filter(|n| n.contains("outside [0, 1]")).count(),
                    3
                );
            }
            other => panic!("expected Continue, got {other:?}"),
        }
    }

    #[test]
    fn empty_nutrition_fails_validation() {
        let mut grounded = grounded_pho();
        grounded.nutrition = NutrientVector::new();
        assert!(matches!(
            run(grounded, Vec::new(), &test_config()),
            StageOutcome::Fail(PipelineError::ValidationFailure(_))
        ));
    }

    #[test]
    fn non_finite_values_fail_validation() {
        let mut grounded = grounded_pho();
        grounded.nutrition.set(Nutrient::FatG, f64::NAN);
        assert!(matches!(
            run(grounded, Vec::new(), &test_config()),
            StageOutcome::Fail(PipelineError::ValidationFailure(_))
        ));
    }

    #[test]
    fn upstream_notes_are_preserved_in_order() {
        let notes = vec!["first".to_string(), "second".to_string()];
        match run(grounded_pho(), notes, &test_config()) {
            StageOutcome::Continue(analysis) => {
                assert_eq!(analysis.notes, vec!["first", "second"]);
            }
            other => panic!("expected Continue, got {other:?}"),
        }
    }
}
