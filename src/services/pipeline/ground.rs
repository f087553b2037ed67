//! Nutrition grounding: matches the recognized dish against the reference
//! dataset and scales the matched per-100g nutrients to the portion estimate.

use std::collections::BTreeMap;

use crate::models::analysis::MacroPercent;
use crate::models::nutrition::{
    Nutrient, NutrientVector, PortionEstimate, DAILY_VALUES, KCAL_PER_G_CARB, KCAL_PER_G_FAT,
    KCAL_PER_G_PROTEIN,
};
use crate::services::nutrition_db::{NutritionDb, NutritionDbEntry};
use crate::services::vision::clamp_confidence;

use super::recognize::{RecognizedDish, UNKNOWN_DISH};
use super::{PipelineConfig, StageOutcome};

/// A dish bound to a dataset entry, with portion-scaled nutrients.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundedDish {
    /// Name reported to the caller: the matched entry name, or "unknown"
    /// when grounding fell back to the generic entry.
    pub dish_name: String,
    pub model_dish_guess: Option<String>,
    pub match_confidence: f64,
    pub portion: PortionEstimate,
    pub nutrition: NutrientVector,
    pub macro_percent: MacroPercent,
    pub daily_value_percent: BTreeMap<Nutrient, f64>,
    pub description: String,
    pub health_note: String,
    pub ingredients: Vec<String>,
    pub allergens: Vec<String>,
    pub assumptions: Vec<String>,
    pub used_generic: bool,
}

pub fn run(
    nutrition: &NutritionDb,
    dish: &RecognizedDish,
    cfg: &PipelineConfig,
) -> StageOutcome<GroundedDish> {
    if dish.dish_name_guess == UNKNOWN_DISH {
        // Always note the fallback here; recognition may have handed over an
        // unknown dish without any demotion note of its own (e.g. the model
        // confidently answered "unknown").
        let grounded = from_entry(nutrition.generic_entry(), dish, 0.0, true);
        return StageOutcome::Degrade(
            grounded,
            "dish was not identified; using generic nutrition estimate".to_string(),
        );
    }

    let (entry, score) = nutrition.best_match(&dish.dish_name_guess);
    if score < cfg.match_threshold {
        let grounded = from_entry(nutrition.generic_entry(), dish, 0.0, true);
        return StageOutcome::Degrade(
            grounded,
            format!(
                "no dataset entry matched '{}' (best score {:.2}); using generic estimate",
                dish.dish_name_guess, score
            ),
        );
    }

    StageOutcome::Continue(from_entry(entry, dish, score, false))
}

/// Fallback grounding when the stage failed or timed out: always the generic
/// entry, so a recognized dish still gets a nutrition estimate.
pub fn fallback(
    nutrition: &NutritionDb,
    dish: &RecognizedDish,
    _cfg: &PipelineConfig,
    cause: String,
) -> (GroundedDish, String) {
    (
        from_entry(nutrition.generic_entry(), dish, 0.0, true),
        format!("nutrition grounding unavailable ({cause}); using generic estimate"),
    )
}

fn from_entry(
    entry: &NutritionDbEntry,
    dish: &RecognizedDish,
    match_score: f64,
    used_generic: bool,
) -> GroundedDish {
    let portion = PortionEstimate::from_label(dish.portion_label);
    let scaled = entry.per_100g.scale(portion.grams_estimate / 100.0);

    let dish_name = if used_generic { UNKNOWN_DISH.to_string() } else { entry.name.clone() };
    // Blend of model confidence and match quality, weighted toward the match:
    // a perfect string match on a shaky guess is still mostly trustworthy.
    let match_confidence = clamp_confidence(0.25 * dish.confidence + 0.75 * match_score);

    let mut assumptions = vec![format!(
        "Portion assumed at ~{:.0} g from a visual size estimate; nutrients scaled from per-100g reference values.",
        portion.grams_estimate
    )];
    if dish.portion_label == crate::models::nutrition::PortionLabel::Unknown {
        assumptions.push("Portion size could not be judged from the image; a typical serving was assumed.".to_string());
    }

    GroundedDish {
        description: describe_entry(entry, &portion, used_generic),
        health_note: health_note(&scaled),
        macro_percent: macro_percent_of_calories(&scaled),
        daily_value_percent: daily_value_percent(&scaled),
        dish_name,
        model_dish_guess: if dish.raw_guess.is_empty() { None } else { Some(dish.raw_guess.clone()) },
        match_confidence,
        portion,
        nutrition: scaled,
        ingredients: entry.ingredients.clone(),
        allergens: entry.allergens.clone(),
        assumptions,
        used_generic,
    }
}

/// Share of total calories per macro, each clamped into [0, 1]. Macros that
/// are unknown contribute nothing.
pub fn macro_percent_of_calories(nutrition: &NutrientVector) -> MacroPercent {
    let carbs = nutrition.get(Nutrient::CarbsG).unwrap_or(0.0) * KCAL_PER_G_CARB;
    let protein = nutrition.get(Nutrient::ProteinG).unwrap_or(0.0) * KCAL_PER_G_PROTEIN;
    let fat = nutrition.get(Nutrient::FatG).unwrap_or(0.0) * KCAL_PER_G_FAT;

    let total = carbs + protein + fat;
    if !(total > 0.0) {
        return MacroPercent::default();
    }
    MacroPercent {
        carbs_pct: (carbs / total).clamp(0.0, 1.0),
        protein_pct: (protein / total).clamp(0.0, 1.0),
        fat_pct: (fat / total).clamp(0.0, 1.0),
    }
}

/// Fraction of the recommended daily value covered, clamped into [0, 1].
/// Only nutrients with both a known amount and a reference DV appear.
pub fn daily_value_percent(nutrition: &NutrientVector) -> BTreeMap<Nutrient, f64> {
    DAILY_VALUES
        .iter()
        .filter_map(|&(nutrient, dv)| {
            nutrition.get(nutrient).map(|amount| (nutrient, (amount / dv).clamp(0.0, 1.0)))
        })
        .collect()
}

/// Relative gap between reported calories and the macro-derived figure, or
/// `None` when either side is unknown or zero.
pub fn calorie_consistency_gap(nutrition: &NutrientVector) -> Option<f64> {
    let reported = nutrition.get(Nutrient::Calories)?;
    if reported <= 0.0 {
        return None;
    }
    let derived = nutrition.get(Nutrient::CarbsG)? * KCAL_PER_G_CARB
        + nutrition.get(Nutrient::ProteinG)? * KCAL_PER_G_PROTEIN
        + nutrition.get(Nutrient::FatG)? * KCAL_PER_G_FAT;
    Some((derived - reported).abs() / reported)
}

fn describe_entry(
    entry: &NutritionDbEntry,
    portion: &PortionEstimate,
    used_generic: bool,
) -> String {
    let size = match portion.label {
        crate::models::nutrition::PortionLabel::Unknown => "typical".to_string(),
        label => label.to_string(),
    };
    if used_generic {
        format!(
            "An unrecognized food item, estimated as a {size} portion (~{:.0} g) using generic reference values.",
            portion.grams_estimate
        )
    } else {
        format!(
            "{}, estimated as a {size} portion (~{:.0} g).",
            entry.name, portion.grams_estimate
        )
    }
}

fn health_note(scaled: &NutrientVector) -> String {
    let mut concerns = Vec::new();
    if scaled.get(Nutrient::Calories).is_some_and(|kcal| kcal > 800.0) {
        concerns.push("calorie-dense");
    }
    if scaled.get(Nutrient::SodiumMg).is_some_and(|mg| mg > 1150.0) {
        concerns.push("high in sodium");
    }
    if scaled.get(Nutrient::SatFatG).is_some_and(|g| g > 10.0) {
        concerns.push("high in saturated fat");
    }
    if scaled.get(Nutrient::SugarG).is_some_and(|g| g > 25.0) {
        concerns.push("high in sugar");
    }

    if concerns.is_empty() {
        "No notable nutritional concerns for a single serving.".to_string()
    } else {
        format!("This serving is {}.", concerns.join(" and "))
    }
}
