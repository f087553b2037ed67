use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Nutrient keys tracked by the reference dataset and analysis results.
///
/// The `_g` / `_mg` suffixes are part of the wire name and fix the unit.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Nutrient {
    Calories,
    CarbsG,
    ProteinG,
    FatG,
    SatFatG,
    FiberG,
    SugarG,
    SodiumMg,
    CholesterolMg,
    VitaminCMg,
    IronMg,
}

/// Calories per gram of each macro nutrient (Atwater factors).
pub const KCAL_PER_G_CARB: f64 = 4.0;
pub const KCAL_PER_G_PROTEIN: f64 = 4.0;
pub const KCAL_PER_G_FAT: f64 = 9.0;

/// Recommended daily values used for %DV computation.
pub const DAILY_VALUES: &[(Nutrient, f64)] = &[
    (Nutrient::CarbsG, 275.0),
    (Nutrient::ProteinG, 50.0),
    (Nutrient::FatG, 78.0),
    (Nutrient::SatFatG, 20.0),
    (Nutrient::FiberG, 28.0),
    (Nutrient::SugarG, 50.0),
    (Nutrient::SodiumMg, 2300.0),
    (Nutrient::CholesterolMg, 300.0),
    (Nutrient::VitaminCMg, 90.0),
    (Nutrient::IronMg, 18.0),
];

/// Sparse nutrient → amount mapping.
///
/// An absent nutrient means "unknown"; it is never coerced to zero, and
/// stored values are non-negative (the dataset loader rejects anything else).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NutrientVector(BTreeMap<Nutrient, f64>);

impl NutrientVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, nutrient: Nutrient) -> Option<f64> {
        self.0.get(&nutrient).copied()
    }

    pub fn set(&mut self, nutrient: Nutrient, value: f64) {
        self.0.insert(nutrient, value);
    }

    /// Multiply every known value by `factor`. Unknown stays unknown.
    pub fn scale(&self, factor: f64) -> Self {
        Self(self.0.iter().map(|(k, v)| (*k, v * factor)).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Nutrient, f64)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Nutrient, f64)> for NutrientVector {
    fn from_iter<I: IntoIterator<Item = (Nutrient, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Coarse portion size vocabulary emitted by dish recognition.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumString,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PortionLabel {
    Small,
    Medium,
    Large,
    #[default]
    Unknown,
}

impl PortionLabel {
    /// Fixed portion-size prior: (grams_min, grams_estimate, grams_max).
    pub fn grams_band(self) -> (f64, f64, f64) {
        match self {
            PortionLabel::Small => (200.0, 250.0, 300.0),
            PortionLabel::Medium => (350.0, 400.0, 450.0),
            PortionLabel::Large => (450.0, 500.0, 600.0),
            PortionLabel::Unknown => (250.0, 350.0, 450.0),
        }
    }

    /// Loose parse of model output like "medium serving" or "Large bowl".
    /// Anything that does not name a band maps to `Unknown`.
    pub fn from_description(text: &str) -> Self {
        if let Ok(label) = text.trim().parse::<PortionLabel>() {
            return label;
        }
        let lowered = text.to_lowercase();
        for label in [PortionLabel::Small, PortionLabel::Medium, PortionLabel::Large] {
            if lowered.contains(&label.to_string()) {
                return label;
            }
        }
        PortionLabel::Unknown
    }
}

/// A portion estimate in grams with its uncertainty band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortionEstimate {
    pub label: PortionLabel,
    pub grams_estimate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grams_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grams_max: Option<f64>,
}

impl PortionEstimate {
    pub fn from_label(label: PortionLabel) -> Self {
        let (min, estimate, max) = label.grams_band();
        Self {
            label,
            grams_estimate: estimate,
            grams_min: Some(min),
            grams_max: Some(max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grams_bands_contain_their_estimate() {
        for label in [
            PortionLabel::Small,
            PortionLabel::Medium,
            PortionLabel::Large,
            PortionLabel::Unknown,
        ] {
            let (min, estimate, max) = label.grams_band();
            assert!(min <= estimate && estimate <= max, "band broken for {label}");
        }
    }

    #[test]
    fn portion_estimate_respects_bounds() {
        let portion = PortionEstimate::from_label(PortionLabel::Medium);
        assert_eq!(portion.grams_estimate, 400.0);
        assert_eq!(portion.grams_min, Some(350.0));
        assert_eq!(portion.grams_max, Some(450.0));
    }

    #[test]
    fn portion_label_parses_loose_descriptions() {
        assert_eq!(PortionLabel::from_description("medium"), PortionLabel::Medium);
        assert_eq!(PortionLabel::from_description("Large bowl"), PortionLabel::Large);
        assert_eq!(PortionLabel::from_description("small serving"), PortionLabel::Small);
        assert_eq!(PortionLabel::from_description("1 plate"), PortionLabel::Unknown);
        assert_eq!(PortionLabel::from_description(""), PortionLabel::Unknown);
    }

    #[test]
    fn nutrient_keys_serialize_with_unit_suffix() {
        assert_eq!(serde_json::to_string(&Nutrient::CarbsG).unwrap(), "\"carbs_g\"");
        assert_eq!(serde_json::to_string(&Nutrient::SodiumMg).unwrap(), "\"sodium_mg\"");
        assert_eq!(serde_json::to_string(&Nutrient::Calories).unwrap(), "\"calories\"");
    }

    #[test]
    fn scale_preserves_absence() {
        let mut per_100g = NutrientVector::new();
        per_100g.set(Nutrient::Calories, 40.0);
        per_100g.set(Nutrient::ProteinG, 4.5);

        let scaled = per_100g.scale(4.0);
        assert_eq!(scaled.get(Nutrient::Calories), Some(160.0));
        assert_eq!(scaled.get(Nutrient::ProteinG), Some(18.0));
        assert_eq!(scaled.get(Nutrient::FiberG), None);
    }
}
