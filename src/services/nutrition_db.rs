use serde::Deserialize;
use strsim::jaro_winkler;

use crate::models::nutrition::NutrientVector;

/// Id of the generic fallback entry every dataset must provide. It is the
/// grounding target whenever the dish is unknown or matches too weakly.
pub const GENERIC_ENTRY_ID: &str = "unknown_food_generic";

/// One reference food with nutrients on a per-100g basis.
#[derive(Debug, Clone, Deserialize)]
pub struct NutritionDbEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub per_100g: NutrientVector,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub allergens: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DbFile {
    version: String,
    entries: Vec<NutritionDbEntry>,
}

/// The nutrition reference dataset, loaded once at startup and immutable for
/// the process lifetime.
#[derive(Debug)]
pub struct NutritionDb {
    version: String,
    entries: Vec<NutritionDbEntry>,
    generic_idx: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum NutritionDbError {
    #[error("failed to read nutrition db {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("failed to parse nutrition db: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("nutrition db has no entries")]
    Empty,

    #[error("nutrition db is missing the 'unknown_food_generic' fallback entry")]
    MissingGenericEntry,

    #[error("entry '{id}' has a negative or non-finite value for {nutrient}")]
    InvalidValue { id: String, nutrient: String },
}

impl NutritionDb {
    pub fn load(path: &str) -> Result<Self, NutritionDbError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| NutritionDbError::Read { path: path.to_string(), source })?;
        let file: DbFile = serde_json::from_str(&raw)?;
        Self::from_entries(file.version, file.entries)
    }

    pub fn from_entries(
        version: String,
        entries: Vec<NutritionDbEntry>,
    ) -> Result<Self, NutritionDbError> {
        if entries.is_empty() {
            return Err(NutritionDbError::Empty);
        }
        for entry in &entries {
            for (nutrient, value) in entry.per_100g.iter() {
                if !value.is_finite() || value < 0.0 {
                    return Err(NutritionDbError::InvalidValue {
                        id: entry.id.clone(),
                        nutrient: nutrient.to_string(),
                    });
                }
            }
        }
        let generic_idx = entries
            .iter()
            .position(|e| e.id == GENERIC_ENTRY_ID)
            .ok_or(NutritionDbError::MissingGenericEntry)?;

        Ok(Self { version, entries, generic_idx })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn generic_entry(&self) -> &NutritionDbEntry {
        &self.entries[self.generic_idx]
    }

    /// Highest-scoring entry for a dish guess, scored by normalized
    /// Jaro-Winkler similarity over the entry name and each alias.
    ///
    /// Deterministic: entries are scanned in dataset order and only a
    /// strictly better score replaces the current best.
    pub fn best_match(&self, dish_guess: &str) -> (&NutritionDbEntry, f64) {
        let guess = normalize(dish_guess);
        let mut best = &self.entries[0];
        let mut best_score = f64::MIN;

        for entry in &self.entries {
            let score = std::iter::once(entry.name.as_str())
                .chain(entry.aliases.iter().map(String::as_str))
                .map(|candidate| jaro_winkler(&guess, &normalize(candidate)))
                .fold(0.0_f64, f64::max);
            if score > best_score {
                best_score = score;
                best = entry;
            }
        }

        (best, best_score)
    }
}

/// Lowercase, strip everything but ASCII alphanumerics, collapse whitespace.
fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
