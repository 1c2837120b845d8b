//! Cross-domain transfer relevance policy.
//!
//! The support class runs without aero and without ride-height devices, so
//! its anomaly precedents are highly relevant to the next-gen regulation for
//! chassis-dynamics categories and much less so for engine-specific ones.
//!
//! The scores are configuration, not derived data: [`TransferPolicy`] ships
//! with the built-in table below but deserializes from external
//! configuration so operations can override it without a rebuild.
//!
//! | category | relevance |
//! |---|---|
//! | headshake | 0.95 |
//! | brake shudder | 0.92 |
//! | tire graining | 0.75 |
//! | exhaust deviation | 0.45 |
//! | (unmapped) | 0.50 |

use std::collections::HashMap;

use apexos_types::AnomalyCategory;
use serde::Deserialize;

/// Relevance assigned to categories absent from the table.
pub const DEFAULT_RELEVANCE: f64 = 0.5;

/// Lookup table scoring how applicable support-class evidence is per
/// anomaly category.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferPolicy {
    #[serde(default = "builtin_table")]
    table: HashMap<AnomalyCategory, f64>,
    #[serde(default = "default_relevance")]
    default_relevance: f64,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            table: builtin_table(),
            default_relevance: DEFAULT_RELEVANCE,
        }
    }
}

impl TransferPolicy {
    /// Relevance score in `[0, 1]` for `category`; the explicit default for
    /// unmapped categories.
    pub fn relevance(&self, category: AnomalyCategory) -> f64 {
        self.table
            .get(&category)
            .copied()
            .unwrap_or(self.default_relevance)
            .clamp(0.0, 1.0)
    }

    /// Override a single category's score (clamped to `[0, 1]`).
    pub fn set(&mut self, category: AnomalyCategory, relevance: f64) {
        self.table.insert(category, relevance.clamp(0.0, 1.0));
    }
}

fn builtin_table() -> HashMap<AnomalyCategory, f64> {
    HashMap::from([
        (AnomalyCategory::Headshake, 0.95),
        (AnomalyCategory::BrakeShudder, 0.92),
        (AnomalyCategory::TireGraining, 0.75),
        (AnomalyCategory::ExhaustDeviation, 0.45),
    ])
}

fn default_relevance() -> f64 {
    DEFAULT_RELEVANCE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_scores_match_reference_table() {
        let policy = TransferPolicy::default();
        assert_eq!(policy.relevance(AnomalyCategory::Headshake), 0.95);
        assert_eq!(policy.relevance(AnomalyCategory::BrakeShudder), 0.92);
        assert_eq!(policy.relevance(AnomalyCategory::TireGraining), 0.75);
        assert_eq!(policy.relevance(AnomalyCategory::ExhaustDeviation), 0.45);
    }

    #[test]
    fn unmapped_category_gets_explicit_default() {
        let policy = TransferPolicy::default();
        assert_eq!(policy.relevance(AnomalyCategory::NominalPitch), 0.5);
    }

    #[test]
    fn set_overrides_and_clamps() {
        let mut policy = TransferPolicy::default();
        policy.set(AnomalyCategory::Headshake, 1.7);
        assert_eq!(policy.relevance(AnomalyCategory::Headshake), 1.0);
    }

    #[test]
    fn deserializes_from_external_override() {
        let json = r#"{
            "table": { "headshake": 0.5 },
            "default_relevance": 0.25
        }"#;
        let policy: TransferPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.relevance(AnomalyCategory::Headshake), 0.5);
        assert_eq!(policy.relevance(AnomalyCategory::NominalPitch), 0.25);
    }

    #[test]
    fn empty_override_keeps_builtin_table() {
        let policy: TransferPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy.relevance(AnomalyCategory::Headshake), 0.95);
    }
}
