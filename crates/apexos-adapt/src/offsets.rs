//! Epoch-change offset computation.
//!
//! Compares two per-zone reference sets (old regulation vs new regulation)
//! and produces one [`DomainOffset`] per zone present in both: the `new −
//! old` delta of every matched measurement, plus the aggregate mean and
//! standard deviation across the zone's matched sub-measurements.
//!
//! Partial coverage is expected and tolerated. Zones present only in the old
//! set, and zones with no matched measurements, are skipped with a warning;
//! they keep their old reference values until a future adaptation event
//! supplies them. There is no failure mode here.

use std::collections::BTreeMap;

use apexos_types::{DomainOffset, ReferenceMeasure, ZoneFacts};
use tracing::{debug, warn};

// ─────────────────────────────────────────────────────────────────────────────
// EpochReference
// ─────────────────────────────────────────────────────────────────────────────

/// The numeric reference measurements for one zone under one regulatory
/// epoch. Input to the offset computation.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReference {
    pub zone_id: String,
    pub measures: BTreeMap<ReferenceMeasure, f64>,
}

impl EpochReference {
    pub fn new(zone_id: impl Into<String>) -> Self {
        Self {
            zone_id: zone_id.into(),
            measures: BTreeMap::new(),
        }
    }

    /// Builder-style measurement entry.
    pub fn with(mut self, measure: ReferenceMeasure, value: f64) -> Self {
        self.measures.insert(measure, value);
        self
    }

    /// Extract the reference measurements carried by a fact entry.
    pub fn from_zone_facts(facts: &ZoneFacts) -> Self {
        Self::new(facts.zone_id.clone())
            .with(ReferenceMeasure::BrakePoint, facts.brake_reference_m)
            .with(ReferenceMeasure::ApexSpeed, facts.nominal_speed_kmh)
            .with(ReferenceMeasure::ThrottlePoint, facts.throttle_reference)
            .with(ReferenceMeasure::LeanAngle, facts.lean_angle_deg)
    }
}

/// A full per-zone reference set for one epoch.
pub type ReferenceSet = BTreeMap<String, EpochReference>;

/// Build a [`ReferenceSet`] from an iterator of references.
pub fn reference_set(refs: impl IntoIterator<Item = EpochReference>) -> ReferenceSet {
    refs.into_iter().map(|r| (r.zone_id.clone(), r)).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Offset computation
// ─────────────────────────────────────────────────────────────────────────────

/// Compute per-zone offsets between two reference sets, returning the offset
/// map and the ids of zones that had to be skipped.
pub(crate) fn compute_with_skips(
    old: &ReferenceSet,
    new: &ReferenceSet,
) -> (BTreeMap<String, DomainOffset>, Vec<String>) {
    let mut offsets = BTreeMap::new();
    let mut skipped = Vec::new();

    for (zone_id, old_ref) in old {
        let Some(new_ref) = new.get(zone_id) else {
            warn!(zone = %zone_id, "zone absent from new reference set; skipped");
            skipped.push(zone_id.clone());
            continue;
        };

        let mut per_measure = BTreeMap::new();
        let mut deltas = Vec::new();
        for (&measure, &old_value) in &old_ref.measures {
            if let Some(&new_value) = new_ref.measures.get(&measure) {
                let delta = new_value - old_value;
                per_measure.insert(measure, delta);
                deltas.push(delta);
            }
        }

        if deltas.is_empty() {
            warn!(zone = %zone_id, "no matched measurements between epochs; skipped");
            skipped.push(zone_id.clone());
            continue;
        }

        let mean_offset = mean(&deltas);
        let std_offset = std_dev(&deltas, mean_offset);
        debug!(
            zone = %zone_id,
            mean_offset,
            std_offset,
            samples = deltas.len(),
            "computed epoch offset"
        );
        offsets.insert(
            zone_id.clone(),
            DomainOffset {
                per_measure,
                mean_offset,
                std_offset,
                samples: deltas.len(),
            },
        );
    }

    (offsets, skipped)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
fn std_dev(values: &[f64], mean: f64) -> f64 {
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
