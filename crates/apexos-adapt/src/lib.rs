//! `apexos-adapt` – Epoch adaptation for the dual-memory stores.
//!
//! When the regulatory epoch changes (new engine displacement, mass, aero
//! package), the reference facts the cache path answers from are stale and
//! the historical corpus the retrieval path searches is partly misleading.
//! This crate runs out-of-band of the decision loop and brings both stores
//! up to date:
//!
//! - [`offsets`] – [`EpochReference`][offsets::EpochReference] sets in,
//!   per-zone [`DomainOffset`][apexos_types::DomainOffset] map out;
//! - [`DomainAdapter::apply`] – re-bases the fact store in place;
//! - [`transfer`] – [`TransferPolicy`][transfer::TransferPolicy] scores how
//!   applicable support-class evidence is per anomaly category, and
//!   [`DomainAdapter::augment`] seeds the retrieval store with qualifying
//!   transferred precedents, explicitly downweighted versus native evidence.
//!
//! The adaptation protocol has no failed terminal state: every computable
//! offset is applied, partial coverage is recorded as warnings, and
//! unmatched zones stay on their old values until a future adaptation event
//! supplies them.

use std::collections::BTreeMap;

use apexos_memory::{FactStore, RetrievalStore};
use apexos_types::{
    AnomalyCategory, ApexError, DomainOffset, RecordMetadata, RuleEpoch, TelemetryRecord,
};
use chrono::Utc;
use tracing::{info, warn};

pub mod offsets;
pub mod transfer;

pub use offsets::{EpochReference, ReferenceSet, reference_set};
pub use transfer::TransferPolicy;

// ─────────────────────────────────────────────────────────────────────────────
// AdaptationReport
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome summary of one epoch-change run.
///
/// `skipped_zones` being non-empty is the "rebased with warnings" outcome:
/// the run still succeeded for every other zone.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationReport {
    /// Epoch the matched zones were re-based onto.
    pub new_epoch: RuleEpoch,
    /// Number of zones whose facts were updated in place.
    pub rebased_zones: usize,
    /// Zones that could not be covered by this adaptation event.
    pub skipped_zones: Vec<String>,
    /// Total matched sub-measurements across all rebased zones.
    pub samples: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// DomainAdapter
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestrates epoch adaptation over both memory stores.
#[derive(Debug, Clone, Default)]
pub struct DomainAdapter {
    policy: TransferPolicy,
}

/// One support-class precedent offered for transfer into the retrieval
/// store.
#[derive(Debug, Clone)]
pub struct TransferExample {
    pub embedding: Vec<f32>,
    pub record: TelemetryRecord,
    /// Originating session/track label.
    pub source: String,
}

impl DomainAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an externally supplied relevance policy instead of the built-in
    /// table.
    pub fn with_policy(policy: TransferPolicy) -> Self {
        Self { policy }
    }

    // ── Offsets and rebase ───────────────────────────────────────────────────

    /// Compute per-zone offsets between the old and new reference sets.
    ///
    /// Zones present only in `old`, or with no matched measurements, are
    /// skipped with a warning; partial coverage is expected and tolerated.
    pub fn compute_offsets(
        &self,
        old: &ReferenceSet,
        new: &ReferenceSet,
    ) -> BTreeMap<String, DomainOffset> {
        offsets::compute_with_skips(old, new).0
    }

    /// Apply computed offsets to the fact store. Returns the number of zones
    /// rebased.
    pub fn apply(
        &self,
        fact_store: &mut FactStore,
        offsets: &BTreeMap<String, DomainOffset>,
        new_epoch: RuleEpoch,
    ) -> usize {
        fact_store.rebase(offsets, new_epoch)
    }

    /// Full adaptation event: compute offsets and rebase in one pass,
    /// producing an [`AdaptationReport`].
    pub fn rebase_epoch(
        &self,
        fact_store: &mut FactStore,
        old: &ReferenceSet,
        new: &ReferenceSet,
        new_epoch: RuleEpoch,
    ) -> AdaptationReport {
        let (offsets, skipped_zones) = offsets::compute_with_skips(old, new);
        let samples = offsets.values().map(|o| o.samples).sum();
        let rebased_zones = fact_store.rebase(&offsets, new_epoch);
        if !skipped_zones.is_empty() {
            warn!(
                skipped = skipped_zones.len(),
                "epoch rebase completed with partial coverage"
            );
        }
        info!(
            rebased = rebased_zones,
            samples, new_epoch = ?new_epoch, "epoch rebase applied"
        );
        AdaptationReport {
            new_epoch,
            rebased_zones,
            skipped_zones,
            samples,
        }
    }

    // ── Transfer learning ────────────────────────────────────────────────────

    /// Relevance score in `[0, 1]` for reusing support-class evidence of
    /// `category` under the next-gen regulation.
    pub fn transfer_relevance(&self, category: AnomalyCategory) -> f64 {
        self.policy.relevance(category)
    }

    /// Insert support-class precedents for `category` into the retrieval
    /// store, provided their transfer relevance meets `relevance_threshold`.
    ///
    /// Below the threshold nothing is inserted and 0 is returned. Inserted
    /// records are tagged [`RuleEpoch::SupportClass`] and carry the
    /// relevance score as their confidence, so transferred evidence is
    /// explicitly downweighted versus native evidence.
    ///
    /// # Errors
    ///
    /// Propagates [`ApexError::DimensionMismatch`] from the store if an
    /// example's embedding has the wrong dimension; examples before the
    /// offending one remain inserted.
    pub fn augment(
        &self,
        retrieval_store: &mut RetrievalStore,
        category: AnomalyCategory,
        examples: Vec<TransferExample>,
        relevance_threshold: f64,
    ) -> Result<usize, ApexError> {
        let relevance = self.transfer_relevance(category);
        if relevance < relevance_threshold {
            info!(
                ?category,
                relevance, relevance_threshold, "transfer relevance below threshold; nothing inserted"
            );
            return Ok(0);
        }

        let mut inserted = 0;
        for example in examples {
            let meta = RecordMetadata {
                epoch: RuleEpoch::SupportClass,
                category,
                confidence: relevance,
                source: example.source,
                recorded_at: Utc::now(),
            };
            retrieval_store.insert(example.embedding, example.record, meta)?;
            inserted += 1;
        }
        info!(?category, inserted, relevance, "transferred support-class precedents");
        Ok(inserted)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use apexos_memory::RetrievalFilter;
    use apexos_types::ReferenceMeasure;

    fn record(zone: &str) -> TelemetryRecord {
        TelemetryRecord {
            timestamp_s: 0.0,
            zone: zone.to_string(),
            speed_kmh: 140.0,
            lean_angle_deg: 50.0,
            throttle: 0.4,
            braking: 0.2,
            g_lateral: 1.4,
            g_longitudinal: 0.5,
            confidence: 0.88,
        }
    }

    fn example(source: &str, dim: usize) -> TransferExample {
        TransferExample {
            embedding: vec![0.3; dim],
            record: record("Z4"),
            source: source.to_string(),
        }
    }

    // ── compute_offsets / apply ──────────────────────────────────────────────

    #[test]
    fn compute_offsets_yields_brake_mean_twenty() {
        let adapter = DomainAdapter::new();
        let old = reference_set([EpochReference::new("Z").with(ReferenceMeasure::BrakePoint, 520.0)]);
        let new = reference_set([EpochReference::new("Z").with(ReferenceMeasure::BrakePoint, 540.0)]);

        let offsets = adapter.compute_offsets(&old, &new);
        assert!((offsets["Z"].mean_offset - 20.0).abs() < 1e-9);
    }

    #[test]
    fn rebase_epoch_reports_partial_coverage() {
        let adapter = DomainAdapter::new();
        let mut store = FactStore::with_defaults();
        let old = reference_set([
            EpochReference::new("Z2").with(ReferenceMeasure::BrakePoint, 520.0),
            EpochReference::new("Z_unknown").with(ReferenceMeasure::BrakePoint, 100.0),
        ]);
        let new = reference_set([EpochReference::new("Z2").with(ReferenceMeasure::BrakePoint, 540.0)]);

        let report = adapter.rebase_epoch(&mut store, &old, &new, RuleEpoch::NextGen);
        assert_eq!(report.rebased_zones, 1);
        assert_eq!(report.skipped_zones, vec!["Z_unknown".to_string()]);
        assert_eq!(report.samples, 1);
        assert_eq!(store.get_zone("Z2").unwrap().epoch, RuleEpoch::NextGen);
    }

    #[test]
    fn rebase_epoch_moves_brake_point_by_offset() {
        let adapter = DomainAdapter::new();
        let mut store = FactStore::with_defaults();
        let before = store.get_zone("Z2").unwrap().brake_reference_m;

        let old = reference_set([EpochReference::new("Z2").with(ReferenceMeasure::BrakePoint, 520.0)]);
        let new = reference_set([EpochReference::new("Z2").with(ReferenceMeasure::BrakePoint, 540.0)]);
        adapter.rebase_epoch(&mut store, &old, &new, RuleEpoch::NextGen);

        let after = store.get_zone("Z2").unwrap().brake_reference_m;
        assert!((after - before - 20.0).abs() < 1e-9);
    }

    // ── augment ──────────────────────────────────────────────────────────────

    #[test]
    fn augment_below_threshold_inserts_nothing() {
        let adapter = DomainAdapter::new();
        let mut store = RetrievalStore::with_dim(4);

        // Exhaust deviation scores 0.45, below the 0.7 threshold.
        let inserted = adapter
            .augment(
                &mut store,
                AnomalyCategory::ExhaustDeviation,
                vec![example("support_session_1", 4)],
                0.7,
            )
            .unwrap();
        assert_eq!(inserted, 0);
        assert!(store.is_empty());
    }

    #[test]
    fn augment_above_threshold_inserts_all_examples() {
        let adapter = DomainAdapter::new();
        let mut store = RetrievalStore::with_dim(4);

        let inserted = adapter
            .augment(
                &mut store,
                AnomalyCategory::Headshake,
                vec![example("s1", 4), example("s2", 4)],
                0.7,
            )
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn augmented_records_are_tagged_and_downweighted() {
        let adapter = DomainAdapter::new();
        let mut store = RetrievalStore::with_dim(4);
        adapter
            .augment(&mut store, AnomalyCategory::Headshake, vec![example("s1", 4)], 0.7)
            .unwrap();

        let results = store
            .retrieve(&[0.3, 0.3, 0.3, 0.3], 1, &RetrievalFilter::default())
            .unwrap();
        assert_eq!(results[0].meta.epoch, RuleEpoch::SupportClass);
        assert_eq!(results[0].meta.category, AnomalyCategory::Headshake);
        assert!((results[0].meta.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn augment_propagates_dimension_mismatch() {
        let adapter = DomainAdapter::new();
        let mut store = RetrievalStore::with_dim(4);
        let err = adapter
            .augment(&mut store, AnomalyCategory::Headshake, vec![example("bad", 2)], 0.7)
            .unwrap_err();
        assert!(matches!(err, ApexError::DimensionMismatch { expected: 4, actual: 2 }));
    }

    #[test]
    fn custom_policy_changes_augment_behaviour() {
        let mut policy = TransferPolicy::default();
        policy.set(AnomalyCategory::ExhaustDeviation, 0.9);
        let adapter = DomainAdapter::with_policy(policy);
        let mut store = RetrievalStore::with_dim(4);

        let inserted = adapter
            .augment(
                &mut store,
                AnomalyCategory::ExhaustDeviation,
                vec![example("s1", 4)],
                0.7,
            )
            .unwrap();
        assert_eq!(inserted, 1);
    }
}
