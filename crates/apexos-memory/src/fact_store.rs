//! Cache-Augmented (CAG) fact store.
//!
//! Holds the pre-computed reference facts for every track zone and answers
//! keyed lookups in O(1) expected time. Every lookup records a hit or a miss;
//! per-key access counts feed the store statistics. All counters are atomics
//! so lookups run under a shared read lock when the store is shared between
//! inference streams.
//!
//! # Loading
//!
//! [`FactStore::from_config_path`] reads a JSON circuit configuration. A
//! malformed or absent file is *not* an error: the store falls back to the
//! built-in reference circuit and logs a warning. The decision loop must
//! stay available even when the configuration pipeline is broken.
//!
//! # Rebase
//!
//! When the regulatory epoch changes, [`FactStore::rebase`] applies the
//! per-measure deltas computed by the domain adapter to matching zones in
//! place and retags their epoch. Offsets naming unknown zones are skipped
//! with a warning; entries are never dropped.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use apexos_types::{DomainOffset, RuleEpoch, ZoneFacts};
use serde::Deserialize;
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration format
// ─────────────────────────────────────────────────────────────────────────────

/// On-disk circuit configuration. Only the shape matters to this crate; the
/// loader that produces the file is an external collaborator.
#[derive(Debug, Deserialize)]
struct CircuitConfig {
    #[serde(default)]
    circuit: String,
    zones: Vec<ZoneFacts>,
}

// ─────────────────────────────────────────────────────────────────────────────
// FactStore
// ─────────────────────────────────────────────────────────────────────────────

/// Snapshot of the fact-store access statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct FactStoreStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
    /// Key with the highest access count, if any key has been accessed.
    pub most_accessed: Option<String>,
}

/// O(1) keyed store of per-zone reference facts.
pub struct FactStore {
    zones: HashMap<String, ZoneFacts>,
    access: HashMap<String, AtomicU64>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FactStore {
    /// Build a store from an explicit fact set. Keys are the zone ids;
    /// duplicate ids keep the last entry.
    pub fn from_zones(zones: impl IntoIterator<Item = ZoneFacts>) -> Self {
        let zones: HashMap<String, ZoneFacts> = zones
            .into_iter()
            .map(|z| (z.zone_id.clone(), z))
            .collect();
        let access = zones
            .keys()
            .map(|k| (k.clone(), AtomicU64::new(0)))
            .collect();
        Self {
            zones,
            access,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Build a store with the built-in reference circuit.
    pub fn with_defaults() -> Self {
        Self::from_zones(default_circuit())
    }

    /// Load a circuit configuration from a JSON file.
    ///
    /// Falls back to the built-in reference circuit (with a warning) when the
    /// file is absent, unreadable, or malformed. Availability over
    /// strictness: a broken config pipeline must not take the decision loop
    /// down with it.
    pub fn from_config_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "circuit config unreadable; using built-in defaults");
                return Self::with_defaults();
            }
        };
        match serde_json::from_str::<CircuitConfig>(&raw) {
            Ok(config) if !config.zones.is_empty() => {
                info!(
                    circuit = %config.circuit,
                    zones = config.zones.len(),
                    "loaded circuit configuration"
                );
                Self::from_zones(config.zones)
            }
            Ok(_) => {
                warn!(path = %path.display(), "circuit config has no zones; using built-in defaults");
                Self::with_defaults()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "circuit config malformed; using built-in defaults");
                Self::with_defaults()
            }
        }
    }

    // ── Lookup ───────────────────────────────────────────────────────────────

    /// Keyed lookup. Records a hit (and bumps the key's access count) or a
    /// miss as a side effect, including on miss.
    pub fn lookup(&self, key: &str) -> Option<ZoneFacts> {
        match self.zones.get(key) {
            Some(facts) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if let Some(count) = self.access.get(key) {
                    count.fetch_add(1, Ordering::Relaxed);
                }
                Some(facts.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Retrieve the facts for `zone_id`. Counter semantics as [`lookup`][Self::lookup].
    pub fn get_zone(&self, zone_id: &str) -> Option<ZoneFacts> {
        self.lookup(zone_id)
    }

    /// `true` if `key` is present. Does not touch the counters.
    pub fn contains(&self, key: &str) -> bool {
        self.zones.contains_key(key)
    }

    /// All zone ids in the store, unordered.
    pub fn zone_ids(&self) -> impl Iterator<Item = &str> {
        self.zones.keys().map(String::as_str)
    }

    /// All zone facts, unordered. Does not touch the counters.
    pub fn zones(&self) -> impl Iterator<Item = &ZoneFacts> {
        self.zones.values()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    // ── Rebase ───────────────────────────────────────────────────────────────

    /// Apply epoch-change offsets in place.
    ///
    /// For every offset whose zone exists, each per-measure delta is added to
    /// the corresponding numeric field and the entry is retagged with
    /// `new_epoch`. Offsets naming zones absent from the store are skipped
    /// with a warning; zones without an offset keep their old values until a
    /// future adaptation event supplies them. No entry is ever dropped.
    ///
    /// Returns the number of zones rebased.
    pub fn rebase(&mut self, offsets: &BTreeMap<String, DomainOffset>, new_epoch: RuleEpoch) -> usize {
        let mut rebased = 0;
        for (zone_id, offset) in offsets {
            match self.zones.get_mut(zone_id) {
                Some(facts) => {
                    for (&measure, &delta) in &offset.per_measure {
                        facts.apply_delta(measure, delta);
                    }
                    facts.epoch = new_epoch;
                    rebased += 1;
                    debug!(
                        zone = %zone_id,
                        mean_offset = offset.mean_offset,
                        samples = offset.samples,
                        "zone rebased"
                    );
                }
                None => {
                    warn!(zone = %zone_id, "offset targets unknown zone; skipped");
                }
            }
        }
        rebased
    }

    // ── Statistics ───────────────────────────────────────────────────────────

    /// Snapshot of the access statistics.
    pub fn stats(&self) -> FactStoreStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate_percent = if total > 0 {
            hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let most_accessed = self
            .access
            .iter()
            .map(|(k, v)| (k, v.load(Ordering::Relaxed)))
            .filter(|&(_, n)| n > 0)
            .max_by_key(|&(_, n)| n)
            .map(|(k, _)| k.clone());
        FactStoreStats {
            size: self.zones.len(),
            hits,
            misses,
            hit_rate_percent,
            most_accessed,
        }
    }

    /// Access count for one key (0 for unknown keys).
    pub fn access_count(&self, key: &str) -> u64 {
        self.access
            .get(key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Default for FactStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in reference circuit
// ─────────────────────────────────────────────────────────────────────────────

/// The eight-zone reference circuit used when no configuration is supplied.
fn default_circuit() -> Vec<ZoneFacts> {
    let zone = |zone_id: &str,
                name: &str,
                speed: f64,
                banking: f64,
                throttle: f64,
                lean: f64,
                brake: f64,
                critical: bool| ZoneFacts {
        zone_id: zone_id.to_string(),
        name: name.to_string(),
        nominal_speed_kmh: speed,
        banking_degrees: banking,
        throttle_reference: throttle,
        lean_angle_deg: lean,
        brake_reference_m: brake,
        critical,
        epoch: RuleEpoch::Legacy,
    };
    vec![
        zone("Z1", "Straight_Main", 240.0, 0.0, 0.95, 5.0, 0.0, false),
        zone("Z2", "Turn_1_Braking", 95.0, 2.5, 0.0, 45.0, 520.0, false),
        zone("Z3", "Turn_2_Apex", 120.0, 0.0, 0.3, 62.0, 180.0, false),
        zone("Z4", "Turn_4_Banking", 210.0, 15.0, 0.7, 48.0, 380.0, true),
        zone("Z5", "Straight_Secondary", 230.0, 0.0, 0.95, 8.0, 0.0, false),
        zone("Z6", "Turn_6_Tight", 85.0, -2.0, 0.2, 64.0, 260.0, false),
        zone("Z7", "Turn_8_Banking", 190.0, 12.5, 0.6, 50.0, 310.0, true),
        zone("Z8", "Final_Straight", 260.0, 0.0, 1.0, 3.0, 0.0, false),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use apexos_types::ReferenceMeasure;
    use std::io::Write;

    // ── lookup counters ──────────────────────────────────────────────────────

    #[test]
    fn lookup_known_key_records_hit_and_access() {
        let store = FactStore::with_defaults();
        let facts = store.lookup("Z1").expect("Z1 is in the default circuit");
        assert_eq!(facts.name, "Straight_Main");

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(store.access_count("Z1"), 1);
    }

    #[test]
    fn lookup_unknown_key_records_exactly_one_miss() {
        let store = FactStore::with_defaults();
        assert!(store.lookup("Z99").is_none());

        let stats = store.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn get_zone_matches_lookup() {
        let store = FactStore::with_defaults();
        assert_eq!(store.get_zone("Z4"), store.lookup("Z4"));
        assert_eq!(store.access_count("Z4"), 2);
    }

    #[test]
    fn contains_does_not_touch_counters() {
        let store = FactStore::with_defaults();
        assert!(store.contains("Z1"));
        assert!(!store.contains("Z99"));
        let stats = store.stats();
        assert_eq!(stats.hits + stats.misses, 0);
    }

    #[test]
    fn most_accessed_tracks_the_hottest_key() {
        let store = FactStore::with_defaults();
        store.lookup("Z2");
        store.lookup("Z4");
        store.lookup("Z4");
        assert_eq!(store.stats().most_accessed.as_deref(), Some("Z4"));
    }

    #[test]
    fn hit_rate_counts_misses() {
        let store = FactStore::with_defaults();
        store.lookup("Z1");
        store.lookup("nope");
        let stats = store.stats();
        assert!((stats.hit_rate_percent - 50.0).abs() < 1e-9);
    }

    // ── loading ──────────────────────────────────────────────────────────────

    #[test]
    fn default_circuit_has_eight_unique_zones() {
        let store = FactStore::with_defaults();
        assert_eq!(store.len(), 8);
        assert_eq!(store.zone_ids().count(), 8);
    }

    #[test]
    fn absent_config_falls_back_to_defaults() {
        let store = FactStore::from_config_path("/definitely/not/a/file.json");
        assert_eq!(store.len(), 8);
        assert!(store.contains("Z1"));
    }

    #[test]
    fn malformed_config_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ this is not json").unwrap();
        let store = FactStore::from_config_path(file.path());
        assert_eq!(store.len(), 8);
    }

    #[test]
    fn valid_config_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "circuit": "Test Ring",
                "zones": [{{
                    "zone_id": "T1",
                    "name": "Turn_1",
                    "nominal_speed_kmh": 100.0,
                    "banking_degrees": 0.0,
                    "throttle_reference": 0.5,
                    "lean_angle_deg": 30.0,
                    "brake_reference_m": 200.0,
                    "epoch": "legacy"
                }}]
            }}"#
        )
        .unwrap();
        let store = FactStore::from_config_path(file.path());
        assert_eq!(store.len(), 1);
        assert!(store.contains("T1"));
    }

    // ── rebase ───────────────────────────────────────────────────────────────

    fn offset_for(measure: ReferenceMeasure, delta: f64) -> DomainOffset {
        let mut per_measure = BTreeMap::new();
        per_measure.insert(measure, delta);
        DomainOffset {
            per_measure,
            mean_offset: delta,
            std_offset: 0.0,
            samples: 1,
        }
    }

    #[test]
    fn rebase_applies_delta_and_retags_epoch() {
        let mut store = FactStore::with_defaults();
        let before = store.lookup("Z2").unwrap();

        let mut offsets = BTreeMap::new();
        offsets.insert("Z2".to_string(), offset_for(ReferenceMeasure::BrakePoint, 20.0));
        let rebased = store.rebase(&offsets, RuleEpoch::NextGen);

        assert_eq!(rebased, 1);
        let after = store.lookup("Z2").unwrap();
        assert!((after.brake_reference_m - before.brake_reference_m - 20.0).abs() < 1e-9);
        assert_eq!(after.epoch, RuleEpoch::NextGen);
    }

    #[test]
    fn rebase_skips_unknown_zone_without_dropping_entries() {
        let mut store = FactStore::with_defaults();
        let mut offsets = BTreeMap::new();
        offsets.insert("Z99".to_string(), offset_for(ReferenceMeasure::ApexSpeed, 8.0));
        let rebased = store.rebase(&offsets, RuleEpoch::NextGen);

        assert_eq!(rebased, 0);
        assert_eq!(store.len(), 8);
    }

    #[test]
    fn rebase_leaves_unmatched_zones_on_old_epoch() {
        let mut store = FactStore::with_defaults();
        let mut offsets = BTreeMap::new();
        offsets.insert("Z2".to_string(), offset_for(ReferenceMeasure::BrakePoint, 20.0));
        store.rebase(&offsets, RuleEpoch::NextGen);

        let untouched = store.lookup("Z1").unwrap();
        assert_eq!(untouched.epoch, RuleEpoch::Legacy);
    }
}
