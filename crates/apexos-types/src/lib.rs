//! `apexos-types` – Shared vocabulary of the ApexOS decision core.
//!
//! Every crate in the workspace speaks in these types: the closed variant
//! sets (tool kinds, rule epochs, anomaly categories), the fact and telemetry
//! records held by the memory stores, the per-frame context supplied by the
//! perception front-end, and the structured [`Decision`] emitted by the
//! router on every step.
//!
//! The original telemetry pipeline modelled facts and records as tagged
//! dictionaries; here each one is an explicit struct with a fixed field set,
//! and every "enum of strings" is a real closed enum matched exhaustively at
//! the decision point.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Closed variant sets
// ─────────────────────────────────────────────────────────────────────────────

/// The two memory paths a decision can be routed to.
///
/// `Cache` is the O(1) pre-indexed fact path used when confidence is high;
/// `Retrieval` is the similarity-search path over historical records used
/// when confidence is low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Cache,
    Retrieval,
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolKind::Cache => write!(f, "cache"),
            ToolKind::Retrieval => write!(f, "retrieval"),
        }
    }
}

/// Versioned regulatory epoch that reference facts and stored records are
/// tagged with.
///
/// A rule change (engine displacement, mass, aero package) re-bases what
/// "nominal" means for every zone, so records from one epoch must never be
/// silently reused in another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEpoch {
    /// The outgoing regulation the historical corpus was recorded under.
    Legacy,
    /// The incoming regulation the stores are being adapted to.
    NextGen,
    /// The support class: no aero, no ride-height devices, and therefore a
    /// useful transfer-learning source for the next-gen regulation.
    SupportClass,
}

/// Anomaly/event categories recognised by the retrieval store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyCategory {
    /// 8–15 Hz steering oscillation.
    Headshake,
    /// Fork vibration under heavy braking.
    BrakeShudder,
    /// Accelerated tire graining pattern.
    TireGraining,
    /// Exhaust colour deviation (combustion/fuel-system indicator).
    ExhaustDeviation,
    /// Pitch behaviour that is expected under the new regulation; stored as
    /// a reference class, not a fault.
    NominalPitch,
}

/// Numeric reference measurements tracked per zone across rule epochs.
///
/// `Ord` so measurement maps iterate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMeasure {
    /// Braking-point distance in metres from the preceding zone boundary.
    BrakePoint,
    /// Nominal apex speed in km/h.
    ApexSpeed,
    /// Throttle pick-up point in metres.
    ThrottlePoint,
    /// Reference lean angle in degrees.
    LeanAngle,
}

/// High-level maneuver derived from zone facts or retrieved precedent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Maneuver {
    Accelerate,
    FullAcceleration,
    BrakeHard,
    BrakeMedium,
    ApexTurn,
    BankTurn,
    Neutral,
}

// ─────────────────────────────────────────────────────────────────────────────
// Facts and records
// ─────────────────────────────────────────────────────────────────────────────

/// Pre-computed reference facts for one track zone.
///
/// Owned exclusively by the fact store; created at load time or by an epoch
/// rebase, and immutable between rebases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneFacts {
    /// Unique zone identifier (e.g. `"Z4"`).
    pub zone_id: String,
    /// Human-readable name (e.g. `"Turn_4_Banking"`).
    pub name: String,
    /// Nominal zone speed in km/h.
    pub nominal_speed_kmh: f64,
    /// Track banking in degrees (negative for off-camber).
    pub banking_degrees: f64,
    /// Reference throttle position in `[0, 1]`.
    pub throttle_reference: f64,
    /// Reference lean angle in degrees.
    pub lean_angle_deg: f64,
    /// Braking-point distance in metres from the preceding zone boundary.
    pub brake_reference_m: f64,
    /// Zones where a perception error has outsized consequences.
    #[serde(default)]
    pub critical: bool,
    /// Regulatory epoch these reference values were computed under.
    pub epoch: RuleEpoch,
}

impl ZoneFacts {
    /// Read the numeric field addressed by `measure`.
    pub fn measure(&self, measure: ReferenceMeasure) -> f64 {
        match measure {
            ReferenceMeasure::BrakePoint => self.brake_reference_m,
            ReferenceMeasure::ApexSpeed => self.nominal_speed_kmh,
            ReferenceMeasure::ThrottlePoint => self.throttle_reference,
            ReferenceMeasure::LeanAngle => self.lean_angle_deg,
        }
    }

    /// Add `delta` to the numeric field addressed by `measure`.
    pub fn apply_delta(&mut self, measure: ReferenceMeasure, delta: f64) {
        match measure {
            ReferenceMeasure::BrakePoint => self.brake_reference_m += delta,
            ReferenceMeasure::ApexSpeed => self.nominal_speed_kmh += delta,
            ReferenceMeasure::ThrottlePoint => self.throttle_reference += delta,
            ReferenceMeasure::LeanAngle => self.lean_angle_deg += delta,
        }
    }
}

/// A single telemetry measurement, the payload carried by the retrieval
/// store alongside its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Seconds since session start.
    pub timestamp_s: f64,
    /// Zone the measurement was taken in.
    pub zone: String,
    pub speed_kmh: f64,
    pub lean_angle_deg: f64,
    /// Throttle position in `[0, 1]`.
    pub throttle: f64,
    /// Braking force in `[0, 1]`.
    pub braking: f64,
    pub g_lateral: f64,
    pub g_longitudinal: f64,
    /// Measurement confidence assigned at capture time.
    pub confidence: f64,
}

/// Metadata attached to every stored retrieval record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Regulatory epoch the record was captured (or transferred) under.
    pub epoch: RuleEpoch,
    /// Event category of the record.
    pub category: AnomalyCategory,
    /// Evidence confidence; transferred records carry their transfer
    /// relevance here, explicitly downweighting them versus native evidence.
    pub confidence: f64,
    /// Originating session/track label.
    pub source: String,
    /// Wall-clock capture time.
    pub recorded_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Epoch adaptation
// ─────────────────────────────────────────────────────────────────────────────

/// Computed offset between two epochs' reference values for one zone.
///
/// Ephemeral: produced by the domain adapter's offset computation and
/// consumed by the fact-store rebase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainOffset {
    /// `new − old` delta per matched reference measurement. These are the
    /// values a rebase applies; a brake-distance delta must never leak into
    /// a speed field.
    pub per_measure: BTreeMap<ReferenceMeasure, f64>,
    /// Mean of all matched sub-measurement deltas in this zone.
    pub mean_offset: f64,
    /// Population standard deviation of the deltas.
    pub std_offset: f64,
    /// Number of matched sub-measurements.
    pub samples: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-frame context
// ─────────────────────────────────────────────────────────────────────────────

/// Situational context supplied with each embedding. Not persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameContext {
    /// Current zone identifier, when the upstream localizer knows it.
    pub zone_id: Option<String>,
    /// Zone difficulty scalar in `[0, 1]`.
    #[serde(default)]
    pub difficulty: f64,
    /// Track banking in degrees.
    #[serde(default)]
    pub banking_degrees: f64,
    /// Maximum expected lean angle in degrees.
    #[serde(default)]
    pub lean_angle_max_deg: f64,
    /// Regulatory epochs the caller wants retrieval restricted to.
    #[serde(default)]
    pub epochs: Option<Vec<RuleEpoch>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router state and decision output
// ─────────────────────────────────────────────────────────────────────────────

/// Mutable state owned by the decision router.
///
/// Created once at router start, mutated on every decision, never reset
/// except on explicit restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub current_zone: String,
    /// Confidence of the most recent decision.
    pub confidence: f64,
    pub memory_hits: u64,
    pub memory_misses: u64,
    /// Running average decision latency in milliseconds.
    pub avg_decision_time_ms: f64,
    pub last_tool: ToolKind,
}

/// Concrete driving directive derived from zone facts or retrieved precedent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub maneuver: Maneuver,
    /// Target throttle in `[0, 1]`.
    pub throttle: f64,
    /// Target lean angle in degrees.
    pub lean_angle_deg: f64,
}

impl Directive {
    /// The fallback directive used when no fact or precedent applies.
    pub fn neutral() -> Self {
        Self {
            maneuver: Maneuver::Neutral,
            throttle: 0.5,
            lean_angle_deg: 0.0,
        }
    }
}

/// Reason phase: what the router inferred from the embedding and context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reasoning {
    pub confidence: f64,
    pub zone: String,
    pub embedding_norm: f32,
    pub embedding_mean: f32,
}

/// Act phase: the tool chosen and the directive it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTaken {
    pub tool: ToolKind,
    pub directive: Directive,
}

/// Observe phase: outcome quality and cost of the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Relevance of the produced directive in `[0, 1]`.
    pub relevance: f64,
    /// Best cosine similarity, present only on the retrieval path.
    pub similarity: Option<f32>,
    /// Wall-clock latency of this step in milliseconds.
    pub latency_ms: f64,
    /// Which store produced the directive (e.g. `"fact_store"`).
    pub source: String,
}

/// One complete routed decision, suitable for downstream telemetry logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub reasoning: Reasoning,
    pub action: ActionTaken,
    pub observation: Observation,
    /// Snapshot of the router state after this decision.
    pub state: AgentState,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Contract violations surfaced by the decision core.
///
/// Missing fact keys and empty retrieval candidate sets are normal outcomes
/// and are represented as `Option`/empty results, never as errors.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApexError {
    /// The supplied embedding does not match the configured dimension.
    /// Checked before any stateful mutation.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A confidence threshold outside `[0, 1]` was supplied.
    #[error("confidence threshold {0} outside [0, 1]")]
    InvalidThreshold(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_kind_serialization_roundtrip() {
        let tool = ToolKind::Retrieval;
        let json = serde_json::to_string(&tool).unwrap();
        assert_eq!(json, "\"retrieval\"");
        let back: ToolKind = serde_json::from_str(&json).unwrap();
        assert_eq!(tool, back);
    }

    #[test]
    fn rule_epoch_serializes_snake_case() {
        let json = serde_json::to_string(&RuleEpoch::SupportClass).unwrap();
        assert_eq!(json, "\"support_class\"");
    }

    #[test]
    fn zone_facts_measure_accessors_agree_with_fields() {
        let facts = ZoneFacts {
            zone_id: "Z1".to_string(),
            name: "Turn_1".to_string(),
            nominal_speed_kmh: 95.0,
            banking_degrees: 2.5,
            throttle_reference: 0.1,
            lean_angle_deg: 45.0,
            brake_reference_m: 520.0,
            critical: false,
            epoch: RuleEpoch::Legacy,
        };
        assert_eq!(facts.measure(ReferenceMeasure::BrakePoint), 520.0);
        assert_eq!(facts.measure(ReferenceMeasure::ApexSpeed), 95.0);
        assert_eq!(facts.measure(ReferenceMeasure::ThrottlePoint), 0.1);
        assert_eq!(facts.measure(ReferenceMeasure::LeanAngle), 45.0);
    }

    #[test]
    fn zone_facts_apply_delta_is_additive() {
        let mut facts = ZoneFacts {
            zone_id: "Z1".to_string(),
            name: "Turn_1".to_string(),
            nominal_speed_kmh: 95.0,
            banking_degrees: 0.0,
            throttle_reference: 0.1,
            lean_angle_deg: 45.0,
            brake_reference_m: 520.0,
            critical: false,
            epoch: RuleEpoch::Legacy,
        };
        facts.apply_delta(ReferenceMeasure::BrakePoint, 20.0);
        facts.apply_delta(ReferenceMeasure::ApexSpeed, -3.0);
        assert_eq!(facts.brake_reference_m, 540.0);
        assert_eq!(facts.nominal_speed_kmh, 92.0);
    }

    #[test]
    fn zone_facts_deserializes_without_critical_flag() {
        let json = r#"{
            "zone_id": "Z8",
            "name": "Final_Straight",
            "nominal_speed_kmh": 260.0,
            "banking_degrees": 0.0,
            "throttle_reference": 1.0,
            "lean_angle_deg": 3.0,
            "brake_reference_m": 0.0,
            "epoch": "legacy"
        }"#;
        let facts: ZoneFacts = serde_json::from_str(json).unwrap();
        assert!(!facts.critical);
    }

    #[test]
    fn frame_context_default_is_zoneless() {
        let ctx = FrameContext::default();
        assert!(ctx.zone_id.is_none());
        assert_eq!(ctx.difficulty, 0.0);
        assert!(ctx.epochs.is_none());
    }

    #[test]
    fn neutral_directive_is_half_throttle() {
        let d = Directive::neutral();
        assert_eq!(d.maneuver, Maneuver::Neutral);
        assert_eq!(d.throttle, 0.5);
    }

    #[test]
    fn dimension_mismatch_message_names_both_sizes() {
        let err = ApexError::DimensionMismatch {
            expected: 512,
            actual: 256,
        };
        let msg = err.to_string();
        assert!(msg.contains("512") && msg.contains("256"));
    }

    #[test]
    fn decision_serialization_roundtrip() {
        let decision = Decision {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            reasoning: Reasoning {
                confidence: 0.91,
                zone: "Z4".to_string(),
                embedding_norm: 1.0,
                embedding_mean: 0.002,
            },
            action: ActionTaken {
                tool: ToolKind::Cache,
                directive: Directive {
                    maneuver: Maneuver::BankTurn,
                    throttle: 0.7,
                    lean_angle_deg: 48.0,
                },
            },
            observation: Observation {
                relevance: 0.98,
                similarity: None,
                latency_ms: 1.3,
                source: "fact_store".to_string(),
            },
            state: AgentState {
                current_zone: "Z4".to_string(),
                confidence: 0.91,
                memory_hits: 1,
                memory_misses: 0,
                avg_decision_time_ms: 1.3,
                last_tool: ToolKind::Cache,
            },
        };
        let json = serde_json::to_string(&decision).unwrap();
        let back: Decision = serde_json::from_str(&json).unwrap();
        assert_eq!(decision, back);
    }
}
