//! Confidence-gated decision routing.
//!
//! [`DecisionRouter`] runs the reason → act → observe cycle for one
//! inference stream: estimate a confidence for the incoming embedding, pick
//! the memory tool (fast cached facts vs broad historical retrieval), derive
//! a driving directive from whatever the chosen store returns, and record
//! the full [`Decision`] with a state snapshot.
//!
//! Routing is a single comparison: confidence at or above the threshold goes
//! to the cache path, everything below goes to retrieval. The threshold is
//! the one operational knob; see [`RouterConfig`].
//!
//! Both stores are shared handles ([`SharedFactStore`],
//! [`SharedRetrievalStore`]), so several routers can serve concurrent
//! streams over the same memory. A router itself is single-stream: `step`
//! takes `&mut self` for its RNG, window, and history.

use std::collections::VecDeque;
use std::time::Instant;

use apexos_memory::{RetrievalFilter, SharedFactStore, SharedRetrievalStore};
use apexos_types::{
    ActionTaken, AgentState, ApexError, Decision, Directive, FrameContext, Maneuver, Observation,
    Reasoning, TelemetryRecord, ToolKind, ZoneFacts,
};
use chrono::Utc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::confidence::{ConfidenceEstimator, ConfidenceWindow};

/// Zone label used when the frame context carries none.
const UNKNOWN_ZONE: &str = "unknown";

/// Relevance assigned to a directive answered straight from cached facts.
const CACHE_HIT_RELEVANCE: f64 = 0.98;

/// Relevance of the neutral fallback directive.
const FALLBACK_RELEVANCE: f64 = 0.5;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for one decision router.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Confidence at or above this value routes to the cache path.
    pub confidence_threshold: f64,
    /// Expected embedding dimension; every frame is validated against it.
    pub embedding_dim: usize,
    /// Number of recent decisions kept in the in-memory history ring.
    pub max_history: usize,
    /// Top-k for retrieval-path searches.
    pub retrieval_k: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.85,
            embedding_dim: 512,
            max_history: 100,
            retrieval_k: 5,
        }
    }
}

impl RouterConfig {
    /// Reject thresholds outside `[0, 1]` before the router starts routing
    /// with them.
    pub fn validate(&self) -> Result<(), ApexError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ApexError::InvalidThreshold(self.confidence_threshold));
        }
        Ok(())
    }
}

/// Pure routing rule: at or above the threshold the cached facts answer,
/// below it the historical corpus is searched.
pub fn route_for(confidence: f64, threshold: f64) -> ToolKind {
    if confidence >= threshold {
        ToolKind::Cache
    } else {
        ToolKind::Retrieval
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Snapshot of one router's routing behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterStats {
    pub total_decisions: u64,
    pub cache_calls: u64,
    pub retrieval_calls: u64,
    pub cache_percent: f64,
    pub retrieval_percent: f64,
    /// Share of memory consultations answered by the chosen store.
    pub memory_hit_rate_percent: f64,
    /// Running average best-match similarity over retrieval-path decisions
    /// that found a precedent.
    pub avg_best_similarity: f64,
    pub avg_decision_time_ms: f64,
    /// Confidence of the most recent decision.
    pub last_confidence: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// DecisionRouter
// ─────────────────────────────────────────────────────────────────────────────

/// Single-stream decision loop over the shared dual-memory stores.
pub struct DecisionRouter {
    config: RouterConfig,
    estimator: ConfidenceEstimator,
    facts: SharedFactStore,
    retrieval: SharedRetrievalStore,
    state: AgentState,
    window: ConfidenceWindow,
    history: VecDeque<Decision>,
    total_decisions: u64,
    cache_calls: u64,
    retrieval_calls: u64,
    avg_best_similarity: f64,
    matched_retrievals: u64,
}

impl DecisionRouter {
    /// Create a router over the shared stores. The estimator's recognised
    /// zones are the fact store's current key set.
    ///
    /// # Errors
    ///
    /// [`ApexError::InvalidThreshold`] when the configured threshold is
    /// outside `[0, 1]`.
    pub fn new(
        config: RouterConfig,
        facts: SharedFactStore,
        retrieval: SharedRetrievalStore,
    ) -> Result<Self, ApexError> {
        config.validate()?;
        let known_zones: Vec<String> = facts.read().zone_ids().map(String::from).collect();
        let estimator = ConfidenceEstimator::new(config.embedding_dim, known_zones);
        Ok(Self::build(config, estimator, facts, retrieval))
    }

    /// Deterministic variant for reproducible runs and tests.
    pub fn with_seed(
        config: RouterConfig,
        facts: SharedFactStore,
        retrieval: SharedRetrievalStore,
        seed: u64,
    ) -> Result<Self, ApexError> {
        config.validate()?;
        let known_zones: Vec<String> = facts.read().zone_ids().map(String::from).collect();
        let estimator = ConfidenceEstimator::with_seed(config.embedding_dim, known_zones, seed);
        Ok(Self::build(config, estimator, facts, retrieval))
    }

    fn build(
        config: RouterConfig,
        estimator: ConfidenceEstimator,
        facts: SharedFactStore,
        retrieval: SharedRetrievalStore,
    ) -> Self {
        let history_cap = config.max_history.max(1);
        Self {
            config,
            estimator,
            facts,
            retrieval,
            state: AgentState {
                current_zone: UNKNOWN_ZONE.to_string(),
                confidence: 0.0,
                memory_hits: 0,
                memory_misses: 0,
                avg_decision_time_ms: 0.0,
                last_tool: ToolKind::Cache,
            },
            window: ConfidenceWindow::default(),
            history: VecDeque::with_capacity(history_cap),
            total_decisions: 0,
            cache_calls: 0,
            retrieval_calls: 0,
            avg_best_similarity: 0.0,
            matched_retrievals: 0,
        }
    }

    // ── The decision cycle ───────────────────────────────────────────────────

    /// Run one reason → act → observe cycle for a perception frame.
    ///
    /// The embedding dimension is validated before anything else; a mismatch
    /// leaves every counter, the window, and the history untouched.
    ///
    /// # Errors
    ///
    /// [`ApexError::DimensionMismatch`] for a wrong-sized embedding.
    #[instrument(skip_all, fields(zone = ctx.zone_id.as_deref().unwrap_or(UNKNOWN_ZONE)))]
    pub fn step(
        &mut self,
        embedding: &[f32],
        ctx: &FrameContext,
    ) -> Result<Decision, ApexError> {
        if embedding.len() != self.config.embedding_dim {
            return Err(ApexError::DimensionMismatch {
                expected: self.config.embedding_dim,
                actual: embedding.len(),
            });
        }
        let started = Instant::now();
        let zone = ctx.zone_id.clone().unwrap_or_else(|| UNKNOWN_ZONE.to_string());

        // Reason.
        let confidence = self.estimator.estimate(embedding, ctx, &self.window);
        let tool = route_for(confidence, self.config.confidence_threshold);
        let reasoning = Reasoning {
            confidence,
            zone: zone.clone(),
            embedding_norm: embedding.iter().map(|x| x * x).sum::<f32>().sqrt(),
            embedding_mean: embedding.iter().sum::<f32>() / embedding.len() as f32,
        };

        // Act and observe.
        let (directive, relevance, similarity, source) = match tool {
            ToolKind::Cache => self.consult_facts(&zone),
            ToolKind::Retrieval => self.consult_precedents(embedding, ctx)?,
        };
        let latency_ms = started.elapsed().as_secs_f64() * 1e3;

        // Bookkeeping after the whole cycle succeeded.
        self.total_decisions += 1;
        match tool {
            ToolKind::Cache => self.cache_calls += 1,
            ToolKind::Retrieval => self.retrieval_calls += 1,
        }
        if let Some(sim) = similarity {
            self.matched_retrievals += 1;
            let n = self.matched_retrievals as f64;
            self.avg_best_similarity += (f64::from(sim) - self.avg_best_similarity) / n;
        }
        self.window.push(confidence);
        let n = self.total_decisions as f64;
        self.state.avg_decision_time_ms += (latency_ms - self.state.avg_decision_time_ms) / n;
        self.state.current_zone = zone;
        self.state.confidence = confidence;
        self.state.last_tool = tool;

        debug!(confidence, %tool, latency_ms, "decision routed");

        let decision = Decision {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            reasoning,
            action: ActionTaken { tool, directive },
            observation: Observation {
                relevance,
                similarity,
                latency_ms,
                source,
            },
            state: self.state.clone(),
        };
        if self.history.len() >= self.config.max_history.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(decision.clone());
        Ok(decision)
    }

    /// Cache path: answer from the zone's reference facts, neutral fallback
    /// on a miss.
    fn consult_facts(&mut self, zone: &str) -> (Directive, f64, Option<f32>, String) {
        match self.facts.read().get_zone(zone) {
            Some(facts) => {
                self.state.memory_hits += 1;
                (
                    directive_from_facts(&facts),
                    CACHE_HIT_RELEVANCE,
                    None,
                    "fact_store".to_string(),
                )
            }
            None => {
                self.state.memory_misses += 1;
                (
                    Directive::neutral(),
                    FALLBACK_RELEVANCE,
                    None,
                    "fact_store".to_string(),
                )
            }
        }
    }

    /// Retrieval path: search the historical corpus and derive the directive
    /// from the closest admitted precedent.
    fn consult_precedents(
        &mut self,
        embedding: &[f32],
        ctx: &FrameContext,
    ) -> Result<(Directive, f64, Option<f32>, String), ApexError> {
        let mut filter = RetrievalFilter::default();
        if let Some(epochs) = &ctx.epochs {
            filter = filter.with_epochs(epochs.clone());
        }
        let results = self
            .retrieval
            .read()
            .retrieve(embedding, self.config.retrieval_k, &filter)?;
        // Counted only once the search succeeded: a store-level dimension
        // mismatch must leave the state untouched.
        self.state.memory_misses += 1;
        Ok(match results.first() {
            Some(best) => (
                directive_from_precedent(&best.record),
                f64::from(best.similarity).clamp(0.0, 1.0),
                Some(best.similarity),
                "retrieval_store".to_string(),
            ),
            None => (
                Directive::neutral(),
                FALLBACK_RELEVANCE,
                None,
                "retrieval_store".to_string(),
            ),
        })
    }

    // ── Introspection ────────────────────────────────────────────────────────

    /// Current state snapshot.
    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Recent decisions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Decision> {
        self.history.iter()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Routing statistics snapshot.
    pub fn stats(&self) -> RouterStats {
        let total = self.total_decisions;
        let percent = |calls: u64| {
            if total > 0 {
                calls as f64 / total as f64 * 100.0
            } else {
                0.0
            }
        };
        let consultations = self.state.memory_hits + self.state.memory_misses;
        let memory_hit_rate_percent = if consultations > 0 {
            self.state.memory_hits as f64 / consultations as f64 * 100.0
        } else {
            0.0
        };
        RouterStats {
            total_decisions: total,
            cache_calls: self.cache_calls,
            retrieval_calls: self.retrieval_calls,
            cache_percent: percent(self.cache_calls),
            retrieval_percent: percent(self.retrieval_calls),
            memory_hit_rate_percent,
            avg_best_similarity: self.avg_best_similarity,
            avg_decision_time_ms: self.state.avg_decision_time_ms,
            last_confidence: self.state.confidence,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Directive derivation
// ─────────────────────────────────────────────────────────────────────────────

/// Map zone reference facts to a concrete maneuver.
fn directive_from_facts(facts: &ZoneFacts) -> Directive {
    let maneuver = if facts.banking_degrees >= 10.0 {
        Maneuver::BankTurn
    } else if facts.throttle_reference >= 1.0 {
        Maneuver::FullAcceleration
    } else if facts.throttle_reference >= 0.9 {
        Maneuver::Accelerate
    } else if facts.throttle_reference <= 0.05 {
        Maneuver::BrakeHard
    } else if facts.throttle_reference <= 0.25 {
        Maneuver::BrakeMedium
    } else {
        Maneuver::ApexTurn
    };
    Directive {
        maneuver,
        throttle: facts.throttle_reference,
        lean_angle_deg: facts.lean_angle_deg,
    }
}

/// Map a retrieved precedent's telemetry to a maneuver.
fn directive_from_precedent(record: &TelemetryRecord) -> Directive {
    let maneuver = if record.braking >= 0.7 {
        Maneuver::BrakeHard
    } else if record.braking >= 0.2 {
        Maneuver::BrakeMedium
    } else if record.throttle >= 0.9 {
        Maneuver::Accelerate
    } else if record.lean_angle_deg >= 45.0 {
        Maneuver::ApexTurn
    } else {
        Maneuver::Neutral
    };
    Directive {
        maneuver,
        throttle: record.throttle,
        lean_angle_deg: record.lean_angle_deg,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
