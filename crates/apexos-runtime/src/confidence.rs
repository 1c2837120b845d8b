//! Perception confidence estimation.
//!
//! Turns an embedding vector plus situational context into a scalar
//! confidence in `[0, 1]` that gates the cache-vs-retrieval routing
//! decision.
//!
//! ## Model
//!
//! 1. An entropy-like dispersion measure over the embedding's squared
//!    components, normalized by `dim · ln(dim)`; base confidence is
//!    `1 − normalized_entropy / dim` (low dispersion ⇒ certain).
//! 2. A `+0.05` bonus (capped at 1.0) when the context zone is one the fact
//!    store knows about.
//! 3. A difficulty penalty, floored at zero:
//!    `0.35·difficulty + 0.002·max(banking − 8°, 0) + 0.001·max(lean_max − 45°, 0)`.
//! 4. When at least five prior confidences are available, a
//!    historical-consistency blend: `0.7·base + 0.3·(1 − stddev(last 5))`.
//! 5. Zero-mean Gaussian jitter (σ = 0.02) to avoid degenerate saturation
//!    at 1.0, then a final clamp to `[0, 1]`.
//!
//! The estimator is deterministic under a seeded RNG
//! ([`ConfidenceEstimator::with_seed`]) and has no side effects beyond its
//! own RNG state: history is supplied by the caller.

use std::collections::{HashSet, VecDeque};

use apexos_types::FrameContext;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Number of prior confidences the consistency blend looks at.
pub const CONSISTENCY_WINDOW: usize = 5;

/// Standard deviation of the anti-saturation jitter.
const JITTER_SIGMA: f64 = 0.02;

/// Bonus applied when the context zone is recognised.
const KNOWN_ZONE_BONUS: f64 = 0.05;

// ─────────────────────────────────────────────────────────────────────────────
// ConfidenceWindow
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-capacity queue of the most recent confidences.
///
/// The consistency blend only engages once the window is full, so a cold
/// start never dampens the raw estimate.
#[derive(Debug, Clone)]
pub struct ConfidenceWindow {
    capacity: usize,
    values: VecDeque<f64>,
}

impl ConfidenceWindow {
    /// Create a window holding at most `capacity` entries (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a confidence, dropping the oldest entry when full.
    pub fn push(&mut self, confidence: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(confidence);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    /// Population standard deviation of the window contents; 0.0 when empty.
    pub fn std_dev(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let n = self.values.len() as f64;
        let mean = self.values.iter().sum::<f64>() / n;
        let var = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        var.sqrt()
    }
}

impl Default for ConfidenceWindow {
    fn default() -> Self {
        Self::new(CONSISTENCY_WINDOW)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConfidenceEstimator
// ─────────────────────────────────────────────────────────────────────────────

/// Entropy-based confidence estimator.
pub struct ConfidenceEstimator {
    embedding_dim: usize,
    known_zones: HashSet<String>,
    rng: StdRng,
}

impl ConfidenceEstimator {
    /// Create an estimator for `embedding_dim`-dimensional vectors.
    /// `known_zones` are the zone ids eligible for the recognised-zone bonus
    /// (typically the fact store's key set).
    pub fn new(embedding_dim: usize, known_zones: impl IntoIterator<Item = String>) -> Self {
        Self {
            embedding_dim,
            known_zones: known_zones.into_iter().collect(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for reproducible runs and tests.
    pub fn with_seed(
        embedding_dim: usize,
        known_zones: impl IntoIterator<Item = String>,
        seed: u64,
    ) -> Self {
        Self {
            embedding_dim,
            known_zones: known_zones.into_iter().collect(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Estimate the confidence for one frame. Always in `[0, 1]`.
    ///
    /// The caller guarantees `embedding.len() == embedding_dim`; the router
    /// validates the dimension before any state is touched.
    pub fn estimate(
        &mut self,
        embedding: &[f32],
        ctx: &FrameContext,
        history: &ConfidenceWindow,
    ) -> f64 {
        let mut confidence = self.base_confidence(embedding);

        if let Some(zone_id) = &ctx.zone_id {
            if self.known_zones.contains(zone_id) {
                confidence = (confidence + KNOWN_ZONE_BONUS).min(1.0);
            }
        }

        let penalty = 0.35 * ctx.difficulty
            + 0.002 * (ctx.banking_degrees - 8.0).max(0.0)
            + 0.001 * (ctx.lean_angle_max_deg - 45.0).max(0.0);
        confidence = (confidence - penalty).max(0.0);

        if history.len() >= CONSISTENCY_WINDOW {
            let consistency = 1.0 - history.std_dev();
            confidence = 0.7 * confidence + 0.3 * consistency;
        }

        let jitter: f64 = self.rng.sample::<f64, _>(StandardNormal) * JITTER_SIGMA;
        (confidence + jitter).clamp(0.0, 1.0)
    }

    /// Dispersion-based confidence before any contextual adjustment.
    fn base_confidence(&self, embedding: &[f32]) -> f64 {
        let entropy: f64 = -embedding
            .iter()
            .map(|&e| {
                let sq = (e as f64).powi(2);
                sq * (sq + 1e-8).ln()
            })
            .sum::<f64>();
        let dim = self.embedding_dim as f64;
        let max_entropy = (dim * dim.ln()).max(1e-8);
        let normalized = entropy / max_entropy;
        1.0 - normalized / dim
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
