//! Retrieval-Augmented (RAG) historical record store.
//!
//! A bounded collection of (embedding, telemetry record, metadata) triples
//! with filtered top-k cosine-similarity search. Embeddings are
//! L2-normalized on insertion, so similarity is a plain dot product at query
//! time and every stored vector satisfies the unit-norm invariant.
//!
//! # Bounds and eviction
//!
//! The store never exceeds its configured capacity: when an insert would
//! overflow, the oldest entry is evicted first (FIFO) under the same
//! exclusive borrow, so a concurrent reader can never observe
//! `len > capacity`.
//!
//! # Complexity
//!
//! Queries are O(n) over the candidate subset. Acceptable because the store
//! is bounded; a migration to an unbounded corpus would need an approximate
//! nearest-neighbor index and a retrieval deadline.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use apexos_types::{AnomalyCategory, ApexError, RecordMetadata, RuleEpoch, TelemetryRecord};
use tracing::debug;

/// Default bound on the number of stored records.
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

// ─────────────────────────────────────────────────────────────────────────────
// Filter
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata predicate applied before any similarity is computed.
///
/// An empty filter admits everything. Epoch and include filters are
/// allow-lists; the exclude filter is a deny-list applied last.
#[derive(Debug, Clone, Default)]
pub struct RetrievalFilter {
    epochs: Option<Vec<RuleEpoch>>,
    include_categories: Option<Vec<AnomalyCategory>>,
    exclude_categories: Vec<AnomalyCategory>,
}

impl RetrievalFilter {
    /// Restrict candidates to records tagged with one of `epochs`.
    pub fn with_epochs(mut self, epochs: impl Into<Vec<RuleEpoch>>) -> Self {
        self.epochs = Some(epochs.into());
        self
    }

    /// Restrict candidates to records in one of `categories`.
    pub fn include_categories(mut self, categories: impl Into<Vec<AnomalyCategory>>) -> Self {
        self.include_categories = Some(categories.into());
        self
    }

    /// Remove records in any of `categories` from the candidate set.
    pub fn exclude_categories(mut self, categories: impl Into<Vec<AnomalyCategory>>) -> Self {
        self.exclude_categories = categories.into();
        self
    }

    fn admits(&self, meta: &RecordMetadata) -> bool {
        if let Some(epochs) = &self.epochs {
            if !epochs.contains(&meta.epoch) {
                return false;
            }
        }
        if let Some(include) = &self.include_categories {
            if !include.contains(&meta.category) {
                return false;
            }
        }
        !self.exclude_categories.contains(&meta.category)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RetrievalStore
// ─────────────────────────────────────────────────────────────────────────────

/// One search result: the stored record, its metadata, and the cosine
/// similarity against the query.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieved {
    pub record: TelemetryRecord,
    pub meta: RecordMetadata,
    pub similarity: f32,
}

/// Snapshot of the retrieval-store statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalStats {
    pub records: usize,
    pub capacity: usize,
    pub embedding_dim: usize,
    pub retrievals: u64,
}

struct StoredRecord {
    embedding: Vec<f32>,
    record: TelemetryRecord,
    meta: RecordMetadata,
}

/// Bounded FIFO vector store with filtered top-k cosine retrieval.
pub struct RetrievalStore {
    embedding_dim: usize,
    max_records: usize,
    entries: VecDeque<StoredRecord>,
    retrievals: AtomicU64,
}

impl RetrievalStore {
    /// Create an empty store for `embedding_dim`-dimensional vectors holding
    /// at most `max_records` entries (at least 1).
    pub fn new(embedding_dim: usize, max_records: usize) -> Self {
        Self {
            embedding_dim,
            max_records: max_records.max(1),
            entries: VecDeque::new(),
            retrievals: AtomicU64::new(0),
        }
    }

    /// Create a store with the default capacity of [`DEFAULT_MAX_RECORDS`].
    pub fn with_dim(embedding_dim: usize) -> Self {
        Self::new(embedding_dim, DEFAULT_MAX_RECORDS)
    }

    // ── Insertion ────────────────────────────────────────────────────────────

    /// Normalize `embedding` and append the record; evict the oldest entry
    /// first when the store is full so `len ≤ capacity` never breaks.
    ///
    /// # Errors
    ///
    /// [`ApexError::DimensionMismatch`] when the embedding length differs
    /// from the configured dimension. Nothing is mutated in that case.
    pub fn insert(
        &mut self,
        embedding: Vec<f32>,
        record: TelemetryRecord,
        meta: RecordMetadata,
    ) -> Result<(), ApexError> {
        self.check_dim(embedding.len())?;
        if self.entries.len() >= self.max_records {
            self.entries.pop_front();
        }
        self.entries.push_back(StoredRecord {
            embedding: normalized(embedding),
            record,
            meta,
        });
        Ok(())
    }

    // ── Retrieval ────────────────────────────────────────────────────────────

    /// Filtered top-k cosine-similarity search.
    ///
    /// Filters are applied first; an empty candidate subset yields an empty
    /// result, not an error. Results are ordered by descending similarity
    /// with ties broken by insertion order, and `k` is clamped to the
    /// candidate count.
    ///
    /// # Errors
    ///
    /// [`ApexError::DimensionMismatch`] when the query length differs from
    /// the configured dimension.
    pub fn retrieve(
        &self,
        query: &[f32],
        k: usize,
        filter: &RetrievalFilter,
    ) -> Result<Vec<Retrieved>, ApexError> {
        self.check_dim(query.len())?;
        self.retrievals.fetch_add(1, Ordering::Relaxed);

        let query = normalized(query.to_vec());
        let mut scored: Vec<Retrieved> = self
            .entries
            .iter()
            .filter(|e| filter.admits(&e.meta))
            .map(|e| Retrieved {
                record: e.record.clone(),
                meta: e.meta.clone(),
                similarity: dot(&query, &e.embedding),
            })
            .collect();

        if scored.is_empty() {
            debug!("retrieval filter admitted no candidates");
            return Ok(Vec::new());
        }

        // Stable sort keeps insertion order for equal similarities.
        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(k);
        Ok(scored)
    }

    /// The most recent records captured in `zone`, oldest first, at most
    /// `limit` of them.
    pub fn zone_history(&self, zone: &str, limit: usize) -> Vec<TelemetryRecord> {
        let mut recent: Vec<TelemetryRecord> = self
            .entries
            .iter()
            .rev()
            .filter(|e| e.record.zone == zone)
            .take(limit)
            .map(|e| e.record.clone())
            .collect();
        recent.reverse();
        recent
    }

    // ── Statistics ───────────────────────────────────────────────────────────

    pub fn stats(&self) -> RetrievalStats {
        RetrievalStats {
            records: self.entries.len(),
            capacity: self.max_records,
            embedding_dim: self.embedding_dim,
            retrievals: self.retrievals.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn check_dim(&self, actual: usize) -> Result<(), ApexError> {
        if actual != self.embedding_dim {
            return Err(ApexError::DimensionMismatch {
                expected: self.embedding_dim,
                actual,
            });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vector helpers
// ─────────────────────────────────────────────────────────────────────────────

/// L2-normalize in place. The `1e-8` guard keeps the all-zero vector finite.
fn normalized(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt() + 1e-8;
    for x in &mut v {
        *x /= norm;
    }
    v
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
