//! `apexos-memory` – The dual-memory subsystem.
//!
//! Two stores with deliberately different complexity and latency classes:
//!
//! - [`fact_store`] – [`FactStore`][fact_store::FactStore]: the
//!   cache-augmented (CAG) path. O(1) keyed lookup of pre-computed zone
//!   facts with atomic hit/miss/access counters, JSON config loading, and a
//!   built-in default circuit fallback.
//! - [`retrieval`] – [`RetrievalStore`][retrieval::RetrievalStore]: the
//!   retrieval-augmented (RAG) path. A bounded FIFO collection of
//!   (embedding, record, metadata) triples with filtered top-k
//!   cosine-similarity search.
//!
//! # Sharing between inference streams
//!
//! Read paths (`lookup`, `get_zone`, `retrieve`) take `&self` and update
//! their statistics through atomics, so multiple decision routers can share
//! one store behind a read/write lock and only the infrequent write
//! operations (rebase, insert/evict) need the exclusive lock:
//!
//! ```rust
//! use std::sync::Arc;
//! use apexos_memory::{SharedFactStore, fact_store::FactStore};
//!
//! let store: SharedFactStore = Arc::new(parking_lot::RwLock::new(
//!     FactStore::with_defaults(),
//! ));
//! let facts = store.read().get_zone("Z1");
//! assert!(facts.is_some());
//! ```

use std::sync::Arc;

use parking_lot::RwLock;

pub mod fact_store;
pub mod retrieval;

pub use fact_store::{FactStore, FactStoreStats};
pub use retrieval::{Retrieved, RetrievalFilter, RetrievalStats, RetrievalStore};

/// A fact store shared between concurrent inference streams.
pub type SharedFactStore = Arc<RwLock<FactStore>>;

/// A retrieval store shared between concurrent inference streams.
pub type SharedRetrievalStore = Arc<RwLock<RetrievalStore>>;
