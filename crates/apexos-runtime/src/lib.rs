//! `apexos-runtime` – The confidence-gated decision loop.
//!
//! The execution engine where routing happens: each perception frame is
//! turned into a confidence estimate and dispatched to one of the two memory
//! tools, producing a driving directive and a fully recorded decision.
//!
//! # Modules
//!
//! - [`confidence`] – [`ConfidenceEstimator`][confidence::ConfidenceEstimator]:
//!   entropy-based confidence over the embedding, adjusted for zone
//!   familiarity, context difficulty, and historical consistency, with
//!   seeded-RNG determinism for reproducible runs.
//! - [`router`] – [`DecisionRouter`][router::DecisionRouter]:
//!   the reason → act → observe cycle. Confidence at or above the threshold
//!   answers from the cached zone facts; below it the historical corpus is
//!   searched for the closest precedent. Every decision carries a state
//!   snapshot and feeds the router statistics.
//! - [`config`] – [`RuntimeConfig`][config::RuntimeConfig]:
//!   TOML configuration with per-field defaults, warn-and-fall-back loading,
//!   and `APEXOS_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter. Set `OTEL_EXPORTER_OTLP_ENDPOINT` to export live traces to an
//!   OTLP-compatible collector.
//!
//! The memory stores themselves live in `apexos-memory`; epoch adaptation is
//! in `apexos-adapt` and runs out-of-band of this loop.

pub mod confidence;
pub mod config;
pub mod router;
pub mod telemetry;

pub use confidence::{CONSISTENCY_WINDOW, ConfidenceEstimator, ConfidenceWindow};
pub use config::RuntimeConfig;
pub use router::{DecisionRouter, RouterConfig, RouterStats, route_for};
pub use telemetry::{TracerProviderGuard, init_tracing};
