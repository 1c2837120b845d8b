//! Runtime configuration loaded from a TOML file.
//!
//! Every field has a default, so a partial file (or none at all) still
//! yields a working configuration. Loading never fails: a missing or
//! malformed file falls back to the defaults with a warning, matching the
//! fact store's availability-over-strictness stance.
//!
//! # Environment variables
//!
//! | Variable | Config field |
//! |---|---|
//! | `APEXOS_CONFIDENCE_THRESHOLD` | `confidence_threshold` |
//! | `APEXOS_CIRCUIT_CONFIG` | `circuit_config_path` |

use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::router::RouterConfig;

/// Deserialized runtime configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuntimeConfig {
    /// Confidence at or above this value routes to the cache path.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Embedding dimension every perception frame must match.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Bound on the retrieval store's record count.
    #[serde(default = "default_retrieval_capacity")]
    pub retrieval_capacity: usize,

    /// Number of recent decisions each router keeps.
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Top-k for retrieval-path searches.
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,

    /// Optional path to a JSON circuit configuration for the fact store.
    #[serde(default)]
    pub circuit_config_path: Option<String>,
}

fn default_confidence_threshold() -> f64 {
    0.85
}
fn default_embedding_dim() -> usize {
    512
}
fn default_retrieval_capacity() -> usize {
    10_000
}
fn default_max_history() -> usize {
    100
}
fn default_retrieval_k() -> usize {
    5
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            embedding_dim: default_embedding_dim(),
            retrieval_capacity: default_retrieval_capacity(),
            max_history: default_max_history(),
            retrieval_k: default_retrieval_k(),
            circuit_config_path: None,
        }
    }
}

impl RuntimeConfig {
    /// Load the configuration from a TOML file, falling back to the defaults
    /// (with a warning) when the file is absent, unreadable, or malformed.
    /// Environment overrides are applied last either way.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut cfg = match std::fs::read_to_string(path) {
            Ok(raw) => match toml::from_str::<RuntimeConfig>(&raw) {
                Ok(cfg) => {
                    info!(path = %path.display(), "loaded runtime configuration");
                    cfg
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "runtime config malformed; using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "runtime config unreadable; using defaults");
                Self::default()
            }
        };
        apply_env_overrides(&mut cfg);
        cfg
    }

    /// The router tunables carried by this configuration.
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            confidence_threshold: self.confidence_threshold,
            embedding_dim: self.embedding_dim,
            max_history: self.max_history,
            retrieval_k: self.retrieval_k,
        }
    }
}

/// Apply `APEXOS_*` environment variable overrides to `cfg`. Unparsable
/// values are ignored.
pub fn apply_env_overrides(cfg: &mut RuntimeConfig) {
    if let Ok(v) = std::env::var("APEXOS_CONFIDENCE_THRESHOLD")
        && let Ok(threshold) = v.parse::<f64>()
    {
        cfg.confidence_threshold = threshold;
    }
    if let Ok(v) = std::env::var("APEXOS_CIRCUIT_CONFIG") {
        cfg.circuit_config_path = Some(v);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_router_defaults() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.router_config(), RouterConfig::default());
        assert_eq!(cfg.retrieval_capacity, 10_000);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "confidence_threshold = 0.9").unwrap();

        let cfg = RuntimeConfig::load(file.path());
        assert_eq!(cfg.confidence_threshold, 0.9);
        assert_eq!(cfg.embedding_dim, 512);
        assert_eq!(cfg.retrieval_k, 5);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = RuntimeConfig::load("/definitely/not/a/config.toml");
        assert_eq!(cfg, RuntimeConfig::default());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "confidence_threshold = [not toml").unwrap();

        let cfg = RuntimeConfig::load(file.path());
        assert_eq!(cfg.confidence_threshold, 0.85);
    }

    #[test]
    fn env_override_changes_threshold() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("APEXOS_CONFIDENCE_THRESHOLD", "0.75") };
        let mut cfg = RuntimeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.confidence_threshold, 0.75);
        unsafe { std::env::remove_var("APEXOS_CONFIDENCE_THRESHOLD") };
    }

    #[test]
    fn env_override_ignores_invalid_threshold() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("APEXOS_CONFIDENCE_THRESHOLD", "not-a-number") };
        let mut cfg = RuntimeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.confidence_threshold, 0.85);
        unsafe { std::env::remove_var("APEXOS_CONFIDENCE_THRESHOLD") };
    }

    #[test]
    fn env_override_sets_circuit_path() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("APEXOS_CIRCUIT_CONFIG", "/tmp/circuit.json") };
        let mut cfg = RuntimeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.circuit_config_path.as_deref(), Some("/tmp/circuit.json"));
        unsafe { std::env::remove_var("APEXOS_CIRCUIT_CONFIG") };
    }
}
