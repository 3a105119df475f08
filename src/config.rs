//! Inference configuration, loadable from TOML.
//!
//! ```toml
//! mode = "exact"
//!
//! [greedy]
//! threshold = 0.5
//! rank_by = "max"
//!
//! [solver]
//! max_nodes = 5000000
//! split_depth = 3
//!
//! [[scheduler.buckets]]
//! max_cost = 90
//! workers = 8
//! threads_per_worker = 1
//!
//! [[scheduler.buckets]]
//! workers = 1
//! threads_per_worker = 8
//!
//! [fallback]
//! single_threaded_retry = true
//! greedy = true
//!
//! [checkpoint]
//! relation = "out/relation_graphs.json"
//! ```
//!
//! Every section is optional; missing values take their defaults.

use crate::checkpoint::CheckpointPaths;
use crate::error::{Error, Result};
use crate::greedy::GreedyConfig;
use crate::scheduler::SchedulerConfig;
use crate::solver::SolverConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Deepest allowed frontier split (4^depth subtrees).
const MAX_SPLIT_DEPTH: usize = 10;

/// Primary inference mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMode {
    /// Exact constraint solving over four-label scores.
    #[default]
    Exact,
    /// Greedy chain building over the COREF scores only.
    Greedy,
}

/// Which fallback steps follow the primary mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Retry the exact solver with a single thread.
    pub single_threaded_retry: bool,
    /// Finish with the greedy builder.
    pub greedy: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            single_threaded_retry: true,
            greedy: true,
        }
    }
}

impl FallbackConfig {
    /// No fallback at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            single_threaded_retry: false,
            greedy: false,
        }
    }
}

/// Complete inference configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Primary mode.
    pub mode: InferenceMode,
    /// Greedy builder settings (greedy mode and the greedy fallback).
    pub greedy: GreedyConfig,
    /// Exact solver settings.
    pub solver: SolverConfig,
    /// Scheduler buckets.
    pub scheduler: SchedulerConfig,
    /// Fallback steps.
    pub fallback: FallbackConfig,
    /// Checkpoint files.
    pub checkpoint: CheckpointPaths,
}

impl InferenceConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("[Config] Loaded {}", path.display());
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !self.greedy.threshold.is_finite() {
            return Err(Error::invalid_config(format!(
                "greedy.threshold must be finite, got {}",
                self.greedy.threshold
            )));
        }
        if self.solver.max_nodes == Some(0) {
            return Err(Error::invalid_config("solver.max_nodes must be positive"));
        }
        if self.solver.split_depth > MAX_SPLIT_DEPTH {
            return Err(Error::invalid_config(format!(
                "solver.split_depth must be at most {}, got {}",
                MAX_SPLIT_DEPTH, self.solver.split_depth
            )));
        }
        self.scheduler.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::greedy::ChainRanking;

    #[test]
    fn empty_document_gives_defaults() {
        let config = InferenceConfig::from_toml_str("").unwrap();
        assert_eq!(config.mode, InferenceMode::Exact);
        assert_eq!(config.greedy, GreedyConfig::default());
        assert_eq!(config.solver, SolverConfig::default());
        assert!(config.fallback.greedy);
        assert!(config.checkpoint.relation.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let config = InferenceConfig::from_toml_str(
            r#"
            mode = "greedy"

            [greedy]
            threshold = 0.5
            rank_by = "mean"

            [solver]
            split_depth = 2

            [[scheduler.buckets]]
            max_cost = 90
            workers = 4
            threads_per_worker = 1

            [[scheduler.buckets]]
            workers = 1
            threads_per_worker = 4

            [fallback]
            greedy = false

            [checkpoint]
            relation = "graphs.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, InferenceMode::Greedy);
        assert_eq!(config.greedy.threshold, 0.5);
        assert_eq!(config.greedy.rank_by, ChainRanking::Mean);
        assert_eq!(config.solver.split_depth, 2);
        assert_eq!(config.solver.max_nodes, SolverConfig::default().max_nodes);
        assert_eq!(config.scheduler.buckets.len(), 2);
        assert!(config.scheduler.buckets[1].max_cost.is_none());
        assert!(config.fallback.single_threaded_retry);
        assert!(!config.fallback.greedy);
        assert_eq!(
            config.checkpoint.relation.as_deref(),
            Some(Path::new("graphs.json"))
        );
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for text in [
            "[solver]\nmax_nodes = 0",
            "[solver]\nsplit_depth = 40",
            "[scheduler]\nbuckets = []",
            "[[scheduler.buckets]]\nworkers = 0\nthreads_per_worker = 1",
        ] {
            let err = InferenceConfig::from_toml_str(text).unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "{}: {}", text, err);
        }
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = InferenceConfig::from_toml_str("mode = ").unwrap_err();
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capcoref.toml");
        std::fs::write(&path, "[greedy]\nthreshold = 0.25\n").unwrap();
        let config = InferenceConfig::from_file(&path).unwrap();
        assert_eq!(config.greedy.threshold, 0.25);
    }
}
