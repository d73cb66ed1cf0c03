//! Configuration types
//!
//! Every section has defaults, so a config file only needs the values it
//! overrides. `validate()` must pass before a config is handed to any service.

use crate::{ConfigError, TruthloopError, TruthloopResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Rule matching thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchingConfig {
    /// Top score at or above which match quality is `high`.
    pub high_threshold: f64,
    /// Top score at or above which match quality is `medium`.
    pub medium_threshold: f64,
    /// Maximum number of candidate rules returned per claim.
    pub max_candidates: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.75,
            medium_threshold: 0.5,
            max_candidates: 5,
        }
    }
}

/// Curator update parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CuratorConfig {
    /// Reinforcement rate: `c' = c + rate * (1 - c)`.
    pub reinforce_rate: f64,
    /// Attempts after the first when `apply_delta` reports a conflict.
    pub max_retries: u32,
    pub min_initial_confidence: f64,
    pub max_initial_confidence: f64,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            reinforce_rate: 0.2,
            max_retries: 3,
            min_initial_confidence: 0.3,
            max_initial_confidence: 0.7,
        }
    }
}

/// Verification pipeline limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub max_queries: usize,
    pub max_evidence_per_query: usize,
    pub retrieval_timeout_ms: u64,
    pub reasoning_timeout_ms: u64,
    /// Largest confidence reduction applied when no evidence supports a verdict.
    pub empty_evidence_penalty: f64,
    /// Minimum content words for a sentence to count as a checkable claim.
    pub min_claim_terms: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queries: 3,
            max_evidence_per_query: 5,
            retrieval_timeout_ms: 10_000,
            reasoning_timeout_ms: 30_000,
            empty_evidence_penalty: 0.5,
            min_claim_terms: 2,
        }
    }
}

impl PipelineConfig {
    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval_timeout_ms)
    }

    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_millis(self.reasoning_timeout_ms)
    }
}

/// Where playbooks and cases live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// LMDB map size in MiB.
    pub map_size_mb: usize,
    /// Playbook made active at startup when no switch has been recorded.
    pub active_playbook: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            map_size_mb: 256,
            active_playbook: "default".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn map_size_bytes(&self) -> usize {
        self.map_size_mb.saturating_mul(1024 * 1024)
    }
}

/// External capability endpoints. Absent endpoints fall back to local stubs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvidersConfig {
    pub retrieval_endpoint: Option<String>,
    pub reasoning_endpoint: Option<String>,
    /// Name of the environment variable holding the bearer token.
    pub api_key_env: Option<String>,
    pub requests_per_minute: Option<u32>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TruthloopConfig {
    pub matching: MatchingConfig,
    pub curator: CuratorConfig,
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
    pub providers: ProvidersConfig,
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> TruthloopError {
    TruthloopError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

fn is_unit_interval(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

impl TruthloopConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn defaults(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.data_dir = data_dir.into();
        config
    }

    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str) -> TruthloopResult<Self> {
        toml::from_str(contents).map_err(|e| {
            TruthloopError::Config(ConfigError::Parse {
                reason: e.to_string(),
            })
        })
    }

    /// Read and parse a TOML file. Does not validate.
    pub fn from_path(path: &Path) -> TruthloopResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TruthloopError::Config(ConfigError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validate all configuration values.
    pub fn validate(&self) -> TruthloopResult<()> {
        let m = &self.matching;
        if !(m.high_threshold.is_finite() && m.high_threshold > 0.0 && m.high_threshold <= 1.0) {
            return Err(invalid(
                "matching.high_threshold",
                m.high_threshold,
                "must be in (0, 1]",
            ));
        }
        if !(m.medium_threshold.is_finite() && m.medium_threshold > 0.0) {
            return Err(invalid(
                "matching.medium_threshold",
                m.medium_threshold,
                "must be greater than 0",
            ));
        }
        if m.medium_threshold >= m.high_threshold {
            return Err(invalid(
                "matching.medium_threshold",
                m.medium_threshold,
                "must be below matching.high_threshold",
            ));
        }
        if m.max_candidates == 0 {
            return Err(invalid(
                "matching.max_candidates",
                m.max_candidates,
                "must be greater than 0",
            ));
        }

        let c = &self.curator;
        if !(c.reinforce_rate.is_finite() && c.reinforce_rate > 0.0 && c.reinforce_rate < 1.0) {
            return Err(invalid(
                "curator.reinforce_rate",
                c.reinforce_rate,
                "must be in (0, 1)",
            ));
        }
        if !is_unit_interval(c.min_initial_confidence) {
            return Err(invalid(
                "curator.min_initial_confidence",
                c.min_initial_confidence,
                "must be in [0, 1]",
            ));
        }
        if !is_unit_interval(c.max_initial_confidence) || c.max_initial_confidence >= 1.0 {
            return Err(invalid(
                "curator.max_initial_confidence",
                c.max_initial_confidence,
                "must be in [0, 1)",
            ));
        }
        if c.min_initial_confidence > c.max_initial_confidence {
            return Err(invalid(
                "curator.min_initial_confidence",
                c.min_initial_confidence,
                "must not exceed curator.max_initial_confidence",
            ));
        }

        let p = &self.pipeline;
        if p.max_queries == 0 {
            return Err(invalid("pipeline.max_queries", p.max_queries, "must be greater than 0"));
        }
        if p.max_evidence_per_query == 0 {
            return Err(invalid(
                "pipeline.max_evidence_per_query",
                p.max_evidence_per_query,
                "must be greater than 0",
            ));
        }
        if p.retrieval_timeout_ms == 0 {
            return Err(invalid(
                "pipeline.retrieval_timeout_ms",
                p.retrieval_timeout_ms,
                "must be positive",
            ));
        }
        if p.reasoning_timeout_ms == 0 {
            return Err(invalid(
                "pipeline.reasoning_timeout_ms",
                p.reasoning_timeout_ms,
                "must be positive",
            ));
        }
        if !is_unit_interval(p.empty_evidence_penalty) || p.empty_evidence_penalty >= 1.0 {
            return Err(invalid(
                "pipeline.empty_evidence_penalty",
                p.empty_evidence_penalty,
                "must be in [0, 1)",
            ));
        }
        if p.min_claim_terms == 0 {
            return Err(invalid(
                "pipeline.min_claim_terms",
                p.min_claim_terms,
                "must be greater than 0",
            ));
        }

        let s = &self.storage;
        if s.data_dir.as_os_str().is_empty() {
            return Err(TruthloopError::Config(ConfigError::MissingRequired {
                field: "storage.data_dir".to_string(),
            }));
        }
        if s.map_size_mb == 0 {
            return Err(invalid("storage.map_size_mb", s.map_size_mb, "must be greater than 0"));
        }
        if s.active_playbook.trim().is_empty() {
            return Err(TruthloopError::Config(ConfigError::MissingRequired {
                field: "storage.active_playbook".to_string(),
            }));
        }

        let pr = &self.providers;
        for (field, endpoint) in [
            ("providers.retrieval_endpoint", &pr.retrieval_endpoint),
            ("providers.reasoning_endpoint", &pr.reasoning_endpoint),
        ] {
            if let Some(url) = endpoint {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(invalid(field, url, "must be an http(s) URL"));
                }
            }
        }
        if pr.requests_per_minute == Some(0) {
            return Err(invalid(
                "providers.requests_per_minute",
                0,
                "must be greater than 0 when set",
            ));
        }

        Ok(())
    }
}
