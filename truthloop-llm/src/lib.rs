//! Truthloop LLM - Capability Ports
//!
//! Provider-agnostic traits for the two external capabilities the
//! verification pipeline consumes: evidence retrieval and reasoning.
//! HTTP JSON implementations live in [`providers`]; deterministic stand-ins
//! for tests and offline runs live in [`mock`].

pub mod mock;
pub mod providers;

pub use mock::{
    DeterministicReasoner, FailingReasoner, FailingRetriever, FixedRetriever, KeywordRetriever,
};
pub use providers::{HttpClient, HttpEvidenceRetriever, HttpReasoningProvider};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use truthloop_core::{
    Evidence, MemoryType, Outcome, ProviderError, ProvidersConfig, Rule, RuleId, RuleKind,
    TruthloopError, TruthloopResult,
};

// ============================================================================
// EVIDENCE RETRIEVER TRAIT
// ============================================================================

/// Source of evidence for a search query.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EvidenceRetriever: Send + Sync {
    /// Retrieve up to `limit` pieces of evidence for `query`.
    ///
    /// # Returns
    /// * `Ok(Vec<Evidence>)` - Evidence, possibly empty
    /// * `Err(TruthloopError::Provider)` - If the source could not be queried
    async fn retrieve(&self, query: &str, limit: usize) -> TruthloopResult<Vec<Evidence>>;

    /// Identifier used in logs and traces.
    fn name(&self) -> &str;
}

// ============================================================================
// REASONING PROVIDER TRAIT
// ============================================================================

/// A candidate rule as presented to the reasoning capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRule {
    pub id: RuleId,
    pub memory_type: MemoryType,
    pub kind: RuleKind,
    pub condition: String,
    pub action: String,
    pub confidence: f64,
    /// Verdict the rule points towards.
    pub implied_outcome: Outcome,
    /// Match score against the claim.
    pub score: f64,
}

impl CandidateRule {
    pub fn from_rule(rule: &Rule, score: f64) -> Self {
        Self {
            id: rule.id.clone(),
            memory_type: rule.memory_type,
            kind: rule.kind,
            condition: rule.condition.clone(),
            action: rule.action.clone(),
            confidence: rule.confidence,
            implied_outcome: rule.implied_outcome(),
            score,
        }
    }
}

/// Input of one reasoning call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub claim: String,
    pub evidence: Vec<Evidence>,
    pub candidate_rules: Vec<CandidateRule>,
}

/// Output of one reasoning call. `confidence` is uncalibrated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResponse {
    pub verdict: Outcome,
    pub confidence: f64,
    pub reasoning: String,
}

impl ReasoningResponse {
    /// Reject responses a verdict cannot be built from.
    pub fn validate(self, provider: &str) -> TruthloopResult<Self> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(invalid_response(
                provider,
                format!("confidence {} outside [0, 1]", self.confidence),
            ));
        }
        Ok(self)
    }
}

/// Capability that turns a claim, its evidence and candidate rules into a verdict.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    async fn reason(&self, request: &ReasoningRequest) -> TruthloopResult<ReasoningResponse>;

    fn name(&self) -> &str;
}

// ============================================================================
// ERROR HELPERS
// ============================================================================

pub(crate) fn request_failed(provider: &str, status: i32, message: impl Into<String>) -> TruthloopError {
    TruthloopError::Provider(ProviderError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    })
}

pub(crate) fn rate_limited(provider: &str, retry_after_ms: i64) -> TruthloopError {
    TruthloopError::Provider(ProviderError::RateLimited {
        provider: provider.to_string(),
        retry_after_ms,
    })
}

pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> TruthloopError {
    TruthloopError::Provider(ProviderError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    })
}

// ============================================================================
// PROVIDER REGISTRY
// ============================================================================

/// Registry for the capability providers.
/// Providers must be explicitly registered - no auto-discovery.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    retriever: Option<Arc<dyn EvidenceRetriever>>,
    reasoner: Option<Arc<dyn ReasoningProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the evidence retriever, replacing any previous one.
    pub fn register_retriever(&mut self, provider: Arc<dyn EvidenceRetriever>) {
        self.retriever = Some(provider);
    }

    /// Register the reasoning provider, replacing any previous one.
    pub fn register_reasoner(&mut self, provider: Arc<dyn ReasoningProvider>) {
        self.reasoner = Some(provider);
    }

    pub fn retriever(&self) -> TruthloopResult<Arc<dyn EvidenceRetriever>> {
        self.retriever.clone().ok_or_else(|| {
            TruthloopError::Provider(ProviderError::NotConfigured {
                capability: "evidence retrieval".to_string(),
            })
        })
    }

    pub fn reasoner(&self) -> TruthloopResult<Arc<dyn ReasoningProvider>> {
        self.reasoner.clone().ok_or_else(|| {
            TruthloopError::Provider(ProviderError::NotConfigured {
                capability: "reasoning".to_string(),
            })
        })
    }

    pub fn has_retriever(&self) -> bool {
        self.retriever.is_some()
    }

    pub fn has_reasoner(&self) -> bool {
        self.reasoner.is_some()
    }

    /// Build providers from configuration.
    ///
    /// Configured endpoints get HTTP providers. Without a retrieval endpoint
    /// the retriever stays unregistered; without a reasoning endpoint the
    /// [`DeterministicReasoner`] is used.
    pub fn from_config(config: &ProvidersConfig) -> TruthloopResult<Self> {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());
        let rpm = config.requests_per_minute.unwrap_or(60);

        let mut registry = Self::new();
        if let Some(endpoint) = &config.retrieval_endpoint {
            let client = HttpClient::new("retrieval", endpoint.clone(), api_key.clone(), rpm);
            registry.register_retriever(Arc::new(HttpEvidenceRetriever::new(client)));
        }
        match &config.reasoning_endpoint {
            Some(endpoint) => {
                let client = HttpClient::new("reasoning", endpoint.clone(), api_key, rpm);
                registry.register_reasoner(Arc::new(HttpReasoningProvider::new(client)));
            }
            None => registry.register_reasoner(Arc::new(DeterministicReasoner::new())),
        }
        tracing::debug!(
            retriever = registry.has_retriever(),
            reasoner = registry.has_reasoner(),
            "provider registry built from config"
        );
        Ok(registry)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("retriever", &self.retriever.as_ref().map(|p| p.name().to_string()))
            .field("reasoner", &self.reasoner.as_ref().map(|p| p.name().to_string()))
            .finish()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use truthloop_test_utils::always_rule;

    #[test]
    fn test_registry_new_is_empty() {
        let registry = ProviderRegistry::new();
        assert!(!registry.has_retriever());
        assert!(!registry.has_reasoner());
        assert!(matches!(
            registry.retriever(),
            Err(TruthloopError::Provider(ProviderError::NotConfigured { .. }))
        ));
    }

    #[test]
    fn test_registry_register_replaces() {
        let mut registry = ProviderRegistry::new();
        registry.register_retriever(Arc::new(FixedRetriever::new(Vec::new())));
        registry.register_retriever(Arc::new(FailingRetriever::new("down")));
        assert_eq!(registry.retriever().unwrap().name(), "failing");
    }

    #[test]
    fn test_from_config_defaults_to_deterministic_reasoner() {
        let registry = ProviderRegistry::from_config(&ProvidersConfig::default()).unwrap();
        assert!(!registry.has_retriever());
        assert_eq!(registry.reasoner().unwrap().name(), "deterministic");
    }

    #[test]
    fn test_from_config_builds_http_providers() {
        let config = ProvidersConfig {
            retrieval_endpoint: Some("http://localhost:9/search".to_string()),
            reasoning_endpoint: Some("http://localhost:9/reason".to_string()),
            api_key_env: None,
            requests_per_minute: Some(30),
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.retriever().unwrap().name(), "retrieval");
        assert_eq!(registry.reasoner().unwrap().name(), "reasoning");
    }

    #[test]
    fn test_candidate_rule_carries_implied_outcome() {
        let rule = always_rule("det-00001", MemoryType::Detection, 0.6);
        let candidate = CandidateRule::from_rule(&rule, 0.8);
        assert_eq!(candidate.implied_outcome, Outcome::False);
        assert_eq!(candidate.score, 0.8);
    }

    #[test]
    fn test_response_validation_rejects_bad_confidence() {
        let response = ReasoningResponse {
            verdict: Outcome::True,
            confidence: 1.2,
            reasoning: String::new(),
        };
        assert!(response.validate("test").is_err());
    }
}
