//! Deterministic providers for tests and offline runs.

use crate::{
    request_failed, CandidateRule, EvidenceRetriever, ReasoningProvider, ReasoningRequest,
    ReasoningResponse,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use truthloop_core::{Evidence, Outcome, TruthloopResult};

// ============================================================================
// RETRIEVERS
// ============================================================================

/// Returns the same evidence for every query.
#[derive(Debug, Clone)]
pub struct FixedRetriever {
    evidence: Vec<Evidence>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl FixedRetriever {
    pub fn new(evidence: Vec<Evidence>) -> Self {
        Self {
            evidence,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleep before answering, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `retrieve` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvidenceRetriever for FixedRetriever {
    async fn retrieve(&self, _query: &str, limit: usize) -> TruthloopResult<Vec<Evidence>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.evidence.iter().take(limit).cloned().collect())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

/// Fails every query.
#[derive(Debug, Clone)]
pub struct FailingRetriever {
    reason: String,
}

impl FailingRetriever {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl EvidenceRetriever for FailingRetriever {
    async fn retrieve(&self, _query: &str, _limit: usize) -> TruthloopResult<Vec<Evidence>> {
        Err(request_failed("failing", 503, self.reason.clone()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Returns the evidence registered under every keyword the query contains.
/// Queries containing a registered failure keyword fail.
#[derive(Debug, Clone, Default)]
pub struct KeywordRetriever {
    entries: Vec<(String, Evidence)>,
    failures: Vec<String>,
}

impl KeywordRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_evidence(mut self, keyword: &str, evidence: Evidence) -> Self {
        self.entries.push((keyword.to_lowercase(), evidence));
        self
    }

    pub fn failing_on(mut self, keyword: &str) -> Self {
        self.failures.push(keyword.to_lowercase());
        self
    }
}

#[async_trait]
impl EvidenceRetriever for KeywordRetriever {
    async fn retrieve(&self, query: &str, limit: usize) -> TruthloopResult<Vec<Evidence>> {
        let query = query.to_lowercase();
        if let Some(keyword) = self.failures.iter().find(|k| query.contains(k.as_str())) {
            return Err(request_failed(
                "keyword",
                500,
                format!("query mentioning '{keyword}' failed"),
            ));
        }
        Ok(self
            .entries
            .iter()
            .filter(|(keyword, _)| query.contains(keyword.as_str()))
            .map(|(_, evidence)| evidence.clone())
            .take(limit)
            .collect())
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

// ============================================================================
// REASONERS
// ============================================================================

const FALSE_MARKERS: &[&str] = &[
    "false", "fake", "hoax", "debunked", "misleading", "fabricated", "myth", "untrue", "incorrect",
];
const TRUE_MARKERS: &[&str] = &[
    "true", "confirmed", "verified", "accurate", "correct", "genuine", "official",
];

/// Which outcome a piece of evidence supports, judged by marker words.
fn evidence_stance(evidence: &Evidence) -> Option<Outcome> {
    let lower = evidence.content.to_lowercase();
    let words: HashSet<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let false_hits = FALSE_MARKERS.iter().filter(|m| words.contains(*m)).count();
    let true_hits = TRUE_MARKERS.iter().filter(|m| words.contains(*m)).count();
    match false_hits.cmp(&true_hits) {
        std::cmp::Ordering::Greater => Some(Outcome::False),
        std::cmp::Ordering::Less => Some(Outcome::True),
        std::cmp::Ordering::Equal => None,
    }
}

/// Weighted vote between candidate rules and evidence stance.
///
/// Each candidate rule votes for its implied outcome with its match score;
/// each piece of evidence votes with its credibility weight. The raw
/// confidence `0.5 + 0.5 * (win - lose) / (win + lose + 1)` strictly grows
/// with support for the winning side and stays below 1. Ties and the
/// no-signal case resolve to `False` at confidence 0.5.
#[derive(Debug, Clone, Default)]
pub struct DeterministicReasoner;

impl DeterministicReasoner {
    pub fn new() -> Self {
        Self
    }

    fn tally(rules: &[CandidateRule], evidence: &[Evidence]) -> (f64, f64) {
        let mut for_true = 0.0;
        let mut for_false = 0.0;
        for rule in rules {
            match rule.implied_outcome {
                Outcome::True => for_true += rule.score,
                Outcome::False => for_false += rule.score,
            }
        }
        for item in evidence {
            match evidence_stance(item) {
                Some(Outcome::True) => for_true += item.credibility.weight(),
                Some(Outcome::False) => for_false += item.credibility.weight(),
                None => {}
            }
        }
        (for_true, for_false)
    }
}

#[async_trait]
impl ReasoningProvider for DeterministicReasoner {
    async fn reason(&self, request: &ReasoningRequest) -> TruthloopResult<ReasoningResponse> {
        let (for_true, for_false) = Self::tally(&request.candidate_rules, &request.evidence);
        let (verdict, win, lose) = if for_true > for_false {
            (Outcome::True, for_true, for_false)
        } else {
            (Outcome::False, for_false, for_true)
        };
        let confidence = 0.5 + 0.5 * (win - lose) / (win + lose + 1.0);
        let reasoning = format!(
            "{} candidate rules and {} evidence items; support {:.2} for {} against {:.2}",
            request.candidate_rules.len(),
            request.evidence.len(),
            win,
            verdict,
            lose
        );
        Ok(ReasoningResponse {
            verdict,
            confidence,
            reasoning,
        })
    }

    fn name(&self) -> &str {
        "deterministic"
    }
}

/// Fails every reasoning call, optionally after a delay.
#[derive(Debug, Clone, Default)]
pub struct FailingReasoner {
    delay: Option<Duration>,
}

impl FailingReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

#[async_trait]
impl ReasoningProvider for FailingReasoner {
    async fn reason(&self, _request: &ReasoningRequest) -> TruthloopResult<ReasoningResponse> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Err(request_failed("failing-reasoner", 502, "reasoning backend unreachable"))
    }

    fn name(&self) -> &str {
        "failing-reasoner"
    }
}
