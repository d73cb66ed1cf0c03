//! The verification pipeline: Planner, Investigator, Judge.
//!
//! ```text
//! PLANNING -> INVESTIGATING -> JUDGING -> DONE
//!     \            \              \
//!      +------------+--------------+--> FAILED
//! ```
//!
//! Every run opens a case before planning and finalizes it exactly once. The
//! playbook is read through a single snapshot and never mutated here.

use crate::cancel::CancelSignal;
use crate::extractor::ClaimExtractor;
use chrono::Utc;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use truthloop_core::{
    Case, CaseStatus, Evidence, PipelineConfig, PipelineError, PipelineStage, ProviderError,
    QueryFailure, RuleKind, TruthloopError, TruthloopResult, VerificationMode, Verdict,
};
use truthloop_llm::{CandidateRule, ProviderRegistry, ReasoningRequest};
use truthloop_playbook::{merge_results, ClaimFeatures, MatchResult, PlaybookSnapshot, PlaybookStore};
use truthloop_storage::CaseStore;

// ============================================================================
// CONFIDENCE CALIBRATION
// ============================================================================

/// Evidence support: sum of credibility weights.
pub fn evidence_support(evidence: &[Evidence]) -> f64 {
    evidence.iter().map(|e| e.credibility.weight()).sum()
}

/// Calibration factor `1 - penalty * e^(-support)`, non-decreasing in support.
pub fn evidence_factor(support: f64, penalty: f64) -> f64 {
    1.0 - penalty * (-support.max(0.0)).exp()
}

/// Calibrated confidence and the factor applied to the raw confidence.
pub fn calibrate(raw_confidence: f64, evidence: &[Evidence], penalty: f64) -> (f64, f64) {
    let factor = evidence_factor(evidence_support(evidence), penalty);
    ((raw_confidence * factor).clamp(0.0, 1.0), factor)
}

// ============================================================================
// GENERATOR
// ============================================================================

/// Output of the planning stage.
#[derive(Debug, Clone)]
struct Plan {
    matches: MatchResult,
    queries: Vec<String>,
}

/// Runs the three-stage verification pipeline against a playbook.
pub struct Generator {
    cases: Arc<dyn CaseStore>,
    providers: ProviderRegistry,
    extractor: Arc<dyn ClaimExtractor>,
    config: PipelineConfig,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("providers", &self.providers)
            .field("extractor", &self.extractor.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Generator {
    pub fn new(
        cases: Arc<dyn CaseStore>,
        providers: ProviderRegistry,
        extractor: Arc<dyn ClaimExtractor>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            cases,
            providers,
            extractor,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Verify `claim` against the current version of `playbook`.
    ///
    /// Returns the completed case. On failure or cancellation the case is
    /// finalized as failed or aborted before the error is returned.
    pub async fn verify(
        &self,
        playbook: &PlaybookStore,
        claim: &str,
        mode: VerificationMode,
        cancel: &CancelSignal,
    ) -> TruthloopResult<Case> {
        let snapshot = playbook.snapshot()?;
        let mut case = Case::open(claim, mode, snapshot.version());
        self.cases.case_insert(&case)?;
        tracing::debug!(case_id = %case.case_id, version = snapshot.version(), %mode, "case opened");

        if cancel.is_cancelled() {
            return Err(self.abort(case));
        }

        // Planning
        let plan = match self.plan(&mut case, &snapshot, playbook).await {
            Ok(plan) => plan,
            Err(error) => return Err(self.fail(case, error)),
        };
        if cancel.is_cancelled() {
            return Err(self.abort(case));
        }
        self.advance(&mut case, PipelineStage::Investigating);

        // Investigating
        let evidence = self.investigate(&mut case, &plan.queries).await;
        if cancel.is_cancelled() {
            return Err(self.abort(case));
        }
        self.advance(&mut case, PipelineStage::Judging);

        // Judging
        let verdict = match self.judge(&mut case, &plan.matches, evidence).await {
            Ok(verdict) => verdict,
            Err(error) => return Err(self.fail(case, error)),
        };
        if cancel.is_cancelled() {
            return Err(self.abort(case));
        }

        self.advance(&mut case, PipelineStage::Done);
        case.status = CaseStatus::Completed;
        case.verdict = Some(verdict);
        case.finalized_at = Some(Utc::now());
        self.cases.case_finalize(&case)?;

        tracing::info!(
            case_id = %case.case_id,
            outcome = ?case.outcome(),
            confidence = case.confidence().unwrap_or_default(),
            quality = %case.rule_match_quality,
            rules = case.used_rules.len(),
            "case finalized"
        );
        Ok(case)
    }

    fn advance(&self, case: &mut Case, next: PipelineStage) {
        debug_assert!(case.stage.can_advance_to(next), "{} -> {}", case.stage, next);
        tracing::debug!(case_id = %case.case_id, from = %case.stage, to = %next, "stage transition");
        case.stage = next;
    }

    /// Finalize `case` as failed and return the error to surface.
    fn fail(&self, mut case: Case, error: PipelineError) -> TruthloopError {
        tracing::warn!(case_id = %case.case_id, stage = %case.stage, error = %error, "verification failed");
        case.stage = PipelineStage::Failed;
        case.status = CaseStatus::Failed;
        case.failure = Some(error.to_string());
        case.finalized_at = Some(Utc::now());
        if let Err(storage) = self.cases.case_finalize(&case) {
            tracing::error!(case_id = %case.case_id, error = %storage, "could not finalize failed case");
            return storage;
        }
        error.into()
    }

    /// Finalize `case` as aborted at its current stage.
    fn abort(&self, mut case: Case) -> TruthloopError {
        let stage = case.stage;
        tracing::info!(case_id = %case.case_id, %stage, "verification cancelled");
        case.status = CaseStatus::Aborted;
        case.failure = Some(format!("cancelled during {stage}"));
        case.finalized_at = Some(Utc::now());
        if let Err(storage) = self.cases.case_finalize(&case) {
            tracing::error!(case_id = %case.case_id, error = %storage, "could not finalize aborted case");
            return storage;
        }
        PipelineError::Cancelled {
            case_id: case.case_id,
            stage,
        }
        .into()
    }

    async fn plan(
        &self,
        case: &mut Case,
        snapshot: &PlaybookSnapshot,
        playbook: &PlaybookStore,
    ) -> Result<Plan, PipelineError> {
        let claims = self
            .extractor
            .extract(&case.claim)
            .await
            .map_err(|e| PipelineError::Extraction {
                reason: e.to_string(),
            })?;
        if claims.is_empty() {
            return Err(PipelineError::Extraction {
                reason: format!(
                    "no checkable claim with at least {} content words",
                    self.config.min_claim_terms
                ),
            });
        }

        let mut per_claim = Vec::with_capacity(claims.len());
        let mut queries: Vec<String> = Vec::new();
        let mut push_query = |query: String| {
            let query = query.trim().to_string();
            if !query.is_empty() && !queries.contains(&query) {
                queries.push(query);
            }
        };
        for claim in &claims {
            push_query(claim.clone());
        }
        for claim in &claims {
            let result = snapshot.match_claim(&ClaimFeatures::extract(claim), playbook.matching_config());
            for candidate in &result.candidates {
                if candidate.rule.kind == RuleKind::ToolTemplate {
                    push_query(format!("{} {}", claim, candidate.rule.action));
                }
            }
            per_claim.push(result);
        }
        queries.truncate(self.config.max_queries);

        let matches = merge_results(per_claim, playbook.matching_config());
        case.used_rules = matches.rule_ids();
        case.rule_match_quality = matches.quality;
        case.process_trace.planner.extracted_claims = claims;
        case.process_trace.planner.selected_rules = matches.rule_ids();
        case.process_trace.planner.search_queries = queries.clone();

        tracing::debug!(
            case_id = %case.case_id,
            claims = case.process_trace.planner.extracted_claims.len(),
            rules = case.used_rules.len(),
            quality = %matches.quality,
            queries = queries.len(),
            "planning complete"
        );
        Ok(Plan { matches, queries })
    }

    /// Run every query concurrently; tolerate individual failures.
    async fn investigate(&self, case: &mut Case, queries: &[String]) -> Vec<Evidence> {
        let limit = self.config.max_evidence_per_query;
        let timeout = self.config.retrieval_timeout();

        let results: Vec<TruthloopResult<Vec<Evidence>>> = match self.providers.retriever() {
            Ok(retriever) => {
                join_all(queries.iter().map(|query| {
                    let retriever = Arc::clone(&retriever);
                    async move {
                        match tokio::time::timeout(timeout, retriever.retrieve(query, limit)).await {
                            Ok(result) => result,
                            Err(_) => Err(TruthloopError::Provider(ProviderError::Timeout {
                                provider: retriever.name().to_string(),
                                timeout_ms: self.config.retrieval_timeout_ms,
                            })),
                        }
                    }
                }))
                .await
            }
            Err(e) => queries.iter().map(|_| Err(e.clone())).collect(),
        };

        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut evidence = Vec::new();
        let mut failures = Vec::new();
        for (query, result) in queries.iter().zip(results) {
            match result {
                Ok(items) => {
                    for item in items {
                        let key = (item.source.clone(), item.content.clone());
                        if seen.insert(key) {
                            evidence.push(item);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(case_id = %case.case_id, %query, error = %e, "evidence query failed");
                    failures.push(QueryFailure {
                        query: query.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let trace = &mut case.process_trace.investigator;
        trace.queries_executed = queries.len();
        trace.evidence_count = evidence.len();
        if !queries.is_empty() && failures.len() == queries.len() {
            let error = PipelineError::EvidenceGatherFailure {
                reason: format!("{} of {} queries failed", failures.len(), queries.len()),
            };
            tracing::warn!(case_id = %case.case_id, error = %error, "judging on empty evidence");
            trace.evidence_gather_failure = Some(error.to_string());
        }
        trace.failed_queries = failures;
        evidence
    }

    async fn judge(
        &self,
        case: &mut Case,
        matches: &MatchResult,
        evidence: Vec<Evidence>,
    ) -> Result<Verdict, PipelineError> {
        let reasoner = self
            .providers
            .reasoner()
            .map_err(|e| PipelineError::ReasoningFailure {
                reason: e.to_string(),
            })?;
        let request = ReasoningRequest {
            claim: case.claim.clone(),
            evidence,
            candidate_rules: matches
                .candidates
                .iter()
                .map(|m| CandidateRule::from_rule(&m.rule, m.score))
                .collect(),
        };

        let response = tokio::time::timeout(self.config.reasoning_timeout(), reasoner.reason(&request))
            .await
            .map_err(|_| PipelineError::ReasoningFailure {
                reason: format!(
                    "{} timed out after {}ms",
                    reasoner.name(),
                    self.config.reasoning_timeout_ms
                ),
            })?
            .and_then(|response| response.validate(reasoner.name()))
            .map_err(|e| PipelineError::ReasoningFailure {
                reason: e.to_string(),
            })?;

        let (confidence, factor) = calibrate(
            response.confidence,
            &request.evidence,
            self.config.empty_evidence_penalty,
        );
        case.process_trace.judge.raw_confidence = Some(response.confidence);
        case.process_trace.judge.evidence_factor = Some(factor);
        case.process_trace.judge.reasoning = response.reasoning.clone();

        Ok(Verdict {
            outcome: response.verdict,
            confidence,
            reasoning: response.reasoning,
            evidence: request.evidence,
            rule_match_quality: matches.quality,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::HeuristicExtractor;
    use std::time::Duration;
    use truthloop_core::{MatchQuality, MatchingConfig, MemoryType, Outcome};
    use truthloop_llm::{DeterministicReasoner, FailingReasoner, FailingRetriever, FixedRetriever};
    use truthloop_storage::{MockCaseStore, MockPlaybookBackend};
    use truthloop_test_utils::{always_rule, conditional_rule, high_evidence, seed_document};

    fn store_with(rules: Vec<truthloop_core::Rule>) -> PlaybookStore {
        PlaybookStore::open_or_seed(
            "default",
            Arc::new(MockPlaybookBackend::new()),
            MatchingConfig::default(),
            rules,
        )
        .unwrap()
    }

    fn generator(cases: &MockCaseStore, providers: ProviderRegistry) -> Generator {
        Generator::new(
            Arc::new(cases.clone()),
            providers,
            Arc::new(HeuristicExtractor::new(2)),
            PipelineConfig::default(),
        )
    }

    fn providers(retriever: impl truthloop_llm::EvidenceRetriever + 'static) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register_retriever(Arc::new(retriever));
        registry.register_reasoner(Arc::new(DeterministicReasoner::new()));
        registry
    }

    #[test]
    fn test_evidence_factor_is_monotonic() {
        let mut last = evidence_factor(0.0, 0.5);
        assert!((last - 0.5).abs() < 1e-12);
        for support in [0.25, 0.5, 1.0, 2.0, 5.0] {
            let factor = evidence_factor(support, 0.5);
            assert!(factor >= last);
            last = factor;
        }
        assert!(last < 1.0);
    }

    #[tokio::test]
    async fn test_completed_case_is_logged_once() {
        let cases = MockCaseStore::new();
        let store = store_with(seed_document().all_rules().cloned().collect());
        let generator = generator(&cases, providers(FixedRetriever::new(vec![high_evidence("This is a hoax")])));

        let case = generator
            .verify(&store, "The moon landing was staged", VerificationMode::Static, &CancelSignal::new())
            .await
            .unwrap();

        assert_eq!(case.status, CaseStatus::Completed);
        assert_eq!(case.stage, PipelineStage::Done);
        assert_eq!(case.outcome(), Some(Outcome::False));
        assert_eq!(case.rule_match_quality, MatchQuality::High);
        assert_eq!(case.used_rules, vec![truthloop_core::RuleId::new("det-00001")]);
        assert_eq!(case.playbook_version, 1);
        assert_eq!(cases.case_get(case.case_id).unwrap().unwrap(), case);
    }

    #[tokio::test]
    async fn test_tool_template_rule_adds_query() {
        let cases = MockCaseStore::new();
        let store = store_with(vec![conditional_rule(
            "tru-00001",
            MemoryType::Trust,
            RuleKind::ToolTemplate,
            "IF unemployment",
            0.5,
        )]);
        let retriever = FixedRetriever::new(Vec::new());
        let generator = generator(&cases, providers(retriever.clone()));
        let case = generator
            .verify(&store, "Unemployment fell last year", VerificationMode::Static, &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(case.process_trace.planner.search_queries.len(), 2);
        assert_eq!(retriever.calls(), 2);
    }

    #[tokio::test]
    async fn test_extraction_failure_fails_case() {
        let cases = MockCaseStore::new();
        let store = store_with(Vec::new());
        let generator = generator(&cases, providers(FixedRetriever::new(Vec::new())));
        let result = generator
            .verify(&store, "Why?", VerificationMode::Static, &CancelSignal::new())
            .await;
        assert!(matches!(
            result,
            Err(TruthloopError::Pipeline(PipelineError::Extraction { .. }))
        ));
        let logged = cases.case_list().unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].status, CaseStatus::Failed);
        assert!(logged[0].verdict.is_none());
    }

    #[tokio::test]
    async fn test_all_queries_failing_still_judges() {
        let cases = MockCaseStore::new();
        let store = store_with(vec![always_rule("det-00001", MemoryType::Detection, 0.6)]);
        let generator = generator(&cases, providers(FailingRetriever::new("offline")));
        let case = generator
            .verify(&store, "Bananas are radioactive", VerificationMode::Static, &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(case.status, CaseStatus::Completed);
        assert!(case.process_trace.evidence_gather_failed());
        assert_eq!(case.process_trace.investigator.failed_queries.len(), 1);
        assert_eq!(case.process_trace.judge.evidence_factor, Some(0.5));
    }

    #[tokio::test]
    async fn test_reasoning_failure_fails_case() {
        let cases = MockCaseStore::new();
        let store = store_with(Vec::new());
        let mut registry = ProviderRegistry::new();
        registry.register_retriever(Arc::new(FixedRetriever::new(Vec::new())));
        registry.register_reasoner(Arc::new(FailingReasoner::new()));
        let generator = generator(&cases, registry);
        let result = generator
            .verify(&store, "Bananas are radioactive", VerificationMode::Static, &CancelSignal::new())
            .await;
        assert!(matches!(
            result,
            Err(TruthloopError::Pipeline(PipelineError::ReasoningFailure { .. }))
        ));
        assert_eq!(cases.case_list().unwrap()[0].stage, PipelineStage::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_retrieval_times_out() {
        let cases = MockCaseStore::new();
        let store = store_with(Vec::new());
        let slow = FixedRetriever::new(vec![high_evidence("late")]).with_delay(Duration::from_secs(60));
        let generator = generator(&cases, providers(slow));
        let case = generator
            .verify(&store, "Bananas are radioactive", VerificationMode::Static, &CancelSignal::new())
            .await
            .unwrap();
        assert!(case.process_trace.evidence_gather_failed());
        assert!(case.process_trace.investigator.failed_queries[0]
            .reason
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_aborted() {
        let cases = MockCaseStore::new();
        let store = store_with(Vec::new());
        let generator = generator(&cases, providers(FixedRetriever::new(Vec::new())));
        let cancel = CancelSignal::new();
        cancel.cancel();
        let result = generator
            .verify(&store, "Bananas are radioactive", VerificationMode::Static, &cancel)
            .await;
        assert!(matches!(
            result,
            Err(TruthloopError::Pipeline(PipelineError::Cancelled {
                stage: PipelineStage::Planning,
                ..
            }))
        ));
        assert_eq!(cases.case_list().unwrap()[0].status, CaseStatus::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_retrieval_aborts_at_investigating() {
        let cases = MockCaseStore::new();
        let store = store_with(Vec::new());
        let slow = FixedRetriever::new(vec![high_evidence("late")]).with_delay(Duration::from_secs(5));
        let generator = generator(&cases, providers(slow.clone()));

        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = generator
            .verify(&store, "Bananas are radioactive", VerificationMode::Static, &cancel)
            .await;
        assert!(matches!(
            result,
            Err(TruthloopError::Pipeline(PipelineError::Cancelled {
                stage: PipelineStage::Investigating,
                ..
            }))
        ));
        assert_eq!(slow.calls(), 1);

        let logged = cases.case_list().unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].status, CaseStatus::Aborted);
        assert_eq!(logged[0].stage, PipelineStage::Investigating);
        assert!(logged[0].verdict.is_none());
    }
}
