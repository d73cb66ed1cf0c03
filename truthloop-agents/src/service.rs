//! FactChecker: the facade front ends drive.
//!
//! Holds the playbook registry, the case log, providers and the three agents.
//! Every playbook mutation goes through the curator.

use crate::cancel::CancelSignal;
use crate::curator::{CurationReport, Curator, ProvenanceAudit};
use crate::extractor::{ClaimExtractor, HeuristicExtractor};
use crate::generator::Generator;
use crate::metrics::EvaluationMetrics;
use crate::reflector::Reflector;
use crate::warmup::{WarmupRow, WarmupStatus, WarmupTrainer};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use truthloop_core::{
    Case, CaseId, CaseStatus, EntityType, Feedback, FeedbackError, InsightAction, MemoryType, Outcome,
    PlaybookDocument, Resolution, Rule, RuleId, StorageError, TruthloopConfig, TruthloopError,
    TruthloopResult, VerificationMode,
};
use truthloop_llm::ProviderRegistry;
use truthloop_playbook::{HistoryEntry, PlaybookRegistry, PlaybookStatus, PlaybookStore};
use truthloop_storage::{CaseFilter, CasePage, CaseStats, CaseStore, PageRequest};

/// Result of [`FactChecker::submit_feedback`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackOutcome {
    /// A delta was applied to the active playbook.
    Applied(CurationReport),
    /// The lesson needed no playbook change.
    NoChange { note: String },
    /// The feedback could not be turned into a lesson; the case is marked unresolved.
    Unresolved { reason: String },
}

/// A claim with its known verdict, for [`FactChecker::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelledClaim {
    pub claim: String,
    pub label: Outcome,
}

pub struct FactChecker {
    registry: Arc<PlaybookRegistry>,
    cases: Arc<dyn CaseStore>,
    generator: Arc<Generator>,
    reflector: Reflector,
    curator: Arc<Curator>,
}

impl std::fmt::Debug for FactChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactChecker")
            .field("registry", &self.registry)
            .field("generator", &self.generator)
            .field("curator", &self.curator)
            .finish()
    }
}

impl FactChecker {
    /// Build a checker with the heuristic claim extractor.
    ///
    /// # Errors
    ///
    /// Returns a config error if `config` fails validation.
    pub fn new(
        registry: Arc<PlaybookRegistry>,
        cases: Arc<dyn CaseStore>,
        providers: ProviderRegistry,
        config: &TruthloopConfig,
    ) -> TruthloopResult<Self> {
        let extractor = Arc::new(HeuristicExtractor::new(config.pipeline.min_claim_terms));
        Self::with_extractor(registry, cases, providers, extractor, config)
    }

    pub fn with_extractor(
        registry: Arc<PlaybookRegistry>,
        cases: Arc<dyn CaseStore>,
        providers: ProviderRegistry,
        extractor: Arc<dyn ClaimExtractor>,
        config: &TruthloopConfig,
    ) -> TruthloopResult<Self> {
        config.validate()?;
        let generator = Generator::new(
            Arc::clone(&cases),
            providers,
            extractor,
            config.pipeline.clone(),
        );
        let curator = Curator::new(Arc::clone(&cases), config.curator.clone());
        Ok(Self {
            registry,
            cases,
            generator: Arc::new(generator),
            reflector: Reflector::new(),
            curator: Arc::new(curator),
        })
    }

    pub fn registry(&self) -> &Arc<PlaybookRegistry> {
        &self.registry
    }

    fn active(&self) -> TruthloopResult<Arc<PlaybookStore>> {
        self.registry.active()
    }

    // ========================================================================
    // VERIFICATION
    // ========================================================================

    pub async fn verify(&self, claim: &str, mode: VerificationMode) -> TruthloopResult<Case> {
        self.verify_with_cancel(claim, mode, &CancelSignal::new()).await
    }

    pub async fn verify_with_cancel(
        &self,
        claim: &str,
        mode: VerificationMode,
        cancel: &CancelSignal,
    ) -> TruthloopResult<Case> {
        let playbook = self.active()?;
        self.generator.verify(&playbook, claim, mode, cancel).await
    }

    /// Verify `claims` with at most `concurrency` in flight. Results keep input order.
    pub async fn verify_batch(
        &self,
        claims: &[String],
        mode: VerificationMode,
        concurrency: usize,
    ) -> Vec<TruthloopResult<Case>> {
        stream::iter(claims)
            .map(|claim| self.verify(claim, mode))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    // ========================================================================
    // FEEDBACK
    // ========================================================================

    /// Reflect on feedback for an evolving case and curate the lesson.
    ///
    /// Static cases, unfinished cases and cases that already received
    /// feedback are refused. The case is claimed as in review before any
    /// work, so concurrent submissions for one case apply at most one lesson.
    /// A failure after the claim returns the case to pending.
    pub async fn submit_feedback(&self, feedback: &Feedback) -> TruthloopResult<FeedbackOutcome> {
        let case = self.require_case(feedback.case_id)?;
        if case.mode != VerificationMode::Evolving {
            return Err(not_accepted(case.case_id, "static cases do not update the playbook"));
        }
        if case.status != CaseStatus::Completed {
            return Err(not_accepted(case.case_id, format!("case is {}", case.status)));
        }
        if case.resolution != Resolution::Pending {
            return Err(not_accepted(
                case.case_id,
                format!("feedback already recorded ({})", case.resolution),
            ));
        }

        self.cases
            .case_set_resolution(case.case_id, Resolution::InReview, None)
            .map_err(|e| match e {
                TruthloopError::Storage(StorageError::UpdateFailed { reason, .. }) => {
                    not_accepted(case.case_id, format!("feedback already in progress: {reason}"))
                }
                other => other,
            })?;

        match self.learn(&case, feedback) {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                if let Err(revert) =
                    self.cases
                        .case_set_resolution(case.case_id, Resolution::Pending, None)
                {
                    tracing::error!(
                        case_id = %case.case_id,
                        error = %revert,
                        "failed to release feedback claim"
                    );
                }
                Err(error)
            }
        }
    }

    /// Reflect and curate for a case this caller has claimed.
    fn learn(&self, case: &Case, feedback: &Feedback) -> TruthloopResult<FeedbackOutcome> {
        let playbook = self.active()?;
        let snapshot = playbook.snapshot()?;
        let insight = match self.reflector.reflect(case, feedback, &snapshot) {
            Ok(insight) => insight,
            Err(TruthloopError::Feedback(FeedbackError::Ambiguous { reason, .. })) => {
                tracing::warn!(case_id = %case.case_id, %reason, "ambiguous feedback");
                self.cases.case_set_resolution(
                    case.case_id,
                    Resolution::Unresolved,
                    Some(format!("ambiguous feedback: {reason}")),
                )?;
                return Ok(FeedbackOutcome::Unresolved { reason });
            }
            Err(error) => return Err(error),
        };
        tracing::debug!(
            case_id = %case.case_id,
            category = %insight.category,
            rationale = %insight.rationale,
            "insight produced"
        );

        let report = self.curator.curate(&playbook, &insight)?;
        match &report.delta {
            Some(delta) => {
                self.cases.case_set_resolution(
                    case.case_id,
                    Resolution::Resolved,
                    Some(format!(
                        "{} {} at version {}",
                        delta.op.name(),
                        delta.op.rule_id(),
                        report.version.unwrap_or(delta.base_version + 1)
                    )),
                )?;
                Ok(FeedbackOutcome::Applied(report))
            }
            None => {
                let note = match &insight.action {
                    InsightAction::NoChange { note } => note.clone(),
                    _ => insight.rationale.clone(),
                };
                self.cases
                    .case_set_resolution(case.case_id, Resolution::Resolved, Some(note.clone()))?;
                Ok(FeedbackOutcome::NoChange { note })
            }
        }
    }

    // ========================================================================
    // PLAYBOOK
    // ========================================================================

    pub fn playbook_status(&self) -> TruthloopResult<PlaybookStatus> {
        self.active()?.status()
    }

    /// Rules of one memory in the active playbook, deprecated ones included.
    pub fn rules(&self, memory: MemoryType) -> TruthloopResult<Vec<Rule>> {
        Ok(self.active()?.snapshot()?.rules(memory).to_vec())
    }

    pub fn rule(&self, id: &RuleId) -> TruthloopResult<Option<Rule>> {
        self.active()?.rule(id)
    }

    pub fn history(&self) -> TruthloopResult<Vec<HistoryEntry>> {
        self.active()?.history()
    }

    pub fn history_version(&self, version: u64) -> TruthloopResult<PlaybookDocument> {
        self.active()?.history_version(version)
    }

    pub fn switch_playbook(&self, name: &str) -> TruthloopResult<PlaybookStatus> {
        self.registry.switch(name)?.status()
    }

    pub fn audit(&self) -> TruthloopResult<ProvenanceAudit> {
        self.curator.audit_provenance(&*self.active()?.snapshot()?)
    }

    // ========================================================================
    // CASES
    // ========================================================================

    pub fn cases(&self, filter: &CaseFilter, page: PageRequest) -> TruthloopResult<CasePage> {
        self.cases.case_query(filter, page)
    }

    pub fn case(&self, id: CaseId) -> TruthloopResult<Option<Case>> {
        self.cases.case_get(id)
    }

    /// Delete a case unless an active rule in any playbook was learned from it.
    pub fn delete_case(&self, id: CaseId) -> TruthloopResult<bool> {
        for name in self.registry.names()? {
            let snapshot = self.registry.get(&name)?.snapshot()?;
            let referencing = snapshot
                .document()
                .all_rules()
                .find(|rule| rule.active && rule.source_case() == Some(id));
            if let Some(rule) = referencing {
                return Err(StorageError::Referenced {
                    entity_type: EntityType::Case,
                    id: id.to_string(),
                    referenced_by: format!("rule {} in playbook '{name}'", rule.id),
                }
                .into());
            }
        }
        let deleted = self.cases.case_delete(id)?;
        if deleted {
            tracing::info!(case_id = %id, "case deleted");
        }
        Ok(deleted)
    }

    pub fn stats(&self) -> TruthloopResult<CaseStats> {
        let cases = self.cases.case_list()?;
        Ok(CaseStats::from_cases(&cases))
    }

    // ========================================================================
    // TRAINING & EVALUATION
    // ========================================================================

    /// A warmup trainer sharing this checker's agents.
    pub fn warmup_trainer(&self) -> WarmupTrainer {
        WarmupTrainer::new(
            Arc::clone(&self.generator),
            self.reflector.clone(),
            Arc::clone(&self.curator),
            Arc::clone(&self.cases),
        )
    }

    /// Run a warmup over `rows` against the active playbook.
    pub async fn warmup(&self, rows: &[WarmupRow]) -> TruthloopResult<WarmupStatus> {
        let playbook = self.active()?;
        self.warmup_trainer()
            .run(&playbook, rows, &CancelSignal::new())
            .await
    }

    /// Verify labelled claims in static mode and score the verdicts.
    pub async fn evaluate(
        &self,
        labelled: &[LabelledClaim],
        concurrency: usize,
    ) -> EvaluationMetrics {
        let claims: Vec<String> = labelled.iter().map(|item| item.claim.clone()).collect();
        let results = self
            .verify_batch(&claims, VerificationMode::Static, concurrency)
            .await;
        let metrics = EvaluationMetrics::from_predictions(
            labelled
                .iter()
                .zip(results)
                .map(|(item, result)| (item.label, result.ok().and_then(|case| case.outcome()))),
        );
        tracing::info!(
            evaluated = metrics.evaluated,
            failed = metrics.failed,
            accuracy = metrics.accuracy,
            "evaluation finished"
        );
        metrics
    }

    fn require_case(&self, id: CaseId) -> TruthloopResult<Case> {
        self.cases.case_get(id)?.ok_or_else(|| {
            StorageError::NotFound {
                entity_type: EntityType::Case,
                id: id.to_string(),
            }
            .into()
        })
    }
}

fn not_accepted(case_id: CaseId, reason: impl Into<String>) -> TruthloopError {
    FeedbackError::NotAccepted {
        case_id,
        reason: reason.into(),
    }
    .into()
}
