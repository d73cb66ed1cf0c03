//! Curator: turns one insight into at most one delta and applies it.

use serde::Serialize;
use std::sync::Arc;
use truthloop_core::{
    CaseId, CuratorConfig, CuratorError, Delta, DeltaOp, Insight, InsightAction, Provenance,
    Rule, RuleId, RuleProposal, TruthloopError, TruthloopResult,
};
use truthloop_playbook::{PlaybookSnapshot, PlaybookStore};
use truthloop_storage::CaseStore;

/// Largest confidence a reinforced rule can reach.
pub const MAX_REINFORCED_CONFIDENCE: f64 = 1.0 - f64::EPSILON;

/// `confidence + rate * (1 - confidence)`, kept strictly below 1.
pub fn reinforce_confidence(confidence: f64, rate: f64) -> f64 {
    let confidence = confidence.clamp(0.0, 1.0);
    (confidence + rate * (1.0 - confidence)).min(MAX_REINFORCED_CONFIDENCE)
}

/// What the curator did with one insight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurationReport {
    /// The applied delta; `None` for a no-change insight.
    pub delta: Option<Delta>,
    /// Playbook version after the delta.
    pub version: Option<u64>,
    /// `apply_delta` attempts, retries included.
    pub attempts: u32,
}

impl CurationReport {
    pub fn created_rule(&self) -> Option<&RuleId> {
        match &self.delta {
            Some(Delta {
                op: DeltaOp::Create { rule },
                ..
            }) => Some(&rule.id),
            _ => None,
        }
    }
}

/// Result of [`Curator::audit_provenance`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvenanceAudit {
    pub checked: usize,
    /// Active rules whose provenance does not resolve.
    pub orphaned: Vec<RuleId>,
}

impl ProvenanceAudit {
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty()
    }
}

/// Applies insights to a playbook with optimistic retry.
pub struct Curator {
    cases: Arc<dyn CaseStore>,
    config: CuratorConfig,
}

impl std::fmt::Debug for Curator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Curator").field("config", &self.config).finish()
    }
}

impl Curator {
    pub fn new(cases: Arc<dyn CaseStore>, config: CuratorConfig) -> Self {
        Self { cases, config }
    }

    pub fn config(&self) -> &CuratorConfig {
        &self.config
    }

    /// Apply `insight` to `playbook`.
    ///
    /// On a version conflict the delta is recomputed against the refreshed
    /// snapshot, up to `max_retries` times. Failures leave the playbook unchanged.
    pub fn curate(&self, playbook: &PlaybookStore, insight: &Insight) -> TruthloopResult<CurationReport> {
        if let InsightAction::NoChange { note } = &insight.action {
            tracing::debug!(case_id = %insight.case_id, %note, "no-change insight");
            return Ok(CurationReport {
                delta: None,
                version: None,
                attempts: 0,
            });
        }

        let max_attempts = self.config.max_retries + 1;
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            let snapshot = playbook.snapshot()?;
            let delta = self.compute_delta(&snapshot, insight)?;
            match playbook.apply_delta(&delta) {
                Ok(applied) => {
                    return Ok(CurationReport {
                        delta: Some(delta),
                        version: Some(applied.version()),
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_conflict() => {
                    tracing::warn!(
                        case_id = %insight.case_id,
                        attempt,
                        error = %e,
                        "playbook moved, recomputing delta"
                    );
                    last_error = e.to_string();
                }
                Err(e) => {
                    tracing::error!(case_id = %insight.case_id, error = %e, "delta rejected by playbook");
                    return Err(CuratorError::Rejected {
                        case_id: insight.case_id,
                        reason: e.to_string(),
                    }
                    .into());
                }
            }
        }

        tracing::error!(
            case_id = %insight.case_id,
            attempts = max_attempts,
            %last_error,
            "curation retries exhausted"
        );
        Err(CuratorError::Exhausted {
            case_id: insight.case_id,
            attempts: max_attempts,
            last_error,
        }
        .into())
    }

    /// Build the delta for `insight` against `snapshot`.
    pub fn compute_delta(&self, snapshot: &PlaybookSnapshot, insight: &Insight) -> TruthloopResult<Delta> {
        let op = match &insight.action {
            InsightAction::Reinforce { rule_id } => self.reinforce_op(snapshot, insight.case_id, rule_id)?,
            InsightAction::Deprecate { rule_id } => {
                active_rule(snapshot, insight.case_id, rule_id)?;
                DeltaOp::Deprecate {
                    rule_id: rule_id.clone(),
                }
            }
            InsightAction::CreateRule { proposal } => {
                self.create_op(snapshot, insight, proposal, None)?
            }
            InsightAction::Refine { parent, proposal } => {
                active_rule(snapshot, insight.case_id, parent)?;
                self.create_op(snapshot, insight, proposal, Some(parent))?
            }
            InsightAction::NoChange { .. } => {
                return Err(rejected(insight.case_id, "no-change insight has no delta"));
            }
        };
        Ok(Delta::new(insight.case_id, snapshot.version(), op))
    }

    fn reinforce_op(
        &self,
        snapshot: &PlaybookSnapshot,
        case_id: CaseId,
        rule_id: &RuleId,
    ) -> TruthloopResult<DeltaOp> {
        let rule = active_rule(snapshot, case_id, rule_id)?;
        Ok(DeltaOp::Update {
            rule_id: rule.id.clone(),
            evidence_count: rule.evidence_count.saturating_add(1),
            confidence: reinforce_confidence(rule.confidence, self.config.reinforce_rate),
        })
    }

    /// Create the proposed rule, or reinforce an active rule with the same condition.
    fn create_op(
        &self,
        snapshot: &PlaybookSnapshot,
        insight: &Insight,
        proposal: &RuleProposal,
        parent: Option<&RuleId>,
    ) -> TruthloopResult<DeltaOp> {
        if !self.cases.case_exists(insight.case_id)? {
            return Err(rejected(insight.case_id, "triggering case is not in the case log"));
        }
        let duplicate = snapshot
            .rules(proposal.memory_type)
            .iter()
            .find(|r| r.active && r.condition.eq_ignore_ascii_case(proposal.condition.trim()));
        if let Some(existing) = duplicate {
            tracing::debug!(rule_id = %existing.id, "proposal matches an existing rule, reinforcing instead");
            return self.reinforce_op(snapshot, insight.case_id, &existing.id);
        }

        let confidence = insight.strength.clamp(
            self.config.min_initial_confidence,
            self.config.max_initial_confidence,
        );
        let mut rule = Rule::new(
            snapshot.document().next_rule_id(proposal.memory_type),
            proposal.memory_type,
            proposal.kind,
            proposal.condition.clone(),
            proposal.action.clone(),
            confidence,
        )
        .with_description(proposal.description.clone())
        .with_provenance(Provenance::Case(insight.case_id));
        if let Some(parent) = parent {
            rule = rule.with_parent_rule(parent.clone());
        }
        Ok(DeltaOp::Create { rule })
    }

    /// Check that every active rule's provenance resolves: case provenance to
    /// a logged case, rule provenance and `parent_rule` to a rule of the same
    /// playbook.
    pub fn audit_provenance(&self, snapshot: &PlaybookSnapshot) -> TruthloopResult<ProvenanceAudit> {
        let mut audit = ProvenanceAudit::default();
        for rule in snapshot.document().all_rules().filter(|r| r.active) {
            audit.checked += 1;
            let source_resolves = match &rule.created_from {
                None => true,
                Some(Provenance::Case(case_id)) => self.cases.case_exists(*case_id)?,
                Some(Provenance::Rule(parent)) => snapshot.rule(parent).is_some(),
            };
            let parent_resolves = rule
                .parent_rule
                .as_ref()
                .map_or(true, |parent| snapshot.rule(parent).is_some());
            if !(source_resolves && parent_resolves) {
                audit.orphaned.push(rule.id.clone());
            }
        }
        if !audit.is_clean() {
            tracing::warn!(orphaned = ?audit.orphaned, "rules with unresolved provenance");
        }
        Ok(audit)
    }
}

fn rejected(case_id: CaseId, reason: impl Into<String>) -> TruthloopError {
    CuratorError::Rejected {
        case_id,
        reason: reason.into(),
    }
    .into()
}

fn active_rule<'a>(
    snapshot: &'a PlaybookSnapshot,
    case_id: CaseId,
    rule_id: &RuleId,
) -> TruthloopResult<&'a Rule> {
    match snapshot.rule(rule_id) {
        Some(rule) if rule.active => Ok(rule),
        Some(_) => Err(rejected(case_id, format!("rule {rule_id} is deprecated"))),
        None => Err(rejected(case_id, format!("rule {rule_id} does not exist"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use truthloop_core::{
        InsightCategory, MatchingConfig, MemoryType, Outcome, RuleKind,
    };
    use truthloop_storage::{MockCaseStore, MockPlaybookBackend};
    use truthloop_test_utils::{completed_case, seed_document};

    fn setup() -> (Curator, PlaybookStore, MockCaseStore) {
        let cases = MockCaseStore::new();
        let store = PlaybookStore::open_or_seed(
            "default",
            Arc::new(MockPlaybookBackend::new()),
            MatchingConfig::default(),
            seed_document().all_rules().cloned().collect(),
        )
        .unwrap();
        (
            Curator::new(Arc::new(cases.clone()), CuratorConfig::default()),
            store,
            cases,
        )
    }

    fn logged_case(cases: &MockCaseStore) -> CaseId {
        let case = completed_case("Bleach cures covid", Outcome::False, 0.9);
        let mut open = case.clone();
        open.status = truthloop_core::CaseStatus::Open;
        cases.case_insert(&open).unwrap();
        cases.case_finalize(&case).unwrap();
        case.case_id
    }

    fn bleach_proposal() -> RuleProposal {
        RuleProposal {
            memory_type: MemoryType::Detection,
            kind: RuleKind::Pitfall,
            condition: "IF bleach AND covid".to_string(),
            action: "check health agency guidance".to_string(),
            description: String::new(),
        }
    }

    fn create_insight(case_id: CaseId, strength: f64) -> Insight {
        Insight::new(
            case_id,
            InsightCategory::Correct,
            InsightAction::CreateRule {
                proposal: bleach_proposal(),
            },
            strength,
            "test",
        )
    }

    #[test]
    fn test_reinforce_formula() {
        assert!((reinforce_confidence(0.6, 0.2) - 0.68).abs() < 1e-12);
        assert!(reinforce_confidence(0.999_999_999, 0.9) < 1.0);
        assert!(reinforce_confidence(1.0, 0.5) < 1.0);
    }

    #[test]
    fn test_reinforce_updates_rule() {
        let (curator, store, _cases) = setup();
        let insight = Insight::new(
            CaseId::now_v7(),
            InsightCategory::Reinforce,
            InsightAction::Reinforce {
                rule_id: RuleId::new("det-00001"),
            },
            0.8,
            "test",
        );
        let report = curator.curate(&store, &insight).unwrap();
        assert_eq!(report.version, Some(2));
        assert_eq!(report.attempts, 1);
        let rule = store.rule(&RuleId::new("det-00001")).unwrap().unwrap();
        assert_eq!(rule.evidence_count, 2);
        assert!(rule.confidence > 0.6 && rule.confidence < 1.0);
    }

    #[test]
    fn test_create_rule_uses_next_id_and_provenance() {
        let (curator, store, cases) = setup();
        let case_id = logged_case(&cases);
        let report = curator.curate(&store, &create_insight(case_id, 0.95)).unwrap();
        assert_eq!(report.created_rule(), Some(&RuleId::new("det-00002")));

        let rule = store.rule(&RuleId::new("det-00002")).unwrap().unwrap();
        assert_eq!(rule.evidence_count, 1);
        assert_eq!(rule.confidence, CuratorConfig::default().max_initial_confidence);
        assert_eq!(rule.source_case(), Some(case_id));
        assert!(curator.audit_provenance(&store.snapshot().unwrap()).unwrap().is_clean());
    }

    #[test]
    fn test_identical_proposal_reinforces_existing_rule() {
        let (curator, store, cases) = setup();
        let case_id = logged_case(&cases);
        curator.curate(&store, &create_insight(case_id, 0.5)).unwrap();
        let report = curator.curate(&store, &create_insight(case_id, 0.5)).unwrap();
        assert!(report.created_rule().is_none());
        assert_eq!(
            store.rule(&RuleId::new("det-00002")).unwrap().unwrap().evidence_count,
            2
        );
    }

    #[test]
    fn test_create_requires_logged_case() {
        let (curator, store, _cases) = setup();
        let result = curator.curate(&store, &create_insight(CaseId::now_v7(), 0.5));
        assert!(matches!(
            result,
            Err(TruthloopError::Curator(CuratorError::Rejected { .. }))
        ));
        assert_eq!(store.version().unwrap(), 1);
    }

    #[test]
    fn test_deprecate_and_reject_deprecated() {
        let (curator, store, _cases) = setup();
        let deprecate = Insight::new(
            CaseId::now_v7(),
            InsightCategory::Correct,
            InsightAction::Deprecate {
                rule_id: RuleId::new("tru-00001"),
            },
            0.7,
            "test",
        );
        curator.curate(&store, &deprecate).unwrap();
        assert!(!store.rule(&RuleId::new("tru-00001")).unwrap().unwrap().active);
        assert!(curator.curate(&store, &deprecate).is_err());
    }

    #[test]
    fn test_refine_adds_child_and_keeps_parent() {
        let (curator, store, cases) = setup();
        let case_id = logged_case(&cases);
        let insight = Insight::new(
            case_id,
            InsightCategory::Correct,
            InsightAction::Refine {
                parent: RuleId::new("det-00001"),
                proposal: RuleProposal {
                    memory_type: MemoryType::Trust,
                    kind: RuleKind::Strategy,
                    condition: "IF harbour AND bridge".to_string(),
                    action: "check the port authority notices".to_string(),
                    description: "Exception to det-00001".to_string(),
                },
            },
            0.7,
            "test",
        );
        let report = curator.curate(&store, &insight).unwrap();
        assert_eq!(report.created_rule(), Some(&RuleId::new("tru-00002")));

        let child = store.rule(&RuleId::new("tru-00002")).unwrap().unwrap();
        assert_eq!(child.parent_rule, Some(RuleId::new("det-00001")));
        assert_eq!(child.source_case(), Some(case_id));
        assert!(store.rule(&RuleId::new("det-00001")).unwrap().unwrap().active);
        assert!(curator.audit_provenance(&store.snapshot().unwrap()).unwrap().is_clean());
    }

    #[test]
    fn test_refine_of_deprecated_parent_is_rejected() {
        let (curator, store, cases) = setup();
        let case_id = logged_case(&cases);
        let deprecate = Insight::new(
            case_id,
            InsightCategory::Correct,
            InsightAction::Deprecate {
                rule_id: RuleId::new("det-00001"),
            },
            0.7,
            "test",
        );
        curator.curate(&store, &deprecate).unwrap();

        let refine = Insight::new(
            case_id,
            InsightCategory::Correct,
            InsightAction::Refine {
                parent: RuleId::new("det-00001"),
                proposal: bleach_proposal(),
            },
            0.7,
            "test",
        );
        assert!(matches!(
            curator.curate(&store, &refine),
            Err(TruthloopError::Curator(CuratorError::Rejected { .. }))
        ));
        assert_eq!(store.version().unwrap(), 2);
    }

    #[test]
    fn test_audit_flags_dangling_parent_rule() {
        let cases = MockCaseStore::new();
        let curator = Curator::new(Arc::new(cases), CuratorConfig::default());
        let mut rules: Vec<Rule> = seed_document().all_rules().cloned().collect();
        rules.push(
            Rule::new(
                RuleId::new("tru-00002"),
                MemoryType::Trust,
                RuleKind::Strategy,
                "IF harbour",
                "check the port authority notices",
                0.5,
            )
            .with_parent_rule(RuleId::new("det-00099")),
        );
        let store = PlaybookStore::open_or_seed(
            "default",
            Arc::new(MockPlaybookBackend::new()),
            MatchingConfig::default(),
            rules,
        )
        .unwrap();
        let audit = curator.audit_provenance(&store.snapshot().unwrap()).unwrap();
        assert_eq!(audit.orphaned, vec![RuleId::new("tru-00002")]);
    }

    #[test]
    fn test_retry_after_another_handle_commits() {
        let (curator, _store, cases) = setup();
        let backend = MockPlaybookBackend::new();
        let first = PlaybookStore::open_or_seed(
            "default",
            Arc::new(backend.clone()),
            MatchingConfig::default(),
            seed_document().all_rules().cloned().collect(),
        )
        .unwrap();
        let second =
            PlaybookStore::open("default", Arc::new(backend), MatchingConfig::default()).unwrap();

        let case_id = logged_case(&cases);
        let insight = Insight::new(
            case_id,
            InsightCategory::Correct,
            InsightAction::Reinforce {
                rule_id: RuleId::new("det-00001"),
            },
            0.2,
            "test",
        );
        curator.curate(&first, &insight).unwrap();

        let report = curator.curate(&second, &insight).unwrap();
        assert_eq!(report.attempts, 2);
        assert_eq!(report.version, Some(3));
        let rule = second.rule(&RuleId::new("det-00001")).unwrap().unwrap();
        assert_eq!(rule.evidence_count, 3);
    }

    #[test]
    fn test_no_change_yields_no_delta() {
        let (curator, store, _cases) = setup();
        let insight = Insight::new(
            CaseId::now_v7(),
            InsightCategory::Correct,
            InsightAction::NoChange {
                note: "data quality".into(),
            },
            0.5,
            "test",
        );
        let report = curator.curate(&store, &insight).unwrap();
        assert!(report.delta.is_none());
        assert_eq!(store.version().unwrap(), 1);
    }

    #[test]
    fn test_audit_flags_orphaned_rules() {
        let (curator, store, cases) = setup();
        let case_id = logged_case(&cases);
        curator.curate(&store, &create_insight(case_id, 0.5)).unwrap();
        cases.case_delete(case_id).unwrap();
        let audit = curator.audit_provenance(&store.snapshot().unwrap()).unwrap();
        assert_eq!(audit.orphaned, vec![RuleId::new("det-00002")]);
        assert_eq!(audit.checked, 3);
    }
}
