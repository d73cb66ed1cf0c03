//! End-to-end learning loop scenarios over in-memory storage.

use std::sync::Arc;
use truthloop_agents::{
    CancelSignal, Curator, FactChecker, FeedbackOutcome, WarmupRow, WarmupState,
};
use truthloop_core::{
    CaseStatus, CuratorConfig, Evidence, Feedback, FeedbackError, Insight, InsightAction,
    InsightCategory, MatchQuality, MatchingConfig, MemoryType, Outcome, PipelineStage, Provenance,
    Resolution, Rule, RuleId, TruthloopConfig, TruthloopError, VerificationMode,
};
use truthloop_llm::{DeterministicReasoner, FailingRetriever, FixedRetriever, ProviderRegistry};
use truthloop_playbook::PlaybookRegistry;
use truthloop_storage::{CaseStore, MockCaseStore, MockPlaybookBackend};
use truthloop_test_utils::assertions::{assert_conflict, assert_partitioned, assert_unique_rule_ids};
use truthloop_test_utils::{always_rule, high_evidence};

struct Harness {
    checker: Arc<FactChecker>,
    cases: MockCaseStore,
}

fn harness(seed: Vec<Rule>, evidence: Option<Vec<Evidence>>) -> Harness {
    let registry = PlaybookRegistry::new(
        Arc::new(MockPlaybookBackend::new()),
        MatchingConfig::default(),
        "default",
        seed,
    )
    .unwrap();
    let mut providers = ProviderRegistry::new();
    match evidence {
        Some(evidence) => providers.register_retriever(Arc::new(FixedRetriever::new(evidence))),
        None => providers.register_retriever(Arc::new(FailingRetriever::new("search backend down"))),
    }
    providers.register_reasoner(Arc::new(DeterministicReasoner::new()));
    let cases = MockCaseStore::new();
    let checker = FactChecker::new(
        Arc::new(registry),
        Arc::new(cases.clone()),
        providers,
        &TruthloopConfig::default(),
    )
    .unwrap();
    Harness {
        checker: Arc::new(checker),
        cases,
    }
}

fn debunking_evidence() -> Vec<Evidence> {
    vec![
        high_evidence("Independent fact checkers rated the story a hoax"),
        Evidence::new(
            "https://news.example/b",
            "Doctors say the claim is false and misleading",
            truthloop_core::Credibility::Medium,
        ),
    ]
}

const CLAIM: &str = "Drinking hot water with lemon cures the flu";

// ============================================================================
// SCENARIO A: reinforcement
// ============================================================================

#[tokio::test]
async fn test_agreeing_feedback_reinforces_matched_rule() {
    let h = harness(
        vec![always_rule("det-00001", MemoryType::Detection, 0.6)],
        Some(debunking_evidence()),
    );
    let case = h.checker.verify(CLAIM, VerificationMode::Evolving).await.unwrap();
    assert_eq!(case.used_rules, vec![RuleId::new("det-00001")]);
    assert_eq!(case.outcome(), Some(Outcome::False));

    let outcome = h
        .checker
        .submit_feedback(&Feedback::new(case.case_id).with_ground_truth(Outcome::False))
        .await
        .unwrap();
    assert!(matches!(outcome, FeedbackOutcome::Applied(_)));

    let rule = h.checker.rule(&RuleId::new("det-00001")).unwrap().unwrap();
    assert_eq!(rule.evidence_count, 2);
    assert!(rule.confidence > 0.6 && rule.confidence < 1.0);
    assert_eq!(h.checker.playbook_status().unwrap().version, 2);
}

// ============================================================================
// SCENARIO B: rule creation
// ============================================================================

#[tokio::test]
async fn test_unmatched_false_claim_creates_detection_rule() {
    let h = harness(Vec::new(), Some(vec![high_evidence("Weather report for the weekend")]));
    let case = h.checker.verify(CLAIM, VerificationMode::Evolving).await.unwrap();
    assert_eq!(case.rule_match_quality, MatchQuality::None);

    let outcome = h
        .checker
        .submit_feedback(&Feedback::new(case.case_id).with_ground_truth(Outcome::False))
        .await
        .unwrap();
    let FeedbackOutcome::Applied(report) = outcome else {
        panic!("expected a created rule, got {outcome:?}");
    };
    let rule_id = report.created_rule().cloned().unwrap();
    assert_eq!(rule_id, RuleId::new("det-00001"));

    let rule = h.checker.rule(&rule_id).unwrap().unwrap();
    assert_eq!(rule.memory_type, MemoryType::Detection);
    assert_eq!(rule.evidence_count, 1);
    assert_eq!(rule.created_from, Some(Provenance::Case(case.case_id)));
    assert!(h.checker.audit().unwrap().is_clean());

    // The new rule matches the same claim next time.
    let again = h.checker.verify(CLAIM, VerificationMode::Static).await.unwrap();
    assert_eq!(again.used_rules, vec![rule_id]);
}

// ============================================================================
// SCENARIO C: concurrent reinforcement
// ============================================================================

fn reinforce(case_id: truthloop_core::CaseId) -> Insight {
    Insight::new(
        case_id,
        InsightCategory::Reinforce,
        InsightAction::Reinforce {
            rule_id: RuleId::new("det-00001"),
        },
        0.8,
        "agreeing verdict",
    )
}

#[tokio::test]
async fn test_stale_delta_conflicts_and_curator_retries() {
    let h = harness(
        vec![always_rule("det-00001", MemoryType::Detection, 0.6)],
        Some(debunking_evidence()),
    );
    let first = h.checker.verify(CLAIM, VerificationMode::Evolving).await.unwrap();
    let second = h.checker.verify(CLAIM, VerificationMode::Evolving).await.unwrap();

    let playbook = h.checker.registry().active().unwrap();
    let curator = Curator::new(Arc::new(h.cases.clone()), CuratorConfig::default());
    let stale = playbook.snapshot().unwrap();

    // Both deltas are computed against version 1.
    let first_delta = curator.compute_delta(&stale, &reinforce(first.case_id)).unwrap();
    let second_delta = curator.compute_delta(&stale, &reinforce(second.case_id)).unwrap();
    playbook.apply_delta(&first_delta).unwrap();
    assert_conflict(&playbook.apply_delta(&second_delta));

    // The curator recomputes against the refreshed version.
    let report = curator.curate(&playbook, &reinforce(second.case_id)).unwrap();
    assert_eq!(report.version, Some(3));

    let rule = playbook.rule(&RuleId::new("det-00001")).unwrap().unwrap();
    assert_eq!(rule.evidence_count, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_feedback_loses_no_update() {
    let h = harness(
        vec![always_rule("det-00001", MemoryType::Detection, 0.6)],
        Some(debunking_evidence()),
    );
    let first = h.checker.verify(CLAIM, VerificationMode::Evolving).await.unwrap();
    let second = h.checker.verify(CLAIM, VerificationMode::Evolving).await.unwrap();

    let handles: Vec<_> = [first.case_id, second.case_id]
        .into_iter()
        .map(|case_id| {
            let checker = Arc::clone(&h.checker);
            tokio::spawn(async move {
                checker
                    .submit_feedback(&Feedback::new(case_id).with_ground_truth(Outcome::False))
                    .await
            })
        })
        .collect();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(matches!(outcome, FeedbackOutcome::Applied(_)));
    }

    let rule = h.checker.rule(&RuleId::new("det-00001")).unwrap().unwrap();
    assert_eq!(rule.evidence_count, 3);
    assert_eq!(h.checker.playbook_status().unwrap().version, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_feedback_for_one_case_applies_once() {
    let h = harness(
        vec![always_rule("det-00001", MemoryType::Detection, 0.6)],
        Some(debunking_evidence()),
    );
    let case = h.checker.verify(CLAIM, VerificationMode::Evolving).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let checker = Arc::clone(&h.checker);
            let feedback = Feedback::new(case.case_id).with_ground_truth(Outcome::False);
            tokio::spawn(async move { checker.submit_feedback(&feedback).await })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(FeedbackOutcome::Applied(_)) => applied += 1,
            Err(TruthloopError::Feedback(FeedbackError::NotAccepted { .. })) => {}
            other => panic!("unexpected feedback result: {other:?}"),
        }
    }
    assert_eq!(applied, 1);

    let rule = h.checker.rule(&RuleId::new("det-00001")).unwrap().unwrap();
    assert_eq!(rule.evidence_count, 2);
    assert_eq!(h.checker.playbook_status().unwrap().version, 2);
    let stored = h.cases.case_get(case.case_id).unwrap().unwrap();
    assert_eq!(stored.resolution, Resolution::Resolved);
}

// ============================================================================
// SCENARIO D: evidence gathering failure
// ============================================================================

#[tokio::test]
async fn test_failed_retrieval_still_judges_with_lower_confidence() {
    let seed = || vec![always_rule("det-00001", MemoryType::Detection, 0.6)];
    let without = harness(seed(), None);
    let with = harness(seed(), Some(debunking_evidence()));

    let starved = without.checker.verify(CLAIM, VerificationMode::Static).await.unwrap();
    let informed = with.checker.verify(CLAIM, VerificationMode::Static).await.unwrap();

    assert_eq!(starved.status, CaseStatus::Completed);
    assert_eq!(starved.stage, PipelineStage::Done);
    assert!(starved.verdict.as_ref().unwrap().evidence.is_empty());
    assert!(starved.process_trace.evidence_gather_failed());
    assert!(!starved.process_trace.investigator.failed_queries.is_empty());

    assert_eq!(starved.outcome(), informed.outcome());
    assert!(starved.confidence().unwrap() < informed.confidence().unwrap());
}

// ============================================================================
// SCENARIO E: warmup with a malformed row
// ============================================================================

fn dataset() -> Vec<WarmupRow> {
    let rows = [
        ("Garlic supplements cure seasonal influenza overnight", "false"),
        ("The city council approved the new library budget", "true"),
        ("Microwaved water destroys every nutrient in vegetables", "false"),
        ("Regular exercise lowers resting heart rate", "true"),
        ("", "false"),
        ("Eating carrots gives pilots night vision", "false"),
        ("The central bank raised interest rates last quarter", "true"),
        ("Cell towers spread respiratory viruses", "false"),
        ("The marathon route passes through the harbour district", "true"),
        ("Sugar makes children hyperactive within minutes", "false"),
    ];
    rows.into_iter()
        .map(|(claim, label)| WarmupRow::new(claim, label).with_analysis(format!("labelled {label}")))
        .collect()
}

#[tokio::test]
async fn test_warmup_skips_malformed_row() {
    let h = harness(Vec::new(), Some(debunking_evidence()));
    let trainer = h.checker.warmup_trainer();
    let handle = trainer.status_handle();
    let playbook = h.checker.registry().active().unwrap();

    let status = trainer
        .run(&playbook, &dataset(), &CancelSignal::new())
        .await
        .unwrap();

    assert_eq!(status.state, WarmupState::Completed);
    assert_eq!(status.total, 10);
    assert_eq!(status.processed, 9);
    assert_eq!(status.failed, 1);
    assert_eq!(status.failed_rows, vec![5]);
    assert_eq!(status.correct + status.incorrect, 9);
    assert_eq!(handle.get().unwrap(), status);

    let snapshot = playbook.snapshot().unwrap();
    let document = snapshot.document();
    let learned = document
        .all_rules()
        .filter(|rule| matches!(rule.created_from, Some(Provenance::Case(_))))
        .count();
    assert!(status.rules_generated >= 1);
    assert_eq!(status.rules_generated, learned);
    assert_eq!(
        status.detection_rules + status.trust_rules,
        document.active_count(MemoryType::Detection) + document.active_count(MemoryType::Trust)
    );
    assert_unique_rule_ids(document);
    assert_partitioned(document);
    assert!(h.checker.audit().unwrap().is_clean());

    // Only the nine well-formed rows reached the case log, all in static mode.
    let cases = h.cases.case_list().unwrap();
    assert_eq!(cases.len(), 9);
    assert!(cases.iter().all(|case| case.mode == VerificationMode::Static));
}
