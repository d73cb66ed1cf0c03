//! Truthloop Test Utilities
//!
//! Shared test infrastructure for the Truthloop workspace:
//! - Proptest generators for rules, claims and playbook documents
//! - Fixtures for seeded playbooks and finalized cases
//! - Assertions for Truthloop-specific error and invariant checks

pub use truthloop_core::{
    Case, CaseId, CaseStatus, Credibility, Evidence, MatchQuality, MemoryType, Outcome,
    PipelineStage, PlaybookDocument, PlaybookError, Rule, RuleId, RuleKind, TruthloopError,
    TruthloopResult, VerificationMode, Verdict,
};

pub use fixtures::*;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Truthloop entity types.

    use super::*;
    use proptest::prelude::*;

    /// Words the generated claims and conditions are drawn from, so that
    /// conditions have a realistic chance of matching claims.
    pub const VOCABULARY: &[&str] = &[
        "vaccine", "autism", "election", "fraud", "climate", "warming", "study", "scientists",
        "government", "secret", "cure", "cancer", "moon", "landing", "water", "percent",
        "official", "statistics", "president", "economy",
    ];

    pub fn arb_memory_type() -> impl Strategy<Value = MemoryType> {
        prop_oneof![Just(MemoryType::Detection), Just(MemoryType::Trust)]
    }

    pub fn arb_rule_kind() -> impl Strategy<Value = RuleKind> {
        prop_oneof![
            Just(RuleKind::Strategy),
            Just(RuleKind::ToolTemplate),
            Just(RuleKind::Pitfall),
        ]
    }

    pub fn arb_outcome() -> impl Strategy<Value = Outcome> {
        prop_oneof![Just(Outcome::True), Just(Outcome::False)]
    }

    pub fn arb_credibility() -> impl Strategy<Value = Credibility> {
        prop_oneof![
            Just(Credibility::High),
            Just(Credibility::Medium),
            Just(Credibility::Low),
        ]
    }

    /// Confidence strictly inside (0, 1).
    pub fn arb_confidence() -> impl Strategy<Value = f64> {
        0.01f64..0.99
    }

    fn arb_word() -> impl Strategy<Value = &'static str> {
        proptest::sample::select(VOCABULARY)
    }

    /// A condition of one to three vocabulary clauses joined with AND.
    pub fn arb_condition() -> impl Strategy<Value = String> {
        prop_oneof![
            1 => Just("ALWAYS".to_string()),
            5 => proptest::collection::vec(arb_word(), 1..=3)
                .prop_map(|words| format!("IF {}", words.join(" AND "))),
        ]
    }

    /// A claim sentence of four to twelve vocabulary words.
    pub fn arb_claim() -> impl Strategy<Value = String> {
        proptest::collection::vec(arb_word(), 4..=12).prop_map(|words| {
            let mut claim = words.join(" ");
            claim.push('.');
            claim
        })
    }

    /// Rules with unique, correctly prefixed ids.
    pub fn arb_rule_set(max: usize) -> impl Strategy<Value = Vec<Rule>> {
        proptest::collection::vec(
            (
                arb_memory_type(),
                arb_rule_kind(),
                arb_condition(),
                arb_confidence(),
                0u32..20,
                any::<bool>(),
            ),
            0..=max,
        )
        .prop_map(|specs| {
            let mut det_seq = 0;
            let mut tru_seq = 0;
            specs
                .into_iter()
                .map(|(memory, kind, condition, confidence, evidence, inactive)| {
                    let seq = match memory {
                        MemoryType::Detection => {
                            det_seq += 1;
                            det_seq
                        }
                        MemoryType::Trust => {
                            tru_seq += 1;
                            tru_seq
                        }
                    };
                    let mut rule = Rule::new(
                        RuleId::for_sequence(memory, seq),
                        memory,
                        kind,
                        condition,
                        "check primary sources",
                        confidence,
                    )
                    .with_evidence_count(evidence);
                    rule.active = !inactive;
                    rule
                })
                .collect()
        })
    }

    pub fn arb_document(max_rules: usize) -> impl Strategy<Value = PlaybookDocument> {
        arb_rule_set(max_rules).prop_map(PlaybookDocument::seeded)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use chrono::Utc;

    /// An active rule whose condition matches every claim.
    pub fn always_rule(id: &str, memory: MemoryType, confidence: f64) -> Rule {
        Rule::new(
            RuleId::new(id),
            memory,
            RuleKind::Strategy,
            "ALWAYS",
            "compare against primary sources",
            confidence,
        )
    }

    /// A rule with an explicit condition.
    pub fn conditional_rule(
        id: &str,
        memory: MemoryType,
        kind: RuleKind,
        condition: &str,
        confidence: f64,
    ) -> Rule {
        Rule::new(
            RuleId::new(id),
            memory,
            kind,
            condition,
            "verify with fact-checking sites",
            confidence,
        )
    }

    /// Small seeded playbook: one catch-all detection rule and one trust rule.
    pub fn seed_document() -> PlaybookDocument {
        PlaybookDocument::seeded(vec![
            always_rule("det-00001", MemoryType::Detection, 0.6),
            conditional_rule(
                "tru-00001",
                MemoryType::Trust,
                RuleKind::Strategy,
                "IF official AND statistics",
                0.5,
            ),
        ])
    }

    pub fn high_evidence(content: &str) -> Evidence {
        Evidence::new("https://factcheck.example/a", content, Credibility::High)
    }

    /// Turn an open case into a completed one with the given verdict.
    pub fn finalize_completed(mut case: Case, outcome: Outcome, confidence: f64) -> Case {
        case.status = CaseStatus::Completed;
        case.stage = PipelineStage::Done;
        case.verdict = Some(Verdict {
            outcome,
            confidence,
            reasoning: "fixture verdict".to_string(),
            evidence: vec![high_evidence("fixture evidence")],
            rule_match_quality: case.rule_match_quality,
        });
        case.finalized_at = Some(Utc::now());
        case
    }

    /// A completed static case.
    pub fn completed_case(claim: &str, outcome: Outcome, confidence: f64) -> Case {
        finalize_completed(
            Case::open(claim, VerificationMode::Static, 1),
            outcome,
            confidence,
        )
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for Truthloop-specific validation.

    use super::*;
    use std::collections::HashSet;

    pub fn assert_ok<T: std::fmt::Debug>(result: &TruthloopResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got {:?}", result);
    }

    pub fn assert_conflict<T: std::fmt::Debug>(result: &TruthloopResult<T>) {
        assert!(
            matches!(
                result,
                Err(TruthloopError::Playbook(PlaybookError::Conflict { .. }))
            ),
            "Expected playbook conflict, got {:?}",
            result
        );
    }

    /// No two rules in the document share an id.
    pub fn assert_unique_rule_ids(doc: &PlaybookDocument) {
        let mut seen = HashSet::new();
        for rule in doc.all_rules() {
            assert!(seen.insert(rule.id.clone()), "duplicate rule id {}", rule.id);
        }
    }

    /// Every rule sits in the partition of its memory type.
    pub fn assert_partitioned(doc: &PlaybookDocument) {
        for memory in MemoryType::ALL {
            for rule in doc.rules(memory) {
                assert_eq!(rule.memory_type, memory, "rule {} misplaced", rule.id);
            }
        }
    }

    pub fn assert_unit_confidence(value: f64) {
        assert!(
            value.is_finite() && (0.0..=1.0).contains(&value),
            "confidence {} outside [0, 1]",
            value
        );
    }
}
