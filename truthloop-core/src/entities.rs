//! Entity structures: rules, evidence, verdicts, cases and feedback

use crate::{
    CaseId, CaseStatus, Credibility, MatchQuality, MemoryType, Outcome, PipelineStage, Resolution,
    RuleId, RuleKind, Timestamp, VerificationMode,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// RULE
// ============================================================================

/// Where a rule came from. Provenance is a plain id, not ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Learned from a verification case.
    Case(CaseId),
    /// Derived from another rule.
    Rule(RuleId),
}

/// A single learned rule in one of the two playbook memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub memory_type: MemoryType,
    pub kind: RuleKind,
    /// Predicate over claim features, e.g. `IF absolute_language=true AND vaccine`.
    pub condition: String,
    /// Recommended response when the condition holds.
    pub action: String,
    #[serde(default)]
    pub description: String,
    pub confidence: f64,
    pub evidence_count: u32,
    pub active: bool,
    #[serde(default)]
    pub created_from: Option<Provenance>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub parent_rule: Option<RuleId>,
}

impl Rule {
    /// Create an active rule with one piece of evidence and no provenance.
    pub fn new(
        id: RuleId,
        memory_type: MemoryType,
        kind: RuleKind,
        condition: impl Into<String>,
        action: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id,
            memory_type,
            kind,
            condition: condition.into(),
            action: action.into(),
            description: String::new(),
            confidence,
            evidence_count: 1,
            active: true,
            created_from: None,
            created_at: Utc::now(),
            parent_rule: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.created_from = Some(provenance);
        self
    }

    pub fn with_parent_rule(mut self, parent: RuleId) -> Self {
        self.parent_rule = Some(parent);
        self
    }

    pub fn with_evidence_count(mut self, evidence_count: u32) -> Self {
        self.evidence_count = evidence_count;
        self
    }

    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }

    /// The verdict this rule argues for.
    pub fn implied_outcome(&self) -> Outcome {
        self.memory_type.implied_outcome()
    }

    /// The case this rule was learned from, if it was learned from one directly.
    pub fn source_case(&self) -> Option<CaseId> {
        match &self.created_from {
            Some(Provenance::Case(case_id)) => Some(*case_id),
            _ => None,
        }
    }
}

// ============================================================================
// EVIDENCE & VERDICT
// ============================================================================

/// A piece of evidence returned by the retriever.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Evidence {
    pub source: String,
    pub content: String,
    pub credibility: Credibility,
}

impl Evidence {
    pub fn new(
        source: impl Into<String>,
        content: impl Into<String>,
        credibility: Credibility,
    ) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            credibility,
        }
    }

    /// Key used to deduplicate evidence gathered by several queries.
    pub fn dedup_key(&self) -> (&str, &str) {
        (&self.source, &self.content)
    }
}

/// Final judgement on a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub outcome: Outcome,
    pub confidence: f64,
    pub reasoning: String,
    pub evidence: Vec<Evidence>,
    pub rule_match_quality: MatchQuality,
}

// ============================================================================
// PROCESS TRACE
// ============================================================================

/// What the planner decided.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlannerTrace {
    pub extracted_claims: Vec<String>,
    pub selected_rules: Vec<RuleId>,
    pub search_queries: Vec<String>,
}

/// A retrieval query that failed or timed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFailure {
    pub query: String,
    pub reason: String,
}

/// What the investigator did.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InvestigatorTrace {
    pub queries_executed: usize,
    pub failed_queries: Vec<QueryFailure>,
    pub evidence_count: usize,
    /// Set when every query failed and judging ran on an empty evidence set.
    pub evidence_gather_failure: Option<String>,
}

/// What the judge did.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JudgeTrace {
    pub raw_confidence: Option<f64>,
    pub evidence_factor: Option<f64>,
    pub reasoning: String,
}

/// Full record of how a verdict was reached.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessTrace {
    pub planner: PlannerTrace,
    pub investigator: InvestigatorTrace,
    pub judge: JudgeTrace,
    /// Data-quality notes left by the reflector.
    #[serde(default)]
    pub notes: Vec<String>,
}

impl ProcessTrace {
    pub fn evidence_gather_failed(&self) -> bool {
        self.investigator.evidence_gather_failure.is_some()
    }
}

// ============================================================================
// CASE
// ============================================================================

/// One verification run, logged append-only.
///
/// A case is opened once, finalized exactly once, and after that only its
/// `resolution` (and reflector notes) may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub case_id: CaseId,
    pub claim: String,
    pub mode: VerificationMode,
    pub status: CaseStatus,
    pub stage: PipelineStage,
    pub verdict: Option<Verdict>,
    pub used_rules: Vec<RuleId>,
    pub rule_match_quality: MatchQuality,
    pub process_trace: ProcessTrace,
    /// Playbook version the verification read.
    pub playbook_version: u64,
    pub timestamp: Timestamp,
    pub finalized_at: Option<Timestamp>,
    pub failure: Option<String>,
    #[serde(default)]
    pub resolution: Resolution,
}

impl Case {
    /// Open a new case in the planning stage.
    pub fn open(claim: impl Into<String>, mode: VerificationMode, playbook_version: u64) -> Self {
        Self {
            case_id: CaseId::now_v7(),
            claim: claim.into(),
            mode,
            status: CaseStatus::Open,
            stage: PipelineStage::Planning,
            verdict: None,
            used_rules: Vec::new(),
            rule_match_quality: MatchQuality::None,
            process_trace: ProcessTrace::default(),
            playbook_version,
            timestamp: Utc::now(),
            finalized_at: None,
            failure: None,
            resolution: Resolution::Pending,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == CaseStatus::Open
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.verdict.as_ref().map(|v| v.outcome)
    }

    pub fn confidence(&self) -> Option<f64> {
        self.verdict.as_ref().map(|v| v.confidence)
    }
}

// ============================================================================
// FEEDBACK
// ============================================================================

/// Human or dataset feedback on a completed case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub case_id: CaseId,
    pub ground_truth: Option<Outcome>,
    pub comment: Option<String>,
}

impl Feedback {
    pub fn new(case_id: CaseId) -> Self {
        Self {
            case_id,
            ground_truth: None,
            comment: None,
        }
    }

    pub fn with_ground_truth(mut self, outcome: Outcome) -> Self {
        self.ground_truth = Some(outcome);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        let comment = comment.into();
        if !comment.trim().is_empty() {
            self.comment = Some(comment);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_defaults() {
        let rule = Rule::new(
            RuleId::new("det-00001"),
            MemoryType::Detection,
            RuleKind::Pitfall,
            "ALWAYS",
            "be sceptical",
            0.6,
        );
        assert!(rule.active);
        assert_eq!(rule.evidence_count, 1);
        assert_eq!(rule.implied_outcome(), Outcome::False);
        assert!(rule.created_from.is_none());
        assert!(rule.source_case().is_none());
    }

    #[test]
    fn test_rule_source_case() {
        let case_id = CaseId::now_v7();
        let rule = Rule::new(
            RuleId::new("tru-00001"),
            MemoryType::Trust,
            RuleKind::Strategy,
            "ALWAYS",
            "trust official data",
            0.5,
        )
        .with_provenance(Provenance::Case(case_id));
        assert_eq!(rule.source_case(), Some(case_id));
    }

    #[test]
    fn test_rule_deserializes_without_optional_fields() {
        let json = r#"{
            "id": "det-00003",
            "memory_type": "detection",
            "kind": "strategy",
            "condition": "miracle cure",
            "action": "check medical sources",
            "confidence": 0.7,
            "evidence_count": 2,
            "active": true,
            "created_at": "2024-01-01T00:00:00Z"
        }"#;
        let rule: Rule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.description, "");
        assert!(rule.parent_rule.is_none());
        assert!(rule.created_from.is_none());
    }

    #[test]
    fn test_case_open_state() {
        let case = Case::open("The moon is made of cheese", VerificationMode::Static, 3);
        assert!(case.is_open());
        assert_eq!(case.stage, PipelineStage::Planning);
        assert_eq!(case.resolution, Resolution::Pending);
        assert_eq!(case.playbook_version, 3);
        assert!(case.outcome().is_none());
    }

    #[test]
    fn test_feedback_ignores_blank_comment() {
        let feedback = Feedback::new(CaseId::now_v7()).with_comment("   ");
        assert!(feedback.comment.is_none());
    }
}
