//! Insights and deltas: the two halves of the learning step

use crate::{
    CaseId, DeltaId, InsightCategory, MemoryType, Rule, RuleId, RuleKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// INSIGHT
// ============================================================================

/// Draft of a rule the curator should create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleProposal {
    pub memory_type: MemoryType,
    pub kind: RuleKind,
    pub condition: String,
    pub action: String,
    pub description: String,
}

/// The change an insight asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InsightAction {
    Reinforce { rule_id: RuleId },
    CreateRule { proposal: RuleProposal },
    Deprecate { rule_id: RuleId },
    /// Keep `parent` and add a narrower child rule for the case it got wrong.
    Refine { parent: RuleId, proposal: RuleProposal },
    NoChange { note: String },
}

/// Ephemeral diagnosis produced by the reflector and consumed by the curator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub case_id: CaseId,
    pub category: InsightCategory,
    pub action: InsightAction,
    /// How strongly the case supports the lesson, in `[0, 1]`.
    pub strength: f64,
    pub rationale: String,
}

impl Insight {
    pub fn new(
        case_id: CaseId,
        category: InsightCategory,
        action: InsightAction,
        strength: f64,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            case_id,
            category,
            action,
            strength,
            rationale: rationale.into(),
        }
    }

    pub fn is_no_change(&self) -> bool {
        matches!(self.action, InsightAction::NoChange { .. })
    }
}

// ============================================================================
// DELTA
// ============================================================================

/// One atomic playbook mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DeltaOp {
    Create {
        rule: Rule,
    },
    Update {
        rule_id: RuleId,
        evidence_count: u32,
        confidence: f64,
    },
    Deprecate {
        rule_id: RuleId,
    },
}

impl DeltaOp {
    pub fn rule_id(&self) -> &RuleId {
        match self {
            DeltaOp::Create { rule } => &rule.id,
            DeltaOp::Update { rule_id, .. } | DeltaOp::Deprecate { rule_id } => rule_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeltaOp::Create { .. } => "create",
            DeltaOp::Update { .. } => "update",
            DeltaOp::Deprecate { .. } => "deprecate",
        }
    }
}

/// A delta computed against a specific playbook version.
///
/// Applying it to any other version fails with a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub delta_id: DeltaId,
    pub case_id: CaseId,
    pub base_version: u64,
    pub op: DeltaOp,
}

impl Delta {
    pub fn new(case_id: CaseId, base_version: u64, op: DeltaOp) -> Self {
        Self {
            delta_id: Uuid::now_v7(),
            case_id,
            base_version,
            op,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_op_rule_id() {
        let op = DeltaOp::Deprecate {
            rule_id: RuleId::new("det-00004"),
        };
        assert_eq!(op.rule_id().as_str(), "det-00004");
        assert_eq!(op.name(), "deprecate");
    }

    #[test]
    fn test_refine_action_serializes_with_parent() {
        let action = InsightAction::Refine {
            parent: RuleId::new("det-00003"),
            proposal: RuleProposal {
                memory_type: MemoryType::Trust,
                kind: RuleKind::Strategy,
                condition: "IF harbour AND bridge".to_string(),
                action: "check the port authority".to_string(),
                description: String::new(),
            },
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "refine");
        assert_eq!(json["parent"], "det-00003");
        assert_eq!(json["proposal"]["memory_type"], "trust");
    }

    #[test]
    fn test_delta_serializes_with_op_tag() {
        let delta = Delta::new(
            CaseId::now_v7(),
            7,
            DeltaOp::Update {
                rule_id: RuleId::new("tru-00001"),
                evidence_count: 3,
                confidence: 0.7,
            },
        );
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["base_version"], 7);
        assert_eq!(json["op"]["op"], "update");
        assert_eq!(json["op"]["rule_id"], "tru-00001");
    }

    #[test]
    fn test_insight_no_change() {
        let insight = Insight::new(
            CaseId::now_v7(),
            InsightCategory::Correct,
            InsightAction::NoChange {
                note: "evidence unavailable".into(),
            },
            0.0,
            "retrieval failed",
        );
        assert!(insight.is_no_change());
    }
}
