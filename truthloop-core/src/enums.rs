//! Enum types for Truthloop entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// PARSE ERROR
// ============================================================================

/// Error when parsing an invalid enum string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl EnumParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for EnumParseError {}

fn normalize_token(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Implements Display and FromStr on top of `as_db_str` / `from_db_str`.
macro_rules! db_str_conversions {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_db_str())
            }
        }

        impl FromStr for $ty {
            type Err = EnumParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_db_str(s)
            }
        }
    };
}

// ============================================================================
// RULE ENUMS
// ============================================================================

/// Which memory a rule lives in.
///
/// Detection rules capture patterns of misinformation and imply a `False`
/// verdict; trust rules capture patterns of reliable claims and imply `True`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Detection,
    Trust,
}

impl MemoryType {
    pub const ALL: [MemoryType; 2] = [MemoryType::Detection, MemoryType::Trust];

    pub fn as_db_str(&self) -> &'static str {
        match self {
            MemoryType::Detection => "detection",
            MemoryType::Trust => "trust",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "detection" | "det" => Ok(MemoryType::Detection),
            "trust" | "tru" => Ok(MemoryType::Trust),
            _ => Err(EnumParseError::new("memory type", s)),
        }
    }

    /// Prefix used for rule ids in this memory.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            MemoryType::Detection => "det",
            MemoryType::Trust => "tru",
        }
    }

    /// Verdict outcome a rule in this memory argues for.
    pub fn implied_outcome(&self) -> Outcome {
        match self {
            MemoryType::Detection => Outcome::False,
            MemoryType::Trust => Outcome::True,
        }
    }

    /// Memory where lessons about `outcome` belong.
    pub fn for_outcome(outcome: Outcome) -> Self {
        match outcome {
            Outcome::False => MemoryType::Detection,
            Outcome::True => MemoryType::Trust,
        }
    }
}

db_str_conversions!(MemoryType);

/// Kind of rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// General reasoning strategy.
    Strategy,
    /// Suggests an additional search query built from the rule action.
    ToolTemplate,
    /// Known trap to watch out for.
    Pitfall,
}

impl RuleKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RuleKind::Strategy => "strategy",
            RuleKind::ToolTemplate => "tool_template",
            RuleKind::Pitfall => "pitfall",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "strategy" => Ok(RuleKind::Strategy),
            "tooltemplate" | "tool" => Ok(RuleKind::ToolTemplate),
            "pitfall" => Ok(RuleKind::Pitfall),
            _ => Err(EnumParseError::new("rule kind", s)),
        }
    }
}

db_str_conversions!(RuleKind);

// ============================================================================
// VERDICT ENUMS
// ============================================================================

/// Binary verdict outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    True,
    False,
}

impl Outcome {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Outcome::True => "True",
            Outcome::False => "False",
        }
    }

    /// Parses verdict labels, including the common dataset spellings
    /// (`true`/`false`, `yes`/`no`, `1`/`0`, `real`/`fake`).
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "true" | "t" | "yes" | "1" | "real" | "correct" => Ok(Outcome::True),
            "false" | "f" | "no" | "0" | "fake" | "incorrect" => Ok(Outcome::False),
            _ => Err(EnumParseError::new("outcome", s)),
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Outcome::True => Outcome::False,
            Outcome::False => Outcome::True,
        }
    }
}

db_str_conversions!(Outcome);

/// Credibility assigned to a piece of evidence by the retriever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Credibility {
    High,
    Medium,
    Low,
}

impl Credibility {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Credibility::High => "high",
            Credibility::Medium => "medium",
            Credibility::Low => "low",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "high" => Ok(Credibility::High),
            "medium" | "med" => Ok(Credibility::Medium),
            "low" => Ok(Credibility::Low),
            _ => Err(EnumParseError::new("credibility", s)),
        }
    }

    /// Support weight used when calibrating verdict confidence.
    pub fn weight(&self) -> f64 {
        match self {
            Credibility::High => 1.0,
            Credibility::Medium => 0.5,
            Credibility::Low => 0.25,
        }
    }
}

db_str_conversions!(Credibility);

/// How well the playbook's rules matched a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchQuality {
    High,
    Medium,
    Low,
    None,
}

impl MatchQuality {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MatchQuality::High => "high",
            MatchQuality::Medium => "medium",
            MatchQuality::Low => "low",
            MatchQuality::None => "none",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "high" => Ok(MatchQuality::High),
            "medium" => Ok(MatchQuality::Medium),
            "low" => Ok(MatchQuality::Low),
            "none" => Ok(MatchQuality::None),
            _ => Err(EnumParseError::new("match quality", s)),
        }
    }

    /// Numeric rank, higher is better. Used to combine per-claim qualities.
    pub fn rank(&self) -> u8 {
        match self {
            MatchQuality::High => 3,
            MatchQuality::Medium => 2,
            MatchQuality::Low => 1,
            MatchQuality::None => 0,
        }
    }
}

db_str_conversions!(MatchQuality);

// ============================================================================
// CASE ENUMS
// ============================================================================

/// Verification mode. Static cases never feed back into the playbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    Static,
    Evolving,
}

impl VerificationMode {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            VerificationMode::Static => "static",
            VerificationMode::Evolving => "evolving",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "static" => Ok(VerificationMode::Static),
            "evolving" | "evolve" => Ok(VerificationMode::Evolving),
            _ => Err(EnumParseError::new("verification mode", s)),
        }
    }
}

db_str_conversions!(VerificationMode);

/// Stage of the verification pipeline. Transitions only move forward;
/// `Failed` is reachable from every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Planning,
    Investigating,
    Judging,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            PipelineStage::Planning => "planning",
            PipelineStage::Investigating => "investigating",
            PipelineStage::Judging => "judging",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "planning" => Ok(PipelineStage::Planning),
            "investigating" => Ok(PipelineStage::Investigating),
            "judging" => Ok(PipelineStage::Judging),
            "done" => Ok(PipelineStage::Done),
            "failed" => Ok(PipelineStage::Failed),
            _ => Err(EnumParseError::new("pipeline stage", s)),
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_advance_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        matches!(
            (self, next),
            (Planning, Investigating)
                | (Investigating, Judging)
                | (Judging, Done)
                | (Planning | Investigating | Judging, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }
}

db_str_conversions!(PipelineStage);

/// Lifecycle status of a case record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Open,
    Completed,
    Failed,
    Aborted,
}

impl CaseStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "open",
            CaseStatus::Completed => "completed",
            CaseStatus::Failed => "failed",
            CaseStatus::Aborted => "aborted",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "open" => Ok(CaseStatus::Open),
            "completed" => Ok(CaseStatus::Completed),
            "failed" => Ok(CaseStatus::Failed),
            "aborted" => Ok(CaseStatus::Aborted),
            _ => Err(EnumParseError::new("case status", s)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CaseStatus::Open)
    }
}

db_str_conversions!(CaseStatus);

/// Whether feedback on a case has been turned into a playbook lesson.
///
/// `InReview` is held while one feedback submission is being reflected on and
/// curated; it either settles or reverts to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    #[default]
    Pending,
    InReview,
    Resolved,
    Unresolved,
}

impl Resolution {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Resolution::Pending => "pending",
            Resolution::InReview => "in_review",
            Resolution::Resolved => "resolved",
            Resolution::Unresolved => "unresolved",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "pending" => Ok(Resolution::Pending),
            "inreview" => Ok(Resolution::InReview),
            "resolved" => Ok(Resolution::Resolved),
            "unresolved" => Ok(Resolution::Unresolved),
            _ => Err(EnumParseError::new("resolution", s)),
        }
    }

    /// Whether a stored resolution may be replaced by `next`.
    pub fn can_transition_to(&self, next: Resolution) -> bool {
        use Resolution::*;
        matches!(
            (self, next),
            (Pending, InReview | Resolved | Unresolved) | (InReview, Pending | Resolved | Unresolved)
        )
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, Resolution::Resolved | Resolution::Unresolved)
    }
}

db_str_conversions!(Resolution);

/// Category of a reflector insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InsightCategory {
    /// The verdict matched ground truth.
    Reinforce,
    /// The verdict contradicted ground truth.
    Correct,
}

impl InsightCategory {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            InsightCategory::Reinforce => "REINFORCE",
            InsightCategory::Correct => "CORRECT",
        }
    }

    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match normalize_token(s).as_str() {
            "reinforce" => Ok(InsightCategory::Reinforce),
            "correct" => Ok(InsightCategory::Correct),
            _ => Err(EnumParseError::new("insight category", s)),
        }
    }
}

db_str_conversions!(InsightCategory);

/// Entity type discriminator used in storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Case,
    Rule,
    Playbook,
    PlaybookVersion,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            EntityType::Case => "Case",
            EntityType::Rule => "Rule",
            EntityType::Playbook => "Playbook",
            EntityType::PlaybookVersion => "PlaybookVersion",
        };
        f.write_str(value)
    }
}

// ============================================================================
// TESTS
// ============================================================================
