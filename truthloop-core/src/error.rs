//! Error types for Truthloop operations

use crate::{CaseId, EntityType, PipelineStage, RuleId};
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: String },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed {
        entity_type: EntityType,
        reason: String,
    },

    #[error("Update failed for {entity_type:?} with id {id}: {reason}")]
    UpdateFailed {
        entity_type: EntityType,
        id: String,
        reason: String,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("{entity_type:?} {id} is still referenced by {referenced_by}")]
    Referenced {
        entity_type: EntityType,
        id: String,
        referenced_by: String,
    },
}

/// Evidence retrieval and reasoning provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("No {capability} provider configured")]
    NotConfigured { capability: String },

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: i64,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("{provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },
}

/// Verification pipeline errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("Claim extraction failed: {reason}")]
    Extraction { reason: String },

    #[error("Evidence gathering failed for every query: {reason}")]
    EvidenceGatherFailure { reason: String },

    #[error("Reasoning failed: {reason}")]
    ReasoningFailure { reason: String },

    #[error("Verification of case {case_id} cancelled during {stage:?}")]
    Cancelled {
        case_id: CaseId,
        stage: PipelineStage,
    },
}

/// Feedback and reflection errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedbackError {
    #[error("Ambiguous feedback for case {case_id}: {reason}")]
    Ambiguous { case_id: CaseId, reason: String },

    #[error("Case {case_id} cannot be reflected on: {reason}")]
    NotReflectable { case_id: CaseId, reason: String },

    #[error("Feedback not accepted for case {case_id}: {reason}")]
    NotAccepted { case_id: CaseId, reason: String },
}

/// Playbook store errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlaybookError {
    #[error("Playbook version conflict: delta computed against {expected}, current is {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("Playbook store corrupt: {reason}")]
    StoreCorrupt { reason: String },

    #[error("Rule not found: {rule_id}")]
    RuleNotFound { rule_id: RuleId },

    #[error("Rule id already in use: {rule_id}")]
    DuplicateRuleId { rule_id: RuleId },

    #[error("Rule is deprecated: {rule_id}")]
    RuleInactive { rule_id: RuleId },

    #[error("Unknown playbook: {name}")]
    UnknownPlaybook { name: String },

    #[error("Invalid rule {rule_id}: {reason}")]
    InvalidRule { rule_id: RuleId, reason: String },
}

/// Curator errors. None of these are fatal to the case that triggered them.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CuratorError {
    #[error("Curation for case {case_id} gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        case_id: CaseId,
        attempts: u32,
        last_error: String,
    },

    #[error("Curation for case {case_id} rejected: {reason}")]
    Rejected { case_id: CaseId, reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config: {reason}")]
    Parse { reason: String },
}

/// Master error type for all Truthloop errors.
#[derive(Debug, Clone, Error)]
pub enum TruthloopError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Feedback error: {0}")]
    Feedback(#[from] FeedbackError),

    #[error("Playbook error: {0}")]
    Playbook(#[from] PlaybookError),

    #[error("Curator error: {0}")]
    Curator(#[from] CuratorError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TruthloopError {
    /// Whether the error is a playbook version conflict that a caller may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TruthloopError::Playbook(PlaybookError::Conflict { .. }))
    }
}

/// Result type alias for Truthloop operations.
pub type TruthloopResult<T> = Result<T, TruthloopError>;

// =============================================================================
// TESTS
// =============================================================================
