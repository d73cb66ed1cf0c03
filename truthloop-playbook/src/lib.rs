//! Truthloop Playbook
//!
//! The versioned dual-memory rule store. Readers match claims against an
//! immutable snapshot; the only write path is [`PlaybookStore::apply_delta`],
//! which checks the delta's base version, persists the next version through
//! the backend and then swaps the snapshot.

mod condition;
mod features;
mod matcher;
mod registry;
mod store;
mod validation;

pub use condition::{Clause, Condition, ConditionError};
pub use features::{content_terms, is_stopword, tokenize, ClaimFeatures, ATTRIBUTE_KEYS};
pub use matcher::{match_rules, merge_results, quality_for, score, MatchResult, RuleMatch};
pub use registry::PlaybookRegistry;
pub use store::{HistoryEntry, PlaybookSnapshot, PlaybookStatus, PlaybookStore};
pub use validation::{
    open_and_validate, open_history_entry, validate_document, IssueType, ValidationIssue,
    ValidationReport,
};
