//! Truthloop Agents
//!
//! The learning loop around the playbook:
//!
//! ```text
//! claim -> Generator -> Case -> Reflector (+ feedback) -> Insight -> Curator -> Delta -> Playbook
//! ```
//!
//! [`FactChecker`] composes the agents with a [`truthloop_playbook::PlaybookRegistry`]
//! and a case store; [`WarmupTrainer`] runs the loop over a labelled dataset.

mod cancel;
mod curator;
mod extractor;
mod generator;
mod metrics;
mod reflector;
mod service;
mod warmup;

pub use cancel::CancelSignal;
pub use curator::{
    reinforce_confidence, CurationReport, Curator, ProvenanceAudit, MAX_REINFORCED_CONFIDENCE,
};
pub use extractor::{ClaimExtractor, HeuristicExtractor};
pub use generator::{calibrate, evidence_factor, evidence_support, Generator};
pub use metrics::{ClassMetrics, ConfusionCounts, EvaluationMetrics};
pub use reflector::{classify_comment, CommentStance, Reflector, REFINE_MIN_EVIDENCE};
pub use service::{FactChecker, FeedbackOutcome, LabelledClaim};
pub use warmup::{WarmupRow, WarmupState, WarmupStatus, WarmupStatusHandle, WarmupTrainer};
