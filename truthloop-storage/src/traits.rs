//! Storage traits for playbooks and the case log.

use crate::query::{CaseFilter, CasePage, PageRequest};
use truthloop_core::{
    Case, CaseId, CaseStatus, EntityType, PlaybookError, Resolution, StorageError,
    TruthloopError, TruthloopResult,
};

// ============================================================================
// PLAYBOOK BACKEND
// ============================================================================

/// Durable home of named playbooks.
///
/// Each playbook has a current envelope plus an append-only history keyed by
/// version. Entries are opaque envelope bytes (see [`crate::DocumentEnvelope`]).
pub trait PlaybookBackend: Send + Sync {
    /// Names of all playbooks that have at least one committed version.
    fn playbook_names(&self) -> TruthloopResult<Vec<String>>;

    /// Current envelope bytes for `playbook`, if it exists.
    fn read_current(&self, playbook: &str) -> TruthloopResult<Option<Vec<u8>>>;

    /// History envelope bytes for one version.
    fn read_version(&self, playbook: &str, version: u64) -> TruthloopResult<Option<Vec<u8>>>;

    /// All committed versions, ascending.
    fn versions(&self, playbook: &str) -> TruthloopResult<Vec<u64>>;

    /// Append `version` to history and make it current, in one transaction.
    ///
    /// Fails with [`PlaybookError::Conflict`] and no side effects if `version`
    /// is already in history, i.e. another writer committed it first.
    fn commit(&self, playbook: &str, version: u64, envelope: &[u8]) -> TruthloopResult<()>;

    /// Name of the playbook last made active, if one was ever recorded.
    fn read_active(&self) -> TruthloopResult<Option<String>>;

    /// Record `playbook` as the active one. Does not check that it exists.
    fn write_active(&self, playbook: &str) -> TruthloopResult<()>;
}

// ============================================================================
// CASE STORE
// ============================================================================

/// Append-only log of verification cases.
pub trait CaseStore: Send + Sync {
    /// Insert a newly opened case. Fails if the id exists.
    fn case_insert(&self, case: &Case) -> TruthloopResult<()>;

    fn case_get(&self, id: CaseId) -> TruthloopResult<Option<Case>>;

    /// Replace an open case with its terminal record. Allowed exactly once.
    fn case_finalize(&self, case: &Case) -> TruthloopResult<()>;

    /// Record the reflection outcome, optionally appending a trace note.
    ///
    /// The read-check-write is atomic: it fails if the case is still open or
    /// its stored resolution cannot move to `resolution`, so exactly one
    /// caller can claim a pending case with [`Resolution::InReview`].
    fn case_set_resolution(
        &self,
        id: CaseId,
        resolution: Resolution,
        note: Option<String>,
    ) -> TruthloopResult<()>;

    /// All cases, oldest first.
    fn case_list(&self) -> TruthloopResult<Vec<Case>>;

    /// Remove a case. Returns whether it existed.
    fn case_delete(&self, id: CaseId) -> TruthloopResult<bool>;

    fn case_exists(&self, id: CaseId) -> TruthloopResult<bool> {
        Ok(self.case_get(id)?.is_some())
    }

    /// Filtered page of cases, newest first.
    fn case_query(&self, filter: &CaseFilter, page: PageRequest) -> TruthloopResult<CasePage> {
        let mut matching: Vec<Case> = self
            .case_list()?
            .into_iter()
            .filter(|case| filter.matches(case))
            .collect();
        matching.sort_by(|a, b| b.case_id.cmp(&a.case_id));
        Ok(CasePage::slice(matching, page))
    }
}

/// Check that `next` is a legal finalization of `stored`.
pub(crate) fn check_finalize(stored: &Case, next: &Case) -> Result<(), StorageError> {
    if stored.status != CaseStatus::Open {
        return Err(StorageError::UpdateFailed {
            entity_type: EntityType::Case,
            id: stored.case_id.to_string(),
            reason: format!("case already finalized as {}", stored.status),
        });
    }
    if !next.status.is_terminal() {
        return Err(StorageError::UpdateFailed {
            entity_type: EntityType::Case,
            id: next.case_id.to_string(),
            reason: "finalized record must have a terminal status".to_string(),
        });
    }
    Ok(())
}

/// Check that `stored` may move to resolution `next`.
pub(crate) fn check_resolution(stored: &Case, next: Resolution) -> Result<(), StorageError> {
    let reason = if stored.status == CaseStatus::Open {
        "case is still open".to_string()
    } else if !stored.resolution.can_transition_to(next) {
        format!(
            "resolution cannot move from {} to {}",
            stored.resolution, next
        )
    } else {
        return Ok(());
    };
    Err(StorageError::UpdateFailed {
        entity_type: EntityType::Case,
        id: stored.case_id.to_string(),
        reason,
    })
}

pub(crate) fn case_not_found(id: CaseId) -> TruthloopError {
    TruthloopError::Storage(StorageError::NotFound {
        entity_type: EntityType::Case,
        id: id.to_string(),
    })
}

pub(crate) fn version_exists(playbook: &str, version: u64) -> TruthloopError {
    tracing::debug!(playbook = %playbook, version, "version already committed");
    TruthloopError::Playbook(PlaybookError::Conflict {
        expected: version.saturating_sub(1),
        actual: version,
    })
}
