//! In-memory implementations of the storage traits for tests and ephemeral runs.

use crate::traits::{
    case_not_found, check_finalize, check_resolution, version_exists, CaseStore, PlaybookBackend,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use truthloop_core::{
    Case, CaseId, EntityType, Resolution, StorageError, TruthloopError, TruthloopResult,
};

fn poisoned<T>(_: T) -> TruthloopError {
    TruthloopError::Storage(StorageError::LockPoisoned)
}

// ============================================================================
// MOCK PLAYBOOK BACKEND
// ============================================================================

#[derive(Debug, Default)]
struct PlaybookEntry {
    current: Option<Vec<u8>>,
    history: BTreeMap<u64, Vec<u8>>,
}

/// In-memory playbook backend.
#[derive(Debug, Default, Clone)]
pub struct MockPlaybookBackend {
    playbooks: Arc<RwLock<HashMap<String, PlaybookEntry>>>,
    active: Arc<RwLock<Option<String>>>,
    fail_commits: Arc<AtomicBool>,
}

impl MockPlaybookBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail with `TransactionFailed`.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Overwrite the current envelope without touching history.
    pub fn overwrite_current(&self, playbook: &str, bytes: Vec<u8>) -> TruthloopResult<()> {
        let mut playbooks = self.playbooks.write().map_err(poisoned)?;
        playbooks.entry(playbook.to_string()).or_default().current = Some(bytes);
        Ok(())
    }

    /// Overwrite one history entry in place.
    pub fn overwrite_version(
        &self,
        playbook: &str,
        version: u64,
        bytes: Vec<u8>,
    ) -> TruthloopResult<()> {
        let mut playbooks = self.playbooks.write().map_err(poisoned)?;
        playbooks
            .entry(playbook.to_string())
            .or_default()
            .history
            .insert(version, bytes);
        Ok(())
    }
}

impl PlaybookBackend for MockPlaybookBackend {
    fn playbook_names(&self) -> TruthloopResult<Vec<String>> {
        let playbooks = self.playbooks.read().map_err(poisoned)?;
        let mut names: Vec<String> = playbooks
            .iter()
            .filter(|(_, entry)| entry.current.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    fn read_current(&self, playbook: &str) -> TruthloopResult<Option<Vec<u8>>> {
        let playbooks = self.playbooks.read().map_err(poisoned)?;
        Ok(playbooks.get(playbook).and_then(|entry| entry.current.clone()))
    }

    fn read_version(&self, playbook: &str, version: u64) -> TruthloopResult<Option<Vec<u8>>> {
        let playbooks = self.playbooks.read().map_err(poisoned)?;
        Ok(playbooks
            .get(playbook)
            .and_then(|entry| entry.history.get(&version).cloned()))
    }

    fn versions(&self, playbook: &str) -> TruthloopResult<Vec<u64>> {
        let playbooks = self.playbooks.read().map_err(poisoned)?;
        Ok(playbooks
            .get(playbook)
            .map(|entry| entry.history.keys().copied().collect())
            .unwrap_or_default())
    }

    fn commit(&self, playbook: &str, version: u64, envelope: &[u8]) -> TruthloopResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(TruthloopError::Storage(StorageError::TransactionFailed {
                reason: "commit failure injected".to_string(),
            }));
        }
        let mut playbooks = self.playbooks.write().map_err(poisoned)?;
        let entry = playbooks.entry(playbook.to_string()).or_default();
        if entry.history.contains_key(&version) {
            return Err(version_exists(playbook, version));
        }
        entry.history.insert(version, envelope.to_vec());
        entry.current = Some(envelope.to_vec());
        Ok(())
    }

    fn read_active(&self) -> TruthloopResult<Option<String>> {
        Ok(self.active.read().map_err(poisoned)?.clone())
    }

    fn write_active(&self, playbook: &str) -> TruthloopResult<()> {
        *self.active.write().map_err(poisoned)? = Some(playbook.to_string());
        Ok(())
    }
}

// ============================================================================
// MOCK CASE STORE
// ============================================================================

/// In-memory case log.
#[derive(Debug, Default, Clone)]
pub struct MockCaseStore {
    cases: Arc<RwLock<BTreeMap<CaseId, Case>>>,
}

impl MockCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn case_count(&self) -> usize {
        self.cases.read().map(|cases| cases.len()).unwrap_or(0)
    }
}

impl CaseStore for MockCaseStore {
    fn case_insert(&self, case: &Case) -> TruthloopResult<()> {
        let mut cases = self.cases.write().map_err(poisoned)?;
        if cases.contains_key(&case.case_id) {
            return Err(TruthloopError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Case,
                reason: "already exists".to_string(),
            }));
        }
        cases.insert(case.case_id, case.clone());
        Ok(())
    }

    fn case_get(&self, id: CaseId) -> TruthloopResult<Option<Case>> {
        let cases = self.cases.read().map_err(poisoned)?;
        Ok(cases.get(&id).cloned())
    }

    fn case_finalize(&self, case: &Case) -> TruthloopResult<()> {
        let mut cases = self.cases.write().map_err(poisoned)?;
        let stored = cases
            .get_mut(&case.case_id)
            .ok_or_else(|| case_not_found(case.case_id))?;
        check_finalize(stored, case)?;
        *stored = case.clone();
        Ok(())
    }

    fn case_set_resolution(
        &self,
        id: CaseId,
        resolution: Resolution,
        note: Option<String>,
    ) -> TruthloopResult<()> {
        let mut cases = self.cases.write().map_err(poisoned)?;
        let stored = cases.get_mut(&id).ok_or_else(|| case_not_found(id))?;
        check_resolution(stored, resolution)?;
        stored.resolution = resolution;
        if let Some(note) = note {
            stored.process_trace.notes.push(note);
        }
        Ok(())
    }

    fn case_list(&self) -> TruthloopResult<Vec<Case>> {
        let cases = self.cases.read().map_err(poisoned)?;
        Ok(cases.values().cloned().collect())
    }

    fn case_delete(&self, id: CaseId) -> TruthloopResult<bool> {
        let mut cases = self.cases.write().map_err(poisoned)?;
        Ok(cases.remove(&id).is_some())
    }
}
