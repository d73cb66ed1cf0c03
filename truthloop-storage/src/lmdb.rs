//! LMDB-backed storage for playbooks and cases.
//!
//! Uses the heed crate (Rust bindings for LMDB). One environment holds four
//! named databases:
//!
//! - `playbook_current`: playbook name → current envelope
//! - `playbook_history`: `name \0 version(be u64)` → envelope
//! - `cases`: case id (16 bytes, UUIDv7 so keys sort by time) → case JSON
//! - `meta`: small named values such as the active playbook pointer
//!
//! A playbook commit writes the history entry and the current pointer in a
//! single write transaction.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use truthloop_core::{
    Case, CaseId, EntityType, Resolution, StorageError, TruthloopError, TruthloopResult,
};

use crate::envelope::serialization_error;
use crate::traits::{
    case_not_found, check_finalize, check_resolution, version_exists, CaseStore, PlaybookBackend,
};

/// Error type for opening the LMDB environment.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for TruthloopError {
    fn from(e: LmdbStoreError) -> Self {
        TruthloopError::Storage(StorageError::TransactionFailed {
            reason: e.to_string(),
        })
    }
}

fn txn_error(e: heed::Error) -> TruthloopError {
    TruthloopError::Storage(StorageError::TransactionFailed {
        reason: e.to_string(),
    })
}

const ACTIVE_PLAYBOOK_KEY: &[u8] = b"active_playbook";

fn history_key(playbook: &str, version: u64) -> Vec<u8> {
    let mut key = history_prefix(playbook);
    key.extend_from_slice(&version.to_be_bytes());
    key
}

fn history_prefix(playbook: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(playbook.len() + 9);
    key.extend_from_slice(playbook.as_bytes());
    key.push(0);
    key
}

/// LMDB store implementing both [`PlaybookBackend`] and [`CaseStore`].
pub struct LmdbStore {
    env: Env,
    current: Database<Bytes, Bytes>,
    history: Database<Bytes, Bytes>,
    cases: Database<Bytes, Bytes>,
    meta: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Open (or create) a store under `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or its databases cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, map_size_bytes: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_bytes)
                .max_dbs(4)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        let current: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("playbook_current"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let history: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("playbook_history"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let cases: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("cases"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let meta: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("meta"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), "opened LMDB store");

        Ok(Self {
            env,
            current,
            history,
            cases,
            meta,
        })
    }

    fn read_txn(&self) -> TruthloopResult<RoTxn<'_>> {
        self.env.read_txn().map_err(txn_error)
    }

    fn decode_case(bytes: &[u8]) -> TruthloopResult<Case> {
        serde_json::from_slice(bytes).map_err(serialization_error)
    }

    fn write_case(&self, wtxn: &mut heed::RwTxn<'_>, case: &Case) -> TruthloopResult<()> {
        let bytes = serde_json::to_vec(case).map_err(serialization_error)?;
        self.cases
            .put(wtxn, case.case_id.as_uuid().as_bytes(), &bytes)
            .map_err(txn_error)
    }
}

impl PlaybookBackend for LmdbStore {
    fn playbook_names(&self) -> TruthloopResult<Vec<String>> {
        let rtxn = self.read_txn()?;
        let mut names = Vec::new();
        for entry in self.current.iter(&rtxn).map_err(txn_error)? {
            let (key, _) = entry.map_err(txn_error)?;
            names.push(String::from_utf8_lossy(key).into_owned());
        }
        Ok(names)
    }

    fn read_current(&self, playbook: &str) -> TruthloopResult<Option<Vec<u8>>> {
        let rtxn = self.read_txn()?;
        let bytes = self
            .current
            .get(&rtxn, playbook.as_bytes())
            .map_err(txn_error)?;
        Ok(bytes.map(<[u8]>::to_vec))
    }

    fn read_version(&self, playbook: &str, version: u64) -> TruthloopResult<Option<Vec<u8>>> {
        let rtxn = self.read_txn()?;
        let bytes = self
            .history
            .get(&rtxn, &history_key(playbook, version))
            .map_err(txn_error)?;
        Ok(bytes.map(<[u8]>::to_vec))
    }

    fn versions(&self, playbook: &str) -> TruthloopResult<Vec<u64>> {
        let prefix = history_prefix(playbook);
        let rtxn = self.read_txn()?;
        let mut versions = Vec::new();
        for entry in self.history.iter(&rtxn).map_err(txn_error)? {
            let (key, _) = entry.map_err(txn_error)?;
            if key.len() == prefix.len() + 8 && key.starts_with(&prefix) {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&key[prefix.len()..]);
                versions.push(u64::from_be_bytes(raw));
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn commit(&self, playbook: &str, version: u64, envelope: &[u8]) -> TruthloopResult<()> {
        let key = history_key(playbook, version);
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        if self.history.get(&wtxn, &key).map_err(txn_error)?.is_some() {
            return Err(version_exists(playbook, version));
        }
        self.history
            .put(&mut wtxn, &key, envelope)
            .map_err(txn_error)?;
        self.current
            .put(&mut wtxn, playbook.as_bytes(), envelope)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)
    }

    fn read_active(&self) -> TruthloopResult<Option<String>> {
        let rtxn = self.read_txn()?;
        let bytes = self.meta.get(&rtxn, ACTIVE_PLAYBOOK_KEY).map_err(txn_error)?;
        Ok(bytes.map(|b| String::from_utf8_lossy(b).into_owned()))
    }

    fn write_active(&self, playbook: &str) -> TruthloopResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.meta
            .put(&mut wtxn, ACTIVE_PLAYBOOK_KEY, playbook.as_bytes())
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)
    }
}

impl CaseStore for LmdbStore {
    fn case_insert(&self, case: &Case) -> TruthloopResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let key = case.case_id.as_uuid();
        if self
            .cases
            .get(&wtxn, key.as_bytes())
            .map_err(txn_error)?
            .is_some()
        {
            return Err(TruthloopError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Case,
                reason: "already exists".to_string(),
            }));
        }
        self.write_case(&mut wtxn, case)?;
        wtxn.commit().map_err(txn_error)
    }

    fn case_get(&self, id: CaseId) -> TruthloopResult<Option<Case>> {
        let rtxn = self.read_txn()?;
        match self
            .cases
            .get(&rtxn, id.as_uuid().as_bytes())
            .map_err(txn_error)?
        {
            Some(bytes) => Ok(Some(Self::decode_case(bytes)?)),
            None => Ok(None),
        }
    }

    fn case_finalize(&self, case: &Case) -> TruthloopResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let stored = match self
            .cases
            .get(&wtxn, case.case_id.as_uuid().as_bytes())
            .map_err(txn_error)?
        {
            Some(bytes) => Self::decode_case(bytes)?,
            None => return Err(case_not_found(case.case_id)),
        };
        check_finalize(&stored, case)?;
        self.write_case(&mut wtxn, case)?;
        wtxn.commit().map_err(txn_error)
    }

    fn case_set_resolution(
        &self,
        id: CaseId,
        resolution: Resolution,
        note: Option<String>,
    ) -> TruthloopResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut stored = match self
            .cases
            .get(&wtxn, id.as_uuid().as_bytes())
            .map_err(txn_error)?
        {
            Some(bytes) => Self::decode_case(bytes)?,
            None => return Err(case_not_found(id)),
        };
        check_resolution(&stored, resolution)?;
        stored.resolution = resolution;
        if let Some(note) = note {
            stored.process_trace.notes.push(note);
        }
        self.write_case(&mut wtxn, &stored)?;
        wtxn.commit().map_err(txn_error)
    }

    fn case_list(&self) -> TruthloopResult<Vec<Case>> {
        let rtxn = self.read_txn()?;
        let mut cases = Vec::new();
        for entry in self.cases.iter(&rtxn).map_err(txn_error)? {
            let (_, bytes) = entry.map_err(txn_error)?;
            cases.push(Self::decode_case(bytes)?);
        }
        Ok(cases)
    }

    fn case_delete(&self, id: CaseId) -> TruthloopResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let deleted = self
            .cases
            .delete(&mut wtxn, id.as_uuid().as_bytes())
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(deleted)
    }
}
