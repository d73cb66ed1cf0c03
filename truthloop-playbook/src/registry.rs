//! Named playbooks and the active-playbook pointer.

use crate::store::PlaybookStore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use truthloop_core::{
    EntityType, MatchingConfig, PlaybookError, Rule, StorageError, TruthloopError, TruthloopResult,
};
use truthloop_storage::PlaybookBackend;

fn poisoned<T>(_: T) -> TruthloopError {
    TruthloopError::Storage(StorageError::LockPoisoned)
}

/// Registry of the playbooks held by one backend.
///
/// Exactly one playbook is active at a time. Switching only moves the pointer;
/// the history of the playbook being replaced is left untouched. The pointer
/// is persisted in the backend, so a later process starts on the playbook that
/// was last switched to.
pub struct PlaybookRegistry {
    backend: Arc<dyn PlaybookBackend>,
    matching: MatchingConfig,
    stores: RwLock<HashMap<String, Arc<PlaybookStore>>>,
    active: RwLock<Arc<PlaybookStore>>,
}

impl std::fmt::Debug for PlaybookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self
            .active
            .read()
            .map(|store| store.name().to_string())
            .unwrap_or_default();
        f.debug_struct("PlaybookRegistry")
            .field("active", &active)
            .finish()
    }
}

impl PlaybookRegistry {
    /// Open the registry on the persisted active playbook.
    ///
    /// Falls back to `configured` when no pointer was recorded or the recorded
    /// playbook no longer exists, creating it from `seed` if needed.
    pub fn new(
        backend: Arc<dyn PlaybookBackend>,
        matching: MatchingConfig,
        configured: &str,
        seed: Vec<Rule>,
    ) -> TruthloopResult<Self> {
        let persisted = match backend.read_active()? {
            Some(name) if backend.playbook_names()?.contains(&name) => Some(name),
            Some(name) => {
                tracing::warn!(
                    playbook = %name,
                    fallback = %configured,
                    "recorded active playbook is missing"
                );
                None
            }
            None => None,
        };

        let store = match &persisted {
            Some(name) => PlaybookStore::open(name.as_str(), Arc::clone(&backend), matching.clone())?,
            None => PlaybookStore::open_or_seed(
                configured,
                Arc::clone(&backend),
                matching.clone(),
                seed,
            )?,
        };
        let store = Arc::new(store);
        tracing::debug!(playbook = %store.name(), persisted = persisted.is_some(), "opened registry");

        let mut stores = HashMap::new();
        stores.insert(store.name().to_string(), Arc::clone(&store));
        Ok(Self {
            backend,
            matching,
            stores: RwLock::new(stores),
            active: RwLock::new(store),
        })
    }

    /// The active playbook.
    pub fn active(&self) -> TruthloopResult<Arc<PlaybookStore>> {
        Ok(Arc::clone(&*self.active.read().map_err(poisoned)?))
    }

    pub fn active_name(&self) -> TruthloopResult<String> {
        Ok(self.active()?.name().to_string())
    }

    /// Names of every persisted playbook.
    pub fn names(&self) -> TruthloopResult<Vec<String>> {
        let mut names = self.backend.playbook_names()?;
        names.sort();
        Ok(names)
    }

    /// Create a new named playbook from `seed`. Does not change the active one.
    pub fn create(&self, name: &str, seed: Vec<Rule>) -> TruthloopResult<Arc<PlaybookStore>> {
        if self.names()?.iter().any(|n| n == name) {
            return Err(TruthloopError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Playbook,
                reason: format!("playbook '{name}' already exists"),
            }));
        }
        let store = Arc::new(PlaybookStore::open_or_seed(
            name,
            Arc::clone(&self.backend),
            self.matching.clone(),
            seed,
        )?);
        self.stores
            .write()
            .map_err(poisoned)?
            .insert(name.to_string(), Arc::clone(&store));
        tracing::info!(playbook = %name, "created playbook");
        Ok(store)
    }

    /// Handle to a named playbook, opened lazily.
    pub fn get(&self, name: &str) -> TruthloopResult<Arc<PlaybookStore>> {
        if let Some(store) = self.stores.read().map_err(poisoned)?.get(name) {
            return Ok(Arc::clone(store));
        }
        if !self.names()?.iter().any(|n| n == name) {
            return Err(TruthloopError::Playbook(PlaybookError::UnknownPlaybook {
                name: name.to_string(),
            }));
        }
        let store = Arc::new(PlaybookStore::open(
            name,
            Arc::clone(&self.backend),
            self.matching.clone(),
        )?);
        let mut stores = self.stores.write().map_err(poisoned)?;
        Ok(Arc::clone(
            stores.entry(name.to_string()).or_insert(store),
        ))
    }

    /// Make `target` the active playbook and record it in the backend.
    pub fn switch(&self, target: &str) -> TruthloopResult<Arc<PlaybookStore>> {
        let store = self.get(target)?;
        self.backend.write_active(target)?;
        let previous = {
            let mut active = self.active.write().map_err(poisoned)?;
            std::mem::replace(&mut *active, Arc::clone(&store))
        };
        tracing::info!(
            from = %previous.name(),
            to = %target,
            version = store.version()?,
            "switched active playbook"
        );
        Ok(store)
    }
}
