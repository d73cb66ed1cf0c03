//! Playbook store persisted through LMDB.

use std::sync::Arc;
use tempfile::TempDir;
use truthloop_core::{CaseId, Delta, DeltaOp, MatchingConfig, MemoryType, PlaybookError, RuleId, TruthloopError};
use truthloop_playbook::{PlaybookRegistry, PlaybookStore};
use truthloop_storage::LmdbStore;
use truthloop_test_utils::{always_rule, seed_document};

const MAP_SIZE: usize = 16 * 1024 * 1024;

fn open_backend(dir: &TempDir) -> Arc<LmdbStore> {
    Arc::new(LmdbStore::open(dir.path(), MAP_SIZE).unwrap())
}

#[test]
fn test_versions_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = PlaybookStore::open_or_seed(
            "default",
            open_backend(&dir),
            MatchingConfig::default(),
            seed_document().all_rules().cloned().collect(),
        )
        .unwrap();
        let rule = always_rule("det-00002", MemoryType::Detection, 0.5);
        store
            .apply_delta(&Delta::new(CaseId::now_v7(), 1, DeltaOp::Create { rule }))
            .unwrap();
    }

    let store = PlaybookStore::open("default", open_backend(&dir), MatchingConfig::default()).unwrap();
    assert_eq!(store.version().unwrap(), 2);
    assert!(store.rule(&RuleId::new("det-00002")).unwrap().is_some());
    assert_eq!(store.history().unwrap().len(), 2);
    assert!(store.history_version(1).unwrap().find(&RuleId::new("det-00002")).is_none());
}

#[test]
fn test_open_unknown_playbook_fails() {
    let dir = TempDir::new().unwrap();
    let result = PlaybookStore::open("nothing", open_backend(&dir), MatchingConfig::default());
    assert!(matches!(
        result,
        Err(TruthloopError::Playbook(PlaybookError::UnknownPlaybook { .. }))
    ));
}

#[test]
fn test_registry_switch_persists_both_playbooks() {
    let dir = TempDir::new().unwrap();
    let backend = open_backend(&dir);
    let registry = PlaybookRegistry::new(
        backend,
        MatchingConfig::default(),
        "default",
        seed_document().all_rules().cloned().collect(),
    )
    .unwrap();
    registry.create("empty", Vec::new()).unwrap();
    registry.switch("empty").unwrap();
    assert_eq!(registry.active().unwrap().status().unwrap().detection_rules, 0);
    assert_eq!(
        registry.names().unwrap(),
        vec!["default".to_string(), "empty".to_string()]
    );
}
