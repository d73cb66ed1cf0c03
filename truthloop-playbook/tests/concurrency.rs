//! Concurrent readers and writers against one playbook store.

use std::sync::Arc;
use std::thread;
use truthloop_core::{CaseId, Delta, DeltaOp, MatchingConfig, RuleId};
use truthloop_playbook::{ClaimFeatures, PlaybookStore};
use truthloop_storage::{MockPlaybookBackend, PlaybookBackend};
use truthloop_test_utils::assertions::assert_unique_rule_ids;
use truthloop_test_utils::seed_document;

fn seeded_store(backend: &MockPlaybookBackend) -> Arc<PlaybookStore> {
    Arc::new(
        PlaybookStore::open_or_seed(
            "default",
            Arc::new(backend.clone()),
            MatchingConfig::default(),
            seed_document().all_rules().cloned().collect(),
        )
        .unwrap(),
    )
}

/// Reinforce det-00001 against whatever version is current, retrying on conflict.
fn reinforce_with_retry(store: &PlaybookStore) -> u32 {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let snapshot = store.snapshot().unwrap();
        let rule = snapshot.rule(&RuleId::new("det-00001")).unwrap().clone();
        let delta = Delta::new(
            CaseId::now_v7(),
            snapshot.version(),
            DeltaOp::Update {
                rule_id: rule.id.clone(),
                evidence_count: rule.evidence_count + 1,
                confidence: rule.confidence,
            },
        );
        match store.apply_delta(&delta) {
            Ok(_) => return attempts,
            Err(e) if e.is_conflict() => continue,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}

#[test]
fn test_concurrent_writers_never_lose_updates() {
    let backend = MockPlaybookBackend::new();
    let store = seeded_store(&backend);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..5 {
                    reinforce_with_retry(&store);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let rule = store.rule(&RuleId::new("det-00001")).unwrap().unwrap();
    assert_eq!(rule.evidence_count, 1 + 40);
    assert_eq!(store.version().unwrap(), 41);
    assert_eq!(backend.versions("default").unwrap().len(), 41);
    assert_eq!(store.status().unwrap().total_cases_processed, 40);
}

#[test]
fn test_readers_see_whole_versions() {
    let backend = MockPlaybookBackend::new();
    let store = seeded_store(&backend);

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for _ in 0..20 {
                reinforce_with_retry(&store);
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let features = ClaimFeatures::extract("Official statistics are published monthly");
                for _ in 0..200 {
                    let snapshot = store.snapshot().unwrap();
                    let rule = snapshot.rule(&RuleId::new("det-00001")).unwrap();
                    // Version n holds exactly n - 1 reinforcements.
                    assert_eq!(u64::from(rule.evidence_count), snapshot.version());
                    assert_unique_rule_ids(snapshot.document());
                    let first = snapshot.match_claim(&features, &MatchingConfig::default());
                    let second = snapshot.match_claim(&features, &MatchingConfig::default());
                    assert_eq!(first, second);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(store.version().unwrap(), 21);
}

#[test]
fn test_history_is_append_only() {
    let backend = MockPlaybookBackend::new();
    let store = seeded_store(&backend);
    let v1 = backend.read_version("default", 1).unwrap().unwrap();
    for _ in 0..3 {
        reinforce_with_retry(&store);
    }
    assert_eq!(backend.read_version("default", 1).unwrap().unwrap(), v1);

    let history = store.history().unwrap();
    let versions: Vec<u64> = history.iter().map(|h| h.version).collect();
    assert_eq!(versions, vec![1, 2, 3, 4]);
    assert!(history.iter().all(|h| h.valid));
    assert_eq!(history[3].total_cases_processed, 3);
}
