//! The playbook store: snapshot-isolated reads, optimistic delta application,
//! append-only history and recovery from corrupt state.

use crate::condition::Condition;
use crate::features::ClaimFeatures;
use crate::matcher::{match_rules, MatchResult};
use crate::validation::{open_and_validate, open_history_entry, validate_document, ValidationReport};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, RwLock};
use truthloop_core::{
    Delta, DeltaOp, EntityType, MatchingConfig, MemoryType, PlaybookDocument, PlaybookError, Rule,
    RuleId, StorageError, Timestamp, TruthloopError, TruthloopResult,
};
use truthloop_storage::{encode_document, PlaybookBackend};

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Immutable view of one playbook version with pre-parsed rule conditions.
#[derive(Debug)]
pub struct PlaybookSnapshot {
    document: PlaybookDocument,
    conditions: HashMap<RuleId, Condition>,
}

impl PlaybookSnapshot {
    pub fn new(document: PlaybookDocument) -> Self {
        let mut conditions = HashMap::new();
        for rule in document.all_rules() {
            match Condition::parse(&rule.condition) {
                Ok(condition) => {
                    conditions.insert(rule.id.clone(), condition);
                }
                Err(e) => {
                    tracing::warn!(rule_id = %rule.id, error = %e, "rule condition does not parse; rule will never match");
                }
            }
        }
        Self {
            document,
            conditions,
        }
    }

    pub fn version(&self) -> u64 {
        self.document.version
    }

    pub fn document(&self) -> &PlaybookDocument {
        &self.document
    }

    pub fn rules(&self, memory: MemoryType) -> &[Rule] {
        self.document.rules(memory)
    }

    pub fn rule(&self, id: &RuleId) -> Option<&Rule> {
        self.document.find(id)
    }

    /// Ranked candidate rules for a claim. Deterministic for a given snapshot.
    pub fn match_claim(&self, features: &ClaimFeatures, config: &MatchingConfig) -> MatchResult {
        match_rules(self.document.all_rules(), &self.conditions, features, config)
    }

    /// Text listing of the active rules in both memories.
    pub fn brief_summary(&self) -> String {
        let mut out = String::new();
        for memory in MemoryType::ALL {
            let active: Vec<&Rule> = self.rules(memory).iter().filter(|r| r.active).collect();
            let _ = writeln!(out, "{} memory ({} active):", memory, active.len());
            for rule in active {
                let _ = writeln!(
                    out,
                    "  [{}] {} | {} -> {} (confidence {:.2}, evidence {})",
                    rule.id, rule.kind, rule.condition, rule.action, rule.confidence, rule.evidence_count
                );
            }
        }
        out
    }
}

/// Counters for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookStatus {
    pub name: String,
    pub version: u64,
    pub detection_rules: usize,
    pub detection_active: usize,
    pub trust_rules: usize,
    pub trust_active: usize,
    /// Applied deltas, not feedback submissions.
    pub total_cases_processed: u64,
    pub last_updated: Timestamp,
}

/// One entry of the version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: u64,
    /// `None` when the entry failed validation.
    pub last_updated: Option<Timestamp>,
    pub rule_count: usize,
    pub total_cases_processed: u64,
    pub valid: bool,
}

// ============================================================================
// STORE
// ============================================================================

fn poisoned<T>(_: T) -> TruthloopError {
    TruthloopError::Storage(StorageError::LockPoisoned)
}

fn store_corrupt(reason: String) -> TruthloopError {
    TruthloopError::Playbook(PlaybookError::StoreCorrupt { reason })
}

/// Handle to one named playbook.
///
/// Readers clone the current `Arc<PlaybookSnapshot>`; the pointer lock is held
/// only for that clone or for the swap after a commit. Writers serialize on a
/// separate commit lock and persist through the backend before swapping.
pub struct PlaybookStore {
    name: String,
    backend: Arc<dyn PlaybookBackend>,
    matching: MatchingConfig,
    current: RwLock<Arc<PlaybookSnapshot>>,
    commit_lock: Mutex<()>,
}

impl std::fmt::Debug for PlaybookStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybookStore")
            .field("name", &self.name)
            .field("matching", &self.matching)
            .finish()
    }
}

impl PlaybookStore {
    /// Open an existing playbook, or create it at version 1 from `seed`.
    pub fn open_or_seed(
        name: impl Into<String>,
        backend: Arc<dyn PlaybookBackend>,
        matching: MatchingConfig,
        seed: Vec<Rule>,
    ) -> TruthloopResult<Self> {
        let name = name.into();
        if backend.read_current(&name)?.is_none() && backend.versions(&name)?.is_empty() {
            let document = PlaybookDocument::seeded(seed);
            let report = validate_document(&document);
            if !report.is_valid() {
                return Err(TruthloopError::Playbook(PlaybookError::InvalidRule {
                    rule_id: report
                        .issues
                        .iter()
                        .find_map(|i| i.rule_id.clone())
                        .unwrap_or_else(|| RuleId::new("seed")),
                    reason: report.summary(),
                }));
            }
            backend.commit(&name, document.version, &encode_document(&document)?)?;
            tracing::info!(playbook = %name, rules = document.all_rules().count(), "created playbook from seed");
        }
        Self::open(name, backend, matching)
    }

    /// Open an existing playbook, recovering if its current state is invalid.
    pub fn open(
        name: impl Into<String>,
        backend: Arc<dyn PlaybookBackend>,
        matching: MatchingConfig,
    ) -> TruthloopResult<Self> {
        let name = name.into();
        let snapshot = Self::read_validated(&name, backend.as_ref())?;
        Ok(Self {
            name,
            backend,
            matching,
            current: RwLock::new(Arc::new(snapshot)),
            commit_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matching_config(&self) -> &MatchingConfig {
        &self.matching
    }

    /// Re-read the persisted current version, validating and recovering.
    pub fn load(&self) -> TruthloopResult<Arc<PlaybookSnapshot>> {
        let _guard = self.commit_lock.lock().map_err(poisoned)?;
        let snapshot = Arc::new(Self::read_validated(&self.name, self.backend.as_ref())?);
        *self.current.write().map_err(poisoned)? = Arc::clone(&snapshot);
        Ok(snapshot)
    }

    /// The current in-memory snapshot.
    pub fn snapshot(&self) -> TruthloopResult<Arc<PlaybookSnapshot>> {
        Ok(Arc::clone(&*self.current.read().map_err(poisoned)?))
    }

    pub fn version(&self) -> TruthloopResult<u64> {
        Ok(self.snapshot()?.version())
    }

    /// Match a claim against the current snapshot.
    pub fn match_claim(&self, features: &ClaimFeatures) -> TruthloopResult<MatchResult> {
        Ok(self.snapshot()?.match_claim(features, &self.matching))
    }

    pub fn rule(&self, id: &RuleId) -> TruthloopResult<Option<Rule>> {
        Ok(self.snapshot()?.rule(id).cloned())
    }

    pub fn status(&self) -> TruthloopResult<PlaybookStatus> {
        let snapshot = self.snapshot()?;
        let doc = snapshot.document();
        Ok(PlaybookStatus {
            name: self.name.clone(),
            version: doc.version,
            detection_rules: doc.detection_rules.len(),
            detection_active: doc.active_count(MemoryType::Detection),
            trust_rules: doc.trust_rules.len(),
            trust_active: doc.active_count(MemoryType::Trust),
            total_cases_processed: doc.total_cases_processed,
            last_updated: doc.last_updated,
        })
    }

    pub fn brief_summary(&self) -> TruthloopResult<String> {
        Ok(self.snapshot()?.brief_summary())
    }

    /// Every persisted version, oldest first.
    pub fn history(&self) -> TruthloopResult<Vec<HistoryEntry>> {
        let mut entries = Vec::new();
        for version in self.backend.versions(&self.name)? {
            let entry = match self.backend.read_version(&self.name, version)? {
                Some(bytes) => match open_history_entry(&bytes, version) {
                    Ok(doc) => HistoryEntry {
                        version,
                        last_updated: Some(doc.last_updated),
                        rule_count: doc.all_rules().count(),
                        total_cases_processed: doc.total_cases_processed,
                        valid: true,
                    },
                    Err(_) => Self::invalid_entry(version),
                },
                None => Self::invalid_entry(version),
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    fn invalid_entry(version: u64) -> HistoryEntry {
        HistoryEntry {
            version,
            last_updated: None,
            rule_count: 0,
            total_cases_processed: 0,
            valid: false,
        }
    }

    /// The full document of one historical version.
    pub fn history_version(&self, version: u64) -> TruthloopResult<PlaybookDocument> {
        let bytes = self
            .backend
            .read_version(&self.name, version)?
            .ok_or_else(|| {
                TruthloopError::Storage(StorageError::NotFound {
                    entity_type: EntityType::PlaybookVersion,
                    id: format!("{}@{}", self.name, version),
                })
            })?;
        open_history_entry(&bytes, version).map_err(|report| {
            store_corrupt(format!("{} version {}: {}", self.name, version, report.summary()))
        })
    }

    /// Apply one delta, producing a new version.
    ///
    /// Fails with [`PlaybookError::Conflict`] if the playbook moved past
    /// `delta.base_version`, either in this handle or in the backend. In the
    /// latter case the handle reloads the backend's current version before
    /// returning, so a retry computes against fresh state. Nothing is written
    /// unless the backend commit succeeds.
    pub fn apply_delta(&self, delta: &Delta) -> TruthloopResult<Arc<PlaybookSnapshot>> {
        let _guard = self.commit_lock.lock().map_err(poisoned)?;
        let current = self.snapshot()?;

        if delta.base_version != current.version() {
            return Err(TruthloopError::Playbook(PlaybookError::Conflict {
                expected: delta.base_version,
                actual: current.version(),
            }));
        }

        let mut next = current.document().clone();
        apply_op(&mut next, &delta.op)?;
        next.version = current.version() + 1;
        next.total_cases_processed += 1;
        next.last_updated = Utc::now().max(current.document().last_updated);

        let report = validate_document(&next);
        if !report.is_valid() {
            return Err(TruthloopError::Playbook(PlaybookError::InvalidRule {
                rule_id: delta.op.rule_id().clone(),
                reason: report.summary(),
            }));
        }

        if let Err(err) = self
            .backend
            .commit(&self.name, next.version, &encode_document(&next)?)
        {
            if !err.is_conflict() {
                return Err(err);
            }
            // Another handle on the same backend committed first.
            let refreshed = Arc::new(Self::read_validated(&self.name, self.backend.as_ref())?);
            *self.current.write().map_err(poisoned)? = Arc::clone(&refreshed);
            tracing::warn!(
                playbook = %self.name,
                base_version = delta.base_version,
                current_version = refreshed.version(),
                "playbook moved under this handle; refreshed snapshot"
            );
            return Err(TruthloopError::Playbook(PlaybookError::Conflict {
                expected: delta.base_version,
                actual: refreshed.version(),
            }));
        }

        let snapshot = Arc::new(PlaybookSnapshot::new(next));
        *self.current.write().map_err(poisoned)? = Arc::clone(&snapshot);

        tracing::info!(
            playbook = %self.name,
            version = snapshot.version(),
            op = delta.op.name(),
            rule_id = %delta.op.rule_id(),
            case_id = %delta.case_id,
            "applied playbook delta"
        );
        Ok(snapshot)
    }

    /// Read the current version; on validation failure, recover from history.
    fn read_validated(name: &str, backend: &dyn PlaybookBackend) -> TruthloopResult<PlaybookSnapshot> {
        let current = backend.read_current(name)?.ok_or_else(|| {
            TruthloopError::Playbook(PlaybookError::UnknownPlaybook {
                name: name.to_string(),
            })
        })?;

        match open_and_validate(&current) {
            Ok(document) => Ok(PlaybookSnapshot::new(document)),
            Err(report) => Self::recover(name, backend, &report).map(PlaybookSnapshot::new),
        }
    }

    /// Adopt the newest valid history snapshot and re-persist it as a new version.
    fn recover(
        name: &str,
        backend: &dyn PlaybookBackend,
        report: &ValidationReport,
    ) -> TruthloopResult<PlaybookDocument> {
        tracing::error!(
            playbook = %name,
            issues = %report.summary(),
            "playbook current state failed validation; recovering from history"
        );

        let versions = backend.versions(name)?;
        let next_version = versions.last().copied().unwrap_or(0) + 1;

        for version in versions.iter().rev().copied() {
            let Some(bytes) = backend.read_version(name, version)? else {
                continue;
            };
            match open_history_entry(&bytes, version) {
                Ok(mut document) => {
                    document.version = next_version;
                    document.last_updated = Utc::now();
                    backend.commit(name, next_version, &encode_document(&document)?)?;
                    tracing::error!(
                        playbook = %name,
                        recovered_from = version,
                        new_version = next_version,
                        "playbook recovered from history snapshot"
                    );
                    return Ok(document);
                }
                Err(entry_report) => {
                    tracing::warn!(
                        playbook = %name,
                        version,
                        issues = %entry_report.summary(),
                        "skipping invalid history snapshot"
                    );
                }
            }
        }

        Err(store_corrupt(format!(
            "{name}: current state invalid ({}) and no valid history snapshot",
            report.summary()
        )))
    }
}

/// Apply one delta operation to a working copy of the document.
fn apply_op(doc: &mut PlaybookDocument, op: &DeltaOp) -> TruthloopResult<()> {
    match op {
        DeltaOp::Create { rule } => {
            if doc.contains(&rule.id) {
                return Err(TruthloopError::Playbook(PlaybookError::DuplicateRuleId {
                    rule_id: rule.id.clone(),
                }));
            }
            check_confidence(&rule.id, rule.confidence)?;
            Condition::parse(&rule.condition).map_err(|e| {
                TruthloopError::Playbook(PlaybookError::InvalidRule {
                    rule_id: rule.id.clone(),
                    reason: e.to_string(),
                })
            })?;
            doc.rules_mut(rule.memory_type).push(rule.clone());
        }
        DeltaOp::Update {
            rule_id,
            evidence_count,
            confidence,
        } => {
            check_confidence(rule_id, *confidence)?;
            let rule = active_rule_mut(doc, rule_id)?;
            rule.evidence_count = *evidence_count;
            rule.confidence = *confidence;
        }
        DeltaOp::Deprecate { rule_id } => {
            let rule = active_rule_mut(doc, rule_id)?;
            rule.active = false;
        }
    }
    Ok(())
}

fn active_rule_mut<'a>(doc: &'a mut PlaybookDocument, rule_id: &RuleId) -> TruthloopResult<&'a mut Rule> {
    let rule = doc.find_mut(rule_id).ok_or_else(|| {
        TruthloopError::Playbook(PlaybookError::RuleNotFound {
            rule_id: rule_id.clone(),
        })
    })?;
    if !rule.active {
        return Err(TruthloopError::Playbook(PlaybookError::RuleInactive {
            rule_id: rule_id.clone(),
        }));
    }
    Ok(rule)
}

fn check_confidence(rule_id: &RuleId, confidence: f64) -> TruthloopResult<()> {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(TruthloopError::Playbook(PlaybookError::InvalidRule {
            rule_id: rule_id.clone(),
            reason: format!("confidence {confidence} outside [0, 1]"),
        }))
    }
}
