//! Warmup Trainer: bootstraps a playbook from labelled rows.
//!
//! Rows run strictly in input order through Generator (static mode), Reflector
//! and Curator. A bad row is counted and skipped; it never stops the batch.

use crate::cancel::CancelSignal;
use crate::curator::Curator;
use crate::generator::Generator;
use crate::reflector::Reflector;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use truthloop_core::{
    Feedback, FeedbackError, MemoryType, Outcome, PipelineError, Resolution, StorageError,
    TruthloopError, TruthloopResult, ValidationError, VerificationMode,
};
use truthloop_playbook::PlaybookStore;
use truthloop_storage::CaseStore;

/// One labelled dataset row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupRow {
    pub claim: String,
    /// Ground truth label as written in the dataset.
    pub label: String,
    /// Reference analysis, fed to the reflector as the feedback comment.
    pub analysis: Option<String>,
}

impl WarmupRow {
    pub fn new(claim: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
            label: label.into(),
            analysis: None,
        }
    }

    pub fn with_analysis(mut self, analysis: impl Into<String>) -> Self {
        self.analysis = Some(analysis.into());
        self
    }

    fn parse(&self) -> Result<(&str, Outcome), String> {
        let claim = self.claim.trim();
        if claim.is_empty() {
            return Err("empty claim".to_string());
        }
        let label = self
            .label
            .parse::<Outcome>()
            .map_err(|e| e.to_string())?;
        Ok((claim, label))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmupState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// Progress of a warmup run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarmupStatus {
    pub state: WarmupState,
    pub total: usize,
    /// Rows that went through the whole loop.
    pub processed: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub failed: usize,
    /// 1-based numbers of failed rows.
    pub failed_rows: Vec<usize>,
    /// Rules created by successful rows.
    pub rules_generated: usize,
    pub detection_rules: usize,
    pub trust_rules: usize,
}

impl WarmupStatus {
    /// Share of processed rows whose verdict matched the label.
    pub fn accuracy(&self) -> Option<f64> {
        (self.processed > 0).then(|| self.correct as f64 / self.processed as f64)
    }
}

/// Cloneable, pollable view of a running warmup.
#[derive(Debug, Clone, Default)]
pub struct WarmupStatusHandle(Arc<RwLock<WarmupStatus>>);

impl WarmupStatusHandle {
    pub fn get(&self) -> TruthloopResult<WarmupStatus> {
        self.0
            .read()
            .map(|status| status.clone())
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn update(&self, f: impl FnOnce(&mut WarmupStatus)) -> TruthloopResult<()> {
        let mut status = self.0.write().map_err(|_| StorageError::LockPoisoned)?;
        f(&mut status);
        Ok(())
    }
}

/// What happened to one successful row.
struct RowResult {
    correct: bool,
    rule_created: bool,
}

pub struct WarmupTrainer {
    generator: Arc<Generator>,
    reflector: Reflector,
    curator: Arc<Curator>,
    cases: Arc<dyn CaseStore>,
    status: WarmupStatusHandle,
}

impl std::fmt::Debug for WarmupTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmupTrainer")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl WarmupTrainer {
    pub fn new(
        generator: Arc<Generator>,
        reflector: Reflector,
        curator: Arc<Curator>,
        cases: Arc<dyn CaseStore>,
    ) -> Self {
        Self {
            generator,
            reflector,
            curator,
            cases,
            status: WarmupStatusHandle::default(),
        }
    }

    pub fn status_handle(&self) -> WarmupStatusHandle {
        self.status.clone()
    }

    /// Train `playbook` on `rows` and return the final status.
    ///
    /// Cancellation stops the batch after the current row.
    pub async fn run(
        &self,
        playbook: &PlaybookStore,
        rows: &[WarmupRow],
        cancel: &CancelSignal,
    ) -> TruthloopResult<WarmupStatus> {
        self.status.update(|status| {
            *status = WarmupStatus {
                state: WarmupState::Running,
                total: rows.len(),
                ..WarmupStatus::default()
            };
        })?;
        self.refresh_rule_counts(playbook)?;
        tracing::info!(playbook = playbook.name(), rows = rows.len(), "warmup started");

        for (index, row) in rows.iter().enumerate() {
            let row_number = index + 1;
            if cancel.is_cancelled() {
                self.status.update(|status| status.state = WarmupState::Cancelled)?;
                tracing::info!(row = row_number, "warmup cancelled");
                return self.status.get();
            }

            match self.run_row(playbook, row, cancel).await {
                Ok(result) => self.status.update(|status| {
                    status.processed += 1;
                    if result.correct {
                        status.correct += 1;
                    } else {
                        status.incorrect += 1;
                    }
                    if result.rule_created {
                        status.rules_generated += 1;
                    }
                })?,
                Err(TruthloopError::Pipeline(PipelineError::Cancelled { .. })) => {
                    self.status.update(|status| status.state = WarmupState::Cancelled)?;
                    tracing::info!(row = row_number, "warmup cancelled mid-row");
                    return self.status.get();
                }
                Err(error) => {
                    tracing::warn!(row = row_number, %error, "warmup row failed, skipping");
                    self.status.update(|status| {
                        status.failed += 1;
                        status.failed_rows.push(row_number);
                    })?;
                }
            }
            self.refresh_rule_counts(playbook)?;

            if row_number % 10 == 0 {
                let status = self.status.get()?;
                tracing::info!(
                    row = row_number,
                    total = status.total,
                    processed = status.processed,
                    failed = status.failed,
                    rules_generated = status.rules_generated,
                    "warmup progress"
                );
            }
        }

        self.status.update(|status| status.state = WarmupState::Completed)?;
        let status = self.status.get()?;
        tracing::info!(
            processed = status.processed,
            failed = status.failed,
            correct = status.correct,
            rules_generated = status.rules_generated,
            version = playbook.version()?,
            "warmup completed"
        );
        Ok(status)
    }

    async fn run_row(
        &self,
        playbook: &PlaybookStore,
        row: &WarmupRow,
        cancel: &CancelSignal,
    ) -> TruthloopResult<RowResult> {
        let (claim, label) = row.parse().map_err(|reason| ValidationError::InvalidValue {
            field: "warmup row".to_string(),
            reason,
        })?;

        let case = self
            .generator
            .verify(playbook, claim, VerificationMode::Static, cancel)
            .await?;
        let correct = case.outcome() == Some(label);

        let mut feedback = Feedback::new(case.case_id).with_ground_truth(label);
        if let Some(analysis) = row.analysis.as_deref().filter(|a| !a.trim().is_empty()) {
            feedback = feedback.with_comment(analysis);
        }

        let snapshot = playbook.snapshot()?;
        let insight = match self.reflector.reflect(&case, &feedback, &snapshot) {
            Ok(insight) => insight,
            Err(TruthloopError::Feedback(FeedbackError::Ambiguous { reason, .. })) => {
                self.cases
                    .case_set_resolution(case.case_id, Resolution::Unresolved, Some(reason))?;
                return Ok(RowResult {
                    correct,
                    rule_created: false,
                });
            }
            Err(error) => return Err(error),
        };

        let report = self.curator.curate(playbook, &insight)?;
        let note = match &report.delta {
            Some(delta) => format!("warmup {} {}", delta.op.name(), delta.op.rule_id()),
            None => "warmup: no change".to_string(),
        };
        self.cases
            .case_set_resolution(case.case_id, Resolution::Resolved, Some(note))?;
        Ok(RowResult {
            correct,
            rule_created: report.created_rule().is_some(),
        })
    }

    fn refresh_rule_counts(&self, playbook: &PlaybookStore) -> TruthloopResult<()> {
        let snapshot = playbook.snapshot()?;
        let document = snapshot.document();
        let detection = document.active_count(MemoryType::Detection);
        let trust = document.active_count(MemoryType::Trust);
        self.status.update(|status| {
            status.detection_rules = detection;
            status.trust_rules = trust;
        })
    }
}
