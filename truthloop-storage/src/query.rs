//! Case history queries: filtering, pagination and aggregate statistics.

use serde::{Deserialize, Serialize};
use truthloop_core::{Case, CaseStatus, Outcome, Resolution, VerificationMode};

/// Filter applied to the case log. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseFilter {
    pub mode: Option<VerificationMode>,
    pub outcome: Option<Outcome>,
    pub status: Option<CaseStatus>,
    pub resolution: Option<Resolution>,
    /// Case-insensitive substring of the claim text.
    pub text: Option<String>,
}

impl CaseFilter {
    pub fn matches(&self, case: &Case) -> bool {
        if self.mode.is_some_and(|mode| mode != case.mode) {
            return false;
        }
        if self.status.is_some_and(|status| status != case.status) {
            return false;
        }
        if self
            .resolution
            .is_some_and(|resolution| resolution != case.resolution)
        {
            return false;
        }
        if let Some(outcome) = self.outcome {
            if case.outcome() != Some(outcome) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            if !case.claim.to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }
}

/// Offset/limit pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 20,
        }
    }
}

impl PageRequest {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }
}

/// One page of cases plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasePage {
    pub items: Vec<Case>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl CasePage {
    pub fn slice(cases: Vec<Case>, page: PageRequest) -> Self {
        let total = cases.len();
        let items = cases
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Self {
            items,
            total,
            offset: page.offset,
            limit: page.limit,
        }
    }

    pub fn has_more(&self) -> bool {
        self.offset + self.items.len() < self.total
    }
}

/// Aggregate statistics over the case log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub aborted: usize,
    pub true_count: usize,
    pub false_count: usize,
    /// Mean verdict confidence over cases with a verdict.
    pub avg_confidence: Option<f64>,
    pub static_count: usize,
    pub evolving_count: usize,
    pub unresolved: usize,
}

impl CaseStats {
    pub fn from_cases<'a>(cases: impl IntoIterator<Item = &'a Case>) -> Self {
        let mut stats = CaseStats::default();
        let mut confidence_sum = 0.0;
        let mut with_verdict = 0usize;

        for case in cases {
            stats.total += 1;
            match case.status {
                CaseStatus::Completed => stats.completed += 1,
                CaseStatus::Failed => stats.failed += 1,
                CaseStatus::Aborted => stats.aborted += 1,
                CaseStatus::Open => {}
            }
            match case.mode {
                VerificationMode::Static => stats.static_count += 1,
                VerificationMode::Evolving => stats.evolving_count += 1,
            }
            if case.resolution == Resolution::Unresolved {
                stats.unresolved += 1;
            }
            if let Some(verdict) = &case.verdict {
                match verdict.outcome {
                    Outcome::True => stats.true_count += 1,
                    Outcome::False => stats.false_count += 1,
                }
                confidence_sum += verdict.confidence;
                with_verdict += 1;
            }
        }

        if with_verdict > 0 {
            stats.avg_confidence = Some(confidence_sum / with_verdict as f64);
        }
        stats
    }
}
