//! Rule matching and ranking.
//!
//! `strength = satisfied / total clauses`, `score = strength * (0.5 + 0.5 * confidence)`.
//! Only active rules with non-zero strength are candidates. Candidates are
//! ordered by score, then evidence count, then recency, then id, which makes
//! the ranking a total order.

use crate::condition::Condition;
use crate::features::ClaimFeatures;
use std::cmp::Ordering;
use std::collections::HashMap;
use truthloop_core::{MatchQuality, MatchingConfig, Rule, RuleId};

/// One candidate rule with its match strength and ranking score.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule: Rule,
    pub strength: f64,
    pub score: f64,
}

/// Ranked candidates for a claim plus the derived match quality.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub candidates: Vec<RuleMatch>,
    pub quality: MatchQuality,
    pub top_score: f64,
}

impl MatchResult {
    pub fn none() -> Self {
        Self {
            candidates: Vec::new(),
            quality: MatchQuality::None,
            top_score: 0.0,
        }
    }

    pub fn rule_ids(&self) -> Vec<RuleId> {
        self.candidates.iter().map(|m| m.rule.id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Ranking score of a rule that matched with `strength`.
pub fn score(strength: f64, confidence: f64) -> f64 {
    strength * (0.5 + 0.5 * confidence.clamp(0.0, 1.0))
}

/// Match quality for the best score.
pub fn quality_for(top_score: f64, config: &MatchingConfig) -> MatchQuality {
    if top_score >= config.high_threshold {
        MatchQuality::High
    } else if top_score >= config.medium_threshold {
        MatchQuality::Medium
    } else if top_score > 0.0 {
        MatchQuality::Low
    } else {
        MatchQuality::None
    }
}

fn rank(a: &RuleMatch, b: &RuleMatch) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.rule.evidence_count.cmp(&a.rule.evidence_count))
        .then_with(|| b.rule.created_at.cmp(&a.rule.created_at))
        .then_with(|| a.rule.id.cmp(&b.rule.id))
}

/// Match `rules` against a claim. `conditions` holds the pre-parsed condition
/// of every rule whose condition parses; rules without an entry never match.
pub fn match_rules<'a>(
    rules: impl IntoIterator<Item = &'a Rule>,
    conditions: &HashMap<RuleId, Condition>,
    features: &ClaimFeatures,
    config: &MatchingConfig,
) -> MatchResult {
    let mut candidates: Vec<RuleMatch> = rules
        .into_iter()
        .filter(|rule| rule.active)
        .filter_map(|rule| {
            let condition = conditions.get(&rule.id)?;
            let strength = condition.strength(features);
            (strength > 0.0).then(|| RuleMatch {
                rule: rule.clone(),
                strength,
                score: score(strength, rule.confidence),
            })
        })
        .collect();

    if candidates.is_empty() {
        return MatchResult::none();
    }

    candidates.sort_by(rank);
    let top_score = candidates[0].score;
    candidates.truncate(config.max_candidates);

    MatchResult {
        quality: quality_for(top_score, config),
        candidates,
        top_score,
    }
}

/// Combine per-claim results: candidates merged by best score, quality of the best claim.
pub fn merge_results(results: impl IntoIterator<Item = MatchResult>, config: &MatchingConfig) -> MatchResult {
    let mut best: HashMap<RuleId, RuleMatch> = HashMap::new();
    for result in results {
        for candidate in result.candidates {
            match best.get(&candidate.rule.id) {
                Some(existing) if rank(existing, &candidate) != Ordering::Greater => {}
                _ => {
                    best.insert(candidate.rule.id.clone(), candidate);
                }
            }
        }
    }
    let mut candidates: Vec<RuleMatch> = best.into_values().collect();
    if candidates.is_empty() {
        return MatchResult::none();
    }
    candidates.sort_by(rank);
    let top_score = candidates[0].score;
    candidates.truncate(config.max_candidates);
    MatchResult {
        quality: quality_for(top_score, config),
        candidates,
        top_score,
    }
}
