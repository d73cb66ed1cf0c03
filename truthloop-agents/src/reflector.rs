//! Reflector: compares a verdict with ground truth and diagnoses what the
//! playbook should learn from it.

use std::collections::HashSet;
use truthloop_core::{
    Case, CaseStatus, Feedback, FeedbackError, Insight, InsightAction, InsightCategory,
    MatchQuality, MemoryType, Outcome, Rule, RuleKind, RuleProposal, TruthloopResult,
};
use truthloop_playbook::{tokenize, ClaimFeatures, PlaybookSnapshot};

const AGREEMENT_WORDS: &[&str] = &["correct", "right", "accurate", "agree", "agreed"];
const DISAGREEMENT_WORDS: &[&str] = &[
    "wrong",
    "incorrect",
    "inaccurate",
    "mistake",
    "mistaken",
    "disagree",
];
const NEGATIONS: &[&str] = &["not", "isn't", "wasn't", "never", "hardly"];

/// A wrongly-firing rule backed by at least this many cases is refined rather
/// than deprecated.
pub const REFINE_MIN_EVIDENCE: u32 = 2;

/// Stance of a free-text comment towards the verdict it comments on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStance {
    Agrees,
    Disagrees,
    /// Both or neither kind of keyword.
    Unclear,
}

/// Classify a comment by keyword. A negated agreement word counts as disagreement.
pub fn classify_comment(comment: &str) -> CommentStance {
    let tokens = tokenize(comment);
    let mut agrees = false;
    let mut disagrees = false;
    for (i, token) in tokens.iter().enumerate() {
        let negated = i > 0 && NEGATIONS.contains(&tokens[i - 1].as_str());
        if AGREEMENT_WORDS.contains(&token.as_str()) {
            if negated {
                disagrees = true;
            } else {
                agrees = true;
            }
        } else if DISAGREEMENT_WORDS.contains(&token.as_str()) {
            disagrees = true;
        }
    }
    match (agrees, disagrees) {
        (true, false) => CommentStance::Agrees,
        (false, true) => CommentStance::Disagrees,
        _ => CommentStance::Unclear,
    }
}

/// Turns a completed case plus feedback into one [`Insight`].
#[derive(Debug, Clone)]
pub struct Reflector {
    salient_terms: usize,
}

impl Default for Reflector {
    fn default() -> Self {
        Self { salient_terms: 2 }
    }
}

impl Reflector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of claim terms a proposed rule condition is built from.
    pub fn with_salient_terms(mut self, n: usize) -> Self {
        self.salient_terms = n.max(1);
        self
    }

    /// Diagnose `case` against `feedback`.
    ///
    /// `snapshot` is used to look up the implied outcome and active flag of
    /// the rules the case used.
    pub fn reflect(
        &self,
        case: &Case,
        feedback: &Feedback,
        snapshot: &PlaybookSnapshot,
    ) -> TruthloopResult<Insight> {
        let verdict = match (&case.verdict, case.status) {
            (Some(verdict), CaseStatus::Completed) => verdict,
            _ => {
                return Err(FeedbackError::NotReflectable {
                    case_id: case.case_id,
                    reason: format!("case is {} without a verdict", case.status),
                }
                .into())
            }
        };

        let truth = self.ground_truth(case, feedback, verdict.outcome)?;
        let used: Vec<&Rule> = case
            .used_rules
            .iter()
            .filter_map(|id| snapshot.rule(id))
            .filter(|rule| rule.active)
            .collect();
        let no_rules = case.rule_match_quality == MatchQuality::None || case.used_rules.is_empty();

        if truth == verdict.outcome {
            let strength = verdict.confidence;
            if no_rules {
                let proposal = self.propose(case, feedback, truth);
                return Ok(Insight::new(
                    case.case_id,
                    InsightCategory::Reinforce,
                    InsightAction::CreateRule { proposal },
                    strength,
                    "correct verdict reached without any matching rule",
                ));
            }
            return Ok(match used.iter().find(|r| r.implied_outcome() == truth) {
                Some(rule) => Insight::new(
                    case.case_id,
                    InsightCategory::Reinforce,
                    InsightAction::Reinforce {
                        rule_id: rule.id.clone(),
                    },
                    strength,
                    format!("rule {} pointed to the correct verdict {}", rule.id, truth),
                ),
                None => Insight::new(
                    case.case_id,
                    InsightCategory::Reinforce,
                    InsightAction::NoChange {
                        note: format!("verdict {truth} was correct but no used rule implies it"),
                    },
                    strength,
                    "nothing to reinforce",
                ),
            });
        }

        let strength = verdict.confidence;
        if case.process_trace.evidence_gather_failed() {
            return Ok(Insight::new(
                case.case_id,
                InsightCategory::Correct,
                InsightAction::NoChange {
                    note: "data quality: evidence gathering failed, verdict reached without evidence"
                        .to_string(),
                },
                strength,
                "wrong verdict attributed to missing evidence",
            ));
        }
        if no_rules {
            let proposal = self.propose(case, feedback, truth);
            return Ok(Insight::new(
                case.case_id,
                InsightCategory::Correct,
                InsightAction::CreateRule { proposal },
                strength,
                format!("no rule matched; verdict should have been {truth}"),
            ));
        }
        if let Some(rule) = used.iter().find(|r| r.implied_outcome() != truth) {
            if rule.evidence_count >= REFINE_MIN_EVIDENCE {
                let proposal = self.refine(case, feedback, truth, rule);
                return Ok(Insight::new(
                    case.case_id,
                    InsightCategory::Correct,
                    InsightAction::Refine {
                        parent: rule.id.clone(),
                        proposal,
                    },
                    strength,
                    format!(
                        "rule {} ({} cases) implied {} but the truth is {}; adding an exception",
                        rule.id,
                        rule.evidence_count,
                        rule.implied_outcome(),
                        truth
                    ),
                ));
            }
            return Ok(Insight::new(
                case.case_id,
                InsightCategory::Correct,
                InsightAction::Deprecate {
                    rule_id: rule.id.clone(),
                },
                strength,
                format!("rule {} implied {} but the truth is {}", rule.id, rule.implied_outcome(), truth),
            ));
        }

        Err(FeedbackError::Ambiguous {
            case_id: case.case_id,
            reason: "verdict was wrong but no used rule can be blamed".to_string(),
        }
        .into())
    }

    fn ground_truth(
        &self,
        case: &Case,
        feedback: &Feedback,
        verdict: Outcome,
    ) -> TruthloopResult<Outcome> {
        if let Some(truth) = feedback.ground_truth {
            return Ok(truth);
        }
        let Some(comment) = feedback.comment.as_deref() else {
            return Err(FeedbackError::Ambiguous {
                case_id: case.case_id,
                reason: "feedback has neither ground truth nor comment".to_string(),
            }
            .into());
        };
        match classify_comment(comment) {
            CommentStance::Agrees => Ok(verdict),
            CommentStance::Disagrees => Ok(verdict.opposite()),
            CommentStance::Unclear => Err(FeedbackError::Ambiguous {
                case_id: case.case_id,
                reason: format!("cannot tell whether '{comment}' agrees with the verdict"),
            }
            .into()),
        }
    }

    /// Draft a rule capturing the lesson of `case` in the memory of `truth`.
    pub fn propose(&self, case: &Case, feedback: &Feedback, truth: Outcome) -> RuleProposal {
        let memory = MemoryType::for_outcome(truth);
        let features = ClaimFeatures::extract(&case.claim);

        let mut clauses: Vec<String> = features
            .salient_terms(self.salient_terms)
            .into_iter()
            .map(str::to_string)
            .collect();
        let signal = ["absolute_language", "has_url", "has_number", "has_quote"]
            .into_iter()
            .find(|key| features.attribute(key) == Some("true"));
        if let Some(key) = signal {
            clauses.push(format!("{key}=true"));
        }
        if clauses.is_empty() {
            let length = features.attribute("length").unwrap_or("short");
            clauses.push(format!("length={length}"));
        }
        let mut seen = HashSet::new();
        clauses.retain(|c| seen.insert(c.clone()));

        let kind = match memory {
            MemoryType::Detection => RuleKind::Pitfall,
            MemoryType::Trust => RuleKind::Strategy,
        };
        let action = feedback.comment.clone().unwrap_or_else(|| match memory {
            MemoryType::Detection => {
                "Treat similar claims as likely false; look for debunking sources".to_string()
            }
            MemoryType::Trust => {
                "Treat similar claims as likely true when primary sources confirm them".to_string()
            }
        });
        let description = format!("Learned from case {}: {}", case.case_id, truncate(&case.claim, 80));

        RuleProposal {
            memory_type: memory,
            kind,
            condition: format!("IF {}", clauses.join(" AND ")),
            action,
            description,
        }
    }

    /// Draft the exception to `parent` that `case` calls for.
    ///
    /// The child lives in the memory of `truth` and is narrowed to the terms of
    /// this claim, so `parent` keeps firing everywhere else.
    pub fn refine(&self, case: &Case, feedback: &Feedback, truth: Outcome, parent: &Rule) -> RuleProposal {
        let mut proposal = self.propose(case, feedback, truth);
        proposal.description = format!(
            "Exception to {} ({}): {}",
            parent.id,
            parent.condition,
            truncate(&case.claim, 80)
        );
        proposal
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
