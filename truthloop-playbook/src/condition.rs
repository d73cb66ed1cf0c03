//! Rule condition language.
//!
//! ```text
//! condition := ["IF"] clause ("AND" clause)*
//! clause    := "ALWAYS" | "*" | key "=" value | "contains(" phrase ")" | phrase
//! ```
//!
//! Keywords are case-insensitive. A phrase clause holds when every content
//! word of the phrase is a claim term; `key=value` clauses compare against
//! claim attributes (see [`crate::ATTRIBUTE_KEYS`]).

use crate::features::{content_terms, ClaimFeatures};
use once_cell::sync::Lazy;
use regex::Regex;

static AND_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+and\s+").expect("Invalid AND regex"));
static IF_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^if\s+").expect("Invalid IF regex"));
static CONTAINS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^contains\s*\((.*)\)$").expect("Invalid contains regex"));

/// Why a condition string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid condition: {0}")]
pub struct ConditionError(pub String);

/// One clause of a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Always,
    Attribute { key: String, value: String },
    Phrase(Vec<String>),
}

impl Clause {
    pub fn is_satisfied(&self, features: &ClaimFeatures) -> bool {
        match self {
            Clause::Always => true,
            Clause::Attribute { key, value } => features.attribute(key) == Some(value.as_str()),
            Clause::Phrase(words) => words.iter().all(|word| features.has_term(word)),
        }
    }
}

/// A parsed condition: a conjunction of clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    clauses: Vec<Clause>,
}

impl Condition {
    pub fn parse(text: &str) -> Result<Self, ConditionError> {
        let trimmed = text.trim();
        let body = IF_PREFIX.replace(trimmed, "");
        let body = body.trim();
        if body.is_empty() {
            return Err(ConditionError("empty condition".to_string()));
        }

        let clauses = AND_SPLIT
            .split(body)
            .map(parse_clause)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { clauses })
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Fraction of clauses the claim satisfies, in `[0, 1]`.
    pub fn strength(&self, features: &ClaimFeatures) -> f64 {
        if self.clauses.is_empty() {
            return 0.0;
        }
        let satisfied = self
            .clauses
            .iter()
            .filter(|clause| clause.is_satisfied(features))
            .count();
        satisfied as f64 / self.clauses.len() as f64
    }
}

fn parse_clause(raw: &str) -> Result<Clause, ConditionError> {
    let clause = raw.trim();
    if clause.is_empty() {
        return Err(ConditionError("empty clause".to_string()));
    }
    if clause == "*" || clause.eq_ignore_ascii_case("always") {
        return Ok(Clause::Always);
    }
    if let Some((key, value)) = clause.split_once('=') {
        let key = key.trim().to_lowercase();
        let value = value.trim().trim_matches('"').to_lowercase();
        if key.is_empty() || value.is_empty() {
            return Err(ConditionError(format!("incomplete attribute clause '{clause}'")));
        }
        return Ok(Clause::Attribute { key, value });
    }
    let phrase = match CONTAINS.captures(clause) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or_default().to_string(),
        None => clause.to_string(),
    };
    let words = content_terms(&phrase);
    if words.is_empty() {
        return Err(ConditionError(format!(
            "clause '{clause}' has no content words"
        )));
    }
    Ok(Clause::Phrase(words))
}
