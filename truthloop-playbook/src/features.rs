//! Claim features: the term set and attributes rule conditions are evaluated against.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}%']+").expect("Invalid word regex"));
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").expect("Invalid number regex"));
static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").expect("Invalid URL regex"));

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "and", "or", "but", "if", "then", "of", "to", "in", "on", "at", "by",
        "for", "with", "from", "as", "is", "are", "was", "were", "be", "been", "being", "it",
        "its", "this", "that", "these", "those", "he", "she", "they", "we", "you", "i", "his",
        "her", "their", "our", "your", "my", "has", "have", "had", "do", "does", "did", "not",
        "no", "so", "than", "too", "very", "can", "will", "would", "should", "could", "may",
        "might", "about", "into", "over", "after", "before", "which", "who", "whom", "what",
        "when", "where", "why", "how", "all", "none", "every", "always", "never", "there",
        "here", "just", "also", "only", "s", "'s",
    ]
    .into_iter()
    .collect()
});

const ABSOLUTE_WORDS: &[&str] = &["always", "never", "all", "none", "every", "100%"];

/// Attribute keys exposed to `key=value` condition clauses.
pub const ATTRIBUTE_KEYS: &[&str] = &[
    "has_number",
    "has_url",
    "has_quote",
    "absolute_language",
    "length",
];

/// Lowercase word tokens of `text`, stopwords included.
pub fn tokenize(text: &str) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().trim_matches('\'').to_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

/// Tokens of `text` with stopwords removed, in order, duplicates kept.
pub fn content_terms(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|token| !is_stopword(token))
        .collect()
}

/// Features extracted from one claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimFeatures {
    text: String,
    ordered_terms: Vec<String>,
    terms: BTreeSet<String>,
    attributes: BTreeMap<&'static str, String>,
}

impl ClaimFeatures {
    pub fn extract(claim: &str) -> Self {
        let tokens = tokenize(claim);
        let absolute = tokens
            .iter()
            .any(|token| ABSOLUTE_WORDS.contains(&token.as_str()));

        let mut ordered_terms = Vec::new();
        let mut terms = BTreeSet::new();
        let mut content_count = 0usize;
        for token in tokens.into_iter().filter(|t| !is_stopword(t)) {
            content_count += 1;
            if terms.insert(token.clone()) {
                ordered_terms.push(token);
            }
        }

        let length = match content_count {
            0..=7 => "short",
            8..=19 => "medium",
            _ => "long",
        };
        let has_quote = claim.contains('"')
            || claim.contains('\u{201c}')
            || claim.contains('\u{201d}')
            || claim.contains('\u{ab}');

        let mut attributes = BTreeMap::new();
        attributes.insert("has_number", NUMBER.is_match(claim).to_string());
        attributes.insert("has_url", URL.is_match(claim).to_string());
        attributes.insert("has_quote", has_quote.to_string());
        attributes.insert("absolute_language", absolute.to_string());
        attributes.insert("length", length.to_string());

        Self {
            text: claim.to_string(),
            ordered_terms,
            terms,
            attributes,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn terms(&self) -> &BTreeSet<String> {
        &self.terms
    }

    pub fn has_term(&self, term: &str) -> bool {
        self.terms.contains(term)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.attributes.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Up to `n` most salient terms: longest first, then first occurrence.
    pub fn salient_terms(&self, n: usize) -> Vec<&str> {
        let mut ranked: Vec<(usize, &String)> = self.ordered_terms.iter().enumerate().collect();
        ranked.sort_by(|(ia, a), (ib, b)| b.chars().count().cmp(&a.chars().count()).then(ia.cmp(ib)));
        ranked
            .into_iter()
            .filter(|(_, term)| term.chars().count() > 2 && !term.chars().all(|c| c.is_numeric()))
            .take(n)
            .map(|(_, term)| term.as_str())
            .collect()
    }
}
