//! Claim extraction: splitting input text into atomic checkable claims.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use truthloop_core::TruthloopResult;
use truthloop_playbook::content_terms;

static CLAUSE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i),?\s+(?:but|whereas|while)\s+").expect("Invalid clause regex"));

/// Extracts the checkable claims contained in a piece of text.
#[async_trait]
pub trait ClaimExtractor: Send + Sync {
    /// Claims in input order. An empty result means nothing is checkable.
    async fn extract(&self, text: &str) -> TruthloopResult<Vec<String>>;

    fn name(&self) -> &str;
}

/// Sentence and clause splitter.
///
/// Keeps segments with at least `min_terms` content words that are not
/// questions. Falls back to the whole text when it has no sentence breaks.
#[derive(Debug, Clone)]
pub struct HeuristicExtractor {
    min_terms: usize,
}

impl HeuristicExtractor {
    pub fn new(min_terms: usize) -> Self {
        Self { min_terms }
    }

    fn sentences(text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut sentences = Vec::new();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            current.push(c);
            let decimal_point = c == '.'
                && i > 0
                && chars[i - 1].is_ascii_digit()
                && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
            if matches!(c, '.' | '!' | '?' | ';' | '\n') && !decimal_point {
                sentences.push(std::mem::take(&mut current));
            }
        }
        sentences.push(current);
        sentences
    }

    /// Pure splitting logic behind [`ClaimExtractor::extract`].
    pub fn split(&self, text: &str) -> Vec<String> {
        let mut claims: Vec<String> = Vec::new();
        for sentence in Self::sentences(text) {
            let sentence = sentence.trim();
            if sentence.is_empty() || sentence.ends_with('?') {
                continue;
            }
            for clause in CLAUSE_SPLIT.split(sentence) {
                let clause = clause
                    .trim()
                    .trim_end_matches(|c: char| matches!(c, '.' | '!' | ';'))
                    .trim();
                if content_terms(clause).len() >= self.min_terms
                    && !claims.iter().any(|c| c == clause)
                {
                    claims.push(clause.to_string());
                }
            }
        }
        claims
    }
}

#[async_trait]
impl ClaimExtractor for HeuristicExtractor {
    async fn extract(&self, text: &str) -> TruthloopResult<Vec<String>> {
        Ok(self.split(text))
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_claim() {
        let extractor = HeuristicExtractor::new(2);
        assert_eq!(
            extractor.split("The Eiffel Tower is in Berlin."),
            vec!["The Eiffel Tower is in Berlin".to_string()]
        );
    }

    #[test]
    fn test_splits_sentences_and_clauses() {
        let extractor = HeuristicExtractor::new(2);
        let claims = extractor.split(
            "Unemployment fell to 3.5% last year. Wages rose sharply, but prices doubled!",
        );
        assert_eq!(
            claims,
            vec![
                "Unemployment fell to 3.5% last year".to_string(),
                "Wages rose sharply".to_string(),
                "prices doubled".to_string(),
            ]
        );
    }

    #[test]
    fn test_drops_questions_and_short_fragments() {
        let extractor = HeuristicExtractor::new(2);
        assert!(extractor.split("Is the moon made of cheese?").is_empty());
        assert!(extractor.split("Yes. No.").is_empty());
        assert!(extractor.split("").is_empty());
    }

    #[test]
    fn test_duplicates_removed() {
        let extractor = HeuristicExtractor::new(2);
        assert_eq!(
            extractor.split("Vaccines cause autism. Vaccines cause autism.").len(),
            1
        );
    }
}
