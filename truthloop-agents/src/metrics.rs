//! Evaluation metrics over labelled verifications.

use serde::{Deserialize, Serialize};
use truthloop_core::Outcome;

/// Confusion counts with `True` as the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionCounts {
    pub fn record(&mut self, actual: Outcome, predicted: Outcome) {
        match (actual, predicted) {
            (Outcome::True, Outcome::True) => self.true_positive += 1,
            (Outcome::False, Outcome::True) => self.false_positive += 1,
            (Outcome::False, Outcome::False) => self.true_negative += 1,
            (Outcome::True, Outcome::False) => self.false_negative += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }
}

/// Precision, recall and F1 for one class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of labelled items of this class.
    pub support: usize,
}

impl ClassMetrics {
    fn from_counts(hit: usize, false_alarm: usize, miss: usize) -> Self {
        let precision = ratio(hit, hit + false_alarm);
        let recall = ratio(hit, hit + miss);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
            support: hit + miss,
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Accuracy and per-class scores of a labelled evaluation run.
///
/// Items whose verification failed are counted in `failed` and left out of
/// every ratio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub total: usize,
    pub evaluated: usize,
    pub failed: usize,
    pub accuracy: f64,
    pub true_class: ClassMetrics,
    pub false_class: ClassMetrics,
    pub confusion: ConfusionCounts,
}

impl EvaluationMetrics {
    /// Build metrics from `(label, prediction)` pairs; `None` marks a failed item.
    pub fn from_predictions(items: impl IntoIterator<Item = (Outcome, Option<Outcome>)>) -> Self {
        let mut confusion = ConfusionCounts::default();
        let mut failed = 0;
        for (actual, predicted) in items {
            match predicted {
                Some(predicted) => confusion.record(actual, predicted),
                None => failed += 1,
            }
        }
        let c = confusion;
        let evaluated = c.total();
        Self {
            total: evaluated + failed,
            evaluated,
            failed,
            accuracy: ratio(c.true_positive + c.true_negative, evaluated),
            true_class: ClassMetrics::from_counts(c.true_positive, c.false_positive, c.false_negative),
            false_class: ClassMetrics::from_counts(c.true_negative, c.false_negative, c.false_positive),
            confusion,
        }
    }

    /// Mean F1 over both classes.
    pub fn macro_f1(&self) -> f64 {
        (self.true_class.f1 + self.false_class.f1) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_from_mixed_predictions() {
        let metrics = EvaluationMetrics::from_predictions(vec![
            (Outcome::True, Some(Outcome::True)),
            (Outcome::True, Some(Outcome::False)),
            (Outcome::False, Some(Outcome::False)),
            (Outcome::False, Some(Outcome::False)),
            (Outcome::False, None),
        ]);
        assert_eq!(metrics.total, 5);
        assert_eq!(metrics.evaluated, 4);
        assert_eq!(metrics.failed, 1);
        assert!((metrics.accuracy - 0.75).abs() < 1e-12);

        assert_eq!(metrics.true_class.precision, 1.0);
        assert_eq!(metrics.true_class.recall, 0.5);
        assert_eq!(metrics.true_class.support, 2);
        assert!((metrics.false_class.precision - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(metrics.false_class.recall, 1.0);
        assert_eq!(metrics.false_class.support, 2);
    }

    #[test]
    fn test_empty_metrics_are_zero() {
        let metrics = EvaluationMetrics::from_predictions(Vec::new());
        assert_eq!(metrics.accuracy, 0.0);
        assert_eq!(metrics.macro_f1(), 0.0);
    }
}
