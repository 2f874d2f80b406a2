//! Binary classification metrics over a classification log.
//!
//! `Real` is the positive class. Error-typed records (items that could not
//! be shown) are counted separately and excluded from every denominator.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pool::ImageClass;
use crate::response::ResponseRecord;

/// Confusion matrix with `Real` as the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    /// real judged real
    pub true_positive: usize,
    /// real judged synthetic
    pub false_negative: usize,
    /// synthetic judged synthetic
    pub true_negative: usize,
    /// synthetic judged real
    pub false_positive: usize,
}

impl ConfusionCounts {
    fn add(&mut self, truth: ImageClass, chosen: ImageClass) {
        match (truth, chosen) {
            (ImageClass::Real, ImageClass::Real) => self.true_positive += 1,
            (ImageClass::Real, ImageClass::Synthetic) => self.false_negative += 1,
            (ImageClass::Synthetic, ImageClass::Synthetic) => self.true_negative += 1,
            (ImageClass::Synthetic, ImageClass::Real) => self.false_positive += 1,
        }
    }
}

/// Accuracy, sensitivity and specificity of one rater.
///
/// Ratios are `None` when their denominator is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    /// Answered items (error records excluded)
    pub total: usize,
    pub correct: usize,
    pub errors: usize,
    pub confusion: ConfusionCounts,
    pub accuracy: Option<f64>,
    pub sensitivity: Option<f64>,
    pub specificity: Option<f64>,
}

/// Compute classification metrics from a log.
///
/// Fails with [`Error::ModeMismatch`] if the log holds rating records.
pub fn classification_metrics(records: &[ResponseRecord]) -> Result<ClassificationMetrics> {
    let mut total = 0;
    let mut correct = 0;
    let mut errors = 0;
    let mut confusion = ConfusionCounts::default();

    for record in records {
        let ResponseRecord::Classification(r) = record else {
            return Err(Error::ModeMismatch("classification"));
        };
        if r.error.is_some() {
            errors += 1;
            continue;
        }

        total += 1;
        if r.correct {
            correct += 1;
        }
        if let (Some(truth), Some(chosen)) = (r.true_class, r.chosen_class) {
            confusion.add(truth, chosen);
        }
    }

    Ok(ClassificationMetrics {
        total,
        correct,
        errors,
        confusion,
        accuracy: ratio(correct, total),
        sensitivity: ratio(
            confusion.true_positive,
            confusion.true_positive + confusion.false_negative,
        ),
        specificity: ratio(
            confusion.true_negative,
            confusion.true_negative + confusion.false_positive,
        ),
    })
}

fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}
