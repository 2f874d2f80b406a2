//! Metrics computed from result logs.
//!
//! - [`classification`] - accuracy, sensitivity and specificity of one rater
//! - [`agreement`] - per-feature rating summaries and inter-rater kappa

mod agreement;
mod classification;

pub use agreement::{
    FeatureAgreement, FeatureSummary, KappaBand, LEVELS, RatingAgreement, RatingSummary,
    ScoreDistribution, rating_agreement, rating_summary, weighted_kappa,
};
pub use classification::{ClassificationMetrics, ConfusionCounts, classification_metrics};

/// Format a ratio in `0.0..=1.0` as a percentage, `n/a` when undefined.
pub fn percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}%", v * 100.0),
        None => "n/a".to_string(),
    }
}
