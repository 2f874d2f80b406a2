//! Ordinal rating statistics: per-feature summaries of one log, and
//! linear-weighted Cohen's kappa between two raters.
//!
//! Categories are the fixed score levels `SCORE_MIN..=SCORE_MAX`, so the
//! weight of a disagreement depends on the distance between levels, not on
//! which levels happen to appear in the data.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::response::{EvaluationMode, RatingResponse, ResponseRecord, SCORE_MAX, SCORE_MIN, Score};
use crate::store::DecodedLog;
use crate::types::{ItemId, RaterId};

/// Number of ordinal levels.
pub const LEVELS: usize = (SCORE_MAX - SCORE_MIN + 1) as usize;

/// Linear-weighted Cohen's kappa over paired scores.
///
/// Uses agreement weights `w_ij = 1 - |i - j| / (k - 1)`. Returns `None`
/// for no pairs. When chance agreement is already perfect the ratio is
/// undefined; that case yields 1.0 if observed agreement is also perfect
/// and 0.0 otherwise.
pub fn weighted_kappa(pairs: &[(Score, Score)]) -> Option<f64> {
    if pairs.is_empty() {
        return None;
    }

    let mut observed = [[0_u64; LEVELS]; LEVELS];
    let mut rows = [0_u64; LEVELS];
    let mut cols = [0_u64; LEVELS];
    for (a, b) in pairs {
        let (i, j) = (level(*a), level(*b));
        observed[i][j] += 1;
        rows[i] += 1;
        cols[j] += 1;
    }

    // Weights scaled by `k - 1` keep every sum an integer; po and pe are
    // both expressed over the common denominator `(k - 1) * n^2`.
    let n = pairs.len() as u128;
    let span = (LEVELS - 1) as u128;
    let mut po = 0_u128;
    let mut pe = 0_u128;
    for i in 0..LEVELS {
        for j in 0..LEVELS {
            let w = span - i.abs_diff(j) as u128;
            po += w * u128::from(observed[i][j]) * n;
            pe += w * u128::from(rows[i]) * u128::from(cols[j]);
        }
    }
    let whole = span * n * n;

    if pe == whole {
        return Some(if po == whole { 1.0 } else { 0.0 });
    }
    Some((po as f64 - pe as f64) / (whole - pe) as f64)
}

fn level(score: Score) -> usize {
    usize::from(score.get() - SCORE_MIN)
}

/// Conventional reading of a kappa value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KappaBand {
    Weak,
    Moderate,
    Good,
    VeryGood,
}

impl KappaBand {
    /// `< 0.4` weak, `< 0.6` moderate, `<= 0.8` good, above that very good.
    pub fn from_kappa(kappa: f64) -> Self {
        if kappa < 0.4 {
            Self::Weak
        } else if kappa < 0.6 {
            Self::Moderate
        } else if kappa <= 0.8 {
            Self::Good
        } else {
            Self::VeryGood
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Weak => "weak",
            Self::Moderate => "moderate",
            Self::Good => "good",
            Self::VeryGood => "very good",
        }
    }
}

impl fmt::Display for KappaBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Count and share of each score level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDistribution {
    /// Index 0 is `SCORE_MIN`
    pub counts: [usize; LEVELS],
    /// Percentages of the total, 0.0 when there are no scores
    pub percentages: [f64; LEVELS],
}

impl ScoreDistribution {
    pub fn from_scores(scores: impl IntoIterator<Item = Score>) -> Self {
        let mut counts = [0; LEVELS];
        for score in scores {
            counts[level(score)] += 1;
        }
        let total: usize = counts.iter().sum();
        let percentages = counts.map(|c| {
            if total == 0 {
                0.0
            } else {
                c as f64 * 100.0 / total as f64
            }
        });
        Self {
            counts,
            percentages,
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

/// Per-feature statistics for a single rater.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub feature: String,
    pub mean: Option<f64>,
    pub distribution: ScoreDistribution,
}

/// Summary of one rating log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub rated: usize,
    pub errors: usize,
    pub features: Vec<FeatureSummary>,
}

/// Summarise a single rater's scores per feature.
pub fn rating_summary(features: &[String], records: &[ResponseRecord]) -> Result<RatingSummary> {
    let rated = rating_records(records)?;
    let answered: Vec<&RatingResponse> = rated.iter().copied().filter(|r| r.error.is_none()).collect();

    let features = features
        .iter()
        .map(|feature| {
            let scores: Vec<Score> = answered
                .iter()
                .filter_map(|r| r.scores.get(feature).copied())
                .collect();
            FeatureSummary {
                feature: feature.clone(),
                mean: mean(&scores),
                distribution: ScoreDistribution::from_scores(scores),
            }
        })
        .collect();

    Ok(RatingSummary {
        rated: answered.len(),
        errors: rated.len() - answered.len(),
        features,
    })
}

/// Agreement between two raters on one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAgreement {
    pub feature: String,
    pub kappa: Option<f64>,
    pub band: Option<KappaBand>,
    pub mean_a: Option<f64>,
    pub mean_b: Option<f64>,
    /// Both raters' scores pooled
    pub distribution: ScoreDistribution,
}

/// Agreement between two rating logs over the same items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingAgreement {
    pub rater_a: Option<RaterId>,
    pub rater_b: Option<RaterId>,
    /// Items scored by both raters
    pub compared_items: usize,
    /// Items skipped because either side recorded an error
    pub excluded_items: usize,
    pub features: Vec<FeatureAgreement>,
}

/// Compare two rating logs item by item.
///
/// Both logs must be rating logs over the same feature set and the same
/// item ids, otherwise [`Error::MismatchedSequence`].
pub fn rating_agreement(a: &DecodedLog, b: &DecodedLog) -> Result<RatingAgreement> {
    let features_a = rating_features(&a.mode)?;
    let features_b = rating_features(&b.mode)?;
    if sorted(features_a) != sorted(features_b) {
        return Err(Error::MismatchedSequence(format!(
            "feature sets differ: [{}] vs [{}]",
            features_a.join(", "),
            features_b.join(", ")
        )));
    }

    let by_item_a = index_by_item(&a.records)?;
    let by_item_b = index_by_item(&b.records)?;
    if !by_item_a.keys().eq(by_item_b.keys()) {
        let only_a = by_item_a.keys().filter(|k| !by_item_b.contains_key(*k)).count();
        let only_b = by_item_b.keys().filter(|k| !by_item_a.contains_key(*k)).count();
        return Err(Error::MismatchedSequence(format!(
            "item sets differ: {only_a} only in first log, {only_b} only in second"
        )));
    }

    let mut pairs: Vec<(&RatingResponse, &RatingResponse)> = Vec::new();
    let mut excluded_items = 0;
    for (item, ra) in &by_item_a {
        let rb = by_item_b[item];
        if ra.error.is_some() || rb.error.is_some() {
            excluded_items += 1;
        } else {
            pairs.push((*ra, rb));
        }
    }

    let features = features_a
        .iter()
        .map(|feature| feature_agreement(feature, &pairs))
        .collect::<Result<Vec<_>>>()?;

    Ok(RatingAgreement {
        rater_a: a.records.first().map(|r| r.rater_id().clone()),
        rater_b: b.records.first().map(|r| r.rater_id().clone()),
        compared_items: pairs.len(),
        excluded_items,
        features,
    })
}

fn feature_agreement(
    feature: &str,
    pairs: &[(&RatingResponse, &RatingResponse)],
) -> Result<FeatureAgreement> {
    let mut scored = Vec::with_capacity(pairs.len());
    for (ra, rb) in pairs {
        let score = |r: &RatingResponse| {
            r.scores.get(feature).copied().ok_or_else(|| {
                Error::InvalidData(format!("item {} has no '{feature}' score", r.item_id))
            })
        };
        scored.push((score(ra)?, score(rb)?));
    }

    let scores_a: Vec<Score> = scored.iter().map(|(a, _)| *a).collect();
    let scores_b: Vec<Score> = scored.iter().map(|(_, b)| *b).collect();
    let kappa = weighted_kappa(&scored);

    Ok(FeatureAgreement {
        feature: feature.to_string(),
        kappa,
        band: kappa.map(KappaBand::from_kappa),
        mean_a: mean(&scores_a),
        mean_b: mean(&scores_b),
        distribution: ScoreDistribution::from_scores(scores_a.into_iter().chain(scores_b)),
    })
}

fn rating_features(mode: &EvaluationMode) -> Result<&[String]> {
    match mode {
        EvaluationMode::Rating { features } => Ok(features),
        EvaluationMode::Classification => Err(Error::ModeMismatch("rating")),
    }
}

fn rating_records(records: &[ResponseRecord]) -> Result<Vec<&RatingResponse>> {
    records
        .iter()
        .map(|record| match record {
            ResponseRecord::Rating(r) => Ok(r),
            ResponseRecord::Classification(_) => Err(Error::ModeMismatch("rating")),
        })
        .collect()
}

fn index_by_item(records: &[ResponseRecord]) -> Result<BTreeMap<&ItemId, &RatingResponse>> {
    let mut map = BTreeMap::new();
    for r in rating_records(records)? {
        if map.insert(&r.item_id, r).is_some() {
            return Err(Error::MismatchedSequence(format!(
                "item {} appears more than once",
                r.item_id
            )));
        }
    }
    Ok(map)
}

fn sorted(features: &[String]) -> Vec<&String> {
    let mut v: Vec<&String> = features.iter().collect();
    v.sort();
    v
}

fn mean(scores: &[Score]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let sum: u32 = scores.iter().map(|s| u32::from(s.get())).sum();
    Some(f64::from(sum) / scores.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn s(v: i64) -> Score {
        Score::new(v).unwrap()
    }

    fn rating(rater: &str, item: &str, scores: &[(&str, i64)]) -> ResponseRecord {
        ResponseRecord::Rating(RatingResponse {
            rater_id: RaterId::from(rater),
            item_id: ItemId::from(item),
            item_index: 0,
            scores: scores.iter().map(|(f, v)| (f.to_string(), s(*v))).collect(),
            error: None,
            timestamp: Utc::now(),
        })
    }

    fn failed(rater: &str, item: &str) -> ResponseRecord {
        ResponseRecord::Rating(RatingResponse {
            rater_id: RaterId::from(rater),
            item_id: ItemId::from(item),
            item_index: 0,
            scores: BTreeMap::new(),
            error: Some("not found".into()),
            timestamp: Utc::now(),
        })
    }

    fn log(features: &[&str], records: Vec<ResponseRecord>) -> DecodedLog {
        DecodedLog {
            mode: EvaluationMode::Rating {
                features: features.iter().map(|f| f.to_string()).collect(),
            },
            records,
        }
    }

    #[test]
    fn identical_ratings_have_perfect_kappa() {
        let pairs: Vec<_> = [1, 2, 3, 4, 5, 3, 2].iter().map(|&v| (s(v), s(v))).collect();
        assert_eq!(weighted_kappa(&pairs), Some(1.0));
    }

    #[test]
    fn single_shared_level_is_perfect_agreement() {
        let pairs = vec![(s(3), s(3)); 4];
        assert_eq!(weighted_kappa(&pairs), Some(1.0));
    }

    #[test]
    fn empty_pairs_have_no_kappa() {
        assert_eq!(weighted_kappa(&[]), None);
    }

    #[test]
    fn independent_ratings_have_kappa_near_zero() {
        let mut rng = StdRng::seed_from_u64(42);
        let pairs: Vec<_> = (0..20_000)
            .map(|_| (s(rng.gen_range(1..=5)), s(rng.gen_range(1..=5))))
            .collect();

        let kappa = weighted_kappa(&pairs).unwrap();
        assert!(kappa.abs() < 0.05, "kappa = {kappa}");
    }

    #[test]
    fn near_misses_score_higher_than_far_misses() {
        let near: Vec<_> = [(1, 2), (2, 3), (3, 4), (4, 5), (5, 5), (1, 1)]
            .iter()
            .map(|&(a, b)| (s(a), s(b)))
            .collect();
        let far: Vec<_> = [(1, 5), (2, 5), (3, 1), (4, 1), (5, 5), (1, 1)]
            .iter()
            .map(|&(a, b)| (s(a), s(b)))
            .collect();

        assert!(weighted_kappa(&near).unwrap() > weighted_kappa(&far).unwrap());
    }

    #[test]
    fn kappa_bands() {
        assert_eq!(KappaBand::from_kappa(-0.2), KappaBand::Weak);
        assert_eq!(KappaBand::from_kappa(0.39), KappaBand::Weak);
        assert_eq!(KappaBand::from_kappa(0.4), KappaBand::Moderate);
        assert_eq!(KappaBand::from_kappa(0.6), KappaBand::Good);
        assert_eq!(KappaBand::from_kappa(0.8), KappaBand::Good);
        assert_eq!(KappaBand::from_kappa(0.81), KappaBand::VeryGood);
    }

    #[test]
    fn distribution_percentages() {
        let dist = ScoreDistribution::from_scores([s(1), s(1), s(5), s(3)]);
        assert_eq!(dist.counts, [2, 0, 1, 0, 1]);
        assert_eq!(dist.percentages, [50.0, 0.0, 25.0, 0.0, 25.0]);
        assert_eq!(dist.total(), 4);

        let empty = ScoreDistribution::from_scores([]);
        assert_eq!(empty.percentages, [0.0; LEVELS]);
    }

    #[test]
    fn agreement_joins_on_item_id_and_excludes_errors() {
        let a = log(
            &["realism", "anatomy"],
            vec![
                rating("a", "x.png", &[("realism", 4), ("anatomy", 2)]),
                rating("a", "y.png", &[("realism", 2), ("anatomy", 5)]),
                failed("a", "z.png"),
            ],
        );
        // different order, features listed differently
        let b = log(
            &["anatomy", "realism"],
            vec![
                rating("b", "z.png", &[("realism", 1), ("anatomy", 1)]),
                rating("b", "y.png", &[("realism", 2), ("anatomy", 5)]),
                rating("b", "x.png", &[("realism", 4), ("anatomy", 2)]),
            ],
        );

        let agreement = rating_agreement(&a, &b).unwrap();

        assert_eq!(agreement.compared_items, 2);
        assert_eq!(agreement.excluded_items, 1);
        assert_eq!(agreement.rater_a, Some(RaterId::from("a")));
        assert_eq!(agreement.rater_b, Some(RaterId::from("b")));
        let realism = &agreement.features[0];
        assert_eq!(realism.feature, "realism");
        assert_eq!(realism.kappa, Some(1.0));
        assert_eq!(realism.band, Some(KappaBand::VeryGood));
        assert_eq!(realism.mean_a, Some(3.0));
        assert_eq!(realism.distribution.total(), 4);
    }

    #[test]
    fn differing_items_are_mismatched() {
        let a = log(&["realism"], vec![rating("a", "x.png", &[("realism", 4)])]);
        let b = log(&["realism"], vec![rating("b", "y.png", &[("realism", 4)])]);

        let err = rating_agreement(&a, &b).unwrap_err();
        assert!(matches!(err, Error::MismatchedSequence(_)));
    }

    #[test]
    fn differing_features_are_mismatched() {
        let a = log(&["realism"], vec![rating("a", "x.png", &[("realism", 4)])]);
        let b = log(&["sharpness"], vec![rating("b", "x.png", &[("sharpness", 4)])]);

        let err = rating_agreement(&a, &b).unwrap_err();
        assert!(matches!(err, Error::MismatchedSequence(_)));
    }

    #[test]
    fn duplicate_items_are_mismatched() {
        let a = log(
            &["realism"],
            vec![
                rating("a", "x.png", &[("realism", 4)]),
                rating("a", "x.png", &[("realism", 3)]),
            ],
        );
        let b = log(&["realism"], vec![rating("b", "x.png", &[("realism", 4)])]);

        assert!(matches!(
            rating_agreement(&a, &b),
            Err(Error::MismatchedSequence(_))
        ));
    }

    #[test]
    fn classification_log_is_rejected() {
        let a = DecodedLog {
            mode: EvaluationMode::Classification,
            records: Vec::new(),
        };
        let b = log(&["realism"], Vec::new());

        assert!(matches!(
            rating_agreement(&a, &b),
            Err(Error::ModeMismatch("rating"))
        ));
    }

    #[test]
    fn summary_skips_error_records() {
        let records = vec![
            rating("a", "x.png", &[("realism", 5)]),
            rating("a", "y.png", &[("realism", 2)]),
            failed("a", "z.png"),
        ];

        let summary = rating_summary(&["realism".to_string()], &records).unwrap();

        assert_eq!(summary.rated, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.features[0].mean, Some(3.5));
        assert_eq!(summary.features[0].distribution.counts, [0, 1, 0, 0, 1]);
    }

    #[test]
    fn identical_uneven_ratings_are_exactly_one() {
        let scores = [3, 1, 4, 1, 5, 2];
        let pairs: Vec<_> = scores.iter().map(|v| (s(*v), s(*v))).collect();

        assert_eq!(weighted_kappa(&pairs), Some(1.0));
    }

    proptest! {
        #[test]
        fn identical_scores_always_give_kappa_one(scores in prop::collection::vec(1_i64..=5, 1..200)) {
            let pairs: Vec<_> = scores.iter().map(|v| (s(*v), s(*v))).collect();
            prop_assert_eq!(weighted_kappa(&pairs), Some(1.0));

            let records: Vec<_> = scores
                .iter()
                .enumerate()
                .map(|(i, v)| rating("a", &format!("{i}.png"), &[("realism", *v)]))
                .collect();
            let a = log(&["realism"], records.clone());
            let b = log(&["realism"], records);
            let agreement = rating_agreement(&a, &b).unwrap();
            prop_assert_eq!(agreement.features[0].kappa, Some(1.0));
        }
    }
}
