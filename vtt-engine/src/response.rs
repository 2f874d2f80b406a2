//! Response records collected during a session.
//!
//! A session runs in one [`EvaluationMode`] and produces one
//! [`ResponseRecord`] per presented item. Items that failed to load are
//! recorded too, as error-typed records, so the log always covers the whole
//! sequence.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pool::{ImageClass, ImageItem};
use crate::types::{ItemId, RaterId};

/// Lowest level of the ordinal rating scale.
pub const SCORE_MIN: u8 = 1;
/// Highest level of the ordinal rating scale.
pub const SCORE_MAX: u8 = 5;

const UNKNOWN_ERROR: &str = "unknown error";

/// What a rater is asked to do with each item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Decide whether each image is real or synthetic.
    Classification,
    /// Score each listed feature on the 1..=5 scale.
    Rating { features: Vec<String> },
}

impl EvaluationMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Rating { .. } => "rating",
        }
    }
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A score on the ordinal rating scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Score(u8);

impl Score {
    /// Build a score, returning `None` outside `SCORE_MIN..=SCORE_MAX`.
    pub fn new(value: i64) -> Option<Self> {
        (i64::from(SCORE_MIN)..=i64::from(SCORE_MAX))
            .contains(&value)
            .then(|| Self(value as u8))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Score {
    type Error = String;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("score {value} outside {SCORE_MIN}..={SCORE_MAX}"))
    }
}

impl From<Score> for u8 {
    fn from(score: Score) -> Self {
        score.0
    }
}

/// What the rater submitted for the current item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    Classification { chosen: ImageClass },
    Rating { scores: BTreeMap<String, i64> },
}

impl ResponsePayload {
    pub fn classify(chosen: ImageClass) -> Self {
        Self::Classification { chosen }
    }

    pub fn rate<I, K>(scores: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        Self::Rating {
            scores: scores.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// A real-vs-synthetic decision on one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResponse {
    pub rater_id: RaterId,
    pub item_id: ItemId,
    pub item_index: usize,
    pub true_class: Option<ImageClass>,
    /// `None` when the item could not be shown
    pub chosen_class: Option<ImageClass>,
    pub correct: bool,
    /// Load/display failure that replaced the rater's answer
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Ordinal scores for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingResponse {
    pub rater_id: RaterId,
    pub item_id: ItemId,
    pub item_index: usize,
    /// Empty when the item could not be shown
    pub scores: BTreeMap<String, Score>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One immutable row of a session's result log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseRecord {
    Classification(ClassificationResponse),
    Rating(RatingResponse),
}

impl ResponseRecord {
    /// Build a record for `item` from a rater's payload, validated against `mode`.
    pub fn from_payload(
        mode: &EvaluationMode,
        rater_id: &RaterId,
        item: &ImageItem,
        item_index: usize,
        payload: ResponsePayload,
    ) -> Result<Self> {
        let timestamp = Utc::now();
        match (mode, payload) {
            (EvaluationMode::Classification, ResponsePayload::Classification { chosen }) => {
                Ok(Self::Classification(ClassificationResponse {
                    rater_id: rater_id.clone(),
                    item_id: item.id.clone(),
                    item_index,
                    true_class: item.true_class,
                    chosen_class: Some(chosen),
                    correct: item.true_class == Some(chosen),
                    error: None,
                    timestamp,
                }))
            }
            (EvaluationMode::Rating { features }, ResponsePayload::Rating { scores }) => {
                Ok(Self::Rating(RatingResponse {
                    rater_id: rater_id.clone(),
                    item_id: item.id.clone(),
                    item_index,
                    scores: validate_scores(features, scores)?,
                    error: None,
                    timestamp,
                }))
            }
            (mode, _) => Err(Error::ModeMismatch(mode.name())),
        }
    }

    /// Build the error-typed record for an item that could not be shown.
    ///
    /// A blank message is stored as `"unknown error"` so the record stays an
    /// error record once written to the log.
    pub fn item_error(
        mode: &EvaluationMode,
        rater_id: &RaterId,
        item: &ImageItem,
        item_index: usize,
        error: impl Into<String>,
    ) -> Self {
        let timestamp = Utc::now();
        let mut error = error.into();
        if error.trim().is_empty() {
            error = UNKNOWN_ERROR.to_string();
        }
        let error = Some(error);
        match mode {
            EvaluationMode::Classification => Self::Classification(ClassificationResponse {
                rater_id: rater_id.clone(),
                item_id: item.id.clone(),
                item_index,
                true_class: item.true_class,
                chosen_class: None,
                correct: false,
                error,
                timestamp,
            }),
            EvaluationMode::Rating { .. } => Self::Rating(RatingResponse {
                rater_id: rater_id.clone(),
                item_id: item.id.clone(),
                item_index,
                scores: BTreeMap::new(),
                error,
                timestamp,
            }),
        }
    }

    pub fn rater_id(&self) -> &RaterId {
        match self {
            Self::Classification(r) => &r.rater_id,
            Self::Rating(r) => &r.rater_id,
        }
    }

    pub fn item_id(&self) -> &ItemId {
        match self {
            Self::Classification(r) => &r.item_id,
            Self::Rating(r) => &r.item_id,
        }
    }

    pub fn item_index(&self) -> usize {
        match self {
            Self::Classification(r) => r.item_index,
            Self::Rating(r) => r.item_index,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Classification(r) => r.timestamp,
            Self::Rating(r) => r.timestamp,
        }
    }

    /// The load/display error, if this record stands in for a failed item.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Classification(r) => r.error.as_deref(),
            Self::Rating(r) => r.error.as_deref(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error().is_some()
    }
}

fn validate_scores(
    features: &[String],
    scores: BTreeMap<String, i64>,
) -> Result<BTreeMap<String, Score>> {
    if let Some(unknown) = scores.keys().find(|k| !features.contains(k)) {
        return Err(Error::UnknownFeature(unknown.clone()));
    }

    let mut validated = BTreeMap::new();
    for feature in features {
        let value = *scores
            .get(feature)
            .ok_or_else(|| Error::MissingScore(feature.clone()))?;
        let score = Score::new(value).ok_or_else(|| Error::InvalidScore {
            feature: feature.clone(),
            score: value,
        })?;
        validated.insert(feature.clone(), score);
    }
    Ok(validated)
}
