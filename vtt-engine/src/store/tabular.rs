//! CSV encoding of result logs.
//!
//! One row per [`ResponseRecord`]. The header identifies the mode:
//!
//! - classification: `rater_id,item_id,item_index,true_class,chosen_class,correct,error,timestamp`
//! - rating: `rater_id,item_id,item_index,error,timestamp,score_<feature>...`
//!
//! Absent optional values are written as empty cells. Timestamps use
//! RFC 3339 with as many fractional digits as needed, so a log read back
//! reproduces every field exactly.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use csv::{ReaderBuilder, StringRecord, Writer};

use crate::error::{Error, Result};
use crate::pool::ImageClass;
use crate::response::{
    ClassificationResponse, EvaluationMode, RatingResponse, ResponseRecord, Score,
};
use crate::types::{ItemId, RaterId};

const CLASSIFICATION_HEADER: &[&str] = &[
    "rater_id",
    "item_id",
    "item_index",
    "true_class",
    "chosen_class",
    "correct",
    "error",
    "timestamp",
];

const RATING_FIXED_HEADER: &[&str] = &["rater_id", "item_id", "item_index", "error", "timestamp"];

const SCORE_PREFIX: &str = "score_";

/// A result log read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLog {
    pub mode: EvaluationMode,
    pub records: Vec<ResponseRecord>,
}

/// Encode a full log for `mode` as CSV bytes.
pub fn encode_log(mode: &EvaluationMode, records: &[ResponseRecord]) -> Result<Vec<u8>> {
    let mut writer = Writer::from_writer(Vec::new());

    match mode {
        EvaluationMode::Classification => {
            writer.write_record(CLASSIFICATION_HEADER)?;
            for record in records {
                let ResponseRecord::Classification(r) = record else {
                    return Err(Error::ModeMismatch(mode.name()));
                };
                writer.write_record([
                    r.rater_id.as_str(),
                    r.item_id.as_str(),
                    r.item_index.to_string().as_str(),
                    r.true_class.map(|c| c.as_str()).unwrap_or_default(),
                    r.chosen_class.map(|c| c.as_str()).unwrap_or_default(),
                    if r.correct { "true" } else { "false" },
                    r.error.as_deref().unwrap_or_default(),
                    format_timestamp(r.timestamp).as_str(),
                ])?;
            }
        }
        EvaluationMode::Rating { features } => {
            let mut header: Vec<String> =
                RATING_FIXED_HEADER.iter().map(|h| h.to_string()).collect();
            header.extend(features.iter().map(|f| format!("{SCORE_PREFIX}{f}")));
            writer.write_record(&header)?;

            for record in records {
                let ResponseRecord::Rating(r) = record else {
                    return Err(Error::ModeMismatch(mode.name()));
                };
                let mut row = vec![
                    r.rater_id.0.clone(),
                    r.item_id.0.clone(),
                    r.item_index.to_string(),
                    r.error.clone().unwrap_or_default(),
                    format_timestamp(r.timestamp),
                ];
                row.extend(features.iter().map(|f| {
                    r.scores
                        .get(f)
                        .map(|s| s.get().to_string())
                        .unwrap_or_default()
                }));
                writer.write_record(&row)?;
            }
        }
    }

    writer.into_inner().map_err(|e| Error::Io(e.into_error()))
}

/// Decode CSV bytes produced by [`encode_log`].
pub fn decode_log(bytes: &[u8]) -> Result<DecodedLog> {
    let mut reader = ReaderBuilder::new().from_reader(bytes);
    let header = reader.headers()?.clone();
    let columns: Vec<&str> = header.iter().collect();

    if columns == CLASSIFICATION_HEADER {
        let mut records = Vec::new();
        for row in reader.records() {
            records.push(decode_classification(&row?)?);
        }
        return Ok(DecodedLog {
            mode: EvaluationMode::Classification,
            records,
        });
    }

    if columns.len() >= RATING_FIXED_HEADER.len()
        && columns[..RATING_FIXED_HEADER.len()] == *RATING_FIXED_HEADER
    {
        let features = columns[RATING_FIXED_HEADER.len()..]
            .iter()
            .map(|c| {
                c.strip_prefix(SCORE_PREFIX)
                    .map(str::to_string)
                    .ok_or_else(|| Error::InvalidData(format!("unexpected column: {c}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut records = Vec::new();
        for row in reader.records() {
            records.push(decode_rating(&row?, &features)?);
        }
        return Ok(DecodedLog {
            mode: EvaluationMode::Rating { features },
            records,
        });
    }

    Err(Error::InvalidData(format!(
        "unrecognised result log header: {}",
        columns.join(",")
    )))
}

/// Read and decode a result log file.
pub async fn read_log(path: &Path) -> Result<DecodedLog> {
    let bytes = tokio::fs::read(path).await?;
    decode_log(&bytes)
}

fn decode_classification(row: &StringRecord) -> Result<ResponseRecord> {
    Ok(ResponseRecord::Classification(ClassificationResponse {
        rater_id: RaterId(cell(row, 0)?.to_string()),
        item_id: ItemId(cell(row, 1)?.to_string()),
        item_index: parse_index(cell(row, 2)?)?,
        true_class: parse_class(cell(row, 3)?)?,
        chosen_class: parse_class(cell(row, 4)?)?,
        correct: match cell(row, 5)? {
            "true" => true,
            "false" => false,
            other => return Err(Error::InvalidData(format!("invalid correct flag: {other}"))),
        },
        error: optional(cell(row, 6)?),
        timestamp: parse_timestamp(cell(row, 7)?)?,
    }))
}

fn decode_rating(row: &StringRecord, features: &[String]) -> Result<ResponseRecord> {
    let mut scores = BTreeMap::new();
    for (offset, feature) in features.iter().enumerate() {
        let raw = cell(row, RATING_FIXED_HEADER.len() + offset)?;
        if raw.is_empty() {
            continue;
        }
        let value: i64 = raw
            .parse()
            .map_err(|_| Error::InvalidData(format!("invalid score: {raw}")))?;
        let score = Score::new(value).ok_or_else(|| Error::InvalidScore {
            feature: feature.clone(),
            score: value,
        })?;
        scores.insert(feature.clone(), score);
    }

    Ok(ResponseRecord::Rating(RatingResponse {
        rater_id: RaterId(cell(row, 0)?.to_string()),
        item_id: ItemId(cell(row, 1)?.to_string()),
        item_index: parse_index(cell(row, 2)?)?,
        scores,
        error: optional(cell(row, 3)?),
        timestamp: parse_timestamp(cell(row, 4)?)?,
    }))
}

fn cell(row: &StringRecord, index: usize) -> Result<&str> {
    row.get(index)
        .ok_or_else(|| Error::InvalidData(format!("missing column {index}")))
}

fn optional(raw: &str) -> Option<String> {
    (!raw.is_empty()).then(|| raw.to_string())
}

fn parse_index(raw: &str) -> Result<usize> {
    raw.parse()
        .map_err(|_| Error::InvalidData(format!("invalid item index: {raw}")))
}

fn parse_class(raw: &str) -> Result<Option<ImageClass>> {
    if raw.is_empty() {
        return Ok(None);
    }
    ImageClass::parse(raw)
        .map(Some)
        .ok_or_else(|| Error::InvalidData(format!("invalid class: {raw}")))
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidData(format!("invalid timestamp '{raw}': {e}")))
}
