//! Final report of a completed session.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::metrics::{ClassificationMetrics, RatingSummary};
use crate::response::EvaluationMode;
use crate::store::RemoteId;
use crate::types::{RaterId, SessionId};

/// Metrics section of a report, by evaluation mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportMetrics {
    Classification(ClassificationMetrics),
    Rating(RatingSummary),
}

/// Everything the caller needs to present the end of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub session_id: SessionId,
    pub rater_id: RaterId,
    pub mode: EvaluationMode,
    pub total_items: usize,
    pub answered: usize,
    pub errors: usize,
    pub metrics: ReportMetrics,
    pub log_path: Option<PathBuf>,
    pub remote_id: Option<RemoteId>,
    /// Charts rendered by the presentation layer, if any
    pub charts: Vec<PathBuf>,
    pub generated_at: DateTime<Utc>,
}

impl FinalReport {
    /// `<log stem>_report.json` next to the log.
    pub fn default_path(log_path: &Path) -> PathBuf {
        let stem = log_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "vtt_results".to_string());
        log_path.with_file_name(format!("{stem}_report.json"))
    }

    /// Write the report as pretty JSON and return where it went.
    pub async fn write(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match (path, &self.log_path) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(log)) => Self::default_path(log),
            (None, None) => PathBuf::from(format!("vtt_report_{}.json", self.session_id)),
        };
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, json).await?;
        info!(path = %path.display(), "report written");
        Ok(path)
    }
}
