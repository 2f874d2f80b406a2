//! The evaluation session state machine.
//!
//! ```text
//! Setup --start--> InProgress --finish--> Completed
//!   ^                   |                     |
//!   +------reset--------+---------reset-------+
//! ```
//!
//! A session walks one rater through a fixed [`EvaluationSequence`], one
//! item at a time. Every recorded response is written through the
//! session's [`ResponseStore`] before the cursor advances, so the log on
//! disk always matches `responses`.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::metrics::{classification_metrics, rating_summary};
use crate::pool::{ImageClass, ImageItem, ImageSource};
use crate::report::{FinalReport, ReportMetrics};
use crate::response::{EvaluationMode, ResponsePayload, ResponseRecord};
use crate::sampler::EvaluationSequence;
use crate::store::{AppendOutcome, MirrorSettings, RemoteId, ResponseStore};
use crate::types::{RaterId, SessionId};

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Setup,
    InProgress,
    Completed,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a session, returned when the session is reset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    session_id: SessionId,
    lifecycle: Lifecycle,
    rater_id: Option<RaterId>,
    sequence: Option<EvaluationSequence>,
    cursor: usize,
    responses: Vec<ResponseRecord>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            session_id: SessionId::new(),
            lifecycle: Lifecycle::Setup,
            rater_id: None,
            sequence: None,
            cursor: 0,
            responses: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn rater_id(&self) -> Option<&RaterId> {
        self.rater_id.as_ref()
    }

    pub fn sequence(&self) -> Option<&EvaluationSequence> {
        self.sequence.as_ref()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn responses(&self) -> &[ResponseRecord] {
        &self.responses
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }
}

/// Where a session's result log goes.
#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    pub output_dir: PathBuf,
    pub mirror: Option<MirrorSettings>,
}

impl PersistenceSettings {
    pub fn local(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            mirror: None,
        }
    }

    #[must_use]
    pub fn with_mirror(mut self, mirror: MirrorSettings) -> Self {
        self.mirror = Some(mirror);
        self
    }
}

/// Responses chosen per class so far, for progress displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResponseTally {
    pub real: usize,
    pub synthetic: usize,
    pub errors: usize,
}

/// One rater's pass over an evaluation sequence.
#[derive(Debug)]
pub struct EvaluationSession {
    mode: EvaluationMode,
    persistence: PersistenceSettings,
    state: SessionState,
    store: Option<ResponseStore>,
}

impl EvaluationSession {
    pub fn new(mode: EvaluationMode, persistence: PersistenceSettings) -> Self {
        Self {
            mode,
            persistence,
            state: SessionState::new(),
            store: None,
        }
    }

    pub fn mode(&self) -> &EvaluationMode {
        &self.mode
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lifecycle
    }

    /// Begin presenting `sequence` to `rater_id`.
    ///
    /// Validation happens before any state changes; a failed start leaves
    /// the session in Setup.
    #[instrument(skip(self, sequence), fields(session = %self.state.session_id, items = sequence.len()))]
    pub async fn start(&mut self, sequence: EvaluationSequence, rater_id: RaterId) -> Result<()> {
        if self.state.lifecycle != Lifecycle::Setup {
            return Err(Error::InvalidStart(format!(
                "session is {}",
                self.state.lifecycle
            )));
        }
        if rater_id.is_blank() {
            return Err(Error::InvalidStart("rater id is blank".to_string()));
        }
        if sequence.is_empty() {
            return Err(Error::InvalidStart("evaluation sequence is empty".to_string()));
        }

        let started_at = Utc::now();
        let path = self
            .persistence
            .output_dir
            .join(result_file_name(&rater_id, started_at));

        self.store = Some(ResponseStore::new(
            path,
            self.mode.clone(),
            self.persistence.mirror.clone(),
        ));
        self.state.lifecycle = Lifecycle::InProgress;
        self.state.rater_id = Some(rater_id);
        self.state.sequence = Some(sequence);
        self.state.cursor = 0;
        self.state.responses.clear();
        self.state.started_at = Some(started_at);

        info!(mode = %self.mode, "session started");
        Ok(())
    }

    /// The item awaiting a response.
    pub fn current_item(&self) -> Result<&ImageItem> {
        let sequence = self.in_progress("current_item")?;
        sequence
            .get(self.state.cursor)
            .ok_or(Error::SequenceExhausted(sequence.len()))
    }

    /// Fetch the bytes of the current item from `source`.
    ///
    /// A load failure is returned as [`Error::ItemLoad`]; pass its message to
    /// [`record_item_error`](Self::record_item_error) to skip the item.
    pub async fn fetch_current(&self, source: &dyn ImageSource) -> Result<Vec<u8>> {
        let item = self.current_item()?;
        source.fetch(&item.id).await
    }

    /// Record the rater's response to the current item and advance.
    ///
    /// Reaching the end of the sequence does not complete the session; call
    /// [`finish`](Self::finish) for that.
    #[instrument(skip(self, payload), fields(session = %self.state.session_id, cursor = self.state.cursor))]
    pub async fn record_response(&mut self, payload: ResponsePayload) -> Result<AppendOutcome> {
        let (rater_id, item) = self.current_target("record_response")?;
        let record =
            ResponseRecord::from_payload(&self.mode, &rater_id, &item, self.state.cursor, payload)?;
        self.commit(record).await
    }

    /// Record an error-typed response for an item that could not be shown, and advance.
    #[instrument(skip(self, error), fields(session = %self.state.session_id, cursor = self.state.cursor))]
    pub async fn record_item_error(&mut self, error: impl Into<String>) -> Result<AppendOutcome> {
        let (rater_id, item) = self.current_target("record_item_error")?;
        let record =
            ResponseRecord::item_error(&self.mode, &rater_id, &item, self.state.cursor, error);
        warn!(item = %item.id, error = record.error().unwrap_or_default(), "item could not be presented");
        self.commit(record).await
    }

    /// Mark the session completed. Calling it again is a no-op.
    pub fn finish(&mut self) -> Result<()> {
        match self.state.lifecycle {
            Lifecycle::Completed => Ok(()),
            Lifecycle::InProgress => {
                self.state.lifecycle = Lifecycle::Completed;
                self.state.completed_at = Some(Utc::now());
                info!(
                    session = %self.state.session_id,
                    responses = self.state.responses.len(),
                    "session completed"
                );
                Ok(())
            }
            Lifecycle::Setup => Err(Error::InvalidState {
                operation: "finish",
                state: Lifecycle::Setup,
            }),
        }
    }

    /// Return to Setup and hand back the previous state.
    ///
    /// Files already written locally or remotely are left in place.
    pub fn reset(&mut self) -> SessionState {
        self.store = None;
        let archived = std::mem::replace(&mut self.state, SessionState::new());
        debug!(
            archived = %archived.session_id,
            session = %self.state.session_id,
            "session reset"
        );
        archived
    }

    /// `(answered, total)`; `(0, 0)` before start.
    pub fn progress(&self) -> (usize, usize) {
        let total = self.state.sequence.as_ref().map_or(0, EvaluationSequence::len);
        (self.state.cursor, total)
    }

    /// Counts of classification choices made so far.
    pub fn tally(&self) -> ResponseTally {
        let mut tally = ResponseTally::default();
        for record in &self.state.responses {
            if record.is_error() {
                tally.errors += 1;
                continue;
            }
            if let ResponseRecord::Classification(r) = record {
                match r.chosen_class {
                    Some(ImageClass::Real) => tally.real += 1,
                    Some(ImageClass::Synthetic) => tally.synthetic += 1,
                    None => {}
                }
            }
        }
        tally
    }

    /// Local result log path, once started.
    pub fn log_path(&self) -> Option<&Path> {
        self.store.as_ref().map(ResponseStore::path)
    }

    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.store.as_ref().and_then(ResponseStore::remote_id)
    }

    /// Build the final report of a completed session.
    pub fn report(&self) -> Result<FinalReport> {
        if self.state.lifecycle != Lifecycle::Completed {
            return Err(Error::InvalidState {
                operation: "report",
                state: self.state.lifecycle,
            });
        }

        let responses = &self.state.responses;
        let metrics = match &self.mode {
            EvaluationMode::Classification => {
                ReportMetrics::Classification(classification_metrics(responses)?)
            }
            EvaluationMode::Rating { features } => {
                ReportMetrics::Rating(rating_summary(features, responses)?)
            }
        };

        Ok(FinalReport {
            session_id: self.state.session_id,
            rater_id: self.state.rater_id.clone().unwrap_or_default(),
            mode: self.mode.clone(),
            total_items: self.progress().1,
            answered: responses.iter().filter(|r| !r.is_error()).count(),
            errors: responses.iter().filter(|r| r.is_error()).count(),
            metrics,
            log_path: self.log_path().map(Path::to_path_buf),
            remote_id: self.remote_id().cloned(),
            charts: Vec::new(),
            generated_at: Utc::now(),
        })
    }

    fn in_progress(&self, operation: &'static str) -> Result<&EvaluationSequence> {
        match (&self.state.lifecycle, &self.state.sequence) {
            (Lifecycle::InProgress, Some(sequence)) => Ok(sequence),
            (state, _) => Err(Error::InvalidState {
                operation,
                state: *state,
            }),
        }
    }

    fn current_target(&self, operation: &'static str) -> Result<(RaterId, ImageItem)> {
        let sequence = self.in_progress(operation)?;
        let item = sequence
            .get(self.state.cursor)
            .ok_or(Error::SequenceExhausted(sequence.len()))?;
        let rater_id = self.state.rater_id.clone().unwrap_or_default();
        Ok((rater_id, item.clone()))
    }

    /// Persist `record`, then advance. The cursor only moves if the local write succeeded.
    async fn commit(&mut self, record: ResponseRecord) -> Result<AppendOutcome> {
        let Some(store) = self.store.as_mut() else {
            return Err(Error::InvalidState {
                operation: "commit",
                state: self.state.lifecycle,
            });
        };

        let outcome = store.append(record.clone()).await?;
        self.state.responses.push(record);
        self.state.cursor += 1;
        debug!(cursor = self.state.cursor, "response recorded");
        Ok(outcome)
    }
}

/// `vtt_results_{rater}_{YYYYmmdd_HHMMSS}.csv`, with the rater id made filename-safe.
pub fn result_file_name(rater_id: &RaterId, started_at: DateTime<Utc>) -> String {
    let rater: String = rater_id
        .as_str()
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!(
        "vtt_results_{rater}_{}.csv",
        started_at.format("%Y%m%d_%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MirrorTarget, read_log};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn sequence(n: usize) -> EvaluationSequence {
        (0..n)
            .map(|i| {
                let class = if i % 2 == 0 {
                    ImageClass::Real
                } else {
                    ImageClass::Synthetic
                };
                let id = format!("{class}/{i:03}.png");
                ImageItem::new(id.as_str(), id.as_str(), Some(class))
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn classification_session(dir: &Path) -> EvaluationSession {
        EvaluationSession::new(
            EvaluationMode::Classification,
            PersistenceSettings::local(dir),
        )
    }

    #[test]
    fn result_file_name_is_sanitized() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 14, 3, 9).unwrap();
        assert_eq!(
            result_file_name(&RaterId::from(" Dr. A/B "), at),
            "vtt_results_Dr__A_B_20250601_140309.csv"
        );
    }

    #[tokio::test]
    async fn start_rejects_blank_rater_and_empty_sequence() {
        let tmp = TempDir::new().unwrap();
        let mut session = classification_session(tmp.path());

        let err = session
            .start(sequence(3), RaterId::from("  "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStart(_)));

        let err = session
            .start(sequence(0), RaterId::from("rad-01"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStart(_)));

        assert_eq!(session.lifecycle(), Lifecycle::Setup);
        assert!(session.log_path().is_none());
    }

    #[tokio::test]
    async fn second_start_is_rejected_without_touching_state() {
        let tmp = TempDir::new().unwrap();
        let mut session = classification_session(tmp.path());
        session
            .start(sequence(3), RaterId::from("rad-01"))
            .await
            .unwrap();
        let first_log = session.log_path().unwrap().to_path_buf();

        let err = session
            .start(sequence(5), RaterId::from("rad-02"))
            .await
            .unwrap_err();

        assert!(matches!(&err, Error::InvalidStart(msg) if msg == "session is in_progress"));
        assert_eq!(session.lifecycle(), Lifecycle::InProgress);
        assert_eq!(session.progress(), (0, 3));
        assert_eq!(session.log_path(), Some(first_log.as_path()));

        session.finish().unwrap();
        assert!(matches!(
            session.start(sequence(2), RaterId::from("rad-01")).await,
            Err(Error::InvalidStart(_))
        ));
    }

    #[tokio::test]
    async fn operations_before_start_are_invalid_state() {
        let tmp = TempDir::new().unwrap();
        let mut session = classification_session(tmp.path());

        assert!(matches!(
            session.current_item(),
            Err(Error::InvalidState { state: Lifecycle::Setup, .. })
        ));
        assert!(matches!(
            session
                .record_response(ResponsePayload::classify(ImageClass::Real))
                .await,
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(session.finish(), Err(Error::InvalidState { .. })));
    }

    #[tokio::test]
    async fn full_pass_records_every_item_in_order() {
        let tmp = TempDir::new().unwrap();
        let mut session = classification_session(tmp.path());
        session
            .start(sequence(4), RaterId::from("rad-01"))
            .await
            .unwrap();

        for _ in 0..4 {
            let truth = session.current_item().unwrap().true_class.unwrap();
            session
                .record_response(ResponsePayload::classify(truth))
                .await
                .unwrap();
        }

        assert!(matches!(
            session.current_item(),
            Err(Error::SequenceExhausted(4))
        ));
        assert!(matches!(
            session
                .record_response(ResponsePayload::classify(ImageClass::Real))
                .await,
            Err(Error::SequenceExhausted(4))
        ));
        // exhaustion alone does not complete the session
        assert_eq!(session.lifecycle(), Lifecycle::InProgress);

        let logged = read_log(session.log_path().unwrap()).await.unwrap();
        let indices: Vec<_> = logged.records.iter().map(|r| r.item_index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(session.tally().real, 2);
        assert_eq!(session.tally().synthetic, 2);
    }

    #[tokio::test]
    async fn invalid_payload_does_not_advance() {
        let tmp = TempDir::new().unwrap();
        let mut session = EvaluationSession::new(
            EvaluationMode::Rating {
                features: vec!["realism".into()],
            },
            PersistenceSettings::local(tmp.path()),
        );
        session
            .start(sequence(2), RaterId::from("rad-01"))
            .await
            .unwrap();

        let err = session
            .record_response(ResponsePayload::rate([("realism", 0)]))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidScore { .. }));
        assert_eq!(session.progress(), (0, 2));
        assert!(!session.log_path().unwrap().exists());
    }

    #[tokio::test]
    async fn item_error_is_recorded_and_advances() {
        let tmp = TempDir::new().unwrap();
        let mut session = classification_session(tmp.path());
        session
            .start(sequence(2), RaterId::from("rad-01"))
            .await
            .unwrap();

        session.record_item_error("").await.unwrap();

        assert_eq!(session.progress(), (1, 2));
        let record = &session.state().responses()[0];
        assert_eq!(record.error(), Some("unknown error"));
        assert_eq!(session.tally().errors, 1);
    }

    #[tokio::test]
    async fn finish_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut session = classification_session(tmp.path());
        session
            .start(sequence(2), RaterId::from("rad-01"))
            .await
            .unwrap();
        session
            .record_response(ResponsePayload::classify(ImageClass::Real))
            .await
            .unwrap();

        session.finish().unwrap();
        let completed_at = session.state().completed_at();
        session.finish().unwrap();

        assert_eq!(session.lifecycle(), Lifecycle::Completed);
        assert_eq!(session.state().responses().len(), 1);
        assert_eq!(session.state().completed_at(), completed_at);
        assert!(matches!(
            session.current_item(),
            Err(Error::InvalidState { state: Lifecycle::Completed, .. })
        ));
    }

    #[tokio::test]
    async fn reset_archives_state_and_keeps_files() {
        let tmp = TempDir::new().unwrap();
        let mut session = classification_session(tmp.path());
        session
            .start(sequence(3), RaterId::from("rad-01"))
            .await
            .unwrap();
        session
            .record_response(ResponsePayload::classify(ImageClass::Synthetic))
            .await
            .unwrap();
        let log_path = session.log_path().unwrap().to_path_buf();
        let old_id = session.state().session_id();

        let archived = session.reset();

        assert_eq!(archived.session_id(), old_id);
        assert_eq!(archived.lifecycle(), Lifecycle::InProgress);
        assert_eq!(archived.responses().len(), 1);
        assert_eq!(session.lifecycle(), Lifecycle::Setup);
        assert_ne!(session.state().session_id(), old_id);
        assert_eq!(session.progress(), (0, 0));
        assert!(session.log_path().is_none());
        assert!(log_path.exists());

        // a reset session can be started again
        session
            .start(sequence(1), RaterId::from("rad-01"))
            .await
            .unwrap();
        assert_eq!(session.lifecycle(), Lifecycle::InProgress);
    }

    #[tokio::test]
    async fn report_requires_completion() {
        let tmp = TempDir::new().unwrap();
        let mut session = classification_session(tmp.path());
        session
            .start(sequence(2), RaterId::from("rad-01"))
            .await
            .unwrap();
        assert!(matches!(session.report(), Err(Error::InvalidState { .. })));

        session
            .record_response(ResponsePayload::classify(ImageClass::Real))
            .await
            .unwrap();
        session.record_item_error("timeout").await.unwrap();
        session.finish().unwrap();

        let report = session.report().unwrap();
        assert_eq!(report.total_items, 2);
        assert_eq!(report.answered, 1);
        assert_eq!(report.errors, 1);
        match report.metrics {
            ReportMetrics::Classification(m) => {
                assert_eq!(m.total, 1);
                assert_eq!(m.accuracy, Some(1.0));
            }
            ReportMetrics::Rating(_) => panic!("expected classification metrics"),
        }
    }

    #[tokio::test]
    async fn rating_report_summarises_features() {
        let tmp = TempDir::new().unwrap();
        let mut session = EvaluationSession::new(
            EvaluationMode::Rating {
                features: vec!["realism".into()],
            },
            PersistenceSettings::local(tmp.path()),
        );
        session
            .start(sequence(2), RaterId::from("rad-01"))
            .await
            .unwrap();
        session
            .record_response(ResponsePayload::rate([("realism", 2)]))
            .await
            .unwrap();
        session
            .record_response(ResponsePayload::rate([("realism", 4)]))
            .await
            .unwrap();
        session.finish().unwrap();

        match session.report().unwrap().metrics {
            ReportMetrics::Rating(summary) => {
                assert_eq!(summary.features[0].mean, Some(3.0));
            }
            ReportMetrics::Classification(_) => panic!("expected rating summary"),
        }
    }

    struct CountingMirror {
        creates: AtomicUsize,
        updates: AtomicUsize,
    }

    #[async_trait]
    impl MirrorTarget for CountingMirror {
        async fn create(&self, _bytes: &[u8], _name: &str, _folder: Option<&str>) -> Result<RemoteId> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteId("remote-1".into()))
        }

        async fn update(&self, id: &RemoteId, _bytes: &[u8], _name: &str) -> Result<RemoteId> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(id.clone())
        }
    }

    #[tokio::test]
    async fn mirrored_session_creates_one_remote_object() {
        let tmp = TempDir::new().unwrap();
        let mirror = Arc::new(CountingMirror {
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        });
        let persistence =
            PersistenceSettings::local(tmp.path()).with_mirror(MirrorSettings::new(mirror.clone()));
        let mut session = EvaluationSession::new(EvaluationMode::Classification, persistence);
        session
            .start(sequence(6), RaterId::from("rad-01"))
            .await
            .unwrap();

        for _ in 0..6 {
            session
                .record_response(ResponsePayload::classify(ImageClass::Real))
                .await
                .unwrap();
        }

        assert_eq!(mirror.creates.load(Ordering::SeqCst), 1);
        assert_eq!(mirror.updates.load(Ordering::SeqCst), 5);
        assert_eq!(session.remote_id(), Some(&RemoteId("remote-1".into())));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Answer(bool),
        Fail,
        Peek,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<bool>().prop_map(Op::Answer),
            Just(Op::Fail),
            Just(Op::Peek),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn cursor_tracks_response_count(len in 1usize..8, ops in prop::collection::vec(op(), 0..20)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let tmp = TempDir::new().unwrap();

            runtime.block_on(async {
                let mut session = classification_session(tmp.path());
                session.start(sequence(len), RaterId::from("rad-01")).await.unwrap();

                for op in ops {
                    let _ = match op {
                        Op::Answer(real) => {
                            let chosen = if real { ImageClass::Real } else { ImageClass::Synthetic };
                            session.record_response(ResponsePayload::classify(chosen)).await.map(|_| ())
                        }
                        Op::Fail => session.record_item_error("broken").await.map(|_| ()),
                        Op::Peek => session.current_item().map(|_| ()),
                    };
                    let state = session.state();
                    assert_eq!(state.cursor(), state.responses().len());
                    assert!(state.cursor() <= len);
                }
            });
        }
    }
}
