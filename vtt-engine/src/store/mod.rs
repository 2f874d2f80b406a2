//! Durable persistence of a session's result log.
//!
//! Every append rewrites the whole log:
//! - [`ResponseStore`] - full CSV snapshot on local disk, replaced atomically
//! - [`MirrorTarget`] - optional remote copy, created once and then updated
//!
//! The local write is authoritative. Remote failures never fail an append;
//! they come back as a [`PersistenceWarning`] and are logged.

mod mirror;
mod tabular;

pub use mirror::{DirectoryMirror, MirrorSettings, MirrorTarget, RemoteId};
pub use tabular::{DecodedLog, decode_log, encode_log, read_log};

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::response::{EvaluationMode, ResponseRecord};

/// Non-fatal persistence failure surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistenceWarning {
    /// `create`, `update` or `find`
    pub operation: &'static str,
    pub message: String,
}

impl std::fmt::Display for PersistenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "remote {} failed: {}", self.operation, self.message)
    }
}

/// Result of one successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    pub local_path: PathBuf,
    /// Remote object id after this append, if the log is mirrored
    pub remote_id: Option<RemoteId>,
    pub warning: Option<PersistenceWarning>,
}

/// Append-only result log for one session.
#[derive(Debug)]
pub struct ResponseStore {
    path: PathBuf,
    mode: EvaluationMode,
    log: Vec<ResponseRecord>,
    mirror: Option<MirrorSettings>,
    remote_id: Option<RemoteId>,
    resume_checked: bool,
}

impl ResponseStore {
    /// Create a store writing to `path`. Nothing is written until the first append.
    pub fn new(
        path: impl Into<PathBuf>,
        mode: EvaluationMode,
        mirror: Option<MirrorSettings>,
    ) -> Self {
        Self {
            path: path.into(),
            mode,
            log: Vec::new(),
            mirror,
            remote_id: None,
            resume_checked: false,
        }
    }

    /// Append `record` and persist the full log.
    ///
    /// Fails only if the local snapshot cannot be written, in which case the
    /// in-memory log is left unchanged.
    #[instrument(skip(self, record), fields(path = %self.path.display(), item = %record.item_id()))]
    pub async fn append(&mut self, record: ResponseRecord) -> Result<AppendOutcome> {
        let mut next = self.log.clone();
        next.push(record);
        let bytes = encode_log(&self.mode, &next)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        mirror::write_atomic(&self.path, &bytes).await?;
        self.log = next;
        debug!(rows = self.log.len(), "result log written");

        let warning = self.sync_mirror(&bytes).await;
        Ok(AppendOutcome {
            local_path: self.path.clone(),
            remote_id: self.remote_id.clone(),
            warning,
        })
    }

    /// Push `bytes` to the mirror, creating the remote object on first success.
    async fn sync_mirror(&mut self, bytes: &[u8]) -> Option<PersistenceWarning> {
        let settings = self.mirror.clone()?;
        let name = self.file_name();
        let folder = settings.folder.as_deref();

        if self.remote_id.is_none() && settings.resume_remote && !self.resume_checked {
            match settings.target.find(&name, folder).await {
                Ok(found) => {
                    if let Some(id) = &found {
                        debug!(remote_id = %id, "resuming existing remote log");
                    }
                    self.remote_id = found;
                    self.resume_checked = true;
                }
                Err(e) => return Some(remote_failure("find", e.to_string())),
            }
        }

        let (operation, result) = match &self.remote_id {
            Some(id) => ("update", settings.target.update(id, bytes, &name).await),
            None => ("create", settings.target.create(bytes, &name, folder).await),
        };

        match result {
            Ok(id) => {
                self.remote_id = Some(id);
                None
            }
            Err(e) => Some(remote_failure(operation, e.to_string())),
        }
    }

    /// Records appended so far, in order.
    pub fn current_log(&self) -> &[ResponseRecord] {
        &self.log
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> &EvaluationMode {
        &self.mode
    }

    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn remote_failure(operation: &'static str, message: String) -> PersistenceWarning {
    let warning = PersistenceWarning { operation, message };
    warn!(operation, message = %warning.message, "remote mirror write failed; continuing with local log");
    warning
}
