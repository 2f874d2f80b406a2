//! Remote mirror targets for result logs.
//!
//! A mirror keeps a copy of the local log in some other store (a shared
//! drive folder, an object store, ...). The engine only ever creates and
//! updates objects; it never deletes them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Identifier of a mirrored object, as returned by the target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(pub String);

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote store a result log is mirrored to.
#[async_trait]
pub trait MirrorTarget: Send + Sync {
    /// Create a new object and return its identifier.
    async fn create(&self, bytes: &[u8], name: &str, folder: Option<&str>) -> Result<RemoteId>;

    /// Replace the contents of an existing object.
    async fn update(&self, remote_id: &RemoteId, bytes: &[u8], name: &str) -> Result<RemoteId>;

    /// Look up an existing object by name, used to resume after a restart.
    async fn find(&self, _name: &str, _folder: Option<&str>) -> Result<Option<RemoteId>> {
        Ok(None)
    }
}

/// Mirror wiring for one session.
#[derive(Clone)]
pub struct MirrorSettings {
    pub target: Arc<dyn MirrorTarget>,
    pub folder: Option<String>,
    /// Look up an object with the same name before creating one
    pub resume_remote: bool,
}

impl MirrorSettings {
    pub fn new(target: Arc<dyn MirrorTarget>) -> Self {
        Self {
            target,
            folder: None,
            resume_remote: false,
        }
    }

    #[must_use]
    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    #[must_use]
    pub fn with_resume(mut self, resume_remote: bool) -> Self {
        self.resume_remote = resume_remote;
        self
    }
}

impl fmt::Debug for MirrorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorSettings")
            .field("folder", &self.folder)
            .field("resume_remote", &self.resume_remote)
            .finish()
    }
}

/// Mirror into another directory, typically a synced drive folder.
///
/// Remote ids are paths relative to the mirror root.
#[derive(Debug, Clone)]
pub struct DirectoryMirror {
    root: PathBuf,
}

impl DirectoryMirror {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative(name: &str, folder: Option<&str>) -> PathBuf {
        match folder {
            Some(folder) => Path::new(folder).join(name),
            None => PathBuf::from(name),
        }
    }
}

#[async_trait]
impl MirrorTarget for DirectoryMirror {
    async fn create(&self, bytes: &[u8], name: &str, folder: Option<&str>) -> Result<RemoteId> {
        let relative = Self::relative(name, folder);
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(&path, bytes).await?;
        debug!(path = %path.display(), "mirror object created");
        Ok(RemoteId(relative.to_string_lossy().into_owned()))
    }

    async fn update(&self, remote_id: &RemoteId, bytes: &[u8], _name: &str) -> Result<RemoteId> {
        let path = self.root.join(&remote_id.0);
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::Mirror(format!("no mirrored object {remote_id}")));
        }
        write_atomic(&path, bytes).await?;
        Ok(remote_id.clone())
    }

    async fn find(&self, name: &str, folder: Option<&str>) -> Result<Option<RemoteId>> {
        let relative = Self::relative(name, folder);
        let exists = tokio::fs::try_exists(self.root.join(&relative)).await?;
        Ok(exists.then(|| RemoteId(relative.to_string_lossy().into_owned())))
    }
}

/// Replace `path` with `bytes` via a sibling temp file and rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let written = match tokio::fs::write(&tmp, bytes).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp).await
            && cleanup.kind() != std::io::ErrorKind::NotFound
        {
            debug!(path = %tmp.display(), error = %cleanup, "could not remove temp file");
        }
        return Err(e.into());
    }
    Ok(())
}
