//! Labeled image pools and the image source they are built from.
//!
//! An [`ImagePool`] is a plain list of [`ImageItem`] descriptors. Pools are
//! built from an [`ImageSource`], which abstracts over where images live: a
//! local directory ([`DirectoryImageSource`]) or a remote folder-based store
//! implemented outside this crate.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::types::ItemId;

/// File extensions accepted as images when the source has no useful mime type.
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "dcm"];

/// Ground-truth class of an image.
///
/// `Real` is the positive class for sensitivity, `Synthetic` the negative one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageClass {
    /// Acquired from a patient
    Real,
    /// Produced by a generative model
    Synthetic,
}

impl ImageClass {
    /// Convert to the representation used in result logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Synthetic => "synthetic",
        }
    }

    /// Parse from the result log representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "real" => Some(Self::Real),
            "synthetic" => Some(Self::Synthetic),
            _ => None,
        }
    }
}

impl fmt::Display for ImageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of one image presented to a rater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageItem {
    /// Stable identifier used to join logs across raters
    pub id: ItemId,
    /// Reference the external loader resolves to bytes
    pub location: String,
    /// Ground truth, absent for rating-only studies
    pub true_class: Option<ImageClass>,
}

impl ImageItem {
    pub fn new(
        id: impl Into<ItemId>,
        location: impl Into<String>,
        true_class: Option<ImageClass>,
    ) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            true_class,
        }
    }
}

/// A labeled collection of items available for sampling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePool {
    pub label: String,
    pub items: Vec<ImageItem>,
}

impl ImagePool {
    pub fn new(label: impl Into<String>, items: Vec<ImageItem>) -> Self {
        Self {
            label: label.into(),
            items,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Build a pool from every image entry the source lists under `pool_ref`.
    ///
    /// Non-image entries are skipped. An empty result is not an error here;
    /// the sampler rejects empty pools.
    #[instrument(skip(source))]
    pub async fn from_source(
        source: &dyn ImageSource,
        pool_ref: &str,
        label: &str,
        true_class: Option<ImageClass>,
    ) -> Result<Self> {
        let entries = source.list_items(pool_ref).await?;
        let listed = entries.len();

        let items: Vec<ImageItem> = entries
            .into_iter()
            .filter(SourceEntry::is_image)
            .map(|entry| ImageItem::new(entry.id.clone(), entry.id.0, true_class))
            .collect();

        if items.is_empty() {
            warn!(pool_ref, listed, "no supported images found");
        } else {
            debug!(pool_ref, listed, images = items.len(), "pool loaded");
        }

        Ok(Self::new(label, items))
    }
}

/// One entry reported by an [`ImageSource`] listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub id: ItemId,
    pub name: String,
    pub mime_type: String,
}

impl SourceEntry {
    /// Whether the entry looks like a supported image.
    pub fn is_image(&self) -> bool {
        if self.mime_type.starts_with("image/") {
            return true;
        }
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    }
}

/// Capability to list and fetch images.
///
/// Implementations may be backed by a local filesystem or a remote
/// folder-based store; the engine does not care which.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// List the entries in a pool (directory, remote folder, ...).
    async fn list_items(&self, pool_ref: &str) -> Result<Vec<SourceEntry>>;

    /// Fetch the raw bytes of an item.
    async fn fetch(&self, id: &ItemId) -> Result<Vec<u8>>;
}

/// Image source over local directories.
///
/// Item ids are paths relative to the source root, so they stay stable
/// between machines that share the same layout.
#[derive(Debug, Clone)]
pub struct DirectoryImageSource {
    root: PathBuf,
}

impl DirectoryImageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn mime_for(name: &str) -> &'static str {
        let ext = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("dcm") => "application/dicom",
            _ => "application/octet-stream",
        }
    }
}

#[async_trait]
impl ImageSource for DirectoryImageSource {
    async fn list_items(&self, pool_ref: &str) -> Result<Vec<SourceEntry>> {
        let dir = self.root.join(pool_ref);
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        let mut entries = Vec::new();

        while let Some(entry) = read_dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let id = Path::new(pool_ref).join(&name);
            entries.push(SourceEntry {
                id: ItemId(id.to_string_lossy().into_owned()),
                mime_type: Self::mime_for(&name).to_string(),
                name,
            });
        }

        // read_dir order is platform dependent; seeded sampling needs a stable order
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    async fn fetch(&self, id: &ItemId) -> Result<Vec<u8>> {
        tokio::fs::read(self.root.join(id.as_str()))
            .await
            .map_err(|e| Error::ItemLoad {
                item: id.clone(),
                reason: e.to_string(),
            })
    }
}
