//! Study configuration, loaded from layered TOML files.
//!
//! Layers, later overriding earlier:
//! 1. built-in defaults
//! 2. user config, `<config dir>/vtt/config.toml`
//! 3. project config, `.vtt/config.toml` (or `$VTT_PROJECT_CONFIG_DIR/config.toml`)
//! 4. an explicit file passed by the caller
//!
//! ```toml
//! output_dir = "results"
//! max_per_label = 50
//! mode = "rating"
//! features = ["realism", "anatomy"]
//!
//! [mirror]
//! enabled = true
//! root = "/mnt/shared"
//! folder = "vtt"
//!
//! [[pools]]
//! label = "real"
//! path = "data/real"
//! class = "real"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::pool::ImageClass;
use crate::response::EvaluationMode;
use crate::sampler::DEFAULT_MAX_PER_LABEL;
use crate::session::{EvaluationSession, PersistenceSettings};
use crate::store::{DirectoryMirror, MirrorSettings};

const DEFAULT_OUTPUT_DIR: &str = "vtt_results";

/// Which kind of study to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    #[default]
    Classification,
    Rating,
}

/// One labeled image pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub label: String,
    /// Directory (or remote folder reference) holding the images
    pub path: String,
    /// Ground truth for every image in the pool
    #[serde(default)]
    pub class: Option<ImageClass>,
}

/// Remote mirror settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub enabled: bool,
    /// Root of a [`DirectoryMirror`](crate::store::DirectoryMirror)
    pub root: Option<PathBuf>,
    pub folder: Option<String>,
    pub resume_remote: bool,
}

/// Fully resolved study configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyConfig {
    pub output_dir: PathBuf,
    pub max_per_label: usize,
    pub mode: ModeKind,
    pub features: Vec<String>,
    pub mirror: MirrorConfig,
    pub pools: Vec<PoolConfig>,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            max_per_label: DEFAULT_MAX_PER_LABEL,
            mode: ModeKind::default(),
            features: Vec::new(),
            mirror: MirrorConfig::default(),
            pools: Vec::new(),
        }
    }
}

impl StudyConfig {
    /// The evaluation mode this config describes.
    pub fn evaluation_mode(&self) -> Result<EvaluationMode> {
        match self.mode {
            ModeKind::Classification => Ok(EvaluationMode::Classification),
            ModeKind::Rating if self.features.is_empty() => Err(Error::Config(
                "rating mode requires at least one feature".to_string(),
            )),
            ModeKind::Rating => Ok(EvaluationMode::Rating {
                features: self.features.clone(),
            }),
        }
    }

    /// Where results go: `output_dir`, plus a [`DirectoryMirror`] at
    /// `mirror.root` when the mirror is enabled.
    pub fn persistence(&self) -> Result<PersistenceSettings> {
        let local = PersistenceSettings::local(self.output_dir.clone());
        if !self.mirror.enabled {
            return Ok(local);
        }

        let root = self
            .mirror
            .root
            .clone()
            .ok_or_else(|| Error::Config("mirror is enabled but mirror.root is not set".to_string()))?;
        let mut mirror = MirrorSettings::new(Arc::new(DirectoryMirror::new(root)))
            .with_resume(self.mirror.resume_remote);
        if let Some(folder) = &self.mirror.folder {
            mirror = mirror.with_folder(folder.clone());
        }
        Ok(local.with_mirror(mirror))
    }

    /// A new session in Setup for this study.
    pub fn session(&self) -> Result<EvaluationSession> {
        Ok(EvaluationSession::new(
            self.evaluation_mode()?,
            self.persistence()?,
        ))
    }
}

/// Config as written on disk; every field optional so layers can be merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStudyConfig {
    pub output_dir: Option<PathBuf>,
    pub max_per_label: Option<usize>,
    pub mode: Option<ModeKind>,
    pub features: Option<Vec<String>>,
    #[serde(default)]
    pub mirror: RawMirrorConfig,
    pub pools: Option<Vec<PoolConfig>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMirrorConfig {
    pub enabled: Option<bool>,
    pub root: Option<PathBuf>,
    pub folder: Option<String>,
    pub resume_remote: Option<bool>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load user and project layers, then `explicit` if given.
    pub fn load(explicit: Option<&Path>) -> Result<StudyConfig> {
        let mut raw = RawStudyConfig::default();

        if let Some(user_path) = Self::user_config_path()
            && user_path.exists()
        {
            raw = Self::merge_raw(raw, Self::read_raw(&user_path)?);
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&project_path)?);
        }

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            raw = Self::merge_raw(raw, Self::read_raw(path)?);
        }

        Ok(Self::finalize(raw))
    }

    /// Load a single file on top of the defaults.
    pub fn load_from_path(path: &Path) -> Result<StudyConfig> {
        Ok(Self::finalize(Self::read_raw(path)?))
    }

    /// `<config dir>/vtt/config.toml`
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vtt").join("config.toml"))
    }

    /// `.vtt/config.toml`, overridable with `VTT_PROJECT_CONFIG_DIR`.
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("VTT_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".vtt/config.toml")
        }
    }

    /// Parse one TOML layer.
    pub fn parse(contents: &str) -> Result<RawStudyConfig> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    fn read_raw(path: &Path) -> Result<RawStudyConfig> {
        debug!(path = %path.display(), "reading config layer");
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Overlay values win wherever they are set.
    fn merge_raw(base: RawStudyConfig, overlay: RawStudyConfig) -> RawStudyConfig {
        RawStudyConfig {
            output_dir: overlay.output_dir.or(base.output_dir),
            max_per_label: overlay.max_per_label.or(base.max_per_label),
            mode: overlay.mode.or(base.mode),
            features: overlay.features.or(base.features),
            mirror: RawMirrorConfig {
                enabled: overlay.mirror.enabled.or(base.mirror.enabled),
                root: overlay.mirror.root.or(base.mirror.root),
                folder: overlay.mirror.folder.or(base.mirror.folder),
                resume_remote: overlay.mirror.resume_remote.or(base.mirror.resume_remote),
            },
            pools: overlay.pools.or(base.pools),
        }
    }

    fn finalize(raw: RawStudyConfig) -> StudyConfig {
        let defaults = StudyConfig::default();
        StudyConfig {
            output_dir: raw.output_dir.unwrap_or(defaults.output_dir),
            max_per_label: raw.max_per_label.unwrap_or(defaults.max_per_label),
            mode: raw.mode.unwrap_or(defaults.mode),
            features: raw.features.unwrap_or_default(),
            mirror: MirrorConfig {
                enabled: raw.mirror.enabled.unwrap_or(false),
                root: raw.mirror.root,
                folder: raw.mirror.folder,
                resume_remote: raw.mirror.resume_remote.unwrap_or(false),
            },
            pools: raw.pools.unwrap_or_default(),
        }
    }
}
