//! Configuration structures.
//!
//! Configuration is loaded from environment variables and config files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::ids::ArtifactId;
use crate::artifact::ArtifactKind;

/// Global engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Directory watcher configuration.
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Deferred-cleanup retry configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Reconcile discovered artifacts concurrently on a bounded worker pool.
    #[serde(default)]
    pub parallel_deployment: bool,
}

/// Selection policy for discovered artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Only the first discovered artifact is deployed; the rest are ignored
    /// and no anchor is created for them.
    Single,
    /// All discovered artifacts are deployed.
    #[default]
    Multi,
}

/// Directory watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// How often the watcher scans the artifact directories.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Artifact selection mode.
    pub mode: DeploymentMode,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            mode: DeploymentMode::Multi,
        }
    }
}

/// Deferred-cleanup retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Delay before the first retry of a failed deletion.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Interval between retries.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Retry bound. After this many consecutive failures the target folder
    /// is left in place and a terminal diagnostic is emitted.
    pub max_attempts: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            period: Duration::from_secs(2),
            max_attempts: 5,
        }
    }
}

/// On-disk layout of the deployable-artifact workspace.
///
/// ```text
/// <base>/apps/<id>/                  exploded application artifacts
/// <base>/apps/<id>-anchor.txt        deployment-completion marker
/// <base>/domains/<id>/               exploded domain artifacts
/// <base>/.workspace/<id>/            per-artifact data folder
/// <base>/.native/<generated>/        per-instance native-library temp folder
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactLayout {
    /// Workspace root.
    pub base_dir: PathBuf,
}

/// Suffix of the per-artifact anchor marker file.
pub const ANCHOR_SUFFIX: &str = "-anchor.txt";

impl ArtifactLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Deployable-artifact directory for a kind. Policies have no scan
    /// directory; they are applied through the policy manager API.
    pub fn artifacts_dir(&self, kind: ArtifactKind) -> PathBuf {
        match kind {
            ArtifactKind::Application => self.base_dir.join("apps"),
            ArtifactKind::Domain => self.base_dir.join("domains"),
            ArtifactKind::Policy => self.base_dir.join("policies"),
        }
    }

    /// Location of an exploded artifact.
    pub fn artifact_dir(&self, kind: ArtifactKind, id: &ArtifactId) -> PathBuf {
        self.artifacts_dir(kind).join(id.as_str())
    }

    /// Anchor marker path for an artifact. Present only while the artifact
    /// is fully deployed.
    pub fn anchor_path(&self, kind: ArtifactKind, id: &ArtifactId) -> PathBuf {
        self.artifacts_dir(kind)
            .join(format!("{}{}", id.as_str(), ANCHOR_SUFFIX))
    }

    /// Per-artifact data folder. Preserved on undeploy when the caller asks
    /// for it.
    pub fn data_dir(&self, data_folder: &str) -> PathBuf {
        self.base_dir.join(".workspace").join(data_folder)
    }

    /// Per-instance native-library temp folder. Never preserved.
    pub fn native_libs_dir(&self, native_libs_folder: &str) -> PathBuf {
        self.base_dir.join(".native").join(native_libs_folder)
    }

    /// Create the directory skeleton. Idempotent.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.artifacts_dir(ArtifactKind::Application))?;
        std::fs::create_dir_all(self.artifacts_dir(ArtifactKind::Domain))?;
        std::fs::create_dir_all(self.base_dir.join(".workspace"))?;
        std::fs::create_dir_all(self.base_dir.join(".native"))?;
        Ok(())
    }

    pub fn base(&self) -> &Path {
        &self.base_dir
    }
}
