//! Artifact descriptors.
//!
//! A descriptor captures the immutable identity of a deployable unit at
//! discovery time: name, kind, dependency references, and resource folder
//! names. Descriptors are never mutated after creation; a redeploy builds
//! a fresh descriptor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{ArtifactId, Error, InstanceId, Result};

/// Kind of deployable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Application,
    Domain,
    Policy,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Application => "application",
            ArtifactKind::Domain => "domain",
            ArtifactKind::Policy => "policy",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional identity file shipped inside an exploded artifact directory.
#[derive(Debug, Default, Deserialize)]
struct DescriptorFile {
    /// Overrides the directory-name identity.
    name: Option<String>,
    /// Shared domain this application depends on.
    domain: Option<String>,
    /// Target application a policy is parametrized against.
    target: Option<String>,
}

/// Immutable identity of a deployable unit, created at discovery time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    /// Shared domain referenced by an application.
    pub domain: Option<ArtifactId>,
    /// Target application referenced by a policy.
    pub target: Option<ArtifactId>,
    /// Name of the per-artifact data folder.
    pub data_folder: String,
    /// Name of the per-instance native-library temp folder. Derived from a
    /// generated identifier so repeated redeploys never collide.
    pub native_libs_folder: String,
    /// On-disk location of the exploded artifact content.
    pub location: PathBuf,
    /// Newest modification time observed under `location` at discovery.
    pub content_watermark: DateTime<Utc>,
}

impl ArtifactDescriptor {
    /// Discover an artifact from an exploded directory.
    ///
    /// Reads the optional `artifact.json` identity file for declared
    /// dependencies; falls back to the directory name for the identity.
    pub fn discover(kind: ArtifactKind, location: &Path) -> Result<Self> {
        if !location.is_dir() {
            return Err(Error::validation(format!(
                "artifact location is not a directory: {}",
                location.display()
            )));
        }

        let file = read_descriptor_file(location)?;

        let dir_name = location
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::validation(format!(
                    "artifact directory has no usable name: {}",
                    location.display()
                ))
            })?;

        let name = file.name.unwrap_or_else(|| dir_name.to_string());
        let id = ArtifactId::from_string(name).map_err(Error::validation)?;

        let domain = match file.domain {
            Some(d) => Some(ArtifactId::from_string(d).map_err(Error::validation)?),
            None => None,
        };
        let target = match file.target {
            Some(t) => Some(ArtifactId::from_string(t).map_err(Error::validation)?),
            None => None,
        };

        if kind == ArtifactKind::Policy && target.is_none() {
            return Err(Error::validation(format!(
                "policy artifact '{}' declares no target application",
                id
            )));
        }

        let instance = InstanceId::new();
        Ok(Self {
            data_folder: id.as_str().to_string(),
            native_libs_folder: format!("{}-{}", id.as_str(), instance),
            id,
            kind,
            domain,
            target,
            location: location.to_path_buf(),
            content_watermark: newest_modification(location)?,
        })
    }
}

fn read_descriptor_file(location: &Path) -> Result<DescriptorFile> {
    let path = location.join("artifact.json");
    if !path.is_file() {
        return Ok(DescriptorFile::default());
    }
    let raw = std::fs::read_to_string(&path)?;
    let parsed = serde_json::from_str(&raw)?;
    Ok(parsed)
}

/// Newest modification time of any file under `dir`, used for change
/// detection between watcher passes.
pub fn newest_modification(dir: &Path) -> Result<DateTime<Utc>> {
    let mut newest = std::fs::metadata(dir)?.modified()?;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if let Ok(modified) = meta.modified() {
                if modified > newest {
                    newest = modified;
                }
            }
            if meta.is_dir() {
                stack.push(entry.path());
            }
        }
    }
    Ok(DateTime::<Utc>::from(newest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exploded(dir: &Path, name: &str, descriptor_json: Option<&str>) -> PathBuf {
        let path = dir.join(name);
        std::fs::create_dir_all(&path).expect("test: create artifact dir");
        std::fs::write(path.join("content.xml"), "<flow/>").expect("test: write content");
        if let Some(json) = descriptor_json {
            std::fs::write(path.join("artifact.json"), json).expect("test: write descriptor");
        }
        path
    }

    #[test]
    fn discover_defaults_to_directory_name() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let path = exploded(dir.path(), "orders", None);

        let descriptor =
            ArtifactDescriptor::discover(ArtifactKind::Application, &path).expect("discover");
        assert_eq!(descriptor.id.as_str(), "orders");
        assert_eq!(descriptor.kind, ArtifactKind::Application);
        assert!(descriptor.domain.is_none());
        assert_eq!(descriptor.data_folder, "orders");
    }

    #[test]
    fn discover_reads_declared_domain() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let path = exploded(dir.path(), "orders", Some(r#"{"domain": "shared-http"}"#));

        let descriptor =
            ArtifactDescriptor::discover(ArtifactKind::Application, &path).expect("discover");
        assert_eq!(
            descriptor.domain.as_ref().map(ArtifactId::as_str),
            Some("shared-http")
        );
    }

    #[test]
    fn policy_without_target_is_rejected() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let path = exploded(dir.path(), "throttle", None);

        let result = ArtifactDescriptor::discover(ArtifactKind::Policy, &path);
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn native_libs_folder_is_unique_per_discovery() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let path = exploded(dir.path(), "orders", None);

        let first =
            ArtifactDescriptor::discover(ArtifactKind::Application, &path).expect("discover");
        let second =
            ArtifactDescriptor::discover(ArtifactKind::Application, &path).expect("discover");
        assert_ne!(first.native_libs_folder, second.native_libs_folder);
        assert!(first.native_libs_folder.starts_with("orders-"));
    }

    #[test]
    fn discover_missing_directory_fails() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let result =
            ArtifactDescriptor::discover(ArtifactKind::Application, &dir.path().join("ghost"));
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn watermark_tracks_newest_file() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let path = exploded(dir.path(), "orders", None);
        let before = newest_modification(&path).expect("watermark");

        // Filesystem mtime granularity can be coarse; force a distinct stamp.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        std::fs::write(path.join("content.xml"), "<flow name='v2'/>").expect("test: rewrite");

        let after = newest_modification(&path).expect("watermark");
        assert!(after > before);
    }
}
