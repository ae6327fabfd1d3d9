//! Deployable artifacts: descriptors, lifecycle states, deployed instances.

mod descriptor;
mod state;

pub use descriptor::{newest_modification, ArtifactDescriptor, ArtifactKind};
pub use state::ArtifactState;

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::context::ExecutionContext;

/// A currently-active artifact instance, owned exclusively by the deployer
/// that created it.
///
/// Destroyed (not merely dereferenced) on undeploy: the execution context is
/// disposed and dropped so nothing outside retains the loaded graph.
#[derive(Debug)]
pub struct DeployedArtifact {
    pub descriptor: ArtifactDescriptor,
    /// `None` once the instance failed or was torn down.
    pub context: Option<Arc<ExecutionContext>>,
    pub state: ArtifactState,
    pub deployed_at: Option<DateTime<Utc>>,
}

impl DeployedArtifact {
    pub fn new(descriptor: ArtifactDescriptor) -> Self {
        Self {
            descriptor,
            context: None,
            state: ArtifactState::NotDeployed,
            deployed_at: None,
        }
    }

    pub fn id(&self) -> &crate::types::ArtifactId {
        &self.descriptor.id
    }
}

/// Lightweight view of a deployed artifact for listings and tooling.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ArtifactSummary {
    pub id: crate::types::ArtifactId,
    pub kind: ArtifactKind,
    pub state: ArtifactState,
}

impl From<&DeployedArtifact> for ArtifactSummary {
    fn from(artifact: &DeployedArtifact) -> Self {
        Self {
            id: artifact.descriptor.id.clone(),
            kind: artifact.descriptor.kind,
            state: artifact.state,
        }
    }
}
