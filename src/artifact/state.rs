//! Artifact lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Artifact lifecycle state.
///
/// State transitions:
/// ```text
/// NOT_DEPLOYED → DEPLOYING → DEPLOYED → STOPPING → UNDEPLOYING → NOT_DEPLOYED
///                    ↓
///                  FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    NotDeployed,
    Deploying,
    Deployed,
    Stopping,
    Undeploying,
    Failed,
}

impl ArtifactState {
    /// Check if this is a terminal state for the current instance.
    pub fn is_terminal(self) -> bool {
        matches!(self, ArtifactState::NotDeployed | ArtifactState::Failed)
    }

    /// Check if the artifact is serving traffic.
    pub fn is_deployed(self) -> bool {
        self == ArtifactState::Deployed
    }

    /// Check if transition is valid.
    pub fn can_transition_to(self, to: ArtifactState) -> bool {
        match (self, to) {
            // NOT_DEPLOYED
            (ArtifactState::NotDeployed, ArtifactState::Deploying) => true,
            // DEPLOYING
            (ArtifactState::Deploying, ArtifactState::Deployed) => true,
            (ArtifactState::Deploying, ArtifactState::Failed) => true,
            // DEPLOYED
            (ArtifactState::Deployed, ArtifactState::Stopping) => true,
            // STOPPING
            (ArtifactState::Stopping, ArtifactState::Undeploying) => true,
            // UNDEPLOYING
            (ArtifactState::Undeploying, ArtifactState::NotDeployed) => true,
            // FAILED is absorbing for this instance; a fresh instance starts over
            (ArtifactState::Failed, _) => false,
            // All other transitions invalid
            _ => false,
        }
    }
}
