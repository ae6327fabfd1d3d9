//! Disabled deployment mode.
//!
//! Used when the engine runs in a context where dynamic deployment is
//! intentionally turned off. Every lifecycle operation reports "operation
//! not supported" without touching the filesystem or loading anything;
//! listener and artifact registries still behave as plain in-memory
//! collections so tooling can introspect them.

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::DeploymentService;
use crate::artifact::{ArtifactKind, ArtifactSummary};
use crate::deployer::{DeploymentListener, ListenerRegistry};
use crate::types::{ArtifactId, Error, Result};

#[derive(Default)]
pub struct DisabledDeploymentService {
    listeners: ListenerRegistry,
    applications: Mutex<Vec<ArtifactSummary>>,
    domains: Mutex<Vec<ArtifactSummary>>,
}

impl std::fmt::Debug for DisabledDeploymentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisabledDeploymentService").finish()
    }
}

impl DisabledDeploymentService {
    pub fn new() -> Self {
        Self::default()
    }

    fn unsupported(operation: &str, kind: ArtifactKind) -> Error {
        Error::unsupported(format!(
            "dynamic {} {} is disabled in this context",
            kind, operation
        ))
    }

    /// Seed the registry views (e.g. with statically-provisioned artifacts).
    pub fn record_artifact(&self, summary: ArtifactSummary) {
        let registry = match summary.kind {
            ArtifactKind::Application => &self.applications,
            _ => &self.domains,
        };
        registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(summary);
    }
}

#[async_trait]
impl DeploymentService for DisabledDeploymentService {
    async fn deploy_application(&self, _location: &Path) -> Result<()> {
        Err(Self::unsupported("deployment", ArtifactKind::Application))
    }

    async fn undeploy_application(&self, _id: &ArtifactId) -> Result<()> {
        Err(Self::unsupported("undeployment", ArtifactKind::Application))
    }

    async fn redeploy_application(&self, _id: &ArtifactId) -> Result<()> {
        Err(Self::unsupported("redeployment", ArtifactKind::Application))
    }

    async fn deploy_domain(&self, _location: &Path) -> Result<()> {
        Err(Self::unsupported("deployment", ArtifactKind::Domain))
    }

    async fn undeploy_domain(&self, _id: &ArtifactId) -> Result<()> {
        Err(Self::unsupported("undeployment", ArtifactKind::Domain))
    }

    async fn redeploy_domain(&self, _id: &ArtifactId) -> Result<()> {
        Err(Self::unsupported("redeployment", ArtifactKind::Domain))
    }

    fn applications(&self) -> Vec<ArtifactSummary> {
        self.applications
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn domains(&self) -> Vec<ArtifactSummary> {
        self.domains
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn register_listener(&self, scope: ArtifactKind, listener: Arc<dyn DeploymentListener>) {
        self.listeners.register(scope, listener);
    }
}
