//! Domain-aware deployment.
//!
//! Domains are shared artifacts: applications reference them and use their
//! execution context as a parent. Removing a domain therefore cascades:
//! every dependent application is undeployed first, in deterministic
//! (sorted) order, before the domain itself goes.

use std::sync::Arc;

use super::ArtifactDeployer;
use crate::artifact::ArtifactDescriptor;
use crate::types::{ArtifactId, Error, Result};

#[derive(Debug)]
pub struct DomainAwareDeployer {
    domains: Arc<ArtifactDeployer>,
    applications: Arc<ArtifactDeployer>,
}

impl DomainAwareDeployer {
    pub fn new(domains: Arc<ArtifactDeployer>, applications: Arc<ArtifactDeployer>) -> Self {
        Self {
            domains,
            applications,
        }
    }

    pub fn domains(&self) -> &Arc<ArtifactDeployer> {
        &self.domains
    }

    pub fn applications(&self) -> &Arc<ArtifactDeployer> {
        &self.applications
    }

    pub async fn deploy_domain(&self, descriptor: ArtifactDescriptor) -> Result<()> {
        self.domains.deploy(descriptor).await
    }

    /// Undeploy a domain, cascading to its dependent applications first.
    /// An unknown domain identity is an immediate error, not a no-op.
    pub async fn undeploy_domain(&self, id: &ArtifactId, remove_data: bool) -> Result<()> {
        if self.domains.state_of(id).is_none() {
            return Err(Error::not_found(format!("domain '{}' is not deployed", id)));
        }

        for app in self.applications.dependents_of(id) {
            tracing::info!("cascading_undeploy: domain={}, application={}", id, app);
            self.applications.undeploy(&app, remove_data).await?;
        }

        self.domains.undeploy(id, remove_data).await
    }

    /// Redeploy a domain: dependent applications are undeployed, the domain
    /// is rebuilt, and the applications are deployed again on top of the
    /// fresh domain context.
    pub async fn redeploy_domain(&self, id: &ArtifactId) -> Result<()> {
        if self.domains.state_of(id).is_none() {
            return Err(Error::not_found(format!("domain '{}' is not deployed", id)));
        }

        let dependents = self.applications.dependents_of(id);
        let mut locations = Vec::with_capacity(dependents.len());
        for app in &dependents {
            if let Some(descriptor) = self.applications.descriptor_of(app) {
                locations.push(descriptor.location);
            }
            self.applications.undeploy(app, true).await?;
        }

        self.domains.redeploy(id).await?;

        for location in locations {
            let descriptor =
                ArtifactDescriptor::discover(self.applications.kind(), &location)?;
            self.applications.deploy(descriptor).await?;
        }
        Ok(())
    }
}
