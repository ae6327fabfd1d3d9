//! Deployment engine facade.
//!
//! The engine owns every subsystem (deployers, directory watcher, cleanup
//! scheduler, policy registry and cache) as plain structs, not separate
//! actors, and exposes the deployment API consumed by tooling.

mod disabled;

pub use disabled::DisabledDeploymentService;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::artifact::{ArtifactDescriptor, ArtifactKind, ArtifactSummary};
use crate::cleanup::{CleanupScheduler, NoopReclaimHint, ReclaimHint};
use crate::deployer::{
    ArtifactBuilder, ArtifactDeployer, DeploymentListener, DomainAwareDeployer, ListenerRegistry,
};
use crate::policy::{
    chain_fingerprint, CompositePolicy, PolicyInstanceCache, PolicyKey, PolicyParametrization,
    PolicyRegistry,
};
use crate::types::{ArtifactId, ArtifactLayout, EngineConfig, Error, OperationId, PolicyId, Result};
use crate::watcher::DeploymentDirectoryWatcher;

/// Lifecycle operations exposed to operators and tooling.
#[async_trait]
pub trait DeploymentService: Send + Sync {
    async fn deploy_application(&self, location: &Path) -> Result<()>;
    async fn undeploy_application(&self, id: &ArtifactId) -> Result<()>;
    async fn redeploy_application(&self, id: &ArtifactId) -> Result<()>;

    async fn deploy_domain(&self, location: &Path) -> Result<()>;
    async fn undeploy_domain(&self, id: &ArtifactId) -> Result<()>;
    async fn redeploy_domain(&self, id: &ArtifactId) -> Result<()>;

    fn applications(&self) -> Vec<ArtifactSummary>;
    fn domains(&self) -> Vec<ArtifactSummary>;
    fn register_listener(&self, scope: ArtifactKind, listener: Arc<dyn DeploymentListener>);
}

/// The deployment engine: discovery, lifecycle, isolation, policies.
pub struct DeploymentEngine {
    layout: ArtifactLayout,
    listeners: Arc<ListenerRegistry>,
    cleanup: Arc<CleanupScheduler>,
    deployer: Arc<DomainAwareDeployer>,
    policies: Arc<PolicyRegistry>,
    policy_cache: Arc<PolicyInstanceCache>,
    watcher: Arc<DeploymentDirectoryWatcher>,
}

impl std::fmt::Debug for DeploymentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentEngine")
            .field("base", &self.layout.base())
            .finish()
    }
}

impl DeploymentEngine {
    pub fn new(
        layout: ArtifactLayout,
        config: EngineConfig,
        builder: Arc<dyn ArtifactBuilder>,
    ) -> Result<Self> {
        Self::with_reclaim_hint(layout, config, builder, Arc::new(NoopReclaimHint))
    }

    pub fn with_reclaim_hint(
        layout: ArtifactLayout,
        config: EngineConfig,
        builder: Arc<dyn ArtifactBuilder>,
        hint: Arc<dyn ReclaimHint>,
    ) -> Result<Self> {
        layout.ensure()?;

        let listeners = Arc::new(ListenerRegistry::default());
        let cleanup = Arc::new(CleanupScheduler::new(hint));

        let domains = Arc::new(ArtifactDeployer::new(
            ArtifactKind::Domain,
            layout.clone(),
            Arc::clone(&builder),
            Arc::clone(&listeners),
            Arc::clone(&cleanup),
            config.cleanup.clone(),
        ));
        let applications = Arc::new(
            ArtifactDeployer::new(
                ArtifactKind::Application,
                layout.clone(),
                builder,
                Arc::clone(&listeners),
                Arc::clone(&cleanup),
                config.cleanup.clone(),
            )
            .with_parent_source(Arc::clone(&domains)),
        );
        let deployer = Arc::new(DomainAwareDeployer::new(domains, applications));

        let watcher = Arc::new(DeploymentDirectoryWatcher::new(
            layout.clone(),
            config.watcher.clone(),
            config.parallel_deployment,
            Arc::clone(&deployer),
        ));

        Ok(Self {
            layout,
            listeners,
            cleanup,
            deployer,
            policies: Arc::new(PolicyRegistry::default()),
            policy_cache: Arc::new(PolicyInstanceCache::default()),
            watcher,
        })
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn watcher(&self) -> &Arc<DeploymentDirectoryWatcher> {
        &self.watcher
    }

    pub fn cleanup(&self) -> &Arc<CleanupScheduler> {
        &self.cleanup
    }

    pub fn deployer(&self) -> &Arc<DomainAwareDeployer> {
        &self.deployer
    }

    /// Start periodic reconciliation.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        self.watcher.start()
    }

    /// Stop reconciliation and cancel pending cleanup retries.
    pub fn shutdown(&self) {
        self.watcher.stop();
        self.cleanup.cancel_all();
    }

    // ---- policies -------------------------------------------------------

    /// Apply a policy to a deployed application. Every change to the policy
    /// set invalidates the application's cached composite instances.
    pub fn add_policy(
        &self,
        application: &ArtifactId,
        parametrization: PolicyParametrization,
    ) -> Result<()> {
        if self.deployer.applications().state_of(application).is_none() {
            return Err(Error::not_found(format!(
                "application '{}' is not deployed",
                application
            )));
        }
        self.policies.add(application, parametrization);
        self.policy_cache.invalidate(application);
        Ok(())
    }

    /// Remove a policy from a deployed application.
    pub fn remove_policy(&self, application: &ArtifactId, policy: &PolicyId) -> Result<()> {
        self.policies.remove(application, policy)?;
        self.policy_cache.invalidate(application);
        Ok(())
    }

    /// Composite policy instance for an operation of a deployed application.
    pub fn operation_policy(
        &self,
        application: &ArtifactId,
        operation: &OperationId,
    ) -> Result<Arc<CompositePolicy>> {
        if self.deployer.applications().state_of(application).is_none() {
            return Err(Error::not_found(format!(
                "application '{}' is not deployed",
                application
            )));
        }
        let chain = self.policies.chain(application);
        let key = PolicyKey {
            application: application.clone(),
            operation: operation.clone(),
            fingerprint: chain_fingerprint(&chain),
        };
        Ok(self
            .policy_cache
            .get_or_create(key, || CompositePolicy::new(application.clone(), chain)))
    }
}

#[async_trait]
impl DeploymentService for DeploymentEngine {
    async fn deploy_application(&self, location: &Path) -> Result<()> {
        let descriptor = ArtifactDescriptor::discover(ArtifactKind::Application, location)?;
        self.deployer.applications().deploy(descriptor).await
    }

    async fn undeploy_application(&self, id: &ArtifactId) -> Result<()> {
        self.deployer.applications().undeploy(id, true).await?;
        // The application is gone; its policy chain and cached composites
        // go with it.
        self.policies.clear(id);
        self.policy_cache.invalidate(id);
        Ok(())
    }

    async fn redeploy_application(&self, id: &ArtifactId) -> Result<()> {
        self.deployer.applications().redeploy(id).await?;
        self.policy_cache.invalidate(id);
        Ok(())
    }

    async fn deploy_domain(&self, location: &Path) -> Result<()> {
        let descriptor = ArtifactDescriptor::discover(ArtifactKind::Domain, location)?;
        self.deployer.deploy_domain(descriptor).await
    }

    async fn undeploy_domain(&self, id: &ArtifactId) -> Result<()> {
        self.deployer.undeploy_domain(id, true).await
    }

    async fn redeploy_domain(&self, id: &ArtifactId) -> Result<()> {
        self.deployer.redeploy_domain(id).await
    }

    fn applications(&self) -> Vec<ArtifactSummary> {
        self.deployer.applications().summaries()
    }

    fn domains(&self) -> Vec<ArtifactSummary> {
        self.deployer.domains().summaries()
    }

    fn register_listener(&self, scope: ArtifactKind, listener: Arc<dyn DeploymentListener>) {
        self.listeners.register(scope, listener);
    }
}
