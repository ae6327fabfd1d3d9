//! Artifact lifecycle deployer.
//!
//! Drives one artifact kind through deploy/start/stop/undeploy with listener
//! notification and failure isolation. The deployer is the exclusive owner
//! of its deployed-artifact registry; per-identity mutexes serialize
//! lifecycle operations so a deploy and an undeploy of the same id can
//! never interleave, while different ids proceed independently.

mod builder;
mod domain;

pub use builder::{ArtifactBuilder, FailingBuilder, NoopBuilder};
pub use domain::DomainAwareDeployer;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use crate::artifact::{ArtifactDescriptor, ArtifactKind, ArtifactState, ArtifactSummary, DeployedArtifact};
use crate::cleanup::{CleanupScheduler, CleanupTask};
use crate::context::{ExecutionContext, ReleaserPrecedence};
use crate::recovery::isolate;
use crate::types::{ArtifactId, ArtifactLayout, CleanupConfig, Error, Result};

/// Lifecycle transition callbacks supplied by operators and tooling.
///
/// `on_deployment_start` failures abort the deployment; every other
/// notification is isolated per listener.
pub trait DeploymentListener: Send + Sync {
    fn on_deployment_start(&self, _id: &ArtifactId) -> Result<()> {
        Ok(())
    }
    fn on_deployment_success(&self, _id: &ArtifactId) {}
    fn on_deployment_failure(&self, _id: &ArtifactId, _cause: &Error) {}
    fn on_undeployment_success(&self, _id: &ArtifactId) {}
}

/// Ordered, kind-scoped listener registrations. Listeners are owned by
/// whoever registers them and survive the whole watcher lifetime;
/// notification order is insertion order.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: RwLock<Vec<(ArtifactKind, Arc<dyn DeploymentListener>)>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len();
        f.debug_struct("ListenerRegistry").field("len", &len).finish()
    }
}

impl ListenerRegistry {
    pub fn register(&self, scope: ArtifactKind, listener: Arc<dyn DeploymentListener>) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((scope, listener));
    }

    fn scoped(&self, kind: ArtifactKind) -> Vec<Arc<dyn DeploymentListener>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(scope, _)| *scope == kind)
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

/// Folder deletion seam. The default goes straight to the filesystem; tests
/// wrap it to inject transient failures.
pub trait FolderRemover: Send + Sync {
    fn remove(&self, path: &Path) -> std::io::Result<()>;
}

/// Removes directory trees via the filesystem.
#[derive(Debug, Default)]
pub struct FsFolderRemover;

impl FolderRemover for FsFolderRemover {
    fn remove(&self, path: &Path) -> std::io::Result<()> {
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        Ok(())
    }
}

/// Deployer for one artifact kind.
pub struct ArtifactDeployer {
    kind: ArtifactKind,
    layout: ArtifactLayout,
    builder: Arc<dyn ArtifactBuilder>,
    listeners: Arc<ListenerRegistry>,
    cleanup: Arc<CleanupScheduler>,
    cleanup_config: CleanupConfig,
    precedence: ReleaserPrecedence,
    folder_remover: Arc<dyn FolderRemover>,
    /// Source of parent contexts (the domain deployer, for applications).
    parent_source: Option<Arc<ArtifactDeployer>>,
    artifacts: Mutex<HashMap<ArtifactId, DeployedArtifact>>,
    id_locks: Mutex<HashMap<ArtifactId, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for ArtifactDeployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactDeployer")
            .field("kind", &self.kind)
            .field("deployed", &self.summaries().len())
            .finish()
    }
}

impl ArtifactDeployer {
    pub fn new(
        kind: ArtifactKind,
        layout: ArtifactLayout,
        builder: Arc<dyn ArtifactBuilder>,
        listeners: Arc<ListenerRegistry>,
        cleanup: Arc<CleanupScheduler>,
        cleanup_config: CleanupConfig,
    ) -> Self {
        Self {
            kind,
            layout,
            builder,
            listeners,
            cleanup,
            cleanup_config,
            precedence: ReleaserPrecedence::default(),
            folder_remover: Arc::new(FsFolderRemover),
            parent_source: None,
            artifacts: Mutex::new(HashMap::new()),
            id_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Applications resolve their domain's context through this deployer.
    pub fn with_parent_source(mut self, source: Arc<ArtifactDeployer>) -> Self {
        self.parent_source = Some(source);
        self
    }

    pub fn with_precedence(mut self, precedence: ReleaserPrecedence) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn with_folder_remover(mut self, remover: Arc<dyn FolderRemover>) -> Self {
        self.folder_remover = remover;
        self
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    // ---- registry views -------------------------------------------------

    pub fn summaries(&self) -> Vec<ArtifactSummary> {
        let mut out: Vec<ArtifactSummary> = self
            .registry()
            .values()
            .map(ArtifactSummary::from)
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn state_of(&self, id: &ArtifactId) -> Option<ArtifactState> {
        self.registry().get(id).map(|a| a.state)
    }

    pub fn descriptor_of(&self, id: &ArtifactId) -> Option<ArtifactDescriptor> {
        self.registry().get(id).map(|a| a.descriptor.clone())
    }

    /// Execution context of a deployed artifact (used as the parent for
    /// dependent artifacts).
    pub fn context_of(&self, id: &ArtifactId) -> Option<Arc<ExecutionContext>> {
        self.registry().get(id).and_then(|a| a.context.clone())
    }

    /// Ids of registry entries (any state), sorted for determinism.
    pub fn known_ids(&self) -> Vec<ArtifactId> {
        let mut ids: Vec<ArtifactId> = self.registry().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Ids of deployed applications referencing the given domain, sorted.
    pub fn dependents_of(&self, domain: &ArtifactId) -> Vec<ArtifactId> {
        let mut ids: Vec<ArtifactId> = self
            .registry()
            .values()
            .filter(|a| a.descriptor.domain.as_ref() == Some(domain))
            .map(|a| a.descriptor.id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<ArtifactId, DeployedArtifact>> {
        self.artifacts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn id_lock(&self, id: &ArtifactId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .id_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    // ---- lifecycle operations -------------------------------------------

    /// Deploy a discovered artifact. One in-flight lifecycle operation per
    /// identity; a concurrent undeploy of the same id waits for this deploy
    /// to reach a terminal state.
    pub async fn deploy(&self, descriptor: ArtifactDescriptor) -> Result<()> {
        let lock = self.id_lock(&descriptor.id);
        let _serial = lock.lock().await;
        self.deploy_locked(descriptor).await
    }

    /// Undeploy. Unknown ids are an immediate error, never a silent no-op.
    pub async fn undeploy(&self, id: &ArtifactId, remove_data: bool) -> Result<()> {
        let lock = self.id_lock(id);
        let _serial = lock.lock().await;
        self.undeploy_locked(id, remove_data)
    }

    /// Undeploy followed by a fresh deploy of the same identity. The new
    /// instance gets a brand-new execution context; nothing leaks from the
    /// disposed one.
    pub async fn redeploy(&self, id: &ArtifactId) -> Result<()> {
        let lock = self.id_lock(id);
        let _serial = lock.lock().await;

        let location = self
            .registry()
            .get(id)
            .map(|a| a.descriptor.location.clone())
            .ok_or_else(|| {
                Error::not_found(format!("{} '{}' is not deployed", self.kind, id))
            })?;

        self.undeploy_locked(id, true)?;
        let descriptor = ArtifactDescriptor::discover(self.kind, &location)?;
        self.deploy_locked(descriptor).await
    }

    async fn deploy_locked(&self, descriptor: ArtifactDescriptor) -> Result<()> {
        let id = descriptor.id.clone();

        {
            let mut registry = self.registry();
            if let Some(existing) = registry.get(&id) {
                if existing.state != ArtifactState::Failed {
                    return Err(Error::state_transition(format!(
                        "cannot deploy {} '{}': state is {:?}, expected NotDeployed",
                        self.kind, id, existing.state
                    )));
                }
                // A failed instance is replaced by the fresh attempt.
                registry.remove(&id);
            }
            let mut entry = DeployedArtifact::new(descriptor.clone());
            entry.state = ArtifactState::Deploying;
            registry.insert(id.clone(), entry);
        }

        tracing::info!("deploying_artifact: kind={}, id={}", self.kind, id);

        match self.construct(&descriptor).await {
            Ok(context) => {
                {
                    let mut registry = self.registry();
                    if let Some(entry) = registry.get_mut(&id) {
                        entry.context = Some(context);
                        entry.state = ArtifactState::Deployed;
                        entry.deployed_at = Some(chrono::Utc::now());
                    }
                }
                self.write_anchor(&id);
                for listener in self.listeners.scoped(self.kind) {
                    let _ = isolate(
                        || {
                            listener.on_deployment_success(&id);
                            Ok(())
                        },
                        "on_deployment_success",
                    );
                }
                tracing::info!("artifact_deployed: kind={}, id={}", self.kind, id);
                Ok(())
            }
            Err(cause) => {
                {
                    let mut registry = self.registry();
                    if let Some(entry) = registry.get_mut(&id) {
                        entry.context = None;
                        entry.state = ArtifactState::Failed;
                    }
                }
                let err = Error::deployment(id.as_str(), cause);
                for listener in self.listeners.scoped(self.kind) {
                    let _ = isolate(
                        || {
                            listener.on_deployment_failure(&id, err.deployment_cause());
                            Ok(())
                        },
                        "on_deployment_failure",
                    );
                }
                tracing::error!(
                    "artifact_deployment_failed: kind={}, id={}, error={}",
                    self.kind,
                    id,
                    err
                );
                Err(err)
            }
        }
    }

    /// Build the descriptor's context and content. On any failure the
    /// partially-constructed context is disposed and dropped before the
    /// error propagates, so nothing keeps it reachable.
    async fn construct(&self, descriptor: &ArtifactDescriptor) -> Result<Arc<ExecutionContext>> {
        for listener in self.listeners.scoped(self.kind) {
            isolate(
                || listener.on_deployment_start(&descriptor.id),
                "on_deployment_start",
            )?;
        }

        let parent = self.resolve_parent(descriptor)?;
        let context = Arc::new(ExecutionContext::with_precedence(
            descriptor,
            parent,
            self.precedence,
        ));

        let built: Result<()> = async {
            self.builder.build(descriptor, &context).await?;
            std::fs::create_dir_all(self.layout.data_dir(&descriptor.data_folder))?;
            std::fs::create_dir_all(self.layout.native_libs_dir(&descriptor.native_libs_folder))?;
            Ok(())
        }
        .await;

        match built {
            Ok(()) => Ok(context),
            Err(err) => {
                context.dispose();
                drop(context);
                Err(err)
            }
        }
    }

    fn resolve_parent(
        &self,
        descriptor: &ArtifactDescriptor,
    ) -> Result<Option<Arc<ExecutionContext>>> {
        let Some(domain) = &descriptor.domain else {
            return Ok(None);
        };
        let Some(source) = &self.parent_source else {
            return Err(Error::validation(format!(
                "artifact '{}' declares domain '{}' but this deployer has no domain source",
                descriptor.id, domain
            )));
        };
        source.context_of(domain).map(Some).ok_or_else(|| {
            Error::not_found(format!(
                "domain '{}' required by '{}' is not deployed",
                domain, descriptor.id
            ))
        })
    }

    fn undeploy_locked(&self, id: &ArtifactId, remove_data: bool) -> Result<()> {
        // Guard first: unknown ids are an error before any side effect. A
        // FAILED instance has no live context; it skips the stop sequence.
        let (descriptor, live) = {
            let mut registry = self.registry();
            let entry = registry.get_mut(id).ok_or_else(|| {
                Error::not_found(format!("{} '{}' is not deployed", self.kind, id))
            })?;
            let live = entry.state == ArtifactState::Deployed;
            if live {
                entry.state = ArtifactState::Stopping;
            }
            (entry.descriptor.clone(), live)
        };

        tracing::info!("undeploying_artifact: kind={}, id={}", self.kind, id);
        self.remove_anchor(id);

        if live {
            let context = {
                let mut registry = self.registry();
                registry.get_mut(id).and_then(|entry| {
                    entry.state = ArtifactState::Undeploying;
                    entry.context.take()
                })
            };
            if let Some(context) = context {
                context.dispose();
                drop(context);
            }
        }

        // Native-library temp folders are never data worth preserving.
        self.remove_or_defer(&self.layout.native_libs_dir(&descriptor.native_libs_folder));
        if remove_data {
            self.remove_or_defer(&self.layout.data_dir(&descriptor.data_folder));
        }

        // The artifact is gone from the registry regardless of how the
        // folder removals went.
        self.registry().remove(id);
        for listener in self.listeners.scoped(self.kind) {
            let _ = isolate(
                || {
                    listener.on_undeployment_success(id);
                    Ok(())
                },
                "on_undeployment_success",
            );
        }
        tracing::info!("artifact_undeployed: kind={}, id={}", self.kind, id);
        Ok(())
    }

    /// Remove a folder now, or hand it to the retry scheduler. Removal
    /// failures never propagate as deployment errors.
    fn remove_or_defer(&self, path: &Path) {
        if !path.exists() {
            return;
        }
        if let Err(err) = self.folder_remover.remove(path) {
            tracing::warn!(
                "folder_removal_deferred: path={}, error={}",
                path.display(),
                err
            );
            self.cleanup.schedule(
                CleanupTask::folder(path, self.cleanup_config.max_attempts),
                self.cleanup_config.initial_delay,
                self.cleanup_config.period,
            );
        }
    }

    // ---- anchor markers -------------------------------------------------

    /// Written only after deployment fully completes; external tooling polls
    /// for its presence as the completion signal.
    fn write_anchor(&self, id: &ArtifactId) {
        let path = self.layout.anchor_path(self.kind, id);
        if let Err(err) = std::fs::write(
            &path,
            "Delete this file while the runtime is running to undeploy this artifact cleanly.\n",
        ) {
            tracing::warn!(
                "anchor_write_failed: path={}, error={}",
                path.display(),
                err
            );
        }
    }

    /// Removed before an undeploy starts.
    fn remove_anchor(&self, id: &ArtifactId) {
        let path = self.layout.anchor_path(self.kind, id);
        if path.exists() {
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::warn!(
                    "anchor_remove_failed: path={}, error={}",
                    path.display(),
                    err
                );
            }
        }
    }

    pub fn anchor_exists(&self, id: &ArtifactId) -> bool {
        self.layout.anchor_path(self.kind, id).exists()
    }
}
