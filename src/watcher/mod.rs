//! Directory watcher / reconciler.
//!
//! Polls the deployable-artifact directories on an interval and keeps the
//! deployed set consistent with the filesystem: new directories are
//! deployed, removed directories (or removed anchor markers) are
//! undeployed, and changed content is redeployed. Domains are reconciled
//! before the applications that depend on them.
//!
//! The watcher runs on its own periodic task and is the single writer of
//! the deployed-artifact registries in the common mode. The optional
//! parallel mode fans one pass's deployments out over a bounded worker
//! pool; per-identity locks in the deployer keep each artifact's
//! transitions serialized.

use futures::StreamExt;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::artifact::{newest_modification, ArtifactDescriptor, ArtifactKind, ArtifactState};
use crate::deployer::{ArtifactDeployer, DomainAwareDeployer};
use crate::types::{ArtifactId, ArtifactLayout, DeploymentMode, WatcherConfig};

/// Invoked once after the initial reconciliation pass completes.
pub trait StartupListener: Send + Sync {
    fn on_startup_complete(&self);
}

pub struct DeploymentDirectoryWatcher {
    layout: ArtifactLayout,
    config: WatcherConfig,
    parallel: bool,
    deployer: Arc<DomainAwareDeployer>,
    startup_listeners: Mutex<Vec<Arc<dyn StartupListener>>>,
    startup_notified: AtomicBool,
    stop_tx: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

impl std::fmt::Debug for DeploymentDirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentDirectoryWatcher")
            .field("base", &self.layout.base())
            .field("mode", &self.config.mode)
            .field("parallel", &self.parallel)
            .finish()
    }
}

impl DeploymentDirectoryWatcher {
    pub fn new(
        layout: ArtifactLayout,
        config: WatcherConfig,
        parallel: bool,
        deployer: Arc<DomainAwareDeployer>,
    ) -> Self {
        Self {
            layout,
            config,
            parallel,
            deployer,
            startup_listeners: Mutex::new(Vec::new()),
            startup_notified: AtomicBool::new(false),
            stop_tx: Mutex::new(None),
        }
    }

    /// Register a startup listener. Safe under concurrent registration; a
    /// listener registered after startup already completed is invoked
    /// immediately.
    pub fn register_startup_listener(&self, listener: Arc<dyn StartupListener>) {
        if self.startup_notified.load(Ordering::SeqCst) {
            listener.on_startup_complete();
            return;
        }
        self.startup_listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    /// Start periodic reconciliation in the background. The initial pass
    /// runs immediately; startup listeners fire once after it completes.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        *self
            .stop_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(stop_tx);

        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            watcher.run_once().await;
            watcher.notify_startup();

            let mut ticker = tokio::time::interval(watcher.config.poll_interval);
            ticker.tick().await; // consume the immediate tick

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        watcher.run_once().await;
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("directory_watcher_stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the reconciliation loop.
    pub fn stop(&self) {
        if let Some(tx) = self
            .stop_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            let _ = tx.send(());
        }
    }

    fn notify_startup(&self) {
        if self.startup_notified.swap(true, Ordering::SeqCst) {
            return;
        }
        let listeners = std::mem::take(
            &mut *self
                .startup_listeners
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for listener in listeners {
            listener.on_startup_complete();
        }
    }

    /// One reconciliation pass. Domains first, then applications.
    pub async fn run_once(&self) {
        self.reconcile_kind(ArtifactKind::Domain).await;
        self.reconcile_kind(ArtifactKind::Application).await;
    }

    async fn reconcile_kind(&self, kind: ArtifactKind) {
        let deployer = self.deployer_for(kind);
        let dir = self.layout.artifacts_dir(kind);
        let on_disk = list_artifact_dirs(&dir);

        // Removed directories and removed anchors both mean "take it down".
        for id in deployer.known_ids() {
            let dir_present = on_disk.contains(id.as_str());
            let anchor_present = deployer.anchor_exists(&id);
            let was_deployed = deployer.state_of(&id) == Some(ArtifactState::Deployed);
            if dir_present && (anchor_present || !was_deployed) {
                continue;
            }
            tracing::info!(
                "artifact_removal_detected: kind={}, id={}, dir_present={}",
                kind,
                id,
                dir_present
            );
            let result = match kind {
                ArtifactKind::Domain => self.deployer.undeploy_domain(&id, true).await,
                _ => deployer.undeploy(&id, true).await,
            };
            if let Err(err) = result {
                tracing::warn!("watcher_undeploy_failed: id={}, error={}", id, err);
            }
        }

        // Selection policy: single-artifact mode deploys only the first
        // discovered artifact and leaves the rest untouched.
        let selected: Vec<String> = match self.config.mode {
            DeploymentMode::Single => on_disk.iter().take(1).cloned().collect(),
            DeploymentMode::Multi => on_disk.iter().cloned().collect(),
        };

        if self.parallel && selected.len() > 1 {
            let limit = std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4);
            futures::stream::iter(selected)
                .for_each_concurrent(limit, |name| async move {
                    self.sync_one(kind, &name).await;
                })
                .await;
        } else {
            for name in selected {
                self.sync_one(kind, &name).await;
            }
        }
    }

    /// Bring one on-disk artifact in line with the registry.
    async fn sync_one(&self, kind: ArtifactKind, name: &str) {
        let deployer = self.deployer_for(kind);
        let location = self.layout.artifacts_dir(kind).join(name);
        let Ok(id) = ArtifactId::from_string(name.to_string()) else {
            return;
        };

        match deployer.state_of(&id) {
            None => {
                match ArtifactDescriptor::discover(kind, &location) {
                    Ok(descriptor) => {
                        if let Err(err) = deployer.deploy(descriptor).await {
                            tracing::warn!(
                                "watcher_deploy_failed: kind={}, id={}, error={}",
                                kind,
                                id,
                                err
                            );
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            "artifact_discovery_failed: kind={}, path={}, error={}",
                            kind,
                            location.display(),
                            err
                        );
                    }
                }
            }
            Some(ArtifactState::Deployed) | Some(ArtifactState::Failed) => {
                if self.content_changed(&deployer, &id, &location) {
                    tracing::info!("artifact_change_detected: kind={}, id={}", kind, id);
                    let result = match kind {
                        ArtifactKind::Domain => self.deployer.redeploy_domain(&id).await,
                        _ => deployer.redeploy(&id).await,
                    };
                    if let Err(err) = result {
                        tracing::warn!(
                            "watcher_redeploy_failed: kind={}, id={}, error={}",
                            kind,
                            id,
                            err
                        );
                    }
                }
            }
            // Mid-transition; the per-id lock will settle it, next pass
            // observes the outcome.
            Some(_) => {}
        }
    }

    fn content_changed(
        &self,
        deployer: &Arc<ArtifactDeployer>,
        id: &ArtifactId,
        location: &Path,
    ) -> bool {
        let Some(descriptor) = deployer.descriptor_of(id) else {
            return false;
        };
        match newest_modification(location) {
            Ok(watermark) => watermark > descriptor.content_watermark,
            Err(err) => {
                tracing::warn!("watermark_probe_failed: id={}, error={}", id, err);
                false
            }
        }
    }

    fn deployer_for(&self, kind: ArtifactKind) -> Arc<ArtifactDeployer> {
        match kind {
            ArtifactKind::Domain => Arc::clone(self.deployer.domains()),
            _ => Arc::clone(self.deployer.applications()),
        }
    }
}

/// Exploded artifact directories under `dir`, sorted by name. Hidden
/// entries and plain files (anchors included) are skipped.
fn list_artifact_dirs(dir: &Path) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return names;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if !name.starts_with('.') {
                names.insert(name.to_string());
            }
        }
    }
    names
}
