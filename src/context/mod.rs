//! Isolated execution context (IEC).
//!
//! One context exists per artifact instance and owns every resource loaded
//! for it. The context is an arena: allocate on deploy, free everything
//! atomically on dispose. Domains are shared through an explicit parent
//! link; disposing a child never disposes its parent.
//!
//! After `dispose` returns and the owning deployer drops its handle, nothing
//! outside the context may retain a strong reference to it; this is what
//! keeps repeated hot-redeploys from accumulating loaded-code instances.
//! Tests verify the property through [`ReachabilityProbe`].

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::artifact::{ArtifactDescriptor, ArtifactKind};
use crate::recovery::isolate;
use crate::types::ArtifactId;

/// Describes what is being released, passed to every disposal listener.
#[derive(Debug, Clone)]
pub struct DisposalContext {
    pub artifact_id: ArtifactId,
    pub kind: ArtifactKind,
}

/// Extension-supplied disposal hook. Failures are isolated per listener.
pub trait DisposalListener: Send + Sync {
    fn on_dispose(&self, ctx: &DisposalContext) -> crate::types::Result<()>;
}

/// Legacy resource releaser. At most one per context.
pub trait ResourceReleaser: Send + Sync {
    fn release(&self) -> crate::types::Result<()>;
}

/// Relative ordering between the legacy releaser and the disposal listener
/// chain. The ordering is observable; treat it as configurable precedence,
/// not a fixed law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReleaserPrecedence {
    BeforeListeners,
    #[default]
    AfterListeners,
}

/// Runtime container owning all loaded resources for one artifact instance.
pub struct ExecutionContext {
    artifact_id: ArtifactId,
    kind: ArtifactKind,
    parent: Option<Arc<ExecutionContext>>,
    listeners: Mutex<Vec<Box<dyn DisposalListener>>>,
    releaser: Mutex<Option<Box<dyn ResourceReleaser>>>,
    precedence: ReleaserPrecedence,
    resources: Mutex<Vec<Box<dyn Any + Send>>>,
    disposed: AtomicBool,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("artifact_id", &self.artifact_id)
            .field("kind", &self.kind)
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl ExecutionContext {
    /// Create a context for an artifact instance. Applications pass their
    /// domain's context as `parent`.
    pub fn new(descriptor: &ArtifactDescriptor, parent: Option<Arc<ExecutionContext>>) -> Self {
        Self::with_precedence(descriptor, parent, ReleaserPrecedence::default())
    }

    pub fn with_precedence(
        descriptor: &ArtifactDescriptor,
        parent: Option<Arc<ExecutionContext>>,
        precedence: ReleaserPrecedence,
    ) -> Self {
        Self {
            artifact_id: descriptor.id.clone(),
            kind: descriptor.kind,
            parent,
            listeners: Mutex::new(Vec::new()),
            releaser: Mutex::new(None),
            precedence,
            resources: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn artifact_id(&self) -> &ArtifactId {
        &self.artifact_id
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn parent(&self) -> Option<&Arc<ExecutionContext>> {
        self.parent.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Register an extension-supplied disposal hook. Notification order is
    /// registration order.
    pub fn add_disposal_listener(&self, listener: Box<dyn DisposalListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    /// Configure the legacy resource releaser. At most one may be set.
    pub fn set_resource_releaser(
        &self,
        releaser: Box<dyn ResourceReleaser>,
    ) -> crate::types::Result<()> {
        let mut slot = self
            .releaser
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return Err(crate::types::Error::validation(format!(
                "context for '{}' already has a resource releaser",
                self.artifact_id
            )));
        }
        *slot = Some(releaser);
        Ok(())
    }

    /// Hand ownership of a loaded resource to the arena. The resource is
    /// dropped during dispose.
    pub fn register_resource(&self, resource: Box<dyn Any + Send>) {
        self.resources
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(resource);
    }

    /// Tear the context down.
    ///
    /// Invokes every disposal listener and the legacy releaser (relative
    /// order per [`ReleaserPrecedence`]), isolating each failure so one hook
    /// cannot prevent the rest from running, then drops all owned resources.
    /// Idempotent; the parent context is never touched.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let disposal = DisposalContext {
            artifact_id: self.artifact_id.clone(),
            kind: self.kind,
        };

        if self.precedence == ReleaserPrecedence::BeforeListeners {
            self.run_releaser();
        }

        let listeners = std::mem::take(
            &mut *self
                .listeners
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for (index, listener) in listeners.iter().enumerate() {
            if let Err(err) = isolate(|| listener.on_dispose(&disposal), "disposal_listener") {
                tracing::warn!(
                    "disposal_listener_failed: artifact={}, index={}, error={}",
                    self.artifact_id,
                    index,
                    err
                );
            }
        }

        if self.precedence == ReleaserPrecedence::AfterListeners {
            self.run_releaser();
        }

        self.resources
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();

        tracing::debug!(
            "context_disposed: artifact={}, kind={}",
            self.artifact_id,
            self.kind
        );
    }

    fn run_releaser(&self) {
        let releaser = self
            .releaser
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(releaser) = releaser {
            if let Err(err) = isolate(|| releaser.release(), "resource_releaser") {
                tracing::warn!(
                    "resource_releaser_failed: artifact={}, error={}",
                    self.artifact_id,
                    err
                );
            }
        }
    }
}

/// Collectibility testing hook.
///
/// Holds only a weak handle to a context; once every strong reference is
/// gone the probe reports the context as collected. This is the host-
/// independent expression of "the IEC is unreachable after undeploy".
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    weak: Weak<ExecutionContext>,
}

impl ReachabilityProbe {
    pub fn of(context: &Arc<ExecutionContext>) -> Self {
        Self {
            weak: Arc::downgrade(context),
        }
    }

    /// True once no strong reference to the context remains.
    pub fn is_collected(&self) -> bool {
        self.weak.upgrade().is_none()
    }

    /// Poll within a bounded window for the context to become unreachable.
    pub async fn await_collected(&self, window: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            if self.is_collected() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
