//! Artifact builder collaborator.
//!
//! Building the content of an artifact (flows, processing graphs, config)
//! is outside this engine. The deployer hands the builder a descriptor and
//! the freshly-created execution context; everything the builder loads must
//! be registered into that context so undeploy can reclaim it.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::artifact::ArtifactDescriptor;
use crate::context::ExecutionContext;
use crate::types::{ArtifactId, Error, Result};

#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    async fn build(
        &self,
        descriptor: &ArtifactDescriptor,
        context: &Arc<ExecutionContext>,
    ) -> Result<()>;
}

/// Builder that loads nothing. Used when artifact content is managed
/// entirely by extensions hooked into the execution context.
#[derive(Debug, Default)]
pub struct NoopBuilder;

#[async_trait]
impl ArtifactBuilder for NoopBuilder {
    async fn build(
        &self,
        _descriptor: &ArtifactDescriptor,
        _context: &Arc<ExecutionContext>,
    ) -> Result<()> {
        Ok(())
    }
}

/// Decorator that fails construction for selected artifact ids.
///
/// Fault injection for tests and staged rollouts is done by wrapping the
/// real builder at construction time, never by process-wide mutable state.
pub struct FailingBuilder {
    inner: Arc<dyn ArtifactBuilder>,
    fail_ids: Mutex<HashSet<ArtifactId>>,
}

impl std::fmt::Debug for FailingBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailingBuilder").finish()
    }
}

impl FailingBuilder {
    pub fn wrapping(inner: Arc<dyn ArtifactBuilder>) -> Self {
        Self {
            inner,
            fail_ids: Mutex::new(HashSet::new()),
        }
    }

    /// Make construction of `id` fail until `heal` is called for it.
    pub fn fail_for(&self, id: ArtifactId) {
        self.fail_ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id);
    }

    pub fn heal(&self, id: &ArtifactId) {
        self.fail_ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
    }
}

#[async_trait]
impl ArtifactBuilder for FailingBuilder {
    async fn build(
        &self,
        descriptor: &ArtifactDescriptor,
        context: &Arc<ExecutionContext>,
    ) -> Result<()> {
        let should_fail = self
            .fail_ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&descriptor.id);
        if should_fail {
            return Err(Error::internal(format!(
                "injected build failure for '{}'",
                descriptor.id
            )));
        }
        self.inner.build(descriptor, context).await
    }
}
