//! Operation policy instances.
//!
//! A composite policy wraps one operation's execution in the full ordered
//! chain of policies applied to an application. Composites are expensive to
//! assemble and must be shared: for a given (application, operation,
//! fingerprint) key at most one live instance exists, and concurrent
//! lookups observe the same instance.
//!
//! Whenever the policy set for an application changes (add or remove of
//! *any* policy) every cached composite for that application is stale,
//! because composites are built over the whole chain. Invalidation removes
//! the entries immediately but disposes each instance asynchronously, only
//! after its in-flight operations drain, so sibling policies sharing the
//! underlying pipeline are never disrupted mid-flight.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::types::{ArtifactId, Error, OperationId, PolicyId, Result};

/// One policy applied to an application, with its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyParametrization {
    pub id: PolicyId,
    pub order: i32,
}

impl PolicyParametrization {
    pub fn new(id: PolicyId, order: i32) -> Self {
        Self { id, order }
    }
}

/// Per-application ordered policy chains.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    chains: Mutex<HashMap<ArtifactId, Vec<PolicyParametrization>>>,
}

impl PolicyRegistry {
    /// Add a policy to an application's chain. The chain stays sorted by
    /// order (stable for equal orders).
    pub fn add(&self, application: &ArtifactId, parametrization: PolicyParametrization) {
        let mut chains = self.lock();
        let chain = chains.entry(application.clone()).or_default();
        chain.push(parametrization);
        chain.sort_by_key(|p| p.order);
    }

    /// Remove a policy from an application's chain. Unknown policies are an
    /// error, not a no-op.
    pub fn remove(&self, application: &ArtifactId, policy: &PolicyId) -> Result<()> {
        let mut chains = self.lock();
        let chain = chains.get_mut(application).ok_or_else(|| {
            Error::not_found(format!("application '{}' has no policies", application))
        })?;
        let before = chain.len();
        chain.retain(|p| &p.id != policy);
        if chain.len() == before {
            return Err(Error::not_found(format!(
                "policy '{}' is not applied to application '{}'",
                policy, application
            )));
        }
        Ok(())
    }

    /// Snapshot of the current chain, in execution order.
    pub fn chain(&self, application: &ArtifactId) -> Vec<PolicyParametrization> {
        self.lock().get(application).cloned().unwrap_or_default()
    }

    /// Drop every chain for an application (application undeployed).
    pub fn clear(&self, application: &ArtifactId) {
        self.lock().remove(application);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ArtifactId, Vec<PolicyParametrization>>> {
        self.chains
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Cache key. The fingerprint is independent of any per-event correlation
/// context; identical operations under an unchanged chain hash identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyKey {
    pub application: ArtifactId,
    pub operation: OperationId,
    pub fingerprint: u64,
}

/// Correlation-independent fingerprint of a policy chain.
pub fn chain_fingerprint(chain: &[PolicyParametrization]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for parametrization in chain {
        parametrization.id.as_str().hash(&mut hasher);
        parametrization.order.hash(&mut hasher);
    }
    hasher.finish()
}

/// Composite policy instance: the ordered chain wrapping one operation.
pub struct CompositePolicy {
    application: ArtifactId,
    chain: Vec<PolicyParametrization>,
    in_flight: AtomicUsize,
    disposed: AtomicBool,
}

impl std::fmt::Debug for CompositePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositePolicy")
            .field("application", &self.application)
            .field("chain_len", &self.chain.len())
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

impl CompositePolicy {
    pub fn new(application: ArtifactId, chain: Vec<PolicyParametrization>) -> Self {
        Self {
            application,
            chain,
            in_flight: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn application(&self) -> &ArtifactId {
        &self.application
    }

    pub fn chain(&self) -> &[PolicyParametrization] {
        &self.chain
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Begin an operation through this composite. The returned guard keeps
    /// the instance alive for non-blocking pipelines; disposal waits until
    /// every guard is dropped.
    pub fn begin_operation(self: &Arc<Self>) -> Result<OperationGuard> {
        if self.is_disposed() {
            return Err(Error::state_transition(format!(
                "policy instance for '{}' is disposed",
                self.application
            )));
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(OperationGuard {
            policy: Arc::clone(self),
        })
    }

    /// Run a synchronous operation through the chain.
    pub fn execute<T>(self: &Arc<Self>, operation: impl FnOnce() -> T) -> Result<T> {
        let _guard = self.begin_operation()?;
        Ok(operation())
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(
            "policy_instance_disposed: application={}, chain_len={}",
            self.application,
            self.chain.len()
        );
    }
}

/// RAII marker for an in-flight operation pipeline.
#[derive(Debug)]
pub struct OperationGuard {
    policy: Arc<CompositePolicy>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.policy.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cache of composite policy instances.
pub struct PolicyInstanceCache {
    entries: Mutex<HashMap<PolicyKey, Arc<CompositePolicy>>>,
    /// How often disposal re-checks an instance still draining.
    drain_poll: Duration,
}

impl std::fmt::Debug for PolicyInstanceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyInstanceCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl Default for PolicyInstanceCache {
    fn default() -> Self {
        Self::new(Duration::from_millis(20))
    }
}

impl PolicyInstanceCache {
    pub fn new(drain_poll: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            drain_poll,
        }
    }

    /// Look up or build the composite for a key.
    ///
    /// The map lock is held across the build, which guarantees at most one
    /// concurrent build per key: a racing lookup blocks and then observes
    /// the instance the winner stored. Builds are cheap chain assemblies.
    pub fn get_or_create(
        &self,
        key: PolicyKey,
        build: impl FnOnce() -> CompositePolicy,
    ) -> Arc<CompositePolicy> {
        let mut entries = self.lock();
        Arc::clone(
            entries
                .entry(key)
                .or_insert_with(|| Arc::new(build())),
        )
    }

    /// Invalidate every cached instance for an application.
    ///
    /// Entries disappear immediately, so the next lookup builds a fresh
    /// instance reflecting the current chain, but each stale instance is
    /// disposed asynchronously after its in-flight operations drain. Callers
    /// never block for drain completion; must run inside a tokio runtime.
    pub fn invalidate(&self, application: &ArtifactId) -> usize {
        let stale: Vec<Arc<CompositePolicy>> = {
            let mut entries = self.lock();
            let keys: Vec<PolicyKey> = entries
                .keys()
                .filter(|k| &k.application == application)
                .cloned()
                .collect();
            keys.iter()
                .filter_map(|k| entries.remove(k))
                .collect()
        };

        let count = stale.len();
        for instance in stale {
            let poll = self.drain_poll;
            tokio::spawn(async move {
                while instance.in_flight() > 0 {
                    tokio::time::sleep(poll).await;
                }
                instance.dispose();
            });
        }
        if count > 0 {
            tracing::debug!(
                "policy_cache_invalidated: application={}, entries={}",
                application,
                count
            );
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PolicyKey, Arc<CompositePolicy>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
