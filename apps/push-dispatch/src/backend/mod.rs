//! Live gateway membership for the local zone.

pub mod endpoint;
pub mod reconciler;

pub use endpoint::Endpoint;
pub use reconciler::Reconciler;

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Hostname → endpoint mapping for one membership generation.
pub type Generation = HashMap<String, Arc<Endpoint>>;

/// Atomically replaceable view of the zone's gateway fleet.
///
/// Readers always observe one complete generation — the map is never mutated
/// in place, only replaced wholesale by the reconciler. Cloning shares the
/// same underlying set.
#[derive(Clone)]
pub struct BackendSet {
    inner: Arc<ArcSwap<Generation>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(HashMap::new())),
        }
    }

    /// The current generation. Holding the returned `Arc` pins that
    /// generation for the duration of a dispatch.
    pub fn snapshot(&self) -> Arc<Generation> {
        self.inner.load_full()
    }

    /// Look up one endpoint by gateway hostname.
    pub fn get(&self, hostname: &str) -> Option<Arc<Endpoint>> {
        self.inner.load().get(hostname).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }

    /// Publish a new generation. Reconciler-only.
    pub(crate) fn store(&self, generation: Generation) {
        self.inner.store(Arc::new(generation));
    }

    /// Cancel every endpoint in the current generation (shutdown path).
    pub fn cancel_all(&self) {
        for endpoint in self.snapshot().values() {
            endpoint.cancel();
        }
    }
}

impl Default for BackendSet {
    fn default() -> Self {
        Self::new()
    }
}
