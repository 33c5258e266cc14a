//! Service state management.

use std::sync::Arc;

use crate::kernel::GraphKernel;
use crate::store::GraphStore;

/// Shared service state.
///
/// Cloning is cheap; all clones share one kernel and store.
pub struct ServiceState<S: GraphStore + 'static> {
    /// Facade every handler goes through.
    pub kernel: Arc<GraphKernel<S>>,
}

impl<S: GraphStore + 'static> ServiceState<S> {
    /// Create service state over a store.
    pub fn new(store: S) -> Self {
        Self {
            kernel: Arc::new(GraphKernel::new(Arc::new(store))),
        }
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        self.kernel.store()
    }
}

impl<S: GraphStore + 'static> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self {
            kernel: Arc::clone(&self.kernel),
        }
    }
}
