// # Node Reconciler Trait
//
// The unit of work the engine dispatches. The forward reconciler is the
// production implementation; the seam lets the engine's queueing be
// exercised on its own.

use async_trait::async_trait;

use crate::reconciler::ReconcileOutcome;

/// Reconciles one node by name
#[async_trait]
pub trait NodeReconciler: Send + Sync {
    /// # Returns
    ///
    /// - `Ok(ReconcileOutcome)`: Terminal; the key's failure history is cleared
    /// - `Err(Error)`: Redelivered after a per-key backoff
    async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome, crate::Error>;
}
