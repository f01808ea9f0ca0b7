//! Forward reconciler
//!
//! Per-node state machine, entered once per reconcile task:
//!
//! ```text
//! get node ──► missing ──► lookup ──► none ──────────────► NoAddressToClean
//!    │                        └────► found ─► disassociate ─► release ─► Released
//!    ├──────► terminated ──► Err(Pending) until the node is removed
//!    └──────► present ──► needs address? ── no ───────────► AlreadySatisfied
//!                              └── yes ─► allocate ─► associate ─► Associated
//! ```
//!
//! The reconciler never loops or sleeps. Every non-terminal state is reported
//! as an error and the engine's work queue redelivers the task.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::manager::AddressManager;
use crate::traits::{LeadershipStatus, NodeReconciler, NodeStore};

/// Terminal results of one reconcile pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Node is gone and no address was tagged for it
    NoAddressToClean,
    /// Node is gone and its address was released
    Released { address_id: String },
    /// Node already has the managed address, or cannot take one
    AlreadySatisfied,
    /// Address is bound to the node's instance
    Associated { address_id: String },
}

/// Drives one node towards holding exactly one bound address
pub struct ForwardReconciler {
    manager: Arc<AddressManager>,
    nodes: Arc<dyn NodeStore>,
    leadership: Arc<dyn LeadershipStatus>,
    extra_tags: BTreeMap<String, String>,
}

impl ForwardReconciler {
    /// Create a new forward reconciler
    ///
    /// # Parameters
    ///
    /// - `manager`: Shared address manager
    /// - `nodes`: Node store the task reads its node from
    /// - `leadership`: Notified on every processed task
    /// - `extra_tags`: Caller-supplied tags attached to allocated addresses
    pub fn new(
        manager: Arc<AddressManager>,
        nodes: Arc<dyn NodeStore>,
        leadership: Arc<dyn LeadershipStatus>,
        extra_tags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            manager,
            nodes,
            leadership,
            extra_tags,
        }
    }

    /// Reconcile the node named `name`
    ///
    /// # Returns
    ///
    /// - `Ok(ReconcileOutcome)`: The node reached a terminal state
    /// - `Err(Error)`: Redeliver later; see [`Error::class`]
    pub async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome> {
        self.leadership.observe_reconcile();

        let Some(node) = self.nodes.get_node(name).await? else {
            return self.clean_up(name).await;
        };

        if node.is_terminated() {
            debug!(node = name, "Node terminated, waiting for removal");
            return Err(Error::pending(format!(
                "node {name} is terminated, waiting for it to be removed"
            )));
        }

        if !self.manager.needs_address(&node).await? {
            debug!(node = name, "Node needs no address");
            return Ok(ReconcileOutcome::AlreadySatisfied);
        }

        let address_id = self.manager.allocate(&node, &self.extra_tags).await?;

        // needs_address may have just tainted the node; associate must see it
        let node = self
            .nodes
            .get_node(name)
            .await?
            .ok_or_else(|| Error::not_found(format!("node {name}")))?;

        self.manager.associate(&node, &address_id).await?;
        info!(node = name, address_id = %address_id, "Node holds its address");
        Ok(ReconcileOutcome::Associated { address_id })
    }

    async fn clean_up(&self, name: &str) -> Result<ReconcileOutcome> {
        let address_id = match self.manager.lookup(name).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!(node = name, "Node gone, no address to clean");
                return Ok(ReconcileOutcome::NoAddressToClean);
            }
            Err(e) if e.is_not_found() => return Ok(ReconcileOutcome::NoAddressToClean),
            Err(e) => return Err(e),
        };

        info!(node = name, address_id = %address_id, "Node gone, reclaiming its address");
        self.manager.disassociate(&address_id).await?;

        match self.manager.release(&address_id).await {
            Ok(()) => Ok(ReconcileOutcome::Released { address_id }),
            Err(e) if e.is_not_found() => Ok(ReconcileOutcome::NoAddressToClean),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl NodeReconciler for ForwardReconciler {
    async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome> {
        ForwardReconciler::reconcile(self, name).await
    }
}
