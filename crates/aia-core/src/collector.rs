//! Reverse reconciler (garbage collector)
//!
//! Periodic sweep that reclaims addresses whose node vanished without a
//! delete notification ever reaching the forward reconciler.
//!
//! ## Sweep
//!
//! 1. List live node names
//! 2. Page through every address tagged with the cluster identity
//! 3. Read their node-name tags; addresses naming an absent node are legacy
//! 4. Describe legacy addresses; disassociate the self-consistent bound ones
//! 5. Release unbound ones now, the disassociated ones after a grace wait
//!
//! Any failure aborts the rest of the sweep. Nothing is rolled back: the next
//! sweep derives legacy state from scratch.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::constants::TAG_NODE_INSTANCE_ID;
use crate::error::Result;
use crate::manager::AddressManager;
use crate::model::AddressStatus;
use crate::traits::{LeadershipStatus, NodeStore};

/// What one sweep found and did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Nodes present in the cluster
    pub live_nodes: usize,
    /// Addresses tagged with the cluster identity
    pub tagged_addresses: usize,
    /// Tagged addresses whose node is gone
    pub legacy: Vec<String>,
    /// Released without waiting
    pub released_unbound: Vec<String>,
    /// Disassociated, then released after the grace wait
    pub released_disassociated: Vec<String>,
    /// Legacy but left alone (transitioning, or bound elsewhere)
    pub skipped: Vec<String>,
}

/// Periodic legacy address sweep
pub struct GarbageCollector {
    manager: Arc<AddressManager>,
    nodes: Arc<dyn NodeStore>,
    leadership: Arc<dyn LeadershipStatus>,
    interval: Duration,
    grace: Duration,
}

impl GarbageCollector {
    pub fn new(
        manager: Arc<AddressManager>,
        nodes: Arc<dyn NodeStore>,
        leadership: Arc<dyn LeadershipStatus>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            manager,
            nodes,
            leadership,
            interval: config.reverse_reconcile_interval(),
            grace: config.release_grace(),
        }
    }

    /// Interval between sweeps
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sweep if this replica is leader; `None` when skipped
    pub async fn sweep_if_leader(&self) -> Option<Result<SweepReport>> {
        if !self.leadership.is_leader() {
            debug!("Not leader, skipping sweep");
            return None;
        }
        Some(self.sweep().await)
    }

    /// Run one sweep
    pub async fn sweep(&self) -> Result<SweepReport> {
        let live: HashSet<String> = self.nodes.list_node_names().await?.into_iter().collect();
        let tagged = self.manager.list_cluster_addresses().await?;

        let mut report = SweepReport {
            live_nodes: live.len(),
            tagged_addresses: tagged.len(),
            ..Default::default()
        };

        let owners = self.manager.node_names_of(&tagged).await?;
        report.legacy = tagged
            .iter()
            .filter(|id| owners.get(*id).is_some_and(|node| !live.contains(node)))
            .cloned()
            .collect();

        if report.legacy.is_empty() {
            debug!(
                live_nodes = report.live_nodes,
                tagged = report.tagged_addresses,
                "No legacy addresses"
            );
            return Ok(report);
        }
        info!(legacy = ?report.legacy, "Found legacy addresses");

        let mut unbound = Vec::new();
        let mut disassociated = Vec::new();
        for address in self.manager.describe(&report.legacy).await? {
            match &address.status {
                AddressStatus::Unbound => unbound.push(address.id),
                AddressStatus::Bound => {
                    let tagged_instance = address.tag(TAG_NODE_INSTANCE_ID);
                    if tagged_instance.is_some() && tagged_instance == address.instance_id.as_deref()
                    {
                        self.manager.disassociate(&address.id).await?;
                        disassociated.push(address.id);
                    } else {
                        warn!(
                            address_id = %address.id,
                            tagged_instance = ?tagged_instance,
                            bound_instance = ?address.instance_id,
                            "Legacy address bound to an unexpected instance, leaving it"
                        );
                        report.skipped.push(address.id);
                    }
                }
                AddressStatus::Other(status) => {
                    debug!(address_id = %address.id, status = %status, "Legacy address in transition");
                    report.skipped.push(address.id);
                }
            }
        }

        self.manager.release_all(&unbound).await?;
        report.released_unbound = unbound;

        if !disassociated.is_empty() {
            debug!(grace = ?self.grace, "Waiting before releasing disassociated addresses");
            tokio::time::sleep(self.grace).await;
            self.manager.release_all(&disassociated).await?;
            report.released_disassociated = disassociated;
        }

        info!(
            released_unbound = report.released_unbound.len(),
            released_disassociated = report.released_disassociated.len(),
            skipped = report.skipped.len(),
            "Sweep finished"
        );
        Ok(report)
    }
}
