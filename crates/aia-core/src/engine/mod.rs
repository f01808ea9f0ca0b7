//! Controller engine
//!
//! The Engine is responsible for:
//! - Watching node notifications via NodeEventSource
//! - Admitting them through the EligibilityFilter
//! - Dispatching reconcile tasks with bounded concurrency
//! - Redelivering failed tasks with per-node exponential backoff
//! - Driving the periodic reverse sweep
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ NodeEventSource │─── NodeEvent ───┐
//! └─────────────────┘                 │
//!                                     ▼
//!                        ┌──────────────────────┐
//!                        │ EligibilityFilter    │
//!                        └──────────────────────┘
//!                                     │ node name
//!                                     ▼
//!                        ┌──────────────────────┐     requeue after backoff
//!                        │ WorkQueue            │◄─────────────────────┐
//!                        └──────────────────────┘                      │
//!                                     │ ≤ maxConcurrentReconciles      │
//!                                     ▼                                │
//!                        ┌──────────────────────┐       Err            │
//!                        │ NodeReconciler       │──────────────────────┘
//!                        └──────────────────────┘
//!
//! ┌─────────────────┐  every interval, when leader
//! │ GarbageCollector│──────────────────────────────► sweep
//! └─────────────────┘
//! ```

mod queue;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::collector::{GarbageCollector, SweepReport};
use crate::config::{ControllerConfig, EngineConfig};
use crate::error::{ErrorClass, Result};
use crate::filter::EligibilityFilter;
use crate::reconciler::ReconcileOutcome;
use crate::traits::{NodeEventSource, NodeReconciler};

use queue::WorkQueue;

/// Events emitted by the Engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started {
        max_concurrent_reconciles: usize,
        reverse_reconcile: bool,
    },

    /// A reconcile task reached a terminal state
    ReconcileSucceeded {
        node: String,
        outcome: ReconcileOutcome,
    },

    /// A reconcile task failed and will be redelivered
    ReconcileFailed {
        node: String,
        error: String,
        attempt: u32,
        conflict: bool,
    },

    /// Reverse sweep finished
    SweepCompleted { report: SweepReport },

    /// Reverse sweep aborted
    SweepFailed { error: String },

    /// Engine stopped
    Stopped { reason: String },
}

type TaskResult = (String, Result<ReconcileOutcome>);

/// Controller engine
///
/// ## Lifecycle
///
/// 1. Create with [`Engine::new()`]
/// 2. Start with [`Engine::run()`]
/// 3. Engine runs until shutdown signal received
///
/// ## Shutdown
///
/// Dispatch stops immediately. Reconcile tasks already in flight are
/// abandoned, not interrupted; every operation they perform is idempotent
/// and is simply repeated after restart.
pub struct Engine {
    /// Node notification source
    source: Box<dyn NodeEventSource>,

    /// Admission predicate
    filter: EligibilityFilter,

    /// Per-node unit of work
    reconciler: Arc<dyn NodeReconciler>,

    /// Reverse sweep, if enabled
    collector: Option<Arc<GarbageCollector>>,

    /// Concurrency and backoff settings
    settings: EngineConfig,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl Engine {
    /// Create a new engine
    ///
    /// # Parameters
    ///
    /// - `source`: Node notification source
    /// - `reconciler`: Per-node reconcile implementation
    /// - `collector`: Reverse sweep; pass `None` to disable it
    /// - `config`: Controller configuration (engine and node sections)
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        source: Box<dyn NodeEventSource>,
        reconciler: Arc<dyn NodeReconciler>,
        collector: Option<GarbageCollector>,
        config: &ControllerConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.engine.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let engine = Self {
            source,
            filter: EligibilityFilter::new(config.node.labels.clone()),
            reconciler,
            collector: collector.map(Arc::new),
            settings: config.engine.clone(),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Run the engine until SIGINT
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Fatal error
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the engine until `shutdown_rx` fires (or, if `None`, until SIGINT)
    ///
    /// The daemon drives this from its own signal handling; tests use it for
    /// deterministic shutdown.
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let max_concurrent = self.settings.max_concurrent_reconciles;
        info!(
            max_concurrent,
            reverse_reconcile = self.collector.is_some(),
            "Engine starting"
        );
        emit_event(
            &self.event_tx,
            EngineEvent::Started {
                max_concurrent_reconciles: max_concurrent,
                reverse_reconcile: self.collector.is_some(),
            },
        );

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        };
        tokio::pin!(shutdown);

        let sweeper = self.spawn_collector();

        let mut events = self.source.watch();
        let mut events_open = true;
        let mut queue = WorkQueue::new();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<TaskResult>();
        let (retry_tx, mut retry_rx) = mpsc::unbounded_channel::<String>();

        loop {
            while queue.in_flight() < max_concurrent {
                let Some(key) = queue.pop() else { break };
                self.dispatch(key, done_tx.clone());
            }

            tokio::select! {
                maybe_event = events.next(), if events_open => match maybe_event {
                    Some(event) => {
                        if self.filter.admits(&event) {
                            if let Some(name) = event.node_name() {
                                debug!(node = name, "Enqueuing node");
                                queue.add(name);
                            }
                        }
                    }
                    None => {
                        warn!("Node event stream ended");
                        events_open = false;
                    }
                },

                Some((key, result)) = done_rx.recv() => {
                    self.handle_result(&mut queue, &key, result, &retry_tx);
                    queue.done(&key);
                }

                Some(key) = retry_rx.recv() => {
                    debug!(node = %key, "Redelivering node");
                    queue.add(&key);
                }

                _ = &mut shutdown => {
                    info!(
                        in_flight = queue.in_flight(),
                        queued = queue.len(),
                        "Shutdown signal received"
                    );
                    break;
                }
            }
        }

        if let Some(handle) = sweeper {
            handle.abort();
        }

        emit_event(
            &self.event_tx,
            EngineEvent::Stopped {
                reason: "Shutdown signal".to_string(),
            },
        );
        info!("Engine stopped");
        Ok(())
    }

    fn dispatch(&self, key: String, done: mpsc::UnboundedSender<TaskResult>) {
        let reconciler = Arc::clone(&self.reconciler);
        tokio::spawn(async move {
            let result = reconciler.reconcile(&key).await;
            let _ = done.send((key, result));
        });
    }

    fn handle_result(
        &self,
        queue: &mut WorkQueue,
        key: &str,
        result: Result<ReconcileOutcome>,
        retry_tx: &mpsc::UnboundedSender<String>,
    ) {
        match result {
            Ok(outcome) => {
                queue.forget(key);
                debug!(node = key, outcome = ?outcome, "Reconcile finished");
                emit_event(
                    &self.event_tx,
                    EngineEvent::ReconcileSucceeded {
                        node: key.to_string(),
                        outcome,
                    },
                );
            }
            Err(e) => {
                let attempt = queue.record_failure(key);
                let delay = self.settings.requeue_delay(attempt - 1);
                let conflict = e.class() == ErrorClass::Conflict;

                match &e {
                    _ if conflict => {
                        warn!(node = key, error = %e, attempt, "Address conflict, needs operator attention")
                    }
                    crate::Error::Pending(_) => {
                        debug!(node = key, reason = %e, attempt, ?delay, "Node not settled yet")
                    }
                    _ => warn!(node = key, error = %e, attempt, ?delay, "Reconcile failed"),
                }

                emit_event(
                    &self.event_tx,
                    EngineEvent::ReconcileFailed {
                        node: key.to_string(),
                        error: e.to_string(),
                        attempt,
                        conflict,
                    },
                );

                let retry_tx = retry_tx.clone();
                let key = key.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = retry_tx.send(key);
                });
            }
        }
    }

    fn spawn_collector(&self) -> Option<JoinHandle<()>> {
        let collector = self.collector.clone()?;
        let event_tx = self.event_tx.clone();

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(collector.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                match collector.sweep_if_leader().await {
                    Some(Ok(report)) => {
                        emit_event(&event_tx, EngineEvent::SweepCompleted { report });
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Sweep aborted");
                        emit_event(
                            &event_tx,
                            EngineEvent::SweepFailed {
                                error: e.to_string(),
                            },
                        );
                    }
                    None => {}
                }
            }
        }))
    }
}

/// Send an event, logging a warning if the channel is full (backpressure)
fn emit_event(tx: &mpsc::Sender<EngineEvent>, event: EngineEvent) {
    if tx.try_send(event).is_err() {
        warn!("Event channel full, dropping event. Consider increasing eventChannelCapacity.");
    }
}
