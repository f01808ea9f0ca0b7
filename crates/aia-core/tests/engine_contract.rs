//! Contract Test: Engine Dispatch
//!
//! This test verifies how the engine turns node notifications into
//! reconcile tasks.
//!
//! Constraints verified:
//! - Only events admitted by the eligibility filter are reconciled
//! - At most maxConcurrentReconciles tasks run at once
//! - A node key is never reconciled twice concurrently; events arriving
//!   mid-task cause exactly one rerun
//! - Failed tasks are redelivered with a growing attempt count
//! - Conflicts are flagged on the failure event
//! - Shutdown is deterministic and reported
//! - The reverse sweep reports through the event channel
//!
//! If this test fails, nodes are skipped, overloaded, or reconciled in parallel
//! with themselves.

mod common;

use aia_core::constants::NO_ADDRESS_TAINT_KEY;
use aia_core::traits::NodeReconciler;
use aia_core::{Engine, EngineEvent, Error, NodeEvent, ReconcileOutcome};
use common::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

const WAIT: Duration = Duration::from_secs(5);

/// Reconciler that records calls, holds each task briefly, and fails
/// scripted keys a set number of times
#[derive(Default)]
struct ScriptedReconciler {
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    running: Mutex<HashSet<String>>,
    overlapped: AtomicBool,
    hold: Duration,
    failures: Mutex<HashMap<String, VecDeque<Error>>>,
}

impl ScriptedReconciler {
    fn holding(hold: Duration) -> Self {
        Self {
            hold,
            ..Default::default()
        }
    }

    fn fail(&self, node: &str, errors: Vec<Error>) {
        self.failures
            .lock()
            .unwrap()
            .insert(node.to_string(), errors.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl NodeReconciler for ScriptedReconciler {
    async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome, Error> {
        self.calls.lock().unwrap().push(name.to_string());
        if !self.running.lock().unwrap().insert(name.to_string()) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.hold).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.running.lock().unwrap().remove(name);

        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(e) => Err(e),
            None => Ok(ReconcileOutcome::AlreadySatisfied),
        }
    }
}

/// Collect events until one matches, failing the test on timeout
async fn collect_until(
    rx: &mut mpsc::Receiver<EngineEvent>,
    done: impl Fn(&EngineEvent) -> bool,
) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    let result = tokio::time::timeout(WAIT, async {
        while let Some(event) = rx.recv().await {
            let stop = done(&event);
            seen.push(event);
            if stop {
                return;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "timed out, events so far: {seen:?}");
    seen
}

fn succeeded(node: &str) -> impl Fn(&EngineEvent) -> bool + '_ {
    move |e| matches!(e, EngineEvent::ReconcileSucceeded { node: n, .. } if n == node)
}

fn count_succeeded(events: &[EngineEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, EngineEvent::ReconcileSucceeded { .. }))
        .count()
}

struct Running {
    tx: mpsc::UnboundedSender<NodeEvent>,
    events: mpsc::Receiver<EngineEvent>,
    shutdown: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<aia_core::Result<()>>,
}

impl Running {
    async fn stop(self) -> Vec<EngineEvent> {
        let Running {
            tx,
            mut events,
            shutdown,
            handle,
        } = self;
        let _ = shutdown.send(());
        let result = tokio::time::timeout(WAIT, handle)
            .await
            .expect("engine did not stop in time")
            .expect("engine task panicked");
        assert!(result.is_ok());
        drop(tx);

        let mut rest = Vec::new();
        while let Ok(event) = events.try_recv() {
            rest.push(event);
        }
        rest
    }
}

fn start(
    reconciler: Arc<dyn NodeReconciler>,
    collector: Option<aia_core::GarbageCollector>,
    config: &aia_core::ControllerConfig,
) -> Running {
    let (source, tx) = ControlledNodeSource::new();
    let (engine, events) = Engine::new(Box::new(source), reconciler, collector, config).unwrap();
    let (shutdown, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });
    Running {
        tx,
        events,
        shutdown,
        handle,
    }
}

#[tokio::test]
async fn only_admitted_events_are_reconciled() {
    let reconciler = Arc::new(ScriptedReconciler::default());
    let mut running = start(reconciler.clone(), None, &test_config());

    let eligible = eligible_node("n3", "ins-3");
    running
        .tx
        .send(NodeEvent::Created(eligible_node("n1", "ins-1")))
        .unwrap();
    running
        .tx
        .send(NodeEvent::Created(aia_core::Node::new("n2").with_instance_id("ins-2")))
        .unwrap();
    running
        .tx
        .send(NodeEvent::Updated {
            old: Some(eligible.clone()),
            new: Some(eligible),
        })
        .unwrap();
    running
        .tx
        .send(NodeEvent::Updated {
            old: None,
            new: Some(eligible_node("n5", "ins-5")),
        })
        .unwrap();
    running
        .tx
        .send(NodeEvent::Deleted(eligible_node("n4", "ins-4")))
        .unwrap();

    collect_until(&mut running.events, succeeded("n4")).await;
    running.stop().await;

    let mut calls = reconciler.calls();
    calls.sort();
    assert_eq!(calls, vec!["n1".to_string(), "n4".to_string()]);
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let mut config = test_config();
    config.engine.max_concurrent_reconciles = 2;
    let reconciler = Arc::new(ScriptedReconciler::holding(Duration::from_millis(50)));
    let mut running = start(reconciler.clone(), None, &config);

    for i in 0..5 {
        running
            .tx
            .send(NodeEvent::Created(eligible_node(&format!("n{i}"), &format!("ins-{i}"))))
            .unwrap();
    }

    let mut total = 0;
    while total < 5 {
        let events = collect_until(&mut running.events, |e| {
            matches!(e, EngineEvent::ReconcileSucceeded { .. })
        })
        .await;
        total += count_succeeded(&events);
    }
    running.stop().await;

    assert_eq!(reconciler.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn same_node_is_serialized_and_rerun_once() {
    let mut config = test_config();
    config.engine.max_concurrent_reconciles = 4;
    let reconciler = Arc::new(ScriptedReconciler::holding(Duration::from_millis(100)));
    let mut running = start(reconciler.clone(), None, &config);

    let first = eligible_node("n1", "ins-1");
    running.tx.send(NodeEvent::Created(first.clone())).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Two label changes while the first task is still running
    let second = first.clone().with_label("zone", "a");
    let third = second.clone().with_label("zone", "b");
    running
        .tx
        .send(NodeEvent::Updated {
            old: Some(first),
            new: Some(second.clone()),
        })
        .unwrap();
    running
        .tx
        .send(NodeEvent::Updated {
            old: Some(second),
            new: Some(third),
        })
        .unwrap();

    let mut done = 0;
    while done < 2 {
        done += count_succeeded(&collect_until(&mut running.events, succeeded("n1")).await);
    }
    running.stop().await;

    assert_eq!(reconciler.calls(), vec!["n1".to_string(), "n1".to_string()]);
    assert!(!reconciler.overlapped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn failures_are_redelivered_until_success() {
    let reconciler = Arc::new(ScriptedReconciler::default());
    reconciler.fail(
        "n1",
        vec![Error::pending("UNBIND"), Error::provider("fake", "throttled")],
    );
    let mut running = start(reconciler.clone(), None, &test_config());

    running
        .tx
        .send(NodeEvent::Created(eligible_node("n1", "ins-1")))
        .unwrap();
    let events = collect_until(&mut running.events, succeeded("n1")).await;
    running.stop().await;

    let attempts: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::ReconcileFailed { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2]);
    assert_eq!(reconciler.calls().len(), 3);
}

#[tokio::test]
async fn conflicts_are_flagged() {
    let reconciler = Arc::new(ScriptedReconciler::default());
    reconciler.fail("n1", vec![Error::conflict("eip-001", "ins-9")]);
    let mut running = start(reconciler.clone(), None, &test_config());

    running
        .tx
        .send(NodeEvent::Created(eligible_node("n1", "ins-1")))
        .unwrap();
    let events = collect_until(&mut running.events, |e| {
        matches!(e, EngineEvent::ReconcileFailed { .. })
    })
    .await;
    running.stop().await;

    assert!(matches!(
        events.last(),
        Some(EngineEvent::ReconcileFailed { conflict: true, attempt: 1, .. })
    ));
}

#[tokio::test]
async fn shutdown_is_reported() {
    let reconciler = Arc::new(ScriptedReconciler::default());
    let mut running = start(reconciler, None, &test_config());

    let first = collect_until(&mut running.events, |_| true).await;
    assert_eq!(
        first,
        vec![EngineEvent::Started {
            max_concurrent_reconciles: 1,
            reverse_reconcile: false,
        }]
    );

    let rest = running.stop().await;
    assert!(matches!(rest.last(), Some(EngineEvent::Stopped { .. })));
}

#[tokio::test]
async fn ended_event_stream_does_not_stop_the_engine() {
    let reconciler = Arc::new(ScriptedReconciler::default());
    let (source, tx) = ControlledNodeSource::new();
    let (engine, _events) =
        Engine::new(Box::new(source), reconciler, None, &test_config()).unwrap();
    drop(tx);

    let (shutdown, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move { engine.run_with_shutdown(Some(shutdown_rx)).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    shutdown.send(()).unwrap();
    let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn invalid_engine_settings_are_rejected() {
    let mut config = test_config();
    config.engine.max_concurrent_reconciles = 0;
    let (source, _tx) = ControlledNodeSource::new();

    let result = Engine::new(
        Box::new(source),
        Arc::new(ScriptedReconciler::default()),
        None,
        &config,
    );

    assert!(result.is_err());
}

#[tokio::test]
async fn end_to_end_node_receives_its_address() {
    let h = Harness::new();
    h.cloud.set_auto_settle(true);
    let node = eligible_node("n1", "ins-1");
    h.nodes.insert(node.clone());

    let mut running = start(Arc::new(h.reconciler()), None, &h.config);
    running.tx.send(NodeEvent::Created(node)).unwrap();

    let events = collect_until(&mut running.events, succeeded("n1")).await;
    running.stop().await;

    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::ReconcileFailed { conflict: false, .. })));
    let node = h.nodes.node("n1").unwrap();
    assert!(!node.has_taint(NO_ADDRESS_TAINT_KEY));
    assert!(node.has_address_annotations("eip-001", "203.0.113.1"));
    assert_eq!(h.cloud.address_count(), 1);
}

#[tokio::test]
async fn sweep_results_are_reported() {
    let mut h = Harness::new();
    h.config.engine.enable_reverse_reconcile = true;
    h.cloud
        .insert_tagged("eip-003", "n3", "ins-3", aia_core::AddressStatus::Unbound);

    let mut running = start(
        Arc::new(ScriptedReconciler::default()),
        Some(h.collector()),
        &h.config,
    );

    let events = collect_until(&mut running.events, |e| {
        matches!(e, EngineEvent::SweepCompleted { .. })
    })
    .await;
    running.stop().await;

    assert!(matches!(
        events.first(),
        Some(EngineEvent::Started { reverse_reconcile: true, .. })
    ));
    match events.last() {
        Some(EngineEvent::SweepCompleted { report }) => {
            assert_eq!(report.released_unbound, vec!["eip-003".to_string()]);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(h.cloud.released(), vec!["eip-003".to_string()]);
}
