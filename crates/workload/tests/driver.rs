//! Workload driver against the simulated fleet.

use futures::StreamExt;
use node_api::sim::{Availability, SimOp, Surface};
use node_api::SimFleet;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use testbed_core::{NodeConfig, NodeId, OperationKind, OperationOutcome, Registry, WorkloadPlan};
use tokio_util::sync::CancellationToken;
use workload::{WorkloadDriver, WorkloadSummary};

fn setup(count: usize) -> (Arc<Registry>, Arc<SimFleet>) {
    let registry = Registry::from_config(&NodeConfig {
        count,
        ..Default::default()
    })
    .unwrap();
    let fleet = Arc::new(SimFleet::new(&registry));
    (Arc::new(registry), fleet)
}

fn plan(operations: usize) -> WorkloadPlan {
    WorkloadPlan {
        seed: 7,
        operations,
        mean_size: 4096,
        max_size: 16 * 1024,
        mean_delay: Duration::from_millis(100),
        per_node_concurrency: 4,
        max_in_flight: None,
        request_timeout: Duration::from_secs(30),
    }
}

async fn run(driver: WorkloadDriver) -> Vec<OperationOutcome> {
    driver.run().collect().await
}

#[tokio::test(start_paused = true)]
async fn test_every_operation_reports_an_outcome() {
    let (registry, fleet) = setup(4);
    let outcomes = run(WorkloadDriver::new(plan(30), registry, fleet.clone())).await;

    assert_eq!(outcomes.len(), 30);
    assert!(outcomes.iter().all(|o| o.success()));

    let mut summary = WorkloadSummary::default();
    outcomes.iter().for_each(|o| summary.record(o));
    assert_eq!(summary.total(), 30);
    assert!(summary.uploads > 0);
    assert!(summary.downloads > 0);

    // Nothing has been stored before the first operation, so it uploads.
    let first = fleet
        .calls()
        .into_iter()
        .find(|c| matches!(c.op, SimOp::Add(_) | SimOp::Cat(_)))
        .unwrap();
    assert!(matches!(first.op, SimOp::Add(_)));
}

#[tokio::test(start_paused = true)]
async fn test_downloads_only_target_uploaded_content() {
    let (registry, fleet) = setup(3);
    let outcomes = run(WorkloadDriver::new(plan(40), registry, fleet)).await;

    let uploaded: BTreeMap<_, _> = outcomes
        .iter()
        .filter(|o| o.kind == OperationKind::Upload)
        .filter_map(|o| o.cid.clone().map(|cid| (cid, o.bytes)))
        .collect();
    for download in outcomes.iter().filter(|o| o.kind == OperationKind::Download) {
        let cid = download.cid.as_ref().unwrap();
        assert_eq!(uploaded.get(cid), Some(&download.bytes));
    }
}

#[tokio::test(start_paused = true)]
async fn test_per_node_concurrency_is_bounded() {
    let (registry, fleet) = setup(1);
    fleet.set_latency(Duration::from_secs(5));
    let plan = WorkloadPlan {
        per_node_concurrency: 2,
        mean_delay: Duration::from_millis(10),
        ..plan(20)
    };
    let outcomes = run(WorkloadDriver::new(plan, registry, fleet.clone())).await;

    assert_eq!(outcomes.len(), 20);
    assert_eq!(fleet.max_concurrent_content(NodeId(0)), 2);
}

#[tokio::test(start_paused = true)]
async fn test_global_in_flight_limit() {
    let (registry, fleet) = setup(4);
    fleet.set_latency(Duration::from_secs(5));
    let plan = WorkloadPlan {
        max_in_flight: Some(3),
        mean_delay: Duration::from_millis(10),
        ..plan(24)
    };
    let outcomes = run(WorkloadDriver::new(plan, registry, fleet.clone())).await;

    assert_eq!(outcomes.len(), 24);
    assert!(fleet.max_concurrent_content_total() <= 3);
}

#[tokio::test(start_paused = true)]
async fn test_busy_node_does_not_hold_global_slots() {
    let (registry, fleet) = setup(2);
    fleet.set_availability(NodeId(0), Surface::Control, Availability::Stalled);
    let request_timeout = Duration::from_secs(60);
    let plan = WorkloadPlan {
        per_node_concurrency: 1,
        max_in_flight: Some(2),
        request_timeout,
        ..plan(40)
    };
    let start = tokio::time::Instant::now();
    let arrivals: Vec<(OperationOutcome, Duration)> = WorkloadDriver::new(plan, registry, fleet)
        .run()
        .map(|outcome| (outcome, start.elapsed()))
        .collect()
        .await;

    assert_eq!(arrivals.len(), 40);
    let (stalled, free): (Vec<_>, Vec<_>) =
        arrivals.iter().partition(|(o, _)| o.node_id == NodeId(0));
    assert!(stalled.len() >= 2);
    assert!(!free.is_empty());
    // Node 1 never waits behind node 0's queue.
    for (outcome, at) in &free {
        assert!(*at < request_timeout, "{outcome:?} arrived after {at:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_node_fails_only_its_operations() {
    let (registry, fleet) = setup(4);
    fleet.set_availability(NodeId(1), Surface::Control, Availability::Down);
    let outcomes = run(WorkloadDriver::new(plan(40), registry, fleet)).await;

    assert_eq!(outcomes.len(), 40);
    let (down, up): (Vec<_>, Vec<_>) = outcomes.iter().partition(|o| o.node_id == NodeId(1));
    assert!(!down.is_empty());
    assert!(down.iter().all(|o| !o.success()));
    assert!(up.iter().all(|o| o.success()));
    for failed in down.iter().filter(|o| o.kind == OperationKind::Upload) {
        assert!(failed.cid.is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_node_hits_request_timeout() {
    let (registry, fleet) = setup(2);
    fleet.set_availability(NodeId(0), Surface::Control, Availability::Stalled);
    let plan = WorkloadPlan {
        request_timeout: Duration::from_secs(2),
        ..plan(10)
    };
    let outcomes = run(WorkloadDriver::new(plan, registry, fleet)).await;

    assert_eq!(outcomes.len(), 10);
    for outcome in outcomes.iter().filter(|o| o.node_id == NodeId(0)) {
        assert!(outcome.error.as_deref().unwrap().contains("timed out"));
        assert!(outcome.duration >= Duration::from_secs(2));
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_issuing() {
    let (registry, fleet) = setup(2);
    fleet.set_latency(Duration::from_secs(10));
    let token = CancellationToken::new();
    let driver = WorkloadDriver::new(plan(100), registry, fleet).with_cancellation(token.clone());

    let stop = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.cancel();
    });
    let outcomes = run(driver).await;

    assert!(!outcomes.is_empty());
    assert!(outcomes.len() < 100);
    assert!(outcomes
        .iter()
        .all(|o| o.error.as_deref() == Some("cancelled")));
}
