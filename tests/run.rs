//! Whole runs against the simulated fleet, with logs written to a temp dir.

use node_api::{NodeApis, SimFleet};
use run_log::{read_metrics, read_topology, read_workload};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use swarm_testbed::{classify, ExitStatus, RunCoordinator, RunError};
use testbed_core::{
    EventOutcome, NodeId, Registry, RunPhase, TestbedConfig, TopologyEventKind, TopologySpec,
    WorkloadPlan,
};
use tokio_util::sync::CancellationToken;
use topology::ConvergenceOutcome;

const OPERATIONS: usize = 20;

fn config(dir: &Path, count: usize) -> TestbedConfig {
    let mut config = TestbedConfig::default();
    config.nodes.count = count;
    config.topology = TopologySpec::Ring { degree: 2 };
    config.convergence.ready_timeout = Duration::from_secs(5);
    config.workload = WorkloadPlan {
        seed: 3,
        operations: OPERATIONS,
        mean_size: 2048,
        max_size: 8192,
        mean_delay: Duration::from_millis(500),
        per_node_concurrency: 2,
        max_in_flight: None,
        request_timeout: Duration::from_secs(10),
    };
    config.run.cooldown = Duration::from_secs(5);
    config.output.dir = dir.to_path_buf();
    config.validate().unwrap();
    config
}

fn coordinator(config: TestbedConfig) -> (Arc<SimFleet>, RunCoordinator) {
    let registry = Arc::new(Registry::from_config(&config.nodes).unwrap());
    let fleet = Arc::new(SimFleet::new(&registry));
    fleet.link_default_ring();
    let apis = NodeApis::simulated(fleet.clone());
    (fleet, RunCoordinator::new(config, registry, apis))
}

#[tokio::test(start_paused = true)]
async fn test_successful_run_writes_all_logs() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 5);
    let output = config.output.clone();
    let (fleet, mut coordinator) = coordinator(config);

    let report = coordinator.run().await.unwrap();

    assert_eq!(report.state.phase(), RunPhase::Done);
    let phases: Vec<RunPhase> = report.state.history().iter().map(|(p, _)| *p).collect();
    assert_eq!(
        phases,
        vec![
            RunPhase::Provisioning,
            RunPhase::Converging,
            RunPhase::Running,
            RunPhase::Collecting,
            RunPhase::Done,
        ]
    );
    assert_eq!(report.convergence.outcome, ConvergenceOutcome::Converged);
    assert!(fleet.is_linked(NodeId(0), NodeId(4)));
    assert_eq!(report.workload.total(), OPERATIONS);
    assert_eq!(report.workload.failures, 0);
    assert!(report.collector.ticks >= 2);
    assert_eq!(report.collector.gaps, 0);

    let workload = read_workload(output.workload_path()).unwrap();
    assert_eq!(workload.len(), OPERATIONS);
    assert!(workload.iter().all(|r| r.success));

    let events = read_topology(output.topology_path()).unwrap();
    assert_eq!(events.first().unwrap().event_kind, TopologyEventKind::ApplyStarted);
    let finished = events
        .iter()
        .find(|e| e.event_kind == TopologyEventKind::ApplyFinished)
        .unwrap();
    assert_eq!(finished.outcome, EventOutcome::Converged);

    let metrics = read_metrics(output.metrics_path()).unwrap();
    assert_eq!(metrics.len() as u64, report.collector.samples);
    let keys: HashSet<_> = metrics.iter().map(|s| s.key()).collect();
    assert_eq!(keys.len(), metrics.len());
    let nodes: HashSet<NodeId> = metrics.iter().map(|s| s.node_id).collect();
    assert_eq!(nodes.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_node_fails_convergence() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), 5);
    let output = config.output.clone();
    let (fleet, mut coordinator) = coordinator(config);
    fleet.set_reachable(NodeId(2), false);

    let err = coordinator.run().await.unwrap_err();

    assert!(matches!(err, RunError::Topology(_)), "{err}");
    assert_eq!(classify(&err.into()), ExitStatus::Convergence);
    // No operation is issued once convergence failed.
    assert!(read_workload(output.workload_path()).unwrap().is_empty());
    let events = read_topology(output.topology_path()).unwrap();
    assert_eq!(events.last().unwrap().event_kind, TopologyEventKind::Error);
    assert!(events
        .iter()
        .any(|e| e.event_kind == TopologyEventKind::Unreachable && e.node_id == Some(NodeId(2))));
}

#[tokio::test(start_paused = true)]
async fn test_tolerated_partial_topology_still_runs() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 5);
    config.convergence.tolerate_incomplete = true;
    let (fleet, mut coordinator) = coordinator(config);
    fleet.set_reachable(NodeId(2), false);

    let report = coordinator.run().await.unwrap();

    assert_eq!(report.state.phase(), RunPhase::Done);
    assert_eq!(report.convergence.outcome, ConvergenceOutcome::Partial);
    assert_eq!(report.convergence.unreachable, vec![NodeId(2)]);
    assert_eq!(report.workload.total(), OPERATIONS);
    assert!(report.collector.gaps > 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_and_flushes_logs() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 4);
    config.workload.operations = 500;
    config.workload.mean_delay = Duration::from_secs(2);
    let output = config.output.clone();
    let (_fleet, coordinator) = coordinator(config);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        trigger.cancel();
    });
    let err = coordinator
        .with_cancellation(cancel)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Interrupted { .. }), "{err}");
    assert_eq!(classify(&err.into()), ExitStatus::Interrupted);
    let workload = read_workload(output.workload_path()).unwrap();
    assert!(workload.len() < 500);
    assert!(!read_metrics(output.metrics_path()).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_interrupts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 3);
    config.workload.operations = 500;
    config.run.deadline = Some(Duration::from_secs(30));
    let (_fleet, mut coordinator) = coordinator(config);

    let started = tokio::time::Instant::now();
    let err = coordinator.run().await.unwrap_err();

    assert!(matches!(err, RunError::Interrupted { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_finished_run_disarms_its_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 3);
    config.run.deadline = Some(Duration::from_secs(3600));
    let (_fleet, coordinator) = coordinator(config);

    let cancel = CancellationToken::new();
    let mut coordinator = coordinator.with_cancellation(cancel.clone());
    coordinator.run().await.unwrap();

    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
    assert!(!cancel.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_plan_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 4);
    config.topology = TopologySpec::Star { hub: 9 };
    let (fleet, mut coordinator) = coordinator(config);

    let err = coordinator.run().await.unwrap_err();

    assert!(matches!(err, RunError::Topology(_)), "{err}");
    assert_eq!(classify(&err.into()), ExitStatus::Config);
    assert_eq!(coordinator.state().phase(), RunPhase::Failed);
    let phases: Vec<RunPhase> = coordinator.state().history().iter().map(|(p, _)| *p).collect();
    assert_eq!(phases, vec![RunPhase::Provisioning, RunPhase::Failed]);
    assert!(fleet.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unmapped_containers_fail_provisioning() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path(), 3);
    config.nodes.project = Some("other".into());
    let (_fleet, mut coordinator) = coordinator(config);

    let err = coordinator.run().await.unwrap_err();

    assert!(matches!(err, RunError::Collector(_)), "{err}");
    assert_eq!(classify(&err.into()), ExitStatus::Config);
    assert_eq!(coordinator.state().phase(), RunPhase::Failed);
}
