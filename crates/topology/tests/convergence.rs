//! Convergence against the simulated fleet.

use node_api::sim::{Availability, SimOp, Surface};
use node_api::SimFleet;
use std::sync::Arc;
use std::time::Duration;
use testbed_core::{
    ConvergenceConfig, EventOutcome, NodeConfig, NodeId, PeerId, Registry, RetryPolicy,
    TopologyEventKind, TopologySpec,
};
use topology::{build, ConnectionMatrix, ConvergenceOutcome, Edge, TopologyBuilder, TopologyError};

fn registry(count: usize) -> Registry {
    Registry::from_config(&NodeConfig {
        count,
        ..Default::default()
    })
    .unwrap()
}

fn config() -> ConvergenceConfig {
    ConvergenceConfig {
        deadline: Duration::from_secs(60),
        ready_timeout: Duration::from_secs(5),
        node_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        },
        verification_retries: 2,
        settle_delay: Duration::from_secs(1),
        tolerate_incomplete: false,
    }
}

fn edge(a: u32, b: u32) -> Edge {
    Edge::new(NodeId(a), NodeId(b)).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_ring_converges_from_default_links() {
    let registry = registry(4);
    let fleet = SimFleet::new(&registry);
    fleet.link(NodeId(0), NodeId(2));
    fleet.link(NodeId(1), NodeId(3));
    fleet.add_external_peer(NodeId(1), PeerId::new("12D3KooWBootstrap"));

    let plan = build(&TopologySpec::Ring { degree: 2 }, &registry).unwrap();
    let config = config();
    let report = TopologyBuilder::new(&fleet, &config)
        .apply(&plan, &registry)
        .await
        .unwrap();

    assert_eq!(report.outcome, ConvergenceOutcome::Converged);
    assert_eq!(report.passes, 1);
    assert_eq!(
        report.resolved_edges,
        vec![edge(0, 1), edge(0, 3), edge(1, 2), edge(2, 3)]
    );
    assert!(report.unresolved_edges.is_empty());
    for i in 0..4 {
        assert_eq!(fleet.peers_of(NodeId(i)).len(), 2, "node {i}");
    }
    assert!(!fleet.is_linked(NodeId(0), NodeId(2)));
    assert!(!fleet
        .peers_of(NodeId(1))
        .contains(&PeerId::new("12D3KooWBootstrap")));

    let finished = report.events.last().unwrap();
    assert_eq!(finished.event_kind, TopologyEventKind::ApplyFinished);
    assert_eq!(finished.outcome, EventOutcome::Converged);
    assert!(report
        .events
        .iter()
        .any(|e| e.event_kind == TopologyEventKind::Disconnect && e.outcome == EventOutcome::Ok));
    assert!(report.into_result(false).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_disconnects_precede_connects_on_every_node() {
    let registry = registry(6);
    let fleet = SimFleet::new(&registry);
    fleet.link_default_ring();
    fleet.set_latency(Duration::from_millis(20));

    let plan = build(&TopologySpec::Star { hub: 0 }, &registry).unwrap();
    let config = config();
    let report = TopologyBuilder::new(&fleet, &config)
        .apply(&plan, &registry)
        .await
        .unwrap();
    assert!(report.is_converged());

    let calls = fleet.calls();
    for id in registry.ids() {
        let ops: Vec<&SimOp> = calls.iter().filter(|c| c.node == id).map(|c| &c.op).collect();
        let first_connect = ops.iter().position(|op| matches!(op, SimOp::Connect(_)));
        let last_disconnect = ops.iter().rposition(|op| matches!(op, SimOp::Disconnect(_)));
        if let (Some(connect), Some(disconnect)) = (first_connect, last_disconnect) {
            assert!(disconnect < connect, "node {id}: {ops:?}");
        }
    }
    assert_eq!(fleet.peers_of(NodeId(0)).len(), 5);
    for i in 1..6 {
        assert_eq!(fleet.peers_of(NodeId(i)).len(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_node_leaves_only_its_edges_unresolved() {
    let registry = registry(6);
    let fleet = SimFleet::new(&registry);
    fleet.set_reachable(NodeId(3), false);

    let plan = build(&TopologySpec::Ring { degree: 2 }, &registry).unwrap();
    let config = config();
    let report = TopologyBuilder::new(&fleet, &config)
        .apply(&plan, &registry)
        .await
        .unwrap();

    assert_eq!(report.outcome, ConvergenceOutcome::Partial);
    assert_eq!(report.unreachable, vec![NodeId(3)]);
    assert_eq!(report.unresolved_edges, vec![edge(2, 3), edge(3, 4)]);
    assert_eq!(
        report.resolved_edges,
        vec![edge(0, 1), edge(0, 5), edge(1, 2), edge(4, 5)]
    );
    assert!(report.mismatches.is_empty());
    assert!(report
        .events
        .iter()
        .any(|e| e.event_kind == TopologyEventKind::Unreachable && e.node_id == Some(NodeId(3))));

    match report.into_result(false) {
        Err(TopologyError::PartialConvergence {
            unreachable,
            unresolved,
        }) => {
            assert_eq!(unreachable, vec![NodeId(3)]);
            assert_eq!(unresolved, 2);
        }
        other => panic!("expected partial convergence, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_node_is_bounded_by_timeouts() {
    let registry = registry(4);
    let fleet = SimFleet::new(&registry);
    fleet.set_availability(NodeId(2), Surface::Control, Availability::Stalled);

    let plan = build(&TopologySpec::FullMesh, &registry).unwrap();
    let config = config();
    let start = tokio::time::Instant::now();
    let report = TopologyBuilder::new(&fleet, &config)
        .apply(&plan, &registry)
        .await
        .unwrap();

    assert!(start.elapsed() <= config.deadline);
    assert_eq!(report.unreachable, vec![NodeId(2)]);
    assert_eq!(report.resolved_edges.len(), 3);
    assert_eq!(report.unresolved_edges.len(), 3);
    assert!(report.into_result(true).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_node_stalling_after_ready_does_not_hide_the_others() {
    let registry = registry(3);
    let fleet = Arc::new(SimFleet::new(&registry));
    fleet.set_latency(Duration::from_millis(10));
    fleet.link(NodeId(0), NodeId(1));
    // Node 0 answers its identity request, then hangs on everything after.
    let stall = fleet.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        stall.set_availability(NodeId(0), Surface::Control, Availability::Stalled);
    });

    let plan = build(&TopologySpec::Custom { edges: vec![(1, 2)] }, &registry).unwrap();
    let config = config();
    let start = tokio::time::Instant::now();
    let report = TopologyBuilder::new(fleet.as_ref(), &config)
        .apply(&plan, &registry)
        .await
        .unwrap();

    assert!(start.elapsed() < config.deadline);
    assert_eq!(report.outcome, ConvergenceOutcome::Partial);
    assert_eq!(report.unreachable, vec![NodeId(0)]);
    assert_eq!(report.resolved_edges, vec![edge(1, 2)]);
    assert!(report.unresolved_edges.is_empty());
    assert!(report.mismatches.is_empty());
    // Node 1 dropped the unplanned link itself.
    assert!(!fleet.peers_of(NodeId(1)).contains(&fleet.peer_id(NodeId(0)).unwrap()));
    assert!(report
        .events
        .iter()
        .any(|e| e.event_kind == TopologyEventKind::Error && e.node_id == Some(NodeId(0))));
}

#[tokio::test(start_paused = true)]
async fn test_both_endpoints_drop_an_unplanned_link() {
    let registry = registry(4);
    let fleet = SimFleet::new(&registry);
    fleet.link_default_ring();
    fleet.set_latency(Duration::from_millis(20));

    let plan = build(
        &TopologySpec::Custom {
            edges: vec![(0, 2), (1, 3)],
        },
        &registry,
    )
    .unwrap();
    let config = config();
    let report = TopologyBuilder::new(&fleet, &config)
        .apply(&plan, &registry)
        .await
        .unwrap();

    assert_eq!(report.outcome, ConvergenceOutcome::Converged);
    let calls = fleet.calls();
    for id in registry.ids() {
        let disconnects = calls
            .iter()
            .filter(|c| c.node == id && matches!(c.op, SimOp::Disconnect(_)))
            .count();
        assert_eq!(disconnects, 2, "node {id}");
    }
    // The endpoint that runs second finds the link already gone.
    assert!(report
        .events
        .iter()
        .filter(|e| e.event_kind == TopologyEventKind::Disconnect)
        .all(|e| e.outcome == EventOutcome::Ok));
    assert!(!fleet.is_linked(NodeId(0), NodeId(1)));
    assert!(fleet.is_linked(NodeId(1), NodeId(3)));
}

#[tokio::test(start_paused = true)]
async fn test_full_mesh_of_four_from_default_links() {
    let registry = registry(4);
    let fleet = SimFleet::new(&registry);
    fleet.link_default_ring();

    let plan = build(&TopologySpec::FullMesh, &registry).unwrap();
    let config = config();
    let report = TopologyBuilder::new(&fleet, &config)
        .apply(&plan, &registry)
        .await
        .unwrap();

    assert_eq!(report.outcome, ConvergenceOutcome::Converged);
    assert_eq!(report.resolved_edges.len(), 6);
    assert!(report.unresolved_edges.is_empty());
    for i in 0..4 {
        assert_eq!(fleet.peers_of(NodeId(i)).len(), 3, "node {i}");
    }
    assert!(fleet.is_linked(NodeId(0), NodeId(2)));
    assert!(fleet.is_linked(NodeId(1), NodeId(3)));
}

#[tokio::test(start_paused = true)]
async fn test_plan_size_must_match_registry() {
    let registry = registry(4);
    let fleet = SimFleet::new(&registry);
    let plan = topology::generate(&TopologySpec::FullMesh, 5).unwrap();
    let config = config();
    let result = TopologyBuilder::new(&fleet, &config)
        .apply(&plan, &registry)
        .await;
    assert!(matches!(result, Err(TopologyError::SizeMismatch { .. })));
    assert!(fleet.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_matrix_reflects_converged_topology() {
    let registry = registry(5);
    let fleet = SimFleet::new(&registry);
    fleet.link_default_ring();
    let plan = build(&TopologySpec::Star { hub: 0 }, &registry).unwrap();
    let config = config();
    TopologyBuilder::new(&fleet, &config)
        .apply(&plan, &registry)
        .await
        .unwrap();

    let (matrix, event) = ConnectionMatrix::read(&fleet, &registry, &config.retry).await;
    assert_eq!(event.outcome, EventOutcome::Ok);
    assert!(matrix.matches_plan(&plan));
    assert!(matrix.render().starts_with("   0 1 2 3 4\n0  x 1 1 1 1\n"));
}
