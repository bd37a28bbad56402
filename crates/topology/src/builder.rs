//! Imposing an [`AdjacencyPlan`] on a live fleet.
//!
//! Convergence runs in three steps:
//!
//! 1. Readiness: every node's identity is polled (in parallel) until it
//!    answers or `ready_timeout` passes. Nodes that never answer are
//!    unreachable.
//! 2. Reconcile passes: every reachable node fetches its live peer list,
//!    drops peers that are not planned (including peers outside the fleet),
//!    then dials planned neighbours it is missing. Disconnects always precede
//!    connects on the same node. Each node's pass is bounded by
//!    `node_timeout`.
//! 3. Verification: after `settle_delay` the live peer lists are read again
//!    and compared with the plan. Mismatches trigger another pass, up to
//!    `verification_retries` extra passes.

use crate::error::TopologyError;
use crate::plan::{AdjacencyPlan, Edge};
use futures::future::join_all;
use node_api::{poll_until_ready, retry_transient, ControlApi, NodeApiError, NodeIdentity};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use testbed_core::{
    ConvergenceConfig, EventOutcome, NodeHandle, NodeId, PeerId, Registry, TopologyEvent,
    TopologyEventKind,
};
use tokio::time::{sleep_until, timeout, timeout_at, Instant};

/// Final state of a convergence attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceOutcome {
    /// Observed adjacency equals the plan on every node.
    Converged,
    /// Some nodes were unreachable; their edges are unresolved.
    Partial,
    /// Every node answered but the observed adjacency differs from the plan.
    Diverged,
}

impl ConvergenceOutcome {
    pub fn as_event_outcome(&self) -> EventOutcome {
        match self {
            ConvergenceOutcome::Converged => EventOutcome::Converged,
            ConvergenceOutcome::Partial => EventOutcome::Partial,
            ConvergenceOutcome::Diverged => EventOutcome::Diverged,
        }
    }
}

impl fmt::Display for ConvergenceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_event_outcome(), f)
    }
}

/// The other end of a mismatched link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerRef {
    Node(NodeId),
    /// A peer that is not part of the fleet
    External(PeerId),
}

impl fmt::Display for PeerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRef::Node(id) => write!(f, "node {id}"),
            PeerRef::External(peer) => write!(f, "external peer {peer}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    /// Planned but not observed
    Missing,
    /// Observed but not planned
    Unexpected,
}

/// One offending link, as seen from `node`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub node: NodeId,
    pub peer: PeerRef,
    pub kind: MismatchKind,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MismatchKind::Missing => write!(f, "node {} missing link to {}", self.node, self.peer),
            MismatchKind::Unexpected => {
                write!(f, "node {} has unexpected link to {}", self.node, self.peer)
            }
        }
    }
}

/// Result of [`TopologyBuilder::apply`].
#[derive(Debug, Clone)]
pub struct ConvergenceReport {
    pub outcome: ConvergenceOutcome,
    pub resolved_edges: Vec<Edge>,
    pub unresolved_edges: Vec<Edge>,
    /// Mismatches left after the last verification
    pub mismatches: Vec<Mismatch>,
    pub unreachable: Vec<NodeId>,
    /// Reconcile passes performed
    pub passes: u32,
    /// Every readiness, disconnect, connect and verify outcome, in order
    pub events: Vec<TopologyEvent>,
}

impl ConvergenceReport {
    pub fn is_converged(&self) -> bool {
        self.outcome == ConvergenceOutcome::Converged
    }

    /// Turn an imperfect topology into an error unless `tolerate` is set.
    pub fn into_result(self, tolerate: bool) -> Result<Self, TopologyError> {
        let outcome = self.outcome;
        match outcome {
            ConvergenceOutcome::Converged => Ok(self),
            _ if tolerate => {
                tracing::warn!(
                    "Continuing with {} topology: {} of {} edges resolved",
                    self.outcome,
                    self.resolved_edges.len(),
                    self.resolved_edges.len() + self.unresolved_edges.len()
                );
                Ok(self)
            }
            ConvergenceOutcome::Partial => Err(TopologyError::PartialConvergence {
                unreachable: self.unreachable,
                unresolved: self.unresolved_edges.len(),
            }),
            ConvergenceOutcome::Diverged => Err(TopologyError::Diverged {
                passes: self.passes,
                summary: summarize(&self.mismatches),
            }),
        }
    }
}

fn summarize(mismatches: &[Mismatch]) -> String {
    const SHOWN: usize = 5;
    let mut summary = mismatches
        .iter()
        .take(SHOWN)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    if mismatches.len() > SHOWN {
        summary.push_str(&format!(" (+{} more)", mismatches.len() - SHOWN));
    }
    summary
}

/// Drives the control API of every node towards a plan.
pub struct TopologyBuilder<'a> {
    control: &'a dyn ControlApi,
    config: &'a ConvergenceConfig,
}

/// What one node saw and did during a pass.
struct NodePass {
    node: NodeId,
    events: Vec<TopologyEvent>,
    result: Result<(), NodeApiError>,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(control: &'a dyn ControlApi, config: &'a ConvergenceConfig) -> Self {
        Self { control, config }
    }

    /// Impose `plan` on the nodes of `registry`.
    ///
    /// Only a plan/registry size mismatch is returned as an error; every
    /// network failure ends up in the report.
    pub async fn apply(
        &self,
        plan: &AdjacencyPlan,
        registry: &Registry,
    ) -> Result<ConvergenceReport, TopologyError> {
        if plan.node_count() != registry.len() {
            return Err(TopologyError::SizeMismatch {
                plan: plan.node_count(),
                registry: registry.len(),
            });
        }
        let deadline = Instant::now() + self.config.deadline;
        let mut events = vec![TopologyEvent::run(
            TopologyEventKind::ApplyStarted,
            EventOutcome::Ok,
        )];
        tracing::info!(
            "Applying topology: {} edges over {} nodes",
            plan.len(),
            registry.len()
        );

        let ready_deadline = (Instant::now() + self.config.ready_timeout).min(deadline);
        let identities = self.wait_ready(registry, ready_deadline, &mut events).await;
        let peer_index: HashMap<PeerId, NodeId> = identities
            .iter()
            .map(|(id, identity)| (identity.peer_id.clone(), *id))
            .collect();

        let mut passes = 0;
        let mut observed: BTreeMap<NodeId, BTreeSet<PeerId>> = BTreeMap::new();
        let mut mismatches = Vec::new();
        while passes <= self.config.verification_retries {
            passes += 1;
            let results = join_all(
                registry
                    .list()
                    .iter()
                    .filter(|n| identities.contains_key(&n.id))
                    .map(|node| self.reconcile_node(node, plan, &identities, deadline)),
            )
            .await;
            for pass in results {
                if let Err(e) = &pass.result {
                    tracing::warn!("Reconcile pass {passes} failed on node {}: {e}", pass.node);
                }
                events.extend(pass.events);
            }

            let settle = (Instant::now() + self.config.settle_delay).min(deadline);
            sleep_until(settle).await;
            observed = self.observe(registry, &identities).await;
            mismatches = find_mismatches(plan, &identities, &peer_index, &observed);
            events.extend(verify_events(&identities, &observed, &mismatches));

            if mismatches.is_empty() || Instant::now() >= deadline {
                break;
            }
            tracing::info!(
                "Verification after pass {passes} found {} mismatches",
                mismatches.len()
            );
        }

        let unreachable: Vec<NodeId> = registry
            .ids()
            .filter(|id| !observed.contains_key(id))
            .collect();
        let (resolved_edges, unresolved_edges): (Vec<Edge>, Vec<Edge>) =
            plan.edges().copied().partition(|e| {
                linked(&observed, &identities, e.a(), e.b())
                    && linked(&observed, &identities, e.b(), e.a())
            });
        let outcome = if !unreachable.is_empty() {
            ConvergenceOutcome::Partial
        } else if !mismatches.is_empty() {
            ConvergenceOutcome::Diverged
        } else {
            ConvergenceOutcome::Converged
        };
        events.push(TopologyEvent::run(
            TopologyEventKind::ApplyFinished,
            outcome.as_event_outcome(),
        ));
        tracing::info!(
            "Topology {outcome} after {passes} passes: {} edges resolved, {} unresolved, {} unreachable nodes",
            resolved_edges.len(),
            unresolved_edges.len(),
            unreachable.len()
        );

        Ok(ConvergenceReport {
            outcome,
            resolved_edges,
            unresolved_edges,
            mismatches,
            unreachable,
            passes,
            events,
        })
    }

    async fn wait_ready(
        &self,
        registry: &Registry,
        deadline: Instant,
        events: &mut Vec<TopologyEvent>,
    ) -> BTreeMap<NodeId, NodeIdentity> {
        let results = join_all(registry.list().iter().map(|node| async move {
            let what = format!("{} identity", node.name);
            let result =
                poll_until_ready(deadline, &self.config.retry, &what, || self.control.identity(node))
                    .await;
            (node.id, result)
        }))
        .await;

        let mut identities = BTreeMap::new();
        for (id, result) in results {
            match result {
                Ok(identity) => {
                    tracing::debug!("Node {id} ready as {}", identity.peer_id);
                    events.push(TopologyEvent::link(
                        TopologyEventKind::Ready,
                        id,
                        identity.peer_id.clone(),
                        EventOutcome::Ok,
                    ));
                    identities.insert(id, identity);
                }
                Err(e) => {
                    tracing::warn!("Node {id} unreachable: {e}");
                    events.push(TopologyEvent::node(
                        TopologyEventKind::Unreachable,
                        id,
                        EventOutcome::Failed,
                    ));
                }
            }
        }
        identities
    }

    async fn reconcile_node(
        &self,
        node: &NodeHandle,
        plan: &AdjacencyPlan,
        identities: &BTreeMap<NodeId, NodeIdentity>,
        deadline: Instant,
    ) -> NodePass {
        let mut events = Vec::new();
        let node_deadline = (Instant::now() + self.config.node_timeout).min(deadline);
        let result = timeout_at(
            node_deadline,
            self.reconcile_steps(node, plan, identities, &mut events),
        )
        .await
        .unwrap_or_else(|_| Err(NodeApiError::timeout(&node.control_endpoint)));
        if result.is_err() {
            events.push(TopologyEvent::node(
                TopologyEventKind::Error,
                node.id,
                EventOutcome::Failed,
            ));
        }
        NodePass {
            node: node.id,
            events,
            result,
        }
    }

    async fn reconcile_steps(
        &self,
        node: &NodeHandle,
        plan: &AdjacencyPlan,
        identities: &BTreeMap<NodeId, NodeIdentity>,
        events: &mut Vec<TopologyEvent>,
    ) -> Result<(), NodeApiError> {
        let policy = &self.config.retry;
        let what = format!("{} peer list", node.name);
        let current: BTreeSet<PeerId> =
            retry_transient(policy, &what, || self.control.list_peers(node))
                .await?
                .into_iter()
                .collect();
        let planned: BTreeMap<PeerId, &NodeIdentity> = plan
            .neighbors(node.id)
            .into_iter()
            .filter_map(|n| identities.get(&n))
            .map(|identity| (identity.peer_id.clone(), identity))
            .collect();

        // Both endpoints of an unplanned link drop it; whichever runs second
        // finds it already gone.
        for peer in current.iter().filter(|peer| !planned.contains_key(*peer)) {
            let what = format!("{} disconnect {peer}", node.name);
            let outcome = match retry_transient(policy, &what, || self.control.disconnect(node, peer)).await {
                Ok(()) => EventOutcome::Ok,
                Err(e) if e.is_not_connected() => {
                    tracing::debug!("Node {} already dropped {peer}", node.id);
                    EventOutcome::Ok
                }
                Err(e) => {
                    tracing::warn!("Node {} failed to drop {peer}: {e}", node.id);
                    EventOutcome::Failed
                }
            };
            events.push(TopologyEvent::link(
                TopologyEventKind::Disconnect,
                node.id,
                peer.clone(),
                outcome,
            ));
        }

        for (peer, identity) in planned.iter().filter(|(p, _)| !current.contains(*p)) {
            let what = format!("{} connect {peer}", node.name);
            let outcome = match retry_transient(policy, &what, || {
                self.control.connect(node, &identity.address)
            })
            .await
            {
                Ok(()) => EventOutcome::Ok,
                Err(e) => {
                    tracing::warn!("Node {} failed to dial {peer}: {e}", node.id);
                    EventOutcome::Failed
                }
            };
            events.push(TopologyEvent::link(
                TopologyEventKind::Connect,
                node.id,
                peer.clone(),
                outcome,
            ));
        }
        Ok(())
    }

    /// Live peer lists of every node with a known identity. Nodes that do
    /// not answer within `node_timeout` are left out.
    ///
    /// Each node gets its own bound, even past the apply deadline, so one
    /// stalled node cannot hide the state of the others.
    async fn observe(
        &self,
        registry: &Registry,
        identities: &BTreeMap<NodeId, NodeIdentity>,
    ) -> BTreeMap<NodeId, BTreeSet<PeerId>> {
        let results = join_all(
            registry
                .list()
                .iter()
                .filter(|n| identities.contains_key(&n.id))
                .map(|node| async move {
                    let what = format!("{} peer list", node.name);
                    let peers = timeout(
                        self.config.node_timeout,
                        retry_transient(&self.config.retry, &what, || self.control.list_peers(node)),
                    )
                    .await;
                    (node.id, peers)
                }),
        )
        .await;
        results
            .into_iter()
            .filter_map(|(id, result)| match result {
                Ok(Ok(peers)) => Some((id, peers.into_iter().collect())),
                Ok(Err(e)) => {
                    tracing::warn!("Could not verify node {id}: {e}");
                    None
                }
                Err(_) => {
                    tracing::warn!("Could not verify node {id} within the node timeout");
                    None
                }
            })
            .collect()
    }
}

/// Whether `from` observed a link to `to`.
fn linked(
    observed: &BTreeMap<NodeId, BTreeSet<PeerId>>,
    identities: &BTreeMap<NodeId, NodeIdentity>,
    from: NodeId,
    to: NodeId,
) -> bool {
    match (observed.get(&from), identities.get(&to)) {
        (Some(peers), Some(identity)) => peers.contains(&identity.peer_id),
        _ => false,
    }
}

fn find_mismatches(
    plan: &AdjacencyPlan,
    identities: &BTreeMap<NodeId, NodeIdentity>,
    peer_index: &HashMap<PeerId, NodeId>,
    observed: &BTreeMap<NodeId, BTreeSet<PeerId>>,
) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();
    for (&node, peers) in observed {
        let planned = plan.neighbors(node);
        for &neighbor in &planned {
            if identities.contains_key(&neighbor) && !linked(observed, identities, node, neighbor) {
                mismatches.push(Mismatch {
                    node,
                    peer: PeerRef::Node(neighbor),
                    kind: MismatchKind::Missing,
                });
            }
        }
        for peer in peers {
            let peer_ref = match peer_index.get(peer) {
                Some(other) if planned.contains(other) => continue,
                Some(other) => PeerRef::Node(*other),
                None => PeerRef::External(peer.clone()),
            };
            mismatches.push(Mismatch {
                node,
                peer: peer_ref,
                kind: MismatchKind::Unexpected,
            });
        }
    }
    mismatches
}

fn verify_events(
    identities: &BTreeMap<NodeId, NodeIdentity>,
    observed: &BTreeMap<NodeId, BTreeSet<PeerId>>,
    mismatches: &[Mismatch],
) -> Vec<TopologyEvent> {
    let mut events = Vec::new();
    for &id in identities.keys() {
        if !observed.contains_key(&id) {
            events.push(TopologyEvent::node(
                TopologyEventKind::Verify,
                id,
                EventOutcome::Failed,
            ));
            continue;
        }
        let own: Vec<&Mismatch> = mismatches.iter().filter(|m| m.node == id).collect();
        if own.is_empty() {
            events.push(TopologyEvent::node(TopologyEventKind::Verify, id, EventOutcome::Ok));
        }
        for m in own {
            let peer = match &m.peer {
                PeerRef::Node(other) => match identities.get(other) {
                    Some(identity) => identity.peer_id.clone(),
                    None => continue,
                },
                PeerRef::External(peer) => peer.clone(),
            };
            let outcome = match m.kind {
                MismatchKind::Missing => EventOutcome::Missing,
                MismatchKind::Unexpected => EventOutcome::Unexpected,
            };
            events.push(TopologyEvent::link(TopologyEventKind::Verify, id, peer, outcome));
        }
    }
    events
}
