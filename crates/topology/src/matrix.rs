//! Live connection matrix of the fleet.

use crate::plan::AdjacencyPlan;
use futures::future::join_all;
use node_api::{retry_transient, ControlApi};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use testbed_core::{
    EventOutcome, NodeId, PeerId, Registry, RetryPolicy, TopologyEvent, TopologyEventKind,
};

/// Which fleet members each node reports as connected.
///
/// A row is `None` when the node could not be queried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMatrix {
    rows: Vec<Option<BTreeSet<NodeId>>>,
    external: Vec<usize>,
}

impl ConnectionMatrix {
    /// Query every node of `registry` in parallel.
    pub async fn read(
        control: &dyn ControlApi,
        registry: &Registry,
        retry: &RetryPolicy,
    ) -> (Self, TopologyEvent) {
        let identities = join_all(registry.list().iter().map(|node| {
            let what = format!("{} identity", node.name);
            async move { retry_transient(retry, &what, || control.identity(node)).await }
        }))
        .await;
        let index: HashMap<PeerId, NodeId> = identities
            .iter()
            .zip(registry.ids())
            .filter_map(|(identity, id)| identity.as_ref().ok().map(|i| (i.peer_id.clone(), id)))
            .collect();

        let peers = join_all(registry.list().iter().map(|node| {
            let what = format!("{} peer list", node.name);
            async move { retry_transient(retry, &what, || control.list_peers(node)).await }
        }))
        .await;

        let mut rows = Vec::with_capacity(registry.len());
        let mut external = Vec::with_capacity(registry.len());
        for (id, result) in registry.ids().zip(peers) {
            match result {
                Ok(peers) => {
                    let (known, unknown): (Vec<_>, Vec<_>) =
                        peers.iter().partition(|p| index.contains_key(*p));
                    rows.push(Some(known.iter().map(|p| index[*p]).collect()));
                    external.push(unknown.len());
                }
                Err(e) => {
                    tracing::warn!("Cannot read peers of node {id}: {e}");
                    rows.push(None);
                    external.push(0);
                }
            }
        }
        let matrix = Self { rows, external };
        let outcome = if matrix.unreachable().is_empty() {
            EventOutcome::Ok
        } else {
            EventOutcome::Failed
        };
        (
            matrix,
            TopologyEvent::run(TopologyEventKind::MatrixRead, outcome),
        )
    }

    pub fn from_rows(rows: Vec<Option<BTreeSet<NodeId>>>) -> Self {
        let external = vec![0; rows.len()];
        Self { rows, external }
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.rows
            .get(from.index())
            .and_then(Option::as_ref)
            .is_some_and(|peers| peers.contains(&to))
    }

    pub fn unreachable(&self) -> Vec<NodeId> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.is_none())
            .map(|(i, _)| NodeId(i as u32))
            .collect()
    }

    /// Peers outside the fleet reported by each node.
    pub fn external_peers(&self, node: NodeId) -> usize {
        self.external.get(node.index()).copied().unwrap_or(0)
    }

    /// Whether every reachable node reports exactly its planned neighbours
    /// and nothing outside the fleet.
    pub fn matches_plan(&self, plan: &AdjacencyPlan) -> bool {
        self.rows.len() == plan.node_count()
            && self.rows.iter().enumerate().all(|(i, row)| match row {
                Some(peers) => {
                    *peers == plan.neighbors(NodeId(i as u32)) && self.external[i] == 0
                }
                None => false,
            })
    }

    /// N×N grid of `1`/`0`, `x` on the diagonal and `?` for rows that could
    /// not be read.
    pub fn render(&self) -> String {
        let n = self.rows.len();
        let width = n.saturating_sub(1).to_string().len().max(1);
        let mut out = String::new();
        let _ = write!(out, "{:>width$} ", "");
        for j in 0..n {
            let _ = write!(out, " {j:>width$}");
        }
        out.push('\n');
        for (i, row) in self.rows.iter().enumerate() {
            let _ = write!(out, "{i:>width$} ");
            for j in 0..n {
                let cell = match row {
                    _ if i == j => "x",
                    None => "?",
                    Some(peers) if peers.contains(&NodeId(j as u32)) => "1",
                    Some(_) => "0",
                };
                let _ = write!(out, " {cell:>width$}");
            }
            out.push('\n');
        }
        out
    }
}
