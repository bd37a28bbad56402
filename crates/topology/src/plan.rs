//! The target adjacency of a run.

use crate::error::TopologyError;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use testbed_core::NodeId;

/// Unordered pair of distinct nodes, stored with the lower id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    a: NodeId,
    b: NodeId,
}

impl Edge {
    pub fn new(a: NodeId, b: NodeId) -> Result<Self, TopologyError> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Ok(Self { a, b }),
            std::cmp::Ordering::Greater => Ok(Self { a: b, b: a }),
            std::cmp::Ordering::Equal => Err(TopologyError::SelfLoop(a)),
        }
    }

    pub fn a(&self) -> NodeId {
        self.a
    }

    pub fn b(&self) -> NodeId {
        self.b
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.a == node || self.b == node
    }

    /// The endpoint that is not `node`.
    pub fn other(&self, node: NodeId) -> Option<NodeId> {
        if node == self.a {
            Some(self.b)
        } else if node == self.b {
            Some(self.a)
        } else {
            None
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.a, self.b)
    }
}

/// Symmetric, loop-free set of edges over `0..node_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjacencyPlan {
    node_count: usize,
    edges: BTreeSet<Edge>,
}

impl AdjacencyPlan {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            edges: BTreeSet::new(),
        }
    }

    /// Add the edge `a-b`. Returns `false` when it was already planned.
    pub fn insert(&mut self, a: u32, b: u32) -> Result<bool, TopologyError> {
        for node in [a, b] {
            if node as usize >= self.node_count {
                return Err(TopologyError::UnknownNode {
                    node,
                    node_count: self.node_count,
                });
            }
        }
        Ok(self.edges.insert(Edge::new(NodeId(a), NodeId(b))?))
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn contains(&self, a: NodeId, b: NodeId) -> bool {
        Edge::new(a, b).is_ok_and(|e| self.edges.contains(&e))
    }

    pub fn neighbors(&self, node: NodeId) -> BTreeSet<NodeId> {
        self.edges.iter().filter_map(|e| e.other(node)).collect()
    }

    pub fn degree(&self, node: NodeId) -> usize {
        self.edges.iter().filter(|e| e.contains(node)).count()
    }

    pub fn isolated_nodes(&self) -> Vec<NodeId> {
        (0..self.node_count as u32)
            .map(NodeId)
            .filter(|n| !self.edges.iter().any(|e| e.contains(*n)))
            .collect()
    }

    /// Number of connected components, isolated nodes included.
    pub fn component_count(&self) -> usize {
        let mut adjacency = vec![Vec::new(); self.node_count];
        for e in &self.edges {
            adjacency[e.a.index()].push(e.b.index());
            adjacency[e.b.index()].push(e.a.index());
        }
        let mut seen = vec![false; self.node_count];
        let mut components = 0;
        for start in 0..self.node_count {
            if seen[start] {
                continue;
            }
            components += 1;
            seen[start] = true;
            let mut queue = VecDeque::from([start]);
            while let Some(node) = queue.pop_front() {
                for &next in &adjacency[node] {
                    if !seen[next] {
                        seen[next] = true;
                        queue.push_back(next);
                    }
                }
            }
        }
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_is_normalized() {
        let e = Edge::new(NodeId(5), NodeId(2)).unwrap();
        assert_eq!((e.a(), e.b()), (NodeId(2), NodeId(5)));
        assert_eq!(e, Edge::new(NodeId(2), NodeId(5)).unwrap());
        assert_eq!(e.other(NodeId(5)), Some(NodeId(2)));
        assert_eq!(e.other(NodeId(7)), None);
        assert_eq!(e.to_string(), "(2, 5)");
    }

    #[test]
    fn test_self_loop_rejected() {
        assert!(matches!(
            Edge::new(NodeId(3), NodeId(3)),
            Err(TopologyError::SelfLoop(NodeId(3)))
        ));
    }

    #[test]
    fn test_plan_insert_and_queries() {
        let mut plan = AdjacencyPlan::new(4);
        assert!(plan.insert(0, 1).unwrap());
        assert!(!plan.insert(1, 0).unwrap());
        plan.insert(1, 2).unwrap();
        assert!(matches!(
            plan.insert(1, 4),
            Err(TopologyError::UnknownNode { node: 4, .. })
        ));
        assert_eq!(plan.len(), 2);
        assert!(plan.contains(NodeId(2), NodeId(1)));
        assert_eq!(
            plan.neighbors(NodeId(1)),
            BTreeSet::from([NodeId(0), NodeId(2)])
        );
        assert_eq!(plan.isolated_nodes(), vec![NodeId(3)]);
        assert_eq!(plan.component_count(), 2);
    }
}
