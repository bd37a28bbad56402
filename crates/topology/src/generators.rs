//! Graph generators for every [`TopologySpec`] kind.
//!
//! All generators are pure: the same spec, node count and seed always yield
//! the same plan.

use crate::error::TopologyError;
use crate::plan::AdjacencyPlan;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet};
use testbed_core::{Registry, TopologySpec};

/// Restarts allowed before random-regular generation gives up.
const MAX_REGULAR_ATTEMPTS: usize = 200;

/// Build the plan for the nodes of `registry`.
pub fn build(spec: &TopologySpec, registry: &Registry) -> Result<AdjacencyPlan, TopologyError> {
    let plan = generate(spec, registry.len())?;
    let components = plan.component_count();
    if components > 1 {
        tracing::info!(
            "Topology {spec} over {} nodes has {components} components ({} isolated nodes)",
            registry.len(),
            plan.isolated_nodes().len()
        );
    }
    Ok(plan)
}

/// Build the plan for `node_count` nodes.
pub fn generate(spec: &TopologySpec, node_count: usize) -> Result<AdjacencyPlan, TopologyError> {
    match spec {
        TopologySpec::Ring { degree } => ring(node_count, *degree),
        TopologySpec::Star { hub } => star(node_count, *hub),
        TopologySpec::FullMesh => Ok(complete(node_count)),
        TopologySpec::RandomRegular { degree, seed } => random_regular(node_count, *degree, *seed),
        TopologySpec::Grid { columns } => grid(node_count, *columns),
        TopologySpec::BarabasiAlbert { m, seed } => barabasi_albert(node_count, *m, *seed),
        TopologySpec::Custom { edges } => custom(node_count, edges),
    }
}

fn complete(n: usize) -> AdjacencyPlan {
    let mut plan = AdjacencyPlan::new(n);
    for a in 0..n as u32 {
        for b in a + 1..n as u32 {
            plan.insert(a, b).ok();
        }
    }
    plan
}

/// Ring lattice: node `i` links to the `degree / 2` nearest nodes on each side.
fn ring(n: usize, degree: usize) -> Result<AdjacencyPlan, TopologyError> {
    if n < 2 {
        return Ok(AdjacencyPlan::new(n));
    }
    if degree >= n - 1 {
        return Ok(complete(n));
    }
    if degree % 2 != 0 {
        return Err(TopologyError::InvalidSpec(format!(
            "ring degree must be even when smaller than n-1 (degree {degree}, {n} nodes)"
        )));
    }
    let mut plan = AdjacencyPlan::new(n);
    for i in 0..n {
        for step in 1..=degree / 2 {
            plan.insert(i as u32, ((i + step) % n) as u32)?;
        }
    }
    Ok(plan)
}

fn star(n: usize, hub: u32) -> Result<AdjacencyPlan, TopologyError> {
    if hub as usize >= n {
        return Err(TopologyError::UnknownNode {
            node: hub,
            node_count: n,
        });
    }
    let mut plan = AdjacencyPlan::new(n);
    for i in (0..n as u32).filter(|&i| i != hub) {
        plan.insert(hub, i)?;
    }
    Ok(plan)
}

/// Uniform random `degree`-regular graph.
///
/// Stubs are paired at random; pairs that would form a loop or a duplicate
/// edge go back into the pool and are reshuffled, and the whole attempt
/// restarts only when no valid pair is left in the pool.
fn random_regular(n: usize, degree: usize, seed: u64) -> Result<AdjacencyPlan, TopologyError> {
    if degree == 0 {
        return Ok(AdjacencyPlan::new(n));
    }
    if n > 0 && degree >= n - 1 {
        return Ok(complete(n));
    }
    if (n * degree) % 2 != 0 {
        return Err(TopologyError::InvalidSpec(format!(
            "random-regular needs n * degree to be even (degree {degree}, {n} nodes)"
        )));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..MAX_REGULAR_ATTEMPTS {
        if let Some(edges) = try_regular(n, degree, &mut rng) {
            let mut plan = AdjacencyPlan::new(n);
            for (a, b) in edges {
                plan.insert(a, b)?;
            }
            return Ok(plan);
        }
    }
    Err(TopologyError::InvalidSpec(format!(
        "no {degree}-regular graph found on {n} nodes after {MAX_REGULAR_ATTEMPTS} attempts"
    )))
}

fn try_regular(n: usize, degree: usize, rng: &mut StdRng) -> Option<BTreeSet<(u32, u32)>> {
    let mut edges = BTreeSet::new();
    let mut stubs: Vec<u32> = (0..n as u32)
        .flat_map(|i| std::iter::repeat(i).take(degree))
        .collect();
    while !stubs.is_empty() {
        stubs.shuffle(rng);
        let mut leftover: BTreeMap<u32, usize> = BTreeMap::new();
        for pair in stubs.chunks(2) {
            let (a, b) = (pair[0].min(pair[1]), pair[0].max(pair[1]));
            if a != b && edges.insert((a, b)) {
                continue;
            }
            *leftover.entry(a).or_default() += 1;
            *leftover.entry(b).or_default() += 1;
        }
        let pending: Vec<u32> = leftover.keys().copied().collect();
        let suitable = pending.iter().enumerate().any(|(i, &a)| {
            pending[i + 1..]
                .iter()
                .any(|&b| !edges.contains(&(a.min(b), a.max(b))))
        });
        if !leftover.is_empty() && !suitable {
            return None;
        }
        stubs = leftover
            .into_iter()
            .flat_map(|(node, count)| std::iter::repeat(node).take(count))
            .collect();
    }
    Some(edges)
}

/// Rectangular lattice, each node linked to its right and lower neighbour.
fn grid(n: usize, columns: Option<usize>) -> Result<AdjacencyPlan, TopologyError> {
    let columns = match columns {
        Some(0) => {
            return Err(TopologyError::InvalidSpec(
                "grid columns must be at least 1".into(),
            ))
        }
        Some(c) => c,
        None => {
            let side = (n as f64).sqrt().round() as usize;
            if side * side != n {
                return Err(TopologyError::InvalidSpec(format!(
                    "grid without columns needs a perfect square node count, got {n}"
                )));
            }
            side
        }
    };
    let mut plan = AdjacencyPlan::new(n);
    for i in 0..n {
        if (i % columns) + 1 < columns && i + 1 < n {
            plan.insert(i as u32, (i + 1) as u32)?;
        }
        if i + columns < n {
            plan.insert(i as u32, (i + columns) as u32)?;
        }
    }
    Ok(plan)
}

/// Preferential attachment: node `v` links to `min(m, v)` distinct earlier
/// nodes, each chosen with probability proportional to its degree plus one.
fn barabasi_albert(n: usize, m: usize, seed: u64) -> Result<AdjacencyPlan, TopologyError> {
    if m == 0 {
        return Err(TopologyError::InvalidSpec(
            "barabasi-albert needs m of at least 1".into(),
        ));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut plan = AdjacencyPlan::new(n);
    // Every node appears once, plus once per edge endpoint.
    let mut pool: Vec<u32> = Vec::with_capacity(n * (2 * m + 1));
    for v in 0..n as u32 {
        let wanted = m.min(v as usize);
        let mut targets = BTreeSet::new();
        while targets.len() < wanted {
            targets.insert(pool[rng.gen_range(0..pool.len())]);
        }
        for &t in &targets {
            plan.insert(v, t)?;
            pool.push(t);
            pool.push(v);
        }
        pool.push(v);
    }
    Ok(plan)
}

fn custom(n: usize, edges: &[(u32, u32)]) -> Result<AdjacencyPlan, TopologyError> {
    let mut plan = AdjacencyPlan::new(n);
    for &(a, b) in edges {
        plan.insert(a, b)?;
    }
    Ok(plan)
}
