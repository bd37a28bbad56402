//! `plan` command handler.

use crate::cli::ConfigArgs;
use anyhow::Context;
use testbed_core::NodeId;
use topology::{AdjacencyPlan, ConnectionMatrix};

/// Print the adjacency plan of the configured topology.
pub fn run_plan(args: ConfigArgs, matrix: bool) -> anyhow::Result<()> {
    let config = args.load().context("Invalid configuration")?;
    let plan = topology::generate(&config.topology, config.nodes.count)
        .with_context(|| format!("Cannot plan {} on {} nodes", config.topology, config.nodes.count))?;

    println!("Topology: {} on {} nodes", config.topology, plan.node_count());
    println!("{}", describe(&plan));
    println!();
    for edge in plan.edges() {
        println!("{} -- {}", edge.a(), edge.b());
    }
    if matrix {
        println!();
        print!("{}", planned_matrix(&plan).render());
    }
    Ok(())
}

/// One-line statistics: edges, degree range and connectivity.
fn describe(plan: &AdjacencyPlan) -> String {
    let degrees: Vec<usize> = (0..plan.node_count() as u32)
        .map(|i| plan.degree(NodeId(i)))
        .collect();
    let min = degrees.iter().min().copied().unwrap_or(0);
    let max = degrees.iter().max().copied().unwrap_or(0);
    let mean = if degrees.is_empty() {
        0.0
    } else {
        degrees.iter().sum::<usize>() as f64 / degrees.len() as f64
    };
    let mut line = format!(
        "Edges: {}, degree min/mean/max: {min}/{mean:.2}/{max}, components: {}",
        plan.len(),
        plan.component_count()
    );
    let isolated = plan.isolated_nodes();
    if !isolated.is_empty() {
        line.push_str(&format!(", isolated nodes: {}", isolated.len()));
    }
    line
}

fn planned_matrix(plan: &AdjacencyPlan) -> ConnectionMatrix {
    ConnectionMatrix::from_rows(
        (0..plan.node_count() as u32)
            .map(|i| Some(plan.neighbors(NodeId(i))))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use testbed_core::TopologySpec;

    #[test]
    fn test_describe_star() {
        let plan = topology::generate(&TopologySpec::Star { hub: 0 }, 5).unwrap();
        assert_eq!(
            describe(&plan),
            "Edges: 4, degree min/mean/max: 1/1.60/4, components: 1"
        );
    }

    #[test]
    fn test_planned_matrix_matches_plan() {
        let plan = topology::generate(&TopologySpec::FullMesh, 4).unwrap();
        let matrix = planned_matrix(&plan);
        assert!(matrix.matches_plan(&plan));
        assert_eq!(matrix.render().lines().count(), 5);
    }
}
