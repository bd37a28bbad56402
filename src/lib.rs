//! swarm-testbed: topology and workload experiments on a fleet of
//! content-addressed storage nodes.
//!
//! A run builds a target peer topology, drives the nodes' peer connections
//! towards it, replays a seeded store/retrieve workload and samples
//! per-node resource and application metrics throughout. Every step is
//! recorded in three CSV logs that `analyze` summarizes afterwards.
//!
//! The building blocks live in their own crates:
//!
//! - `testbed_core` - configuration, identifiers, records and the run phases
//! - `node_api` - node and resource-usage API clients, plus a simulated fleet
//! - `topology` - adjacency plans and convergence
//! - `workload` - the workload schedule and driver
//! - `metrics_collector` - periodic metric sampling
//! - `run_log` - the CSV logs
//! - `run_analysis` - post-run summaries

pub mod coordinator;
pub mod exit;

pub use coordinator::{RunCoordinator, RunError, RunReport};
pub use exit::{classify, ExitStatus};
