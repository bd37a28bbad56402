//! Topology planning and convergence.
//!
//! [`build`] turns a [`TopologySpec`](testbed_core::TopologySpec) into an
//! [`AdjacencyPlan`]; [`TopologyBuilder::apply`] makes the live fleet match it
//! and reports what it could and could not achieve.

pub mod builder;
pub mod error;
pub mod generators;
pub mod matrix;
pub mod plan;

pub use builder::{
    ConvergenceOutcome, ConvergenceReport, Mismatch, MismatchKind, PeerRef, TopologyBuilder,
};
pub use error::TopologyError;
pub use generators::{build, generate};
pub use matrix::ConnectionMatrix;
pub use plan::{AdjacencyPlan, Edge};
