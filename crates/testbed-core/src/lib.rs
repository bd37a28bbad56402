//! Core types for the swarm-testbed harness.
//!
//! This crate provides the foundational types shared by every other crate in
//! the workspace:
//!
//! - [`NodeId`], [`PeerId`], [`ContainerId`] - identities of fleet members
//! - [`Registry`] - the fixed, read-only set of nodes participating in a run
//! - [`TestbedConfig`] - configuration loaded once from YAML at startup
//! - [`MetricSample`], [`TopologyEvent`], [`OperationOutcome`] - the rows of
//!   the three run logs
//! - [`RunState`] - the phase machine owned by the run coordinator
//!
//! # Architecture
//!
//! ```text
//! testbed-core (this crate)
//!    │
//!    ├─── node-api           (control / content / status / resource clients)
//!    ├─── topology           (adjacency plans and convergence)
//!    ├─── workload           (seeded store/retrieve operations)
//!    ├─── metrics-collector  (fixed-interval polling)
//!    ├─── run-log            (CSV logs)
//!    └─── run-analysis       (post-run reports)
//! ```

pub mod config;
pub mod duration;
pub mod ids;
pub mod phase;
pub mod records;
pub mod registry;
pub mod sink;

pub use config::{
    CollectorConfig, ConfigError, ConvergenceConfig, NodeConfig, OutputConfig, RetryPolicy,
    RunConfig, TestbedConfig, TopologySpec, WorkloadPlan,
};
pub use duration::{format_duration, parse_duration};
pub use ids::{ContainerId, NodeId, PeerId};
pub use phase::{PhaseError, RunPhase, RunState};
pub use records::{
    EventOutcome, MetricSample, MetricSource, OperationKind, OperationOutcome, TopologyEvent,
    TopologyEventKind,
};
pub use registry::{ContainerMap, NodeHandle, Registry, RegistryError};
pub use sink::{MetricSink, SinkError, TickBatch};
