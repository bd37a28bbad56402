//! Drives one run through its phases.
//!
//! ```text
//! Provisioning -> Converging -> Running -> Collecting -> Done
//!        \______________\___________\___________\______-> Failed
//! ```
//!
//! The collector is started during provisioning so topology construction is
//! observed. Whatever ends the run, the collector is stopped and every log is
//! flushed before [`RunCoordinator::run`] returns.

use futures::StreamExt;
use metrics_collector::{
    discover_containers, CollectorError, CollectorHandle, CollectorSummary, MetricsCollector,
};
use node_api::NodeApis;
use run_log::{LogError, RunLogs, TopologyLog};
use std::sync::Arc;
use testbed_core::{
    EventOutcome, PhaseError, Registry, RunPhase, RunState, TestbedConfig, TopologyEvent,
    TopologyEventKind,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use topology::{AdjacencyPlan, ConvergenceReport, TopologyBuilder, TopologyError};
use workload::{WorkloadDriver, WorkloadSummary};

/// Why a run did not reach `Done`.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Run logs unavailable: {0}")]
    Logs(#[from] LogError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Collector(#[from] CollectorError),

    #[error("Run interrupted during {phase}")]
    Interrupted { phase: RunPhase },

    #[error(transparent)]
    Phase(#[from] PhaseError),
}

/// What a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    pub state: RunState,
    pub convergence: ConvergenceReport,
    pub workload: WorkloadSummary,
    pub collector: CollectorSummary,
}

pub struct RunCoordinator {
    config: TestbedConfig,
    registry: Arc<Registry>,
    apis: NodeApis,
    cancel: CancellationToken,
    state: RunState,
}

/// Resources that must be released however the run ends.
struct Active {
    collector: CollectorHandle,
    topology_log: TopologyLog,
    workload_log: run_log::WorkloadLog,
}

impl RunCoordinator {
    pub fn new(config: TestbedConfig, registry: Arc<Registry>, apis: NodeApis) -> Self {
        Self {
            config,
            registry,
            apis,
            cancel: CancellationToken::new(),
            state: RunState::new(),
        }
    }

    /// Cancelling `token` interrupts the run at the next await point.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Drive the run to `Done` or `Failed`.
    ///
    /// Whatever the outcome, [`RunCoordinator::state`] reflects the final
    /// phase afterwards.
    pub async fn run(&mut self) -> Result<RunReport, RunError> {
        let _deadline = self
            .config
            .run
            .deadline
            .map(|deadline| DeadlineTimer::arm(deadline, self.cancel.clone()));
        self.announce();

        let (plan, mut active) = match self.provision().await {
            Ok(provisioned) => provisioned,
            Err(e) => return Err(self.fail(e)),
        };

        match self.drive(&plan, &mut active).await {
            Ok((convergence, workload)) => {
                let collector = match active.finish().await {
                    Ok(collector) => collector,
                    Err(e) => return Err(self.fail(e)),
                };
                self.enter(RunPhase::Done)?;
                Ok(RunReport {
                    state: self.state.clone(),
                    convergence,
                    workload,
                    collector,
                })
            }
            Err(e) => {
                let e = self.fail(e);
                match (e, active.finish().await) {
                    // A dead collector reports its own cause on stop.
                    (RunError::Collector(_), Err(cause @ RunError::Collector(_))) => Err(cause),
                    (e, Err(stop)) => {
                        tracing::error!("Shutdown after failure was not clean: {stop}");
                        Err(e)
                    }
                    (e, Ok(_)) => Err(e),
                }
            }
        }
    }

    /// Build the plan, open the logs and start the collector.
    async fn provision(&self) -> Result<(AdjacencyPlan, Active), RunError> {
        let plan = topology::build(&self.config.topology, &self.registry)?;
        let logs = RunLogs::create(&self.config.output)?;
        let containers = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(RunError::Interrupted { phase: RunPhase::Provisioning });
            }
            result = discover_containers(
                self.apis.resource.as_ref(),
                &self.registry,
                self.config.nodes.project.as_deref(),
            ) => result?,
        };
        let collector = MetricsCollector::new(
            self.config.collector.clone(),
            self.registry.clone(),
            containers,
            &self.apis,
        )
        .start(logs.metrics);
        Ok((
            plan,
            Active {
                collector,
                topology_log: logs.topology,
                workload_log: logs.workload,
            },
        ))
    }

    /// Record the failure and hand `err` back.
    fn fail(&mut self, err: RunError) -> RunError {
        let phase = self.state.phase();
        self.state.fail();
        self.announce();
        tracing::error!("Run failed during {phase}: {err}");
        err
    }

    async fn drive(
        &mut self,
        plan: &AdjacencyPlan,
        active: &mut Active,
    ) -> Result<(ConvergenceReport, WorkloadSummary), RunError> {
        self.enter(RunPhase::Converging)?;
        let control = self.apis.control.clone();
        let builder = TopologyBuilder::new(control.as_ref(), &self.config.convergence);
        let report = tokio::select! {
            _ = self.cancel.cancelled() => {
                log_topology(&mut active.topology_log, &[TopologyEvent::run(
                    TopologyEventKind::Error,
                    EventOutcome::Failed,
                )]);
                return Err(RunError::Interrupted { phase: RunPhase::Converging });
            }
            report = builder.apply(plan, &self.registry) => report?,
        };
        log_topology(&mut active.topology_log, &report.events);
        println!(
            "Topology {}: {} of {} edges resolved in {} passes",
            report.outcome,
            report.resolved_edges.len(),
            plan.len(),
            report.passes
        );
        let report = match report.into_result(self.config.convergence.tolerate_incomplete) {
            Ok(report) => report,
            Err(e) => {
                log_topology(&mut active.topology_log, &[TopologyEvent::run(
                    TopologyEventKind::Error,
                    EventOutcome::Failed,
                )]);
                return Err(e.into());
            }
        };
        self.check(active)?;

        self.enter(RunPhase::Running)?;
        let workload = self.run_workload(active).await?;
        println!(
            "Workload finished: {} uploads, {} downloads, {} failures",
            workload.uploads, workload.downloads, workload.failures
        );

        self.enter(RunPhase::Collecting)?;
        tracing::info!("Cooling down for {:?}", self.config.run.cooldown);
        tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(RunError::Interrupted { phase: RunPhase::Collecting });
            }
            _ = sleep(self.config.run.cooldown) => {}
        }
        self.check(active)?;
        Ok((report, workload))
    }

    async fn run_workload(&mut self, active: &mut Active) -> Result<WorkloadSummary, RunError> {
        let driver_cancel = self.cancel.child_token();
        let driver = WorkloadDriver::new(
            self.config.workload.clone(),
            self.registry.clone(),
            self.apis.content.clone(),
        )
        .with_cancellation(driver_cancel);
        let outcomes = driver.run();
        tokio::pin!(outcomes);

        let mut summary = WorkloadSummary::default();
        let mut watchdog = tokio::time::interval(self.config.collector.interval);
        loop {
            tokio::select! {
                outcome = outcomes.next() => match outcome {
                    Some(outcome) => {
                        summary.record(&outcome);
                        active.workload_log.append(&outcome)?;
                    }
                    None => break,
                },
                _ = watchdog.tick() => self.check(active)?,
            }
        }
        if self.cancel.is_cancelled() {
            return Err(RunError::Interrupted {
                phase: RunPhase::Running,
            });
        }
        Ok(summary)
    }

    /// Fail fast once the collector has died; its error surfaces on stop.
    fn check(&self, active: &Active) -> Result<(), RunError> {
        if active.collector.is_finished() {
            return Err(CollectorError::Task("collector stopped unexpectedly".into()).into());
        }
        Ok(())
    }

    fn enter(&mut self, phase: RunPhase) -> Result<(), RunError> {
        self.state.advance(phase)?;
        self.announce();
        Ok(())
    }

    fn announce(&self) {
        let phase = self.state.phase();
        tracing::info!("Run phase: {phase}");
        println!("[{}] {phase}", chrono::Utc::now().format("%H:%M:%S"));
    }
}

/// Cancels the run when its deadline passes. Disarmed on drop.
struct DeadlineTimer(JoinHandle<()>);

impl DeadlineTimer {
    fn arm(deadline: Duration, token: CancellationToken) -> Self {
        Self(tokio::spawn(async move {
            sleep(deadline).await;
            tracing::warn!("Run deadline of {deadline:?} reached");
            token.cancel();
        }))
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Active {
    /// Stop the collector and close the event logs.
    async fn finish(mut self) -> Result<CollectorSummary, RunError> {
        let collector = self.collector.stop().await;
        self.topology_log.close()?;
        self.workload_log.close()?;
        Ok(collector?)
    }
}

/// The topology log is best-effort: losing it must not abort the run.
fn log_topology(log: &mut TopologyLog, events: &[TopologyEvent]) {
    if let Err(e) = log.append_all(events) {
        tracing::warn!("Cannot write topology events: {e}");
    }
}
