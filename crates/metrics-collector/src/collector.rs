//! Fixed-interval polling of every node.

use crate::error::CollectorError;
use crate::normalize::{application_samples, resource_samples};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use node_api::{ContainerStatsResponse, NodeApiError, NodeApis, NodeStatus, ResourceApi, StatusApi};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use testbed_core::{
    CollectorConfig, ContainerMap, MetricSample, MetricSink, NodeHandle, Registry, TickBatch,
};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Totals reported when the collector stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorSummary {
    pub ticks: u64,
    pub samples: u64,
    /// Requests that produced no sample
    pub gaps: u64,
    /// Ticks that took longer than the interval
    pub overruns: u64,
}

/// Polls every node once per interval and appends each tick to the sink.
pub struct MetricsCollector {
    config: CollectorConfig,
    registry: Arc<Registry>,
    containers: Arc<ContainerMap>,
    status: Arc<dyn StatusApi>,
    resource: Arc<dyn ResourceApi>,
}

/// Handle to a running collector task.
pub struct CollectorHandle {
    stop: CancellationToken,
    task: JoinHandle<Result<CollectorSummary, CollectorError>>,
}

impl CollectorHandle {
    /// Stop polling and wait for the sink to be flushed and closed.
    ///
    /// A tick in progress is given `stop_grace` to finish; requests still
    /// outstanding after that are recorded as gaps.
    pub async fn stop(self) -> Result<CollectorSummary, CollectorError> {
        self.stop.cancel();
        self.task
            .await
            .map_err(|e| CollectorError::Task(e.to_string()))?
    }

    /// Whether the collector ended on its own, which only happens on failure.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Answer to one request, tagged with the registry index of the node.
enum Reply {
    Resource(usize, Result<ContainerStatsResponse, NodeApiError>),
    Status(usize, Result<NodeStatus, NodeApiError>),
}

type Request<'a> = Pin<Box<dyn Future<Output = Reply> + Send + 'a>>;

impl MetricsCollector {
    pub fn new(
        config: CollectorConfig,
        registry: Arc<Registry>,
        containers: ContainerMap,
        apis: &NodeApis,
    ) -> Self {
        Self {
            config,
            registry,
            containers: Arc::new(containers),
            status: apis.status.clone(),
            resource: apis.resource.clone(),
        }
    }

    /// Spawn the polling task. The first tick fires immediately.
    pub fn start(self, sink: impl MetricSink) -> CollectorHandle {
        let stop = CancellationToken::new();
        let task = tokio::spawn(self.run(Box::new(sink), stop.clone()));
        CollectorHandle { stop, task }
    }

    async fn run(
        self,
        mut sink: Box<dyn MetricSink>,
        stop: CancellationToken,
    ) -> Result<CollectorSummary, CollectorError> {
        let origin = Instant::now();
        let origin_wall = Utc::now();
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut summary = CollectorSummary::default();

        tracing::info!(
            "Metrics collector started: {} nodes every {:?}",
            self.registry.len(),
            self.config.interval
        );
        loop {
            let tick_at = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                at = ticker.tick() => at,
            };
            let elapsed = tick_at.saturating_duration_since(origin);
            let timestamp = origin_wall + chrono::Duration::from_std(elapsed).unwrap_or_default();

            let (samples, gaps) = self.poll(timestamp, &stop).await;
            let batch = TickBatch {
                tick: summary.ticks,
                timestamp,
                samples,
            };
            if let Err(e) = sink.append_tick(&batch) {
                tracing::error!("Metric log write failed at tick {}: {e}", batch.tick);
                return Err(e.into());
            }
            summary.ticks += 1;
            summary.samples += batch.samples.len() as u64;
            summary.gaps += gaps;
            tracing::debug!(
                "Tick {} at {timestamp}: {} samples, {gaps} gaps",
                batch.tick,
                batch.samples.len()
            );

            let took = tick_at.elapsed();
            if took > self.config.interval {
                summary.overruns += 1;
                tracing::warn!(
                    "Tick {} took {took:?}, longer than the {:?} interval",
                    batch.tick,
                    self.config.interval
                );
            }
        }

        sink.close()?;
        tracing::info!(
            "Metrics collector stopped after {} ticks ({} samples, {} gaps, {} overruns)",
            summary.ticks,
            summary.samples,
            summary.gaps,
            summary.overruns
        );
        Ok(summary)
    }

    /// One resource and one status request per node, all concurrent.
    ///
    /// Returns the deduplicated samples and the number of failed requests.
    async fn poll(&self, timestamp: DateTime<Utc>, stop: &CancellationToken) -> (Vec<MetricSample>, u64) {
        let nodes = self.registry.list();
        let mut pending: FuturesUnordered<Request<'_>> = FuturesUnordered::new();
        for (index, node) in nodes.iter().enumerate() {
            if let Some(container) = self.containers.container_for(node.id) {
                let endpoint = node.resource_endpoint.as_str();
                pending.push(Box::pin(async move {
                    let call = self.resource.container_stats(endpoint, container);
                    Reply::Resource(index, self.bounded(endpoint, call).await)
                }));
            }
            pending.push(Box::pin(async move {
                let call = self.status.status(node);
                Reply::Status(index, self.bounded(&node.control_endpoint, call).await)
            }));
        }

        let expected = pending.len() as u64;
        let mut answered = 0u64;
        let mut gaps = 0u64;
        let mut seen = HashSet::new();
        let mut samples = Vec::new();
        let grace = self.config.stop_grace;
        let deadline = async {
            stop.cancelled().await;
            tokio::time::sleep(grace).await;
        };
        tokio::pin!(deadline);

        loop {
            let reply = tokio::select! {
                reply = pending.next() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
                _ = &mut deadline => {
                    tracing::warn!(
                        "Stop grace of {grace:?} elapsed with {} requests outstanding",
                        expected - answered
                    );
                    break;
                }
            };
            answered += 1;
            let produced = match reply {
                Reply::Resource(index, result) => {
                    Self::accept(&nodes[index], "resource", result, |stats| {
                        resource_samples(nodes[index].id, timestamp, &stats, &self.containers)
                    })
                }
                Reply::Status(index, result) => {
                    Self::accept(&nodes[index], "status", result, |status| {
                        application_samples(nodes[index].id, timestamp, &status)
                    })
                }
            };
            match produced {
                // Everything in the reply was attributed to another node.
                Some(new) if new.is_empty() => gaps += 1,
                Some(new) => {
                    for sample in new {
                        if seen.insert((sample.node_id, sample.metric_name.clone())) {
                            samples.push(sample);
                        }
                    }
                }
                None => gaps += 1,
            }
        }
        gaps += expected - answered;
        (samples, gaps)
    }

    async fn bounded<T>(
        &self,
        endpoint: &str,
        call: impl Future<Output = Result<T, NodeApiError>>,
    ) -> Result<T, NodeApiError> {
        timeout(self.config.request_timeout, call)
            .await
            .unwrap_or_else(|_| Err(NodeApiError::timeout(endpoint)))
    }

    fn accept<T>(
        node: &NodeHandle,
        what: &str,
        result: Result<T, NodeApiError>,
        normalize: impl FnOnce(T) -> Vec<MetricSample>,
    ) -> Option<Vec<MetricSample>> {
        match result {
            Ok(payload) => Some(normalize(payload)),
            Err(e) => {
                tracing::warn!("No {what} metrics for node {} this tick: {e}", node.id);
                None
            }
        }
    }
}
