//! Issues the scheduled operations against the fleet.

use crate::schedule::{content, schedule, Action, ScheduledOp};
use chrono::Utc;
use futures::Stream;
use node_api::{ContentApi, NodeApiError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testbed_core::{NodeHandle, OperationKind, OperationOutcome, Registry, WorkloadPlan};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

const OUTCOME_BUFFER: usize = 256;

/// Runs one workload plan. Consumed by [`WorkloadDriver::run`].
pub struct WorkloadDriver {
    plan: WorkloadPlan,
    registry: Arc<Registry>,
    content: Arc<dyn ContentApi>,
    cancel: CancellationToken,
}

/// State shared by the in-flight operations of one run.
struct Shared {
    registry: Arc<Registry>,
    content: Arc<dyn ContentApi>,
    uploaded: Mutex<Vec<String>>,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl WorkloadDriver {
    pub fn new(plan: WorkloadPlan, registry: Arc<Registry>, content: Arc<dyn ContentApi>) -> Self {
        Self {
            plan,
            registry,
            content,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop issuing operations once `token` is cancelled. In-flight
    /// operations are recorded as failed.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Start the workload and stream one outcome per issued operation.
    ///
    /// The stream ends once every operation has completed, or right after
    /// cancellation. Must be called inside a tokio runtime.
    pub fn run(self) -> impl Stream<Item = OperationOutcome> {
        let (tx, rx) = mpsc::channel(OUTCOME_BUFFER);
        let ops = schedule(&self.plan, self.registry.len());
        let per_node: Vec<Arc<Semaphore>> = (0..self.registry.len())
            .map(|_| Arc::new(Semaphore::new(self.plan.per_node_concurrency.max(1))))
            .collect();
        let global = self.plan.max_in_flight.map(|n| Arc::new(Semaphore::new(n.max(1))));
        let shared = Arc::new(Shared {
            registry: self.registry,
            content: self.content,
            uploaded: Mutex::new(Vec::new()),
            request_timeout: self.plan.request_timeout,
            cancel: self.cancel,
        });

        tokio::spawn(async move {
            let start = Instant::now();
            let total = ops.len();
            tracing::info!("Workload started: {total} operations scheduled");
            let mut in_flight = JoinSet::new();
            for op in ops {
                tokio::select! {
                    _ = shared.cancel.cancelled() => {
                        tracing::info!("Workload cancelled before operation {}", op.index);
                        break;
                    }
                    _ = sleep_until(start + op.offset) => {}
                }
                let action = {
                    let uploaded = shared.uploaded.lock().unwrap_or_else(|p| p.into_inner());
                    op.decide(&uploaded)
                };
                let node_permits = per_node[op.node.index()].clone();
                let global = global.clone();
                let shared = shared.clone();
                let tx = tx.clone();
                in_flight.spawn(async move {
                    // Node slot first: an operation queued behind a busy node
                    // must not hold a fleet-wide slot.
                    let _permit = node_permits.acquire_owned().await;
                    let _global = match global {
                        Some(s) => s.acquire_owned().await.ok(),
                        None => None,
                    };
                    let outcome = shared.execute(&op, action).await;
                    // The receiver may be gone if the caller stopped listening.
                    let _ = tx.send(outcome).await;
                });
            }
            while in_flight.join_next().await.is_some() {}
            tracing::info!("Workload finished after {:?}", start.elapsed());
        });

        ReceiverStream::new(rx)
    }
}

impl Shared {
    async fn execute(&self, op: &ScheduledOp, action: Action) -> OperationOutcome {
        let started_at = Utc::now();
        let started = Instant::now();
        let (kind, result) = match self.registry.resolve(op.node) {
            Ok(node) => match action {
                Action::Upload => (OperationKind::Upload, self.upload(node, op).await),
                Action::Download(cid) => (OperationKind::Download, self.download(node, cid).await),
            },
            Err(e) => (
                OperationKind::Upload,
                Err((e.to_string(), op.size, None)),
            ),
        };
        let duration = started.elapsed();
        let (bytes, cid, error) = match result {
            Ok((bytes, cid)) => (bytes, Some(cid), None),
            Err((reason, bytes, cid)) => {
                tracing::warn!("{kind} #{} on node {} failed: {reason}", op.index, op.node);
                (bytes, cid, Some(reason))
            }
        };
        tracing::debug!("{kind} #{} on node {} took {duration:?}", op.index, op.node);
        OperationOutcome {
            node_id: op.node,
            kind,
            started_at,
            duration,
            bytes,
            cid,
            error,
        }
    }

    /// Run `call` under the request timeout, aborting on cancellation.
    async fn guarded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, NodeApiError>>,
    ) -> Result<T, String> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err("cancelled".to_string()),
            result = timeout(self.request_timeout, call) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {:?}", self.request_timeout)),
            },
        }
    }

    async fn upload(
        &self,
        node: &NodeHandle,
        op: &ScheduledOp,
    ) -> Result<(u64, String), (String, u64, Option<String>)> {
        let (seed, size) = (op.content_seed, op.size);
        let data = tokio::task::spawn_blocking(move || content(seed, size))
            .await
            .map_err(|e| (format!("content generation failed: {e}"), size, None))?;
        let cid = self
            .guarded(self.content.add(node, data))
            .await
            .map_err(|reason| (reason, size, None))?;
        self.uploaded
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(cid.clone());
        Ok((size, cid))
    }

    async fn download(
        &self,
        node: &NodeHandle,
        cid: String,
    ) -> Result<(u64, String), (String, u64, Option<String>)> {
        match self.guarded(self.content.cat(node, &cid)).await {
            Ok(bytes) => Ok((bytes, cid)),
            Err(reason) => Err((reason, 0, Some(cid))),
        }
    }
}
