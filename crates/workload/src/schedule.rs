//! Deterministic operation schedule.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::time::Duration;
use testbed_core::{NodeId, WorkloadPlan};

/// One operation of the schedule, fixed before the run starts.
///
/// Whether the operation uploads or downloads is only decided when it is
/// issued, because it depends on how many uploads have completed by then.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledOp {
    pub index: usize,
    /// Offset from the start of the workload
    pub offset: Duration,
    pub node: NodeId,
    /// Upload size in bytes, capped at `max_size`
    pub size: u64,
    /// Random draw used to choose between upload and download
    pub pick: u64,
    /// Seed of the uploaded content
    pub content_seed: u64,
}

/// What an operation does, decided at issue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Upload,
    Download(String),
}

impl ScheduledOp {
    /// Choose the action given the content identifiers uploaded so far.
    ///
    /// Draws uniformly from `0..=uploaded.len() + 1`; the two values past the
    /// end mean "upload", any other value downloads that earlier upload.
    pub fn decide(&self, uploaded: &[String]) -> Action {
        let choice = self.pick % (uploaded.len() as u64 + 2);
        match uploaded.get(choice as usize) {
            Some(cid) => Action::Download(cid.clone()),
            None => Action::Upload,
        }
    }
}

/// Sample an exponential distribution with the given mean.
fn exponential(rng: &mut StdRng, mean: f64) -> f64 {
    -mean * (1.0 - rng.gen::<f64>()).ln()
}

/// Build the schedule of `plan` over `node_count` nodes.
///
/// Inter-arrival times and sizes are exponentially distributed; offsets are
/// cumulative. The same plan always yields the same schedule.
pub fn schedule(plan: &WorkloadPlan, node_count: usize) -> Vec<ScheduledOp> {
    let mut rng = StdRng::seed_from_u64(plan.seed);
    let mean_delay = plan.mean_delay.as_secs_f64();
    let mut elapsed = 0.0;
    (0..plan.operations)
        .map(|index| {
            elapsed += exponential(&mut rng, mean_delay);
            let node = NodeId(rng.gen_range(0..node_count.max(1)) as u32);
            let size = (exponential(&mut rng, plan.mean_size as f64) as u64).min(plan.max_size);
            ScheduledOp {
                index,
                offset: Duration::from_secs_f64(elapsed),
                node,
                size,
                pick: rng.next_u64(),
                content_seed: rng.next_u64(),
            }
        })
        .collect()
}

/// Pseudo-random content of `size` bytes derived from `seed`.
pub fn content(seed: u64, size: u64) -> Vec<u8> {
    let mut data = vec![0u8; size as usize];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}
