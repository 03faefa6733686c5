use std::sync::Arc;

use itertools::Itertools;
use serde::Deserialize;
use tracing::trace;

use crate::cell_state::{CellState, Snapshot};
use crate::scheduler::{Scheduler, SchedulerCore};
use crate::types::{Job, Machine, Task, Transaction};

/// How many workers to run for a job relative to the cluster's idle
/// capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingPolicy {
    /// Fill idle capacity, capped at 10x the job's own task count.
    #[default]
    MaxParallelism,
    /// Scale up only while average utilization sits below the target.
    GlobalCap,
    /// Like max parallelism, but bounded by a fixed multiple of job size.
    RelativeJobSize,
}

/// Opportunistic scheduler for MapReduce-style jobs: sizes the worker set
/// from idle cluster capacity, then packs workers onto the freest machines.
pub struct MapReduceScheduler {
    core: SchedulerCore,
    policy: ScalingPolicy,
    target_utilization: f64,
    max_scale_factor: f64,
}

impl MapReduceScheduler {
    pub fn new(scheduler_id: impl Into<String>, cell_state: Arc<CellState>, policy: ScalingPolicy) -> Self {
        Self {
            core: SchedulerCore::new(scheduler_id, cell_state, 0.2, 0.01),
            policy,
            target_utilization: 0.6,
            max_scale_factor: 4.0,
        }
    }

    /// Worker count for the job under the configured policy. Demand
    /// dimensions of zero are non-binding; the bound falls to the other
    /// dimensions.
    pub fn optimal_workers(&self, job: &Job, snapshot: &Snapshot) -> usize {
        let base_workers = job.tasks.len();
        if base_workers == 0 {
            return 0;
        }

        match self.policy {
            ScalingPolicy::MaxParallelism => {
                let cap = base_workers * 10;
                self.capacity_bound(&job.tasks[0], snapshot, cap).min(cap)
            }
            ScalingPolicy::GlobalCap => {
                let util = snapshot.utilization();
                let avg_util = (util.cpu + util.memory) / 2.0;
                if avg_util > self.target_utilization {
                    base_workers
                } else {
                    let scale = 1.0 + (self.target_utilization - avg_util) * 5.0;
                    (base_workers as f64 * scale) as usize
                }
            }
            ScalingPolicy::RelativeJobSize => {
                let cap = (base_workers as f64 * self.max_scale_factor) as usize;
                self.capacity_bound(&job.tasks[0], snapshot, cap).min(cap)
            }
        }
    }

    /// Workers supportable by aggregate free capacity, assuming uniform
    /// task demand; `fallback` when neither demand dimension binds.
    fn capacity_bound(&self, task: &Task, snapshot: &Snapshot, fallback: usize) -> usize {
        let (avail_cpu, _, avail_mem) = snapshot.aggregate_available();
        let by_cpu = (task.cpu_req > 0).then(|| (avail_cpu / task.cpu_req) as usize);
        let by_mem = (task.memory_req > 0.0).then(|| (avail_mem / task.memory_req) as usize);
        match (by_cpu, by_mem) {
            (Some(c), Some(m)) => c.min(m),
            (Some(c), None) => c,
            (None, Some(m)) => m,
            (None, None) => fallback,
        }
    }
}

impl Scheduler for MapReduceScheduler {
    fn core(&self) -> &SchedulerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SchedulerCore {
        &mut self.core
    }

    fn schedule_job(&mut self, job: &Job, snapshot: &mut Snapshot) -> Option<Transaction> {
        let workers = self.optimal_workers(job, snapshot);
        trace!(job = %job.id, workers, tasks = job.tasks.len(), "sized worker set");

        let mut transaction = Transaction::new(self.core.scheduler_id());
        for task in job.tasks.iter().take(workers) {
            if snapshot.is_assigned(&task.id) {
                continue;
            }
            if let Some(machine) = self.select_machine(task, snapshot) {
                transaction.add_placement(task.clone(), &machine.id, machine.version);
                snapshot.reserve(task, &machine.id);
            }
        }

        if transaction.is_empty() {
            None
        } else {
            Some(transaction)
        }
    }

    /// Prefer the machines with the most free capacity, so opportunistic
    /// workers land where they displace the least.
    fn select_machine(&mut self, task: &Task, snapshot: &Snapshot) -> Option<Machine> {
        snapshot
            .machines
            .values()
            .sorted_by(|a, b| {
                (b.available_cpu(), b.available_memory())
                    .partial_cmp(&(a.available_cpu(), a.available_memory()))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .find(|m| m.can_fit(task.cpu_req, task.gpu_req, task.memory_req))
            .cloned()
    }
}
