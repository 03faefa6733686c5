pub mod batch;
pub mod mapreduce;
pub mod service;

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, trace};

use crate::cell_state::{CellState, Snapshot};
use crate::types::{Job, Machine, Task, Transaction};

pub use batch::{BatchScheduler, PlacementStrategy, WeightedRoundRobinScheduler};
pub use mapreduce::{MapReduceScheduler, ScalingPolicy};
pub use service::{PriorityScheduler, ServiceScheduler};

pub const DEFAULT_MAX_RETRIES: usize = 5;

/// Per-scheduler statistics record, serialized into the results.
#[derive(Clone, Debug, Serialize)]
pub struct SchedulerStats {
    pub scheduler_id: String,
    pub jobs_scheduled: u64,
    pub tasks_scheduled: u64,
    pub conflicts: u64,
    pub conflict_rate: f64,
    pub total_decision_time: f64,
    pub busy_time: f64,
    pub avg_wait_time: f64,
}

/// Outcome of one pass through the retry loop.
#[derive(Clone, Debug)]
pub enum ScheduleOutcome {
    /// At least one placement committed; `placed` holds the task ids.
    Scheduled { placed: Vec<String> },
    /// Nothing could be placed, or retries were exhausted.
    Failed,
}

impl ScheduleOutcome {
    #[inline]
    pub fn is_scheduled(&self) -> bool {
        matches!(self, ScheduleOutcome::Scheduled { .. })
    }
}

/// State shared by every placement strategy: identity, the handle to the
/// authoritative cell, simulated decision latencies, and the statistics
/// counters. Strategies hold one by composition.
pub struct SchedulerCore {
    scheduler_id: String,
    cell_state: Arc<CellState>,
    decision_time_per_job: f64,
    decision_time_per_task: f64,
    jobs_scheduled: u64,
    tasks_scheduled: u64,
    conflicts_encountered: u64,
    total_decision_time: f64,
    busy_time: f64,
    job_wait_times: Vec<f64>,
}

impl SchedulerCore {
    pub fn new(
        scheduler_id: impl Into<String>,
        cell_state: Arc<CellState>,
        decision_time_per_job: f64,
        decision_time_per_task: f64,
    ) -> Self {
        Self {
            scheduler_id: scheduler_id.into(),
            cell_state,
            decision_time_per_job,
            decision_time_per_task,
            jobs_scheduled: 0,
            tasks_scheduled: 0,
            conflicts_encountered: 0,
            total_decision_time: 0.0,
            busy_time: 0.0,
            job_wait_times: Vec::new(),
        }
    }

    #[inline]
    pub fn scheduler_id(&self) -> &str {
        &self.scheduler_id
    }

    #[inline]
    pub fn cell_state(&self) -> &Arc<CellState> {
        &self.cell_state
    }

    #[inline]
    pub fn decision_time_per_job(&self) -> f64 {
        self.decision_time_per_job
    }

    /// Simulated seconds one planning pass over `task_count` tasks takes.
    #[inline]
    pub fn decision_latency(&self, task_count: usize) -> f64 {
        self.decision_time_per_job + self.decision_time_per_task * task_count as f64
    }

    pub fn record_wait(&mut self, wait_time: f64) {
        self.job_wait_times.push(wait_time);
    }

    pub fn statistics(&self) -> SchedulerStats {
        let conflict_rate = if self.tasks_scheduled > 0 {
            self.conflicts_encountered as f64 / self.tasks_scheduled as f64
        } else {
            0.0
        };
        let avg_wait_time = if self.job_wait_times.is_empty() {
            0.0
        } else {
            self.job_wait_times.iter().sum::<f64>() / self.job_wait_times.len() as f64
        };
        SchedulerStats {
            scheduler_id: self.scheduler_id.clone(),
            jobs_scheduled: self.jobs_scheduled,
            tasks_scheduled: self.tasks_scheduled,
            conflicts: self.conflicts_encountered,
            conflict_rate,
            total_decision_time: self.total_decision_time,
            busy_time: self.busy_time,
            avg_wait_time,
        }
    }
}

/// A placement strategy. `schedule_job` plans a whole job against a private
/// snapshot (reserving locally as it goes), `select_machine` is the
/// per-task policy primitive, and the provided `attempt_schedule` drives
/// the optimistic snapshot/commit/retry loop every strategy shares.
pub trait Scheduler: Send {
    fn core(&self) -> &SchedulerCore;

    fn core_mut(&mut self) -> &mut SchedulerCore;

    /// Plan placements for a job. Tasks already assigned in the snapshot
    /// are skipped. Returns `None` when nothing could be placed.
    fn schedule_job(&mut self, job: &Job, snapshot: &mut Snapshot) -> Option<Transaction>;

    /// Pick a machine for one task, or `None` if nothing fits.
    fn select_machine(&mut self, task: &Task, snapshot: &Snapshot) -> Option<Machine>;

    /// Snapshot → plan → commit, retrying with a fresh snapshot on
    /// conflict. With `incremental` set, a partial commit counts as
    /// success; gang jobs retry whole or not at all.
    fn attempt_schedule(&mut self, job: &Job, max_retries: usize, incremental: bool) -> ScheduleOutcome {
        for attempt in 0..max_retries {
            let mut snapshot = self.core().cell_state().snapshot();

            let latency = self.core().decision_latency(job.tasks.len());
            {
                let core = self.core_mut();
                core.total_decision_time += latency;
                core.busy_time += latency;
            }

            let transaction = match self.schedule_job(job, &mut snapshot) {
                Some(t) if !t.is_empty() => t,
                _ => {
                    trace!(job = %job.id, attempt, "no placeable tasks");
                    return ScheduleOutcome::Failed;
                }
            };
            let attempted = transaction.len();

            let outcome = self
                .core()
                .cell_state()
                .commit_transaction(transaction, incremental);

            if outcome.is_clean() {
                let core = self.core_mut();
                core.jobs_scheduled += 1;
                core.tasks_scheduled += attempted as u64;
                return ScheduleOutcome::Scheduled {
                    placed: outcome.committed().to_vec(),
                };
            }

            self.core_mut().conflicts_encountered += outcome.conflicts().len() as u64;

            if incremental && !outcome.committed().is_empty() {
                let core = self.core_mut();
                core.jobs_scheduled += 1;
                core.tasks_scheduled += outcome.committed().len() as u64;
                return ScheduleOutcome::Scheduled {
                    placed: outcome.committed().to_vec(),
                };
            }

            debug!(
                job = %job.id,
                attempt,
                conflicts = outcome.conflicts().len(),
                "commit conflicted, retrying with fresh snapshot"
            );
        }

        ScheduleOutcome::Failed
    }
}

/// Places each task on the first machine that fits, in snapshot insertion
/// order. The baseline strategy.
pub struct FirstFitScheduler {
    core: SchedulerCore,
}

impl FirstFitScheduler {
    pub fn new(scheduler_id: impl Into<String>, cell_state: Arc<CellState>) -> Self {
        Self {
            core: SchedulerCore::new(scheduler_id, cell_state, 0.1, 0.005),
        }
    }
}

impl Scheduler for FirstFitScheduler {
    fn core(&self) -> &SchedulerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SchedulerCore {
        &mut self.core
    }

    fn schedule_job(&mut self, job: &Job, snapshot: &mut Snapshot) -> Option<Transaction> {
        plan_sequentially(self, job, snapshot)
    }

    fn select_machine(&mut self, task: &Task, snapshot: &Snapshot) -> Option<Machine> {
        snapshot
            .machines
            .values()
            .find(|m| m.can_fit(task.cpu_req, task.gpu_req, task.memory_req))
            .cloned()
    }
}

/// Shuffles the machine list per task with a scheduler-private seeded RNG.
pub struct RandomScheduler {
    core: SchedulerCore,
    rng: StdRng,
}

impl RandomScheduler {
    pub fn new(scheduler_id: impl Into<String>, cell_state: Arc<CellState>) -> Self {
        Self {
            core: SchedulerCore::new(scheduler_id, cell_state, 0.1, 0.005),
            rng: StdRng::seed_from_u64(42),
        }
    }
}

impl Scheduler for RandomScheduler {
    fn core(&self) -> &SchedulerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SchedulerCore {
        &mut self.core
    }

    fn schedule_job(&mut self, job: &Job, snapshot: &mut Snapshot) -> Option<Transaction> {
        plan_sequentially(self, job, snapshot)
    }

    fn select_machine(&mut self, task: &Task, snapshot: &Snapshot) -> Option<Machine> {
        let mut ids: Vec<&String> = snapshot.machines.keys().collect();
        ids.shuffle(&mut self.rng);
        ids.into_iter()
            .map(|id| &snapshot.machines[id])
            .find(|m| m.can_fit(task.cpu_req, task.gpu_req, task.memory_req))
            .cloned()
    }
}

/// The planning pass shared by the one-task-at-a-time strategies: walk the
/// job's tasks, skip already-assigned ones, record each placement with the
/// snapshot-observed machine version, and reserve locally so the next task
/// sees reduced availability.
pub(crate) fn plan_sequentially<S: Scheduler + ?Sized>(
    scheduler: &mut S,
    job: &Job,
    snapshot: &mut Snapshot,
) -> Option<Transaction> {
    let mut transaction = Transaction::new(scheduler.core().scheduler_id());

    for task in &job.tasks {
        if snapshot.is_assigned(&task.id) {
            continue;
        }
        if let Some(machine) = scheduler.select_machine(task, snapshot) {
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
