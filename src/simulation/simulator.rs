use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cell_state::{CellState, CellStats};
use crate::scheduler::{ScheduleOutcome, Scheduler, SchedulerStats, DEFAULT_MAX_RETRIES};
use crate::simulation::failure::FailureInjector;
use crate::types::Job;

/// How long an idle scheduler sleeps before re-checking its queue.
const DEFAULT_POLL_INTERVAL: f64 = 0.1;
/// Floor for the wake-after-work delay, so zero-latency schedulers still
/// advance virtual time.
const MIN_WAKE_DELAY: f64 = 1e-3;

#[derive(Debug)]
enum EventKind {
    JobArrival { job: Job, scheduler_id: String },
    TaskCompletion { task_id: String, job_id: String },
    SchedulerWake { scheduler_id: String },
    MachineFailure,
    MachineRecovery { machine_id: String },
}

#[derive(Debug)]
struct Event {
    time: f64,
    /// Tie-break: events at the same instant dispatch in posting order.
    seq: u64,
    kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Event {}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Virtual times are finite by construction.
        self.time
            .partial_cmp(&other.time)
            .unwrap_or(Ordering::Equal)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CompletedJob {
    pub job_id: String,
    pub completion_time: f64,
    pub duration: f64,
}

/// Final report of a run. Serializes with the stable field names consumed
/// by downstream tooling.
#[derive(Debug, Serialize)]
pub struct SimulationResults {
    pub simulation_time: f64,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_job_duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median_job_duration: Option<f64>,
    pub schedulers: IndexMap<String, SchedulerStats>,
    pub cell_state: CellStats,
}

struct JobProgress {
    submit_time: f64,
    remaining: usize,
}

/// Discrete-event driver: owns the virtual clock, the timed event queue,
/// one FIFO job queue per scheduler, and the scheduler actors themselves.
/// Everything runs on one thread; concurrency between schedulers is
/// expressed as interleaved events in virtual time, so conflicts arise
/// from stale snapshots exactly as they would under real parallelism.
pub struct ClusterSimulator {
    cell_state: Arc<CellState>,
    schedulers: IndexMap<String, Box<dyn Scheduler>>,
    simulation_time: f64,
    poll_interval: f64,
    now: f64,
    next_seq: u64,
    events: BinaryHeap<Reverse<Event>>,
    job_queues: HashMap<String, VecDeque<Job>>,
    /// Schedulers with a wake already queued; at most one in flight each.
    pending_wakes: HashSet<String>,
    in_flight: HashMap<String, JobProgress>,
    completed_jobs: Vec<CompletedJob>,
    failed_jobs: Vec<String>,
    failure_injector: Option<FailureInjector>,
}

impl ClusterSimulator {
    pub fn new(cell_state: Arc<CellState>, schedulers: Vec<Box<dyn Scheduler>>, simulation_time: f64) -> Self {
        let mut table = IndexMap::new();
        let mut job_queues = HashMap::new();
        for scheduler in schedulers {
            let id = scheduler.core().scheduler_id().to_owned();
            job_queues.insert(id.clone(), VecDeque::new());
            table.insert(id, scheduler);
        }
        Self {
            cell_state,
            schedulers: table,
            simulation_time,
            poll_interval: DEFAULT_POLL_INTERVAL,
            now: 0.0,
            next_seq: 0,
            events: BinaryHeap::new(),
            job_queues,
            pending_wakes: HashSet::new(),
            in_flight: HashMap::new(),
            completed_jobs: Vec::new(),
            failed_jobs: Vec::new(),
            failure_injector: None,
        }
    }

    /// Attach a failure injector; the first failure is sampled at `run`.
    pub fn attach_failure_injector(&mut self, injector: FailureInjector) {
        self.failure_injector = Some(injector);
    }

    /// Register a job arrival before `run`. The job must target a
    /// configured scheduler.
    pub fn add_job_arrival(&mut self, job: Job, arrival_time: f64, scheduler_id: &str) {
        assert!(
            self.schedulers.contains_key(scheduler_id),
            "job arrival targets unknown scheduler {scheduler_id}",
        );
        self.post(
            arrival_time,
            EventKind::JobArrival {
                job,
                scheduler_id: scheduler_id.to_owned(),
            },
        );
    }

    fn post(&mut self, time: f64, kind: EventKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(Reverse(Event { time, seq, kind }));
    }

    fn post_wake(&mut self, scheduler_id: &str, time: f64) {
        if self.pending_wakes.insert(scheduler_id.to_owned()) {
            self.post(
                time,
                EventKind::SchedulerWake {
                    scheduler_id: scheduler_id.to_owned(),
                },
            );
        }
    }

    /// Drive the event loop until the queue drains or virtual time runs
    /// out, then collect results.
    pub fn run(&mut self) -> SimulationResults {
        info!(
            schedulers = self.schedulers.len(),
            simulation_time = self.simulation_time,
            "starting simulation"
        );

        if let Some(injector) = &mut self.failure_injector {
            let delay = injector.sample_time_to_failure();
            self.post(delay, EventKind::MachineFailure);
        }

        while let Some(Reverse(event)) = self.events.pop() {
            if event.time > self.simulation_time {
                break;
            }
            debug_assert!(event.time >= self.now, "virtual clock must not regress");
            self.now = event.time;
            self.dispatch(event.kind);
        }

        info!(
            completed = self.completed_jobs.len(),
            failed = self.failed_jobs.len(),
            now = self.now,
            "simulation finished"
        );
        self.collect_results()
    }

    fn dispatch(&mut self, kind: EventKind) {
        match kind {
            EventKind::JobArrival { job, scheduler_id } => {
                self.job_queues
                    .get_mut(&scheduler_id)
                    .expect("arrival for configured scheduler")
                    .push_back(job);
                self.post_wake(&scheduler_id, self.now);
            }
            EventKind::SchedulerWake { scheduler_id } => {
                self.pending_wakes.remove(&scheduler_id);
                self.handle_wake(&scheduler_id);
            }
            EventKind::TaskCompletion { task_id, job_id } => {
                self.cell_state.release_task(&task_id);
                if let Some(progress) = self.in_flight.get_mut(&job_id) {
                    progress.remaining -= 1;
                    if progress.remaining == 0 {
                        let progress = self.in_flight.remove(&job_id).expect("drained job in flight");
                        self.completed_jobs.push(CompletedJob {
                            job_id,
                            completion_time: self.now,
                            duration: self.now - progress.submit_time,
                        });
                    }
                }
            }
            EventKind::MachineFailure => {
                if let Some(machine_id) = self.fail_random_machine() {
                    let recovery_delay = self
                        .failure_injector
                        .as_mut()
                        .expect("failure event without injector")
                        .sample_recovery_delay();
                    self.post(self.now + recovery_delay, EventKind::MachineRecovery { machine_id });
                }
                let delay = self
                    .failure_injector
                    .as_mut()
                    .expect("failure event without injector")
                    .sample_time_to_failure();
                self.post(self.now + delay, EventKind::MachineFailure);
            }
            EventKind::MachineRecovery { machine_id } => {
                self.failure_injector
                    .as_mut()
                    .expect("recovery event without injector")
                    .recover_machine(&machine_id);
            }
        }
    }

    fn fail_random_machine(&mut self) -> Option<String> {
        let injector = self.failure_injector.as_mut().expect("failure event without injector");
        let failed = injector.fail_random();
        if let Some(machine_id) = &failed {
            warn!(machine = %machine_id, now = self.now, "machine failed");
        }
        failed
    }

    fn handle_wake(&mut self, scheduler_id: &str) {
        let queue = self
            .job_queues
            .get_mut(scheduler_id)
            .expect("wake for configured scheduler");

        let job = match queue.pop_front() {
            Some(job) => job,
            None => {
                let at = self.now + self.poll_interval;
                self.post_wake(scheduler_id, at);
                return;
            }
        };
        let queue_rest = !self.job_queues[scheduler_id].is_empty();

        let scheduler = self
            .schedulers
            .get_mut(scheduler_id)
            .expect("wake for configured scheduler");
        scheduler.core_mut().record_wait(self.now - job.submit_time);

        let incremental = !job.gang_schedule;
        let outcome = scheduler.attempt_schedule(&job, DEFAULT_MAX_RETRIES, incremental);
        let wake_delay = scheduler.core().decision_time_per_job().max(MIN_WAKE_DELAY);

        match outcome {
            ScheduleOutcome::Scheduled { placed } => {
                debug!(
                    scheduler = scheduler_id,
                    job = %job.id,
                    placed = placed.len(),
                    now = self.now,
                    "job scheduled"
                );
                let placed: HashSet<&String> = placed.iter().collect();
                self.in_flight.insert(
                    job.id.clone(),
                    JobProgress {
                        submit_time: job.submit_time,
                        remaining: placed.len(),
                    },
                );
                for task in &job.tasks {
                    if placed.contains(&task.id) {
                        self.post(
                            self.now + task.duration,
                            EventKind::TaskCompletion {
                                task_id: task.id.clone(),
                                job_id: job.id.clone(),
                            },
                        );
                    }
                }
            }
            ScheduleOutcome::Failed => {
                warn!(scheduler = scheduler_id, job = %job.id, "job failed to schedule");
                self.failed_jobs.push(job.id.clone());
            }
        }

        let next_wake = if queue_rest {
            self.now + wake_delay
        } else {
            self.now + self.poll_interval
        };
        self.post_wake(scheduler_id, next_wake);
    }

    fn collect_results(&self) -> SimulationResults {
        let mut durations: Vec<f64> = self.completed_jobs.iter().map(|j| j.duration).collect();
        durations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

        let (avg, median) = if durations.is_empty() {
            (None, None)
        } else {
            let avg = durations.iter().sum::<f64>() / durations.len() as f64;
            (Some(avg), Some(durations[durations.len() / 2]))
        };

        SimulationResults {
            simulation_time: self.simulation_time,
            completed_jobs: self.completed_jobs.len(),
            failed_jobs: self.failed_jobs.len(),
            avg_job_duration: avg,
            median_job_duration: median,
            schedulers: self
                .schedulers
                .iter()
                .map(|(id, s)| (id.clone(), s.core().statistics()))
                .collect(),
            cell_state: self.cell_state.get_statistics(),
        }
    }

    #[inline]
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn completed(&self) -> &[CompletedJob] {
        &self.completed_jobs
    }

    pub fn failed(&self) -> &[String] {
        &self.failed_jobs
    }
}
