use std::sync::Arc;

use hashbrown::HashMap;

use crate::cell_state::{CellState, Snapshot};
use crate::scheduler::{plan_sequentially, Scheduler, SchedulerCore};
use crate::types::{Job, JobType, Machine, Task, Transaction};

/// How the batch scheduler picks among fitting machines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlacementStrategy {
    FirstFit,
    /// Minimize leftover cpu + memory on the chosen machine (tight packing).
    #[default]
    BestFit,
    /// Maximize leftover cpu + memory (spread load).
    WorstFit,
}

/// Fast, lightweight scheduler for short-lived batch jobs: minimal decision
/// latency, packing-oriented placement.
pub struct BatchScheduler {
    core: SchedulerCore,
    strategy: PlacementStrategy,
}

impl BatchScheduler {
    pub fn new(scheduler_id: impl Into<String>, cell_state: Arc<CellState>) -> Self {
        Self::with_strategy(scheduler_id, cell_state, PlacementStrategy::default())
    }

    pub fn with_strategy(
        scheduler_id: impl Into<String>,
        cell_state: Arc<CellState>,
        strategy: PlacementStrategy,
    ) -> Self {
        Self {
            core: SchedulerCore::new(scheduler_id, cell_state, 0.01, 0.001),
            strategy,
        }
    }
}

impl Scheduler for BatchScheduler {
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
        let fits = |m: &&Machine| m.can_fit(task.cpu_req, task.gpu_req, task.memory_req);

        match self.strategy {
            PlacementStrategy::FirstFit => snapshot.machines.values().find(fits).cloned(),
            PlacementStrategy::BestFit => {
                let mut best: Option<(&Machine, f64)> = None;
                for machine in snapshot.machines.values().filter(fits) {
                    let waste = (machine.available_cpu() - task.cpu_req) as f64
                        + (machine.available_memory() - task.memory_req);
                    match best {
                        Some((_, score)) if waste >= score => {}
                        _ => best = Some((machine, waste)),
                    }
                }
                best.map(|(m, _)| m.clone())
            }
            PlacementStrategy::WorstFit => {
                let mut best: Option<(&Machine, f64)> = None;
                for machine in snapshot.machines.values().filter(fits) {
                    let remaining = machine.available_cpu() as f64 + machine.available_memory();
                    match best {
                        Some((_, score)) if remaining <= score => {}
                        _ => best = Some((machine, remaining)),
                    }
                }
                best.map(|(m, _)| m.clone())
            }
        }
    }
}

/// Round-robin placement with a rolling index shared across calls. A job
/// type's configured weight grants it up to that many consecutive
/// placements on the rotation's current machine before the index advances;
/// the default weight of one is a plain rotation.
pub struct WeightedRoundRobinScheduler {
    core: SchedulerCore,
    weights: HashMap<JobType, f64>,
    current_index: usize,
}

impl WeightedRoundRobinScheduler {
    pub fn new(
        scheduler_id: impl Into<String>,
        cell_state: Arc<CellState>,
        weights: HashMap<JobType, f64>,
    ) -> Self {
        Self {
            core: SchedulerCore::new(scheduler_id, cell_state, 0.02, 0.002),
            weights,
            current_index: 0,
        }
    }

    fn weight_for(&self, job_type: JobType) -> usize {
        self.weights
            .get(&job_type)
            .map(|w| w.ceil().max(1.0) as usize)
            .unwrap_or(1)
    }

    /// Next fitting machine in rotation, probing at most one full cycle.
    fn next_fitting(&mut self, task: &Task, snapshot: &Snapshot) -> Option<Machine> {
        let count = snapshot.machines.len();
        for _ in 0..count {
            let (_, machine) = snapshot
                .machines
                .get_index(self.current_index % count)
                .expect("rotation index within machine count");
            self.current_index += 1;
            if machine.can_fit(task.cpu_req, task.gpu_req, task.memory_req) {
                return Some(machine.clone());
            }
        }
        None
    }
}

impl Scheduler for WeightedRoundRobinScheduler {
    fn core(&self) -> &SchedulerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SchedulerCore {
        &mut self.core
    }

    fn schedule_job(&mut self, job: &Job, snapshot: &mut Snapshot) -> Option<Transaction> {
        if snapshot.machines.is_empty() {
            return None;
        }
        let mut transaction = Transaction::new(self.core.scheduler_id());
        let weight = self.weight_for(job.job_type);
        let mut burst = 0usize;

        for task in &job.tasks {
            if snapshot.is_assigned(&task.id) {
                continue;
            }

            // Within the weight budget, stay on the rotation's current
            // machine instead of advancing.
            let count = snapshot.machines.len();
            let stay = if burst > 0 && burst < weight {
                let idx = (self.current_index + count - 1) % count;
                snapshot
                    .machines
                    .get_index(idx)
                    .map(|(_, m)| m)
                    .filter(|m| m.can_fit(task.cpu_req, task.gpu_req, task.memory_req))
                    .cloned()
            } else {
                None
            };

            let machine = match stay {
                Some(m) => m,
                None => {
                    burst = 0;
                    match self.next_fitting(task, snapshot) {
                        Some(m) => m,
                        None => continue,
                    }
                }
            };

            transaction.add_placement(task.clone(), &machine.id, machine.version);
            snapshot.reserve(task, &machine.id);
            burst += 1;
        }

        if transaction.is_empty() {
            None
        } else {
            Some(transaction)
        }
    }

    fn select_machine(&mut self, task: &Task, snapshot: &Snapshot) -> Option<Machine> {
        if snapshot.machines.is_empty() {
            return None;
        }
        self.next_fitting(task, snapshot)
    }
}
