use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;

use crate::cell_state::{CellState, Snapshot};
use crate::scheduler::{Scheduler, SchedulerCore};
use crate::types::{Constraint, Job, Machine, Task, Transaction};

/// Placement scheduler for long-running service jobs. Scores every machine
/// on availability, load, and failure-domain population, then walks the
/// scored order spreading a job's tasks across failure domains.
pub struct ServiceScheduler {
    core: SchedulerCore,
    /// machine id -> failure domain. Unmapped machines are their own domain.
    failure_domains: HashMap<String, String>,
}

impl ServiceScheduler {
    pub fn new(scheduler_id: impl Into<String>, cell_state: Arc<CellState>) -> Self {
        Self::with_decision_times(scheduler_id, cell_state, 1.0, 0.05)
    }

    pub fn with_decision_times(
        scheduler_id: impl Into<String>,
        cell_state: Arc<CellState>,
        decision_time_per_job: f64,
        decision_time_per_task: f64,
    ) -> Self {
        Self {
            core: SchedulerCore::new(
                scheduler_id,
                cell_state,
                decision_time_per_job,
                decision_time_per_task,
            ),
            failure_domains: HashMap::new(),
        }
    }

    pub fn set_failure_domain(&mut self, machine_id: impl Into<String>, domain: impl Into<String>) {
        self.failure_domains.insert(machine_id.into(), domain.into());
    }

    fn domain_of<'a>(&'a self, machine_id: &'a str) -> &'a str {
        self.failure_domains
            .get(machine_id)
            .map(String::as_str)
            .unwrap_or(machine_id)
    }

    /// Score every snapshot machine for this job; higher is better.
    fn score_machines(&self, snapshot: &Snapshot, job: &Job) -> Vec<(String, f64)> {
        let mut domain_population: HashMap<&str, usize> = HashMap::new();
        for id in snapshot.machines.keys() {
            *domain_population.entry(self.domain_of(id)).or_insert(0) += 1;
        }

        let needs_gpu = job.needs_gpu();

        snapshot
            .machines
            .values()
            .map(|machine| {
                let cpu_avail = machine.available_cpu() as f64 / machine.cpu_cores.max(1) as f64;
                let mem_avail = if machine.memory_gb > 0.0 {
                    machine.available_memory() / machine.memory_gb
                } else {
                    0.0
                };
                let mut score = (cpu_avail + mem_avail) / 2.0 * 100.0;

                // Prefer lightly loaded machines.
                score -= machine.tasks.len() as f64 * 5.0;

                let population = domain_population[self.domain_of(&machine.id)];
                score += 20.0 / population as f64;

                if needs_gpu && machine.gpu_count > 0 {
                    score += 50.0;
                }

                (machine.id.clone(), score)
            })
            .sorted_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
            .collect()
    }

    fn satisfies_constraints(task: &Task, machine: &Machine) -> bool {
        task.constraints.iter().all(|constraint| match constraint {
            Constraint::MinCpu(min) => machine.cpu_cores >= *min,
            Constraint::MinMemory(min) => machine.memory_gb >= *min,
            Constraint::RequiresGpu(required) => !required || machine.gpu_count > 0,
            // Machine families are not modeled in the cell.
            Constraint::MachineType(_) => true,
        })
    }

    /// Walk the scored order for one task, skipping machines whose failure
    /// domain already hosts a task of this job. When every acceptable
    /// domain is exhausted, fall back to the first fitting machine.
    fn select_with_anti_affinity(
        &self,
        task: &Task,
        ranked: &[(String, f64)],
        placed_domains: &HashSet<String>,
        snapshot: &Snapshot,
    ) -> Option<Machine> {
        let distinct_domains = snapshot
            .machines
            .keys()
            .map(|id| self.domain_of(id))
            .collect::<HashSet<_>>()
            .len();

        for (machine_id, _) in ranked {
            let machine = match snapshot.machine(machine_id) {
                Some(m) => m,
                None => continue,
            };
            if !machine.can_fit(task.cpu_req, task.gpu_req, task.memory_req) {
                continue;
            }
            if !Self::satisfies_constraints(task, machine) {
                continue;
            }
            let domain = self.domain_of(machine_id);
            if placed_domains.contains(domain) && placed_domains.len() < distinct_domains {
                continue;
            }
            return Some(machine.clone());
        }

        // Anti-affinity relaxed: any fitting machine.
        ranked
            .iter()
            .filter_map(|(id, _)| snapshot.machine(id))
            .find(|m| m.can_fit(task.cpu_req, task.gpu_req, task.memory_req))
            .cloned()
    }
}

impl Scheduler for ServiceScheduler {
    fn core(&self) -> &SchedulerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SchedulerCore {
        &mut self.core
    }

    fn schedule_job(&mut self, job: &Job, snapshot: &mut Snapshot) -> Option<Transaction> {
        let mut transaction = Transaction::new(self.core.scheduler_id());
        let ranked = self.score_machines(snapshot, job);
        let mut placed_domains: HashSet<String> = HashSet::new();

        for task in &job.tasks {
            if snapshot.is_assigned(&task.id) {
                continue;
            }
            if let Some(machine) = self.select_with_anti_affinity(task, &ranked, &placed_domains, snapshot) {
                transaction.add_placement(task.clone(), &machine.id, machine.version);
                snapshot.reserve(task, &machine.id);
                placed_domains.insert(self.domain_of(&machine.id).to_owned());
            }
        }

        if transaction.is_empty() {
            None
        } else {
            Some(transaction)
        }
    }

    fn select_machine(&mut self, task: &Task, snapshot: &Snapshot) -> Option<Machine> {
        let probe = Job::new("probe", vec![task.clone()], crate::types::JobType::Service, 0.0, 0);
        let ranked = self.score_machines(snapshot, &probe);
        ranked
            .iter()
            .filter_map(|(id, _)| snapshot.machine(id))
            .find(|m| {
                m.can_fit(task.cpu_req, task.gpu_req, task.memory_req)
                    && Self::satisfies_constraints(task, m)
            })
            .cloned()
    }
}

/// Priority-driven scheduler with an abstract preemption hook: when nothing
/// currently fits, any machine whose total capacity covers the demand is
/// still a candidate; the conflicting load is assumed preemptible and the
/// commit's live fit check arbitrates.
pub struct PriorityScheduler {
    core: SchedulerCore,
    preemption_enabled: bool,
}

impl PriorityScheduler {
    pub fn new(scheduler_id: impl Into<String>, cell_state: Arc<CellState>) -> Self {
        Self {
            core: SchedulerCore::new(scheduler_id, cell_state, 0.5, 0.01),
            preemption_enabled: true,
        }
    }

    pub fn set_preemption(&mut self, enabled: bool) {
        self.preemption_enabled = enabled;
    }

    fn find_preemptable(&self, task: &Task, snapshot: &Snapshot) -> Option<Machine> {
        snapshot
            .machines
            .values()
            .find(|m| m.cpu_cores >= task.cpu_req && m.memory_gb >= task.memory_req)
            .cloned()
    }
}

impl Scheduler for PriorityScheduler {
    fn core(&self) -> &SchedulerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SchedulerCore {
        &mut self.core
    }

    fn schedule_job(&mut self, job: &Job, snapshot: &mut Snapshot) -> Option<Transaction> {
        let mut transaction = Transaction::new(self.core.scheduler_id());

        for task in &job.tasks {
            if snapshot.is_assigned(&task.id) {
                continue;
            }
            if let Some(machine) = self.select_machine(task, snapshot) {
                transaction.add_placement(task.clone(), &machine.id, machine.version);
                snapshot.reserve(task, &machine.id);
            } else if self.preemption_enabled {
                // No local reservation: the placement stands only if the
                // space materializes by commit time.
                if let Some(machine) = self.find_preemptable(task, snapshot) {
                    transaction.add_placement(task.clone(), &machine.id, machine.version);
                }
            }
        }

        if transaction.is_empty() {
            None
        } else {
            Some(transaction)
        }
    }

    fn select_machine(&mut self, task: &Task, snapshot: &Snapshot) -> Option<Machine> {
        snapshot
            .machines
            .values()
            .sorted_by(|a, b| b.available_cpu().cmp(&a.available_cpu()))
            .find(|m| m.can_fit(task.cpu_req, task.gpu_req, task.memory_req))
            .cloned()
    }
}
