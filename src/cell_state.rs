use std::collections::VecDeque;

use hashbrown::{HashMap, HashSet};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::types::{Job, Machine, Task, Transaction};

/// Retained accepted transactions; older entries are evicted.
const TRANSACTION_LOG_CAP: usize = 10_000;

/// Cluster-wide resource utilization, each component in [0, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Utilization {
    pub cpu: f64,
    pub gpu: f64,
    pub memory: f64,
}

/// Aggregate commit statistics for the cell.
#[derive(Clone, Debug, Serialize)]
pub struct CellStats {
    pub total_transactions: u64,
    pub total_commits: u64,
    pub total_conflicts: u64,
    pub conflict_rate: f64,
    pub utilization: Utilization,
}

/// Result of `commit_transaction`: which placements landed and which were
/// rejected. Conflicts are data, not errors; they drive the retry loop.
#[derive(Clone, Debug)]
pub struct CommitOutcome {
    committed: Vec<String>,
    conflicts: Vec<String>,
}

impl CommitOutcome {
    #[inline]
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    #[inline]
    pub fn committed(&self) -> &[String] {
        &self.committed
    }

    #[inline]
    pub fn conflicts(&self) -> &[String] {
        &self.conflicts
    }
}

/// A deep, independent copy of the cell handed to one scheduler for
/// planning. Machines marked failed are excluded, so no strategy can pick
/// them. Schedulers mutate the snapshot freely through `reserve` so later
/// tasks of the same job see reduced availability; none of it touches the
/// authoritative state.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub machines: IndexMap<String, Machine>,
    pub jobs: HashMap<String, Job>,
    pub tasks: HashMap<String, Task>,
    pub version: u64,
}

impl Snapshot {
    #[inline]
    pub fn machine(&self, id: &str) -> Option<&Machine> {
        self.machines.get(id)
    }

    /// True when the task is already assigned in the authoritative state
    /// this snapshot was taken from.
    #[inline]
    pub fn is_assigned(&self, task_id: &str) -> bool {
        self.tasks
            .get(task_id)
            .map_or(false, |t| t.assigned_machine.is_some())
    }

    /// Tentatively allocate a task's demand on a snapshot machine.
    pub fn reserve(&mut self, task: &Task, machine_id: &str) {
        if let Some(machine) = self.machines.get_mut(machine_id) {
            machine.allocate(task);
            machine.tasks.insert(task.id.clone());
        }
    }

    /// Total free capacity across the snapshot: (cpu, gpu, memory).
    pub fn aggregate_available(&self) -> (u32, u32, f64) {
        self.machines.values().fold((0, 0, 0.0), |(c, g, m), machine| {
            (
                c + machine.available_cpu(),
                g + machine.available_gpu(),
                m + machine.available_memory(),
            )
        })
    }

    pub fn utilization(&self) -> Utilization {
        utilization_of(self.machines.values())
    }
}

struct CellInner {
    machines: IndexMap<String, Machine>,
    jobs: HashMap<String, Job>,
    tasks: HashMap<String, Task>,
    version: u64,
    failed_machines: HashSet<String>,
    transaction_log: VecDeque<Transaction>,
    total_transactions: u64,
    total_commits: u64,
    total_conflicts: u64,
}

/// The single authoritative copy of the cluster: machines, jobs, tasks and
/// the commit statistics. All mutating operations and `snapshot` serialize
/// on one mutex, so a commit's validate and apply phases are atomic with
/// respect to every other commit, release, and snapshot.
pub struct CellState {
    inner: Mutex<CellInner>,
}

impl Default for CellState {
    fn default() -> Self {
        Self::new()
    }
}

impl CellState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CellInner {
                machines: IndexMap::new(),
                jobs: HashMap::new(),
                tasks: HashMap::new(),
                version: 0,
                failed_machines: HashSet::new(),
                transaction_log: VecDeque::new(),
                total_transactions: 0,
                total_commits: 0,
                total_conflicts: 0,
            }),
        }
    }

    pub fn add_machine(&self, machine: Machine) {
        let mut inner = self.inner.lock();
        inner.machines.insert(machine.id.clone(), machine);
    }

    /// Register a job and its tasks. The task table is the authority for
    /// assignments from here on.
    pub fn add_job(&self, job: Job) {
        let mut inner = self.inner.lock();
        for task in &job.tasks {
            inner.tasks.insert(task.id.clone(), task.clone());
        }
        inner.jobs.insert(job.id.clone(), job);
    }

    /// Take a consistent deep copy for a scheduler. Linearizable with
    /// respect to commits: taken under the same lock that applies them.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock();
        let machines = inner
            .machines
            .iter()
            .filter(|(id, _)| !inner.failed_machines.contains(id.as_str()))
            .map(|(id, m)| (id.clone(), m.clone()))
            .collect();
        Snapshot {
            machines,
            jobs: inner.jobs.clone(),
            tasks: inner.tasks.clone(),
            version: inner.version,
        }
    }

    /// Attempt to commit a transaction with per-machine version checks.
    ///
    /// Validation walks the placements in order, compounding tentative
    /// reservations so two placements on one machine within the same
    /// transaction cannot jointly overcommit it. With `incremental` set,
    /// non-conflicting placements are applied even when others are rejected;
    /// otherwise any conflict aborts the whole transaction untouched.
    pub fn commit_transaction(&self, transaction: Transaction, incremental: bool) -> CommitOutcome {
        let mut inner = self.inner.lock();
        inner.total_transactions += 1;

        let mut conflicts: Vec<String> = Vec::new();
        let mut accepted: Vec<usize> = Vec::new();
        // Within-transaction tentative demand per machine: (cpu, gpu, memory).
        let mut tentative: HashMap<String, (u32, u32, f64)> = HashMap::new();

        for (idx, placement) in transaction.placements().iter().enumerate() {
            let task = &placement.task;
            let machine_id = placement.machine_id.as_str();

            let machine = match inner.machines.get(machine_id) {
                Some(m) if !inner.failed_machines.contains(machine_id) => m,
                _ => {
                    conflicts.push(task.id.clone());
                    continue;
                }
            };

            if let Some(expected) = transaction.observed_version(machine_id) {
                if machine.version != expected {
                    conflicts.push(task.id.clone());
                    continue;
                }
            }

            match inner.tasks.get(task.id.as_str()) {
                Some(live) if live.assigned_machine.is_none() => {}
                _ => {
                    // Unknown task, or a double-placement attempt.
                    conflicts.push(task.id.clone());
                    continue;
                }
            }

            let (t_cpu, t_gpu, t_mem) = tentative.get(machine_id).copied().unwrap_or((0, 0, 0.0));
            if machine.available_cpu() < t_cpu + task.cpu_req
                || machine.available_gpu() < t_gpu + task.gpu_req
                || machine.available_memory() < t_mem + task.memory_req
            {
                conflicts.push(task.id.clone());
                continue;
            }

            tentative.insert(
                placement.machine_id.clone(),
                (t_cpu + task.cpu_req, t_gpu + task.gpu_req, t_mem + task.memory_req),
            );
            accepted.push(idx);
        }

        // Gang scheduling: all placements stand or fall together.
        if !incremental && !conflicts.is_empty() {
            inner.total_conflicts += transaction.len() as u64;
            debug!(
                scheduler = transaction.scheduler_id(),
                placements = transaction.len(),
                conflicts = conflicts.len(),
                "gang transaction aborted"
            );
            return CommitOutcome {
                committed: Vec::new(),
                conflicts: transaction
                    .placements()
                    .iter()
                    .map(|p| p.task.id.clone())
                    .collect(),
            };
        }

        let mut committed = Vec::with_capacity(accepted.len());
        for idx in &accepted {
            let placement = &transaction.placements()[*idx];
            let machine = inner
                .machines
                .get_mut(placement.machine_id.as_str())
                .expect("validated machine vanished during commit");
            machine.allocate(&placement.task);
            machine.tasks.insert(placement.task.id.clone());
            machine.version += 1;

            let live = inner
                .tasks
                .get_mut(placement.task.id.as_str())
                .expect("validated task vanished during commit");
            live.assigned_machine = Some(placement.machine_id.clone());
            committed.push(placement.task.id.clone());
        }

        if !conflicts.is_empty() {
            inner.total_conflicts += conflicts.len() as u64;
            debug!(
                scheduler = transaction.scheduler_id(),
                conflicts = conflicts.len(),
                committed = committed.len(),
                "transaction partially conflicted"
            );
        }

        if !committed.is_empty() {
            inner.version += 1;
            inner.total_commits += 1;
            if inner.transaction_log.len() == TRANSACTION_LOG_CAP {
                inner.transaction_log.pop_front();
            }
            inner.transaction_log.push_back(transaction);
        }

        CommitOutcome { committed, conflicts }
    }

    /// Release the resources held by a completed task. Idempotent: unknown
    /// or unassigned task ids are a no-op. Releases bump the machine version
    /// but not the global commit version or counters.
    pub fn release_task(&self, task_id: &str) {
        let mut inner = self.inner.lock();
        let (machine_id, task) = match inner.tasks.get(task_id) {
            Some(task) => match &task.assigned_machine {
                Some(machine_id) => (machine_id.clone(), task.clone()),
                None => return,
            },
            None => return,
        };

        let machine = inner
            .machines
            .get_mut(machine_id.as_str())
            .expect("assigned machine missing from cell");
        machine.deallocate(&task);
        machine.tasks.remove(task_id);
        machine.version += 1;

        inner
            .tasks
            .get_mut(task_id)
            .expect("released task vanished")
            .assigned_machine = None;
    }

    pub fn get_utilization(&self) -> Utilization {
        let inner = self.inner.lock();
        utilization_of(inner.machines.values())
    }

    pub fn get_statistics(&self) -> CellStats {
        let inner = self.inner.lock();
        let conflict_rate = if inner.total_transactions > 0 {
            inner.total_conflicts as f64 / inner.total_transactions as f64
        } else {
            0.0
        };
        CellStats {
            total_transactions: inner.total_transactions,
            total_commits: inner.total_commits,
            total_conflicts: inner.total_conflicts,
            conflict_rate,
            utilization: utilization_of(inner.machines.values()),
        }
    }

    /// Exclude a machine from future snapshots and commits.
    pub fn mark_failed(&self, machine_id: &str) {
        self.inner.lock().failed_machines.insert(machine_id.to_owned());
    }

    pub fn mark_recovered(&self, machine_id: &str) {
        self.inner.lock().failed_machines.remove(machine_id);
    }

    pub fn failed_machines(&self) -> Vec<String> {
        self.inner.lock().failed_machines.iter().cloned().collect()
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    pub fn machine(&self, machine_id: &str) -> Option<Machine> {
        self.inner.lock().machines.get(machine_id).cloned()
    }

    pub fn machine_ids(&self) -> Vec<String> {
        self.inner.lock().machines.keys().cloned().collect()
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.inner.lock().tasks.get(task_id).cloned()
    }

    /// Ids of the tasks currently allocated on a machine.
    pub fn tasks_on(&self, machine_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .machines
            .get(machine_id)
            .map(|m| m.tasks.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn transaction_log_len(&self) -> usize {
        self.inner.lock().transaction_log.len()
    }
}

fn utilization_of<'a>(machines: impl Iterator<Item = &'a Machine>) -> Utilization {
    let mut total = (0u64, 0u64, 0.0f64);
    let mut used = (0u64, 0u64, 0.0f64);
    for m in machines {
        total.0 += m.cpu_cores as u64;
        total.1 += m.gpu_count as u64;
        total.2 += m.memory_gb;
        used.0 += m.allocated_cpu as u64;
        used.1 += m.allocated_gpu as u64;
        used.2 += m.allocated_memory;
    }
    Utilization {
        cpu: if total.0 > 0 { used.0 as f64 / total.0 as f64 } else { 0.0 },
        gpu: if total.1 > 0 { used.1 as f64 / total.1 as f64 } else { 0.0 },
        memory: if total.2 > 0.0 { used.2 / total.2 } else { 0.0 },
    }
}
