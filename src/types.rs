use std::time::SystemTime;

use hashbrown::HashMap;
use serde::Deserialize;

/// A physical machine in the cell. Allocation fields are only ever mutated
/// by `CellState` under its lock (or locally on a scheduler's snapshot).
#[derive(Clone, Debug)]
pub struct Machine {
    pub id: String,
    pub cpu_cores: u32,
    pub gpu_count: u32,
    pub memory_gb: f64,
    pub allocated_cpu: u32,
    pub allocated_gpu: u32,
    pub allocated_memory: f64,
    /// Bumped by exactly one on every accepted allocation change.
    pub version: u64,
    pub tasks: hashbrown::HashSet<String>,
}

impl Machine {
    pub fn new(id: impl Into<String>, cpu_cores: u32, gpu_count: u32, memory_gb: f64) -> Self {
        Self {
            id: id.into(),
            cpu_cores,
            gpu_count,
            memory_gb,
            allocated_cpu: 0,
            allocated_gpu: 0,
            allocated_memory: 0.0,
            version: 0,
            tasks: hashbrown::HashSet::new(),
        }
    }

    #[inline]
    pub fn available_cpu(&self) -> u32 {
        self.cpu_cores - self.allocated_cpu
    }

    #[inline]
    pub fn available_gpu(&self) -> u32 {
        self.gpu_count - self.allocated_gpu
    }

    #[inline]
    pub fn available_memory(&self) -> f64 {
        self.memory_gb - self.allocated_memory
    }

    #[inline]
    pub fn can_fit(&self, cpu: u32, gpu: u32, memory: f64) -> bool {
        self.available_cpu() >= cpu && self.available_gpu() >= gpu && self.available_memory() >= memory
    }

    pub(crate) fn allocate(&mut self, task: &Task) {
        self.allocated_cpu += task.cpu_req;
        self.allocated_gpu += task.gpu_req;
        self.allocated_memory += task.memory_req;
    }

    pub(crate) fn deallocate(&mut self, task: &Task) {
        assert!(
            self.allocated_cpu >= task.cpu_req && self.allocated_gpu >= task.gpu_req,
            "machine {} releasing more than allocated for task {}",
            self.id,
            task.id,
        );
        self.allocated_cpu -= task.cpu_req;
        self.allocated_gpu -= task.gpu_req;
        self.allocated_memory -= task.memory_req;
    }
}

/// A placement constraint a machine must satisfy.
#[derive(Clone, Debug, PartialEq)]
pub enum Constraint {
    MinCpu(u32),
    MinMemory(f64),
    RequiresGpu(bool),
    MachineType(String),
}

#[derive(Clone, Debug)]
pub struct Task {
    pub id: String,
    pub job_id: String,
    pub cpu_req: u32,
    pub gpu_req: u32,
    pub memory_req: f64,
    /// Simulated runtime in seconds, > 0.
    pub duration: f64,
    pub priority: i32,
    pub constraints: Vec<Constraint>,
    pub assigned_machine: Option<String>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        job_id: impl Into<String>,
        cpu_req: u32,
        gpu_req: u32,
        memory_req: f64,
        duration: f64,
        priority: i32,
    ) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            cpu_req,
            gpu_req,
            memory_req,
            duration,
            priority,
            constraints: Vec::new(),
            assigned_machine: None,
        }
    }

    pub fn with_constraints(mut self, constraints: Vec<Constraint>) -> Self {
        self.constraints = constraints;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Batch,
    Service,
}

#[derive(Clone, Debug)]
pub struct Job {
    pub id: String,
    pub tasks: Vec<Task>,
    pub job_type: JobType,
    pub submit_time: f64,
    pub priority: i32,
    /// Job ids that must complete first. Informational only; the core does
    /// not block on them.
    pub dependencies: Vec<String>,
    /// All-or-nothing placement when set.
    pub gang_schedule: bool,
}

impl Job {
    pub fn new(id: impl Into<String>, tasks: Vec<Task>, job_type: JobType, submit_time: f64, priority: i32) -> Self {
        Self {
            id: id.into(),
            tasks,
            job_type,
            submit_time,
            priority,
            dependencies: Vec::new(),
            gang_schedule: false,
        }
    }

    pub fn gang_scheduled(mut self) -> Self {
        self.gang_schedule = true;
        self
    }

    #[inline]
    pub fn needs_gpu(&self) -> bool {
        self.tasks.iter().any(|t| t.gpu_req > 0)
    }
}

/// One intended placement inside a transaction. Carries the full task record
/// so the commit path can validate demand without consulting the snapshot.
#[derive(Clone, Debug)]
pub struct Placement {
    pub task: Task,
    pub machine_id: String,
}

/// A bundle of placements produced by one scheduler from one snapshot,
/// together with the machine versions observed at snapshot time. Single-use:
/// consumed by `CellState::commit_transaction`.
#[derive(Clone, Debug)]
pub struct Transaction {
    scheduler_id: String,
    timestamp: SystemTime,
    placements: Vec<Placement>,
    machine_versions: HashMap<String, u64>,
}

impl Transaction {
    pub fn new(scheduler_id: impl Into<String>) -> Self {
        Self {
            scheduler_id: scheduler_id.into(),
            timestamp: SystemTime::now(),
            placements: Vec::new(),
            machine_versions: HashMap::new(),
        }
    }

    pub fn add_placement(&mut self, task: Task, machine_id: &str, machine_version: u64) {
        self.placements.push(Placement {
            task,
            machine_id: machine_id.to_owned(),
        });
        self.machine_versions.insert(machine_id.to_owned(), machine_version);
    }

    #[inline]
    pub fn scheduler_id(&self) -> &str {
        &self.scheduler_id
    }

    #[inline]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    #[inline]
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    #[inline]
    pub fn observed_version(&self, machine_id: &str) -> Option<u64> {
        self.machine_versions.get(machine_id).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }
}
