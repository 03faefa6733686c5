mod scheduler_tests;
mod workload_tests;

use std::sync::Arc;

use crate::cell_state::{CellState, CommitOutcome};
use crate::types::{Job, JobType, Machine, Task, Transaction};

fn cell() -> Arc<CellState> {
    Arc::new(CellState::new())
}

fn machine(id: &str, cpu: u32, gpu: u32, memory: f64) -> Machine {
    Machine::new(id, cpu, gpu, memory)
}

fn task(id: &str, job_id: &str, cpu: u32, gpu: u32, memory: f64) -> Task {
    Task::new(id, job_id, cpu, gpu, memory, 10.0, 0)
}

fn batch_job(id: &str, tasks: Vec<Task>) -> Job {
    Job::new(id, tasks, JobType::Batch, 0.0, 0)
}

fn service_job(id: &str, tasks: Vec<Task>) -> Job {
    Job::new(id, tasks, JobType::Service, 0.0, 5)
}

/// Commit a single placement observing the given machine version.
fn commit_single(cell: &CellState, task: &Task, machine_id: &str, observed_version: u64) -> CommitOutcome {
    let mut txn = Transaction::new("test");
    txn.add_placement(task.clone(), machine_id, observed_version);
    cell.commit_transaction(txn, true)
}
