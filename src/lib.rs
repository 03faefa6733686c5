pub mod cell_state;
pub mod config;
pub mod scheduler;
pub mod simulation;
pub mod types;
pub mod workload;

pub use {
    cell_state::{CellState, CellStats, CommitOutcome, Snapshot, Utilization},
    scheduler::{
        BatchScheduler, FirstFitScheduler, MapReduceScheduler, PlacementStrategy,
        PriorityScheduler, RandomScheduler, ScalingPolicy, ScheduleOutcome, Scheduler,
        SchedulerCore, SchedulerStats, ServiceScheduler, WeightedRoundRobinScheduler,
    },
    simulation::{ClusterSimulator, FailureInjector, SimulationResults},
    types::{Constraint, Job, JobType, Machine, Placement, Task, Transaction},
};

#[cfg(test)]
mod tests;
