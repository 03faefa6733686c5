pub mod failure;
pub mod simulator;

pub use failure::FailureInjector;
pub use simulator::{ClusterSimulator, CompletedJob, SimulationResults};
