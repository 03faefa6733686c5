use std::path::Path;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::Deserialize;
use thiserror::Error;

use crate::cell_state::CellState;
use crate::scheduler::{
    BatchScheduler, MapReduceScheduler, PriorityScheduler, ScalingPolicy, Scheduler,
    ServiceScheduler, WeightedRoundRobinScheduler,
};
use crate::types::JobType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClusterConfig {
    pub num_machines: usize,
    #[serde(default = "default_true")]
    pub heterogeneous: bool,
}

/// Scheduler kinds recognized by the factory. A closed set: an unknown
/// `type` in the config is a parse error, not a runtime surprise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    Batch,
    Service,
    Mapreduce,
    Priority,
    WeightedRr,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SchedulerConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SchedulerKind,
    pub decision_time_job: Option<f64>,
    pub decision_time_task: Option<f64>,
    pub policy: Option<ScalingPolicy>,
    #[serde(default)]
    pub weights: HashMap<JobType, f64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SimulationSection {
    pub duration: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WorkloadConfig {
    #[serde(default = "default_batch_ratio")]
    pub batch_ratio: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SimulationConfig {
    pub cluster: ClusterConfig,
    pub schedulers: Vec<SchedulerConfig>,
    pub simulation: SimulationSection,
    pub workload: WorkloadConfig,
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub experiment_name: Option<String>,
    pub output_dir: Option<String>,
}

impl SimulationConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: SimulationConfig = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.num_machines == 0 {
            return Err(ConfigError::Invalid("cluster.num_machines must be positive".into()));
        }
        if self.simulation.duration <= 0.0 {
            return Err(ConfigError::Invalid("simulation.duration must be positive".into()));
        }
        if self.schedulers.is_empty() {
            return Err(ConfigError::Invalid("at least one scheduler is required".into()));
        }
        if !(0.0..=1.0).contains(&self.workload.batch_ratio) {
            return Err(ConfigError::Invalid("workload.batch_ratio must be in [0, 1]".into()));
        }
        Ok(())
    }
}

/// Construct the configured placement strategy bound to the shared cell.
pub fn build_scheduler(config: &SchedulerConfig, cell_state: Arc<CellState>) -> Box<dyn Scheduler> {
    let id = config.id.as_str();
    match config.kind {
        SchedulerKind::Batch => Box::new(BatchScheduler::new(id, cell_state)),
        SchedulerKind::Service => Box::new(ServiceScheduler::with_decision_times(
            id,
            cell_state,
            config.decision_time_job.unwrap_or(1.0),
            config.decision_time_task.unwrap_or(0.05),
        )),
        SchedulerKind::Mapreduce => Box::new(MapReduceScheduler::new(
            id,
            cell_state,
            config.policy.unwrap_or_default(),
        )),
        SchedulerKind::Priority => Box::new(PriorityScheduler::new(id, cell_state)),
        SchedulerKind::WeightedRr => Box::new(WeightedRoundRobinScheduler::new(
            id,
            cell_state,
            config.weights.clone(),
        )),
    }
}

fn default_true() -> bool {
    true
}

fn default_batch_ratio() -> f64 {
    0.8
}

fn default_seed() -> u64 {
    42
}
