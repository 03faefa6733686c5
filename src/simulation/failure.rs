use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};
use tracing::{info, warn};

use crate::cell_state::CellState;

/// Simulates machine failures and recovery. A failed machine has all of
/// its tasks released and is excluded from scheduler snapshots until it
/// recovers.
pub struct FailureInjector {
    cell_state: Arc<CellState>,
    /// Failures per machine per simulated second.
    failure_rate: f64,
    rng: StdRng,
}

impl FailureInjector {
    pub fn new(cell_state: Arc<CellState>, failure_rate: f64, seed: u64) -> Self {
        Self {
            cell_state,
            failure_rate,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Fail a specific machine: release everything it holds, then mark it
    /// unavailable.
    pub fn inject_failure(&mut self, machine_id: &str) {
        let tasks = self.cell_state.tasks_on(machine_id);
        warn!(machine = machine_id, released = tasks.len(), "injecting failure");
        for task_id in tasks {
            self.cell_state.release_task(&task_id);
        }
        self.cell_state.mark_failed(machine_id);
    }

    pub fn recover_machine(&mut self, machine_id: &str) {
        info!(machine = machine_id, "machine recovered");
        self.cell_state.mark_recovered(machine_id);
    }

    /// Fail a uniformly chosen machine among those still alive. Returns
    /// the victim's id, or `None` when every machine is already down.
    pub fn fail_random(&mut self) -> Option<String> {
        let failed = self.cell_state.failed_machines();
        let candidates: Vec<String> = self
            .cell_state
            .machine_ids()
            .into_iter()
            .filter(|id| !failed.contains(id))
            .collect();
        let victim = candidates.choose(&mut self.rng)?.clone();
        self.inject_failure(&victim);
        Some(victim)
    }

    /// Exponential inter-failure delay scaled by cluster size.
    pub fn sample_time_to_failure(&mut self) -> f64 {
        let machines = self.cell_state.machine_ids().len().max(1);
        let rate = self.failure_rate * machines as f64;
        match Exp::new(rate) {
            Ok(exp) => exp.sample(&mut self.rng),
            // Degenerate rate: push the next failure past any horizon.
            Err(_) => f64::MAX,
        }
    }

    /// Uniform repair delay between one and ten minutes.
    pub fn sample_recovery_delay(&mut self) -> f64 {
        self.rng.gen_range(60.0..600.0)
    }
}
