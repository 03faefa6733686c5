use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, LogNormal, Normal};

use crate::types::{Job, JobType, Machine, Task};

/// Per-job-type distribution parameters, loosely after production cluster
/// traces.
struct WorkloadParams {
    task_count_mean: f64,
    task_count_std: f64,
    duration_mean: f64,
    duration_std: f64,
    cpu_mean: f64,
    cpu_std: f64,
    memory_mean: f64,
    memory_std: f64,
    interarrival_mean: f64,
}

const BATCH_PARAMS: WorkloadParams = WorkloadParams {
    task_count_mean: 10.0,
    task_count_std: 50.0,
    duration_mean: 300.0,
    duration_std: 600.0,
    cpu_mean: 2.0,
    cpu_std: 1.0,
    memory_mean: 4.0,
    memory_std: 2.0,
    interarrival_mean: 10.0,
};

const SERVICE_PARAMS: WorkloadParams = WorkloadParams {
    task_count_mean: 5.0,
    task_count_std: 10.0,
    duration_mean: 86_400.0,
    duration_std: 43_200.0,
    cpu_mean: 4.0,
    cpu_std: 2.0,
    memory_mean: 8.0,
    memory_std: 4.0,
    interarrival_mean: 60.0,
};

const MAX_TASKS_PER_JOB: usize = 1000;

/// Seeded synthetic workload and cluster generator. External to the core:
/// it only produces the `Job` and `Machine` values the simulator ingests.
pub struct WorkloadGenerator {
    rng: StdRng,
}

impl WorkloadGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate jobs with Poisson arrivals covering `duration` simulated
    /// seconds; `batch_ratio` of them are batch jobs, the rest services.
    pub fn generate_workload(&mut self, duration: f64, batch_ratio: f64) -> Vec<Job> {
        let mut jobs = Vec::new();
        let mut current_time = 0.0;
        let mut job_seq = 0usize;

        while current_time < duration {
            let is_batch = self.rng.gen::<f64>() < batch_ratio;
            let job_type = if is_batch { JobType::Batch } else { JobType::Service };
            let params = if is_batch { &BATCH_PARAMS } else { &SERVICE_PARAMS };

            jobs.push(self.generate_job(&format!("job_{job_seq}"), job_type, current_time, params));
            job_seq += 1;

            let interarrival = Exp::new(1.0 / params.interarrival_mean)
                .expect("positive interarrival rate")
                .sample(&mut self.rng);
            current_time += interarrival;
        }

        jobs
    }

    fn generate_job(&mut self, job_id: &str, job_type: JobType, submit_time: f64, params: &WorkloadParams) -> Job {
        let task_count_dist = LogNormal::new(
            params.task_count_mean.ln(),
            (params.task_count_std + 1.0).ln(),
        )
        .expect("finite task count distribution");
        let task_count = (task_count_dist.sample(&mut self.rng) as usize)
            .max(1)
            .min(MAX_TASKS_PER_JOB);

        let tasks = (0..task_count)
            .map(|i| self.generate_task(&format!("{job_id}_task_{i}"), job_id, params))
            .collect();

        let priority = match job_type {
            JobType::Service => self.rng.gen_range(5..=10),
            JobType::Batch => self.rng.gen_range(1..=5),
        };

        let mut job = Job::new(job_id, tasks, job_type, submit_time, priority);
        // Gang scheduling is rare and service-only.
        if job_type == JobType::Service && self.rng.gen::<f64>() < 0.05 {
            job = job.gang_scheduled();
        }
        job
    }

    fn generate_task(&mut self, task_id: &str, job_id: &str, params: &WorkloadParams) -> Task {
        let cpu = Normal::new(params.cpu_mean, params.cpu_std)
            .expect("finite cpu distribution")
            .sample(&mut self.rng);
        let cpu_req = (cpu as i64).max(1) as u32;

        let memory_req = Normal::new(params.memory_mean, params.memory_std)
            .expect("finite memory distribution")
            .sample(&mut self.rng)
            .max(0.5);

        let gpu_req = u32::from(self.rng.gen::<f64>() < 0.1);

        let duration = LogNormal::new(params.duration_mean.ln(), (params.duration_std + 1.0).ln())
            .expect("finite duration distribution")
            .sample(&mut self.rng)
            .max(1.0);

        let priority = self.rng.gen_range(1..=10);

        Task::new(task_id, job_id, cpu_req, gpu_req, memory_req, duration, priority)
    }

    /// Generate machine records for a cluster of `num_machines`. The
    /// heterogeneous mix follows common production shapes: standard,
    /// high-cpu, gpu, and large-memory machines.
    pub fn generate_cluster(&mut self, num_machines: usize, heterogeneous: bool) -> Vec<Machine> {
        // (cpu, gpu, memory, population ratio)
        let shapes: &[(u32, u32, f64, f64)] = if heterogeneous {
            &[
                (8, 0, 16.0, 0.5),
                (16, 0, 32.0, 0.3),
                (8, 2, 32.0, 0.15),
                (32, 0, 128.0, 0.05),
            ]
        } else {
            &[(8, 0, 16.0, 1.0)]
        };

        (0..num_machines)
            .map(|i| {
                let r = self.rng.gen::<f64>();
                let mut cumulative = 0.0;
                let mut selected = shapes[0];
                for shape in shapes {
                    cumulative += shape.3;
                    if r <= cumulative {
                        selected = *shape;
                        break;
                    }
                }
                Machine::new(format!("machine_{i}"), selected.0, selected.1, selected.2)
            })
            .collect()
    }
}
