use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use omega_sim::config::{build_scheduler, SchedulerKind, SimulationConfig};
use omega_sim::simulation::ClusterSimulator;
use omega_sim::types::JobType;
use omega_sim::workload::WorkloadGenerator;
use omega_sim::CellState;

#[derive(Debug, Parser)]
#[clap(name = "omega-sim", about = "Shared-state cluster scheduler simulator")]
struct Args {
    /// Path to the YAML configuration file.
    #[clap(long, default_value = "experiments/baseline.yaml")]
    config: PathBuf,

    /// Where to write the JSON results; defaults to
    /// <output_dir>/results_<experiment_name>.json.
    #[clap(long)]
    output: Option<PathBuf>,
}

/// Route batch-type jobs to the first batch-capable scheduler and
/// service-type jobs to the first service-capable one; fall back to the
/// first configured scheduler.
fn route_for(config: &SimulationConfig, job_type: JobType) -> &str {
    let wanted: &[SchedulerKind] = match job_type {
        JobType::Batch => &[SchedulerKind::Batch, SchedulerKind::WeightedRr],
        JobType::Service => &[SchedulerKind::Service, SchedulerKind::Priority],
    };
    config
        .schedulers
        .iter()
        .find(|s| wanted.contains(&s.kind))
        .unwrap_or(&config.schedulers[0])
        .id
        .as_str()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = SimulationConfig::load(&args.config)?;

    let cell_state = Arc::new(CellState::new());
    let mut workload_gen = WorkloadGenerator::new(config.seed);

    let machines = workload_gen.generate_cluster(config.cluster.num_machines, config.cluster.heterogeneous);
    info!(machines = machines.len(), "initialized cluster");
    for machine in machines {
        cell_state.add_machine(machine);
    }

    let schedulers: Vec<_> = config
        .schedulers
        .iter()
        .map(|sched| {
            info!(id = %sched.id, kind = ?sched.kind, "initialized scheduler");
            build_scheduler(sched, Arc::clone(&cell_state))
        })
        .collect();

    let jobs = workload_gen.generate_workload(config.simulation.duration, config.workload.batch_ratio);
    info!(jobs = jobs.len(), "generated workload");

    let mut simulator = ClusterSimulator::new(Arc::clone(&cell_state), schedulers, config.simulation.duration);
    for job in jobs {
        let scheduler_id = route_for(&config, job.job_type).to_owned();
        let submit_time = job.submit_time;
        cell_state.add_job(job.clone());
        simulator.add_job_arrival(job, submit_time, &scheduler_id);
    }

    let results = simulator.run();

    println!("Completed jobs: {}", results.completed_jobs);
    println!("Failed jobs: {}", results.failed_jobs);
    if let (Some(avg), Some(median)) = (results.avg_job_duration, results.median_job_duration) {
        println!("Average job duration: {avg:.2}s");
        println!("Median job duration: {median:.2}s");
    }
    for (id, stats) in &results.schedulers {
        println!(
            "{id}: jobs={} tasks={} conflicts={} conflict_rate={:.4} busy={:.2}s avg_wait={:.2}s",
            stats.jobs_scheduled,
            stats.tasks_scheduled,
            stats.conflicts,
            stats.conflict_rate,
            stats.busy_time,
            stats.avg_wait_time,
        );
    }
    let cell = &results.cell_state;
    println!(
        "cell: transactions={} commits={} conflicts={} conflict_rate={:.4}",
        cell.total_transactions, cell.total_commits, cell.total_conflicts, cell.conflict_rate,
    );
    println!(
        "utilization: cpu={:.2}% gpu={:.2}% memory={:.2}%",
        cell.utilization.cpu * 100.0,
        cell.utilization.gpu * 100.0,
        cell.utilization.memory * 100.0,
    );

    let output_path = match args.output {
        Some(path) => path,
        None => {
            let dir = PathBuf::from(config.output_dir.as_deref().unwrap_or("results"));
            std::fs::create_dir_all(&dir)?;
            dir.join(format!(
                "results_{}.json",
                config.experiment_name.as_deref().unwrap_or("default")
            ))
        }
    };
    serde_json::to_writer_pretty(std::fs::File::create(&output_path)?, &results)?;
    info!(path = %output_path.display(), "results written");

    Ok(())
}
