use super::*;

use crate::scheduler::{
    BatchScheduler, FirstFitScheduler, MapReduceScheduler, PlacementStrategy, PriorityScheduler,
    ScalingPolicy, Scheduler, ServiceScheduler, WeightedRoundRobinScheduler,
};
use crate::types::Constraint;

fn placements_of(txn: &Transaction) -> Vec<(&str, &str)> {
    txn.placements()
        .iter()
        .map(|p| (p.task.id.as_str(), p.machine_id.as_str()))
        .collect()
}

#[test]
fn first_fit_walks_insertion_order() {
    let cell = cell();
    cell.add_machine(machine("m1", 2, 0, 4.0));
    cell.add_machine(machine("m2", 8, 0, 16.0));
    let mut scheduler = FirstFitScheduler::new("ff", Arc::clone(&cell));

    let small = task("t_small", "j", 1, 0, 1.0);
    let big = task("t_big", "j", 4, 0, 8.0);
    let snapshot = cell.snapshot();

    assert_eq!(scheduler.select_machine(&small, &snapshot).unwrap().id, "m1");
    assert_eq!(scheduler.select_machine(&big, &snapshot).unwrap().id, "m2");
}

#[test]
fn planning_reserves_snapshot_between_tasks() {
    //given: two 6-core tasks and two 8-core machines
    let cell = cell();
    cell.add_machine(machine("m1", 8, 0, 16.0));
    cell.add_machine(machine("m2", 8, 0, 16.0));
    let job = batch_job(
        "j1",
        vec![task("t1", "j1", 6, 0, 4.0), task("t2", "j1", 6, 0, 4.0)],
    );
    cell.add_job(job.clone());
    let mut scheduler = FirstFitScheduler::new("ff", Arc::clone(&cell));

    //when
    let mut snapshot = cell.snapshot();
    let txn = scheduler.schedule_job(&job, &mut snapshot).unwrap();

    //then: the second task saw m1's reduced availability
    assert_eq!(placements_of(&txn), [("t1", "m1"), ("t2", "m2")]);
}

#[test]
fn already_assigned_tasks_are_skipped() {
    let cell = cell();
    cell.add_machine(machine("m1", 8, 0, 16.0));
    let t1 = task("t1", "j1", 2, 0, 4.0);
    let t2 = task("t2", "j1", 2, 0, 4.0);
    let job = batch_job("j1", vec![t1.clone(), t2]);
    cell.add_job(job.clone());
    assert!(commit_single(&cell, &t1, "m1", 0).is_clean());

    let mut scheduler = FirstFitScheduler::new("ff", Arc::clone(&cell));
    let mut snapshot = cell.snapshot();
    let txn = scheduler.schedule_job(&job, &mut snapshot).unwrap();

    assert_eq!(placements_of(&txn), [("t2", "m1")]);
}

#[test]
fn best_fit_minimizes_waste() {
    let cell = cell();
    cell.add_machine(machine("m_large", 16, 0, 32.0));
    cell.add_machine(machine("m_small", 4, 0, 8.0));
    let mut scheduler =
        BatchScheduler::with_strategy("batch", Arc::clone(&cell), PlacementStrategy::BestFit);

    let t = task("t1", "j1", 2, 0, 4.0);
    let chosen = scheduler.select_machine(&t, &cell.snapshot()).unwrap();
    assert_eq!(chosen.id, "m_small");
}

#[test]
fn worst_fit_spreads_load() {
    let cell = cell();
    cell.add_machine(machine("m_large", 16, 0, 32.0));
    cell.add_machine(machine("m_small", 4, 0, 8.0));
    let mut scheduler =
        BatchScheduler::with_strategy("batch", Arc::clone(&cell), PlacementStrategy::WorstFit);

    let t = task("t1", "j1", 2, 0, 4.0);
    let chosen = scheduler.select_machine(&t, &cell.snapshot()).unwrap();
    assert_eq!(chosen.id, "m_large");
}

#[test]
fn round_robin_rotates_across_jobs() {
    let cell = cell();
    for i in 1..=3 {
        cell.add_machine(machine(&format!("m{i}"), 8, 0, 16.0));
    }
    let mut scheduler =
        WeightedRoundRobinScheduler::new("rr", Arc::clone(&cell), hashbrown::HashMap::new());

    let job_a = batch_job(
        "ja",
        vec![task("a1", "ja", 1, 0, 1.0), task("a2", "ja", 1, 0, 1.0)],
    );
    let job_b = batch_job("jb", vec![task("b1", "jb", 1, 0, 1.0)]);
    cell.add_job(job_a.clone());
    cell.add_job(job_b.clone());

    let mut snapshot = cell.snapshot();
    let txn_a = scheduler.schedule_job(&job_a, &mut snapshot).unwrap();
    assert_eq!(placements_of(&txn_a), [("a1", "m1"), ("a2", "m2")]);

    // The rolling index survives across jobs.
    let mut snapshot = cell.snapshot();
    let txn_b = scheduler.schedule_job(&job_b, &mut snapshot).unwrap();
    assert_eq!(placements_of(&txn_b), [("b1", "m3")]);
}

#[test]
fn round_robin_weight_grants_consecutive_slots() {
    let cell = cell();
    cell.add_machine(machine("m1", 8, 0, 16.0));
    cell.add_machine(machine("m2", 8, 0, 16.0));
    let mut weights = hashbrown::HashMap::new();
    weights.insert(JobType::Batch, 2.0);
    let mut scheduler = WeightedRoundRobinScheduler::new("rr", Arc::clone(&cell), weights);

    let job = batch_job(
        "j1",
        (1..=4)
            .map(|i| task(&format!("t{i}"), "j1", 1, 0, 1.0))
            .collect(),
    );
    cell.add_job(job.clone());

    let mut snapshot = cell.snapshot();
    let txn = scheduler.schedule_job(&job, &mut snapshot).unwrap();
    assert_eq!(
        placements_of(&txn),
        [("t1", "m1"), ("t2", "m1"), ("t3", "m2"), ("t4", "m2")]
    );
}

#[test]
fn service_spreads_across_failure_domains() {
    let cell = cell();
    for i in 1..=3 {
        cell.add_machine(machine(&format!("m{i}"), 8, 0, 16.0));
    }
    let mut scheduler = ServiceScheduler::new("svc", Arc::clone(&cell));

    let job = service_job(
        "j1",
        (1..=3)
            .map(|i| task(&format!("t{i}"), "j1", 2, 0, 4.0))
            .collect(),
    );
    cell.add_job(job.clone());

    let mut snapshot = cell.snapshot();
    let txn = scheduler.schedule_job(&job, &mut snapshot).unwrap();

    // Default domains are per-machine, so three tasks land on three hosts.
    let mut machines: Vec<&str> = txn.placements().iter().map(|p| p.machine_id.as_str()).collect();
    machines.sort_unstable();
    machines.dedup();
    assert_eq!(machines.len(), 3);
}

#[test]
fn service_falls_back_when_domains_run_out() {
    let cell = cell();
    cell.add_machine(machine("m1", 16, 0, 32.0));
    cell.add_machine(machine("m2", 16, 0, 32.0));
    let mut scheduler = ServiceScheduler::new("svc", Arc::clone(&cell));
    // Both machines share one failure domain.
    scheduler.set_failure_domain("m1", "rack_a");
    scheduler.set_failure_domain("m2", "rack_a");

    let job = service_job(
        "j1",
        vec![task("t1", "j1", 2, 0, 4.0), task("t2", "j1", 2, 0, 4.0)],
    );
    cell.add_job(job.clone());

    let mut snapshot = cell.snapshot();
    let txn = scheduler.schedule_job(&job, &mut snapshot).unwrap();
    // Anti-affinity can't be honored; both tasks are still placed.
    assert_eq!(txn.len(), 2);
}

#[test]
fn service_prefers_gpu_machines_for_gpu_jobs() {
    let cell = cell();
    cell.add_machine(machine("m_plain", 32, 0, 64.0));
    cell.add_machine(machine("m_gpu", 8, 2, 16.0));
    let mut scheduler = ServiceScheduler::new("svc", Arc::clone(&cell));

    let job = service_job("j1", vec![task("t1", "j1", 2, 1, 4.0)]);
    cell.add_job(job.clone());

    let mut snapshot = cell.snapshot();
    let txn = scheduler.schedule_job(&job, &mut snapshot).unwrap();
    assert_eq!(placements_of(&txn), [("t1", "m_gpu")]);
}

#[test]
fn service_honors_task_constraints() {
    let cell = cell();
    cell.add_machine(machine("m_small", 4, 0, 8.0));
    cell.add_machine(machine("m_big", 32, 0, 64.0));
    let mut scheduler = ServiceScheduler::new("svc", Arc::clone(&cell));

    let constrained = task("t1", "j1", 2, 0, 4.0)
        .with_constraints(vec![Constraint::MinCpu(16), Constraint::MinMemory(32.0)]);
    let chosen = scheduler.select_machine(&constrained, &cell.snapshot()).unwrap();
    assert_eq!(chosen.id, "m_big");

    let gpu_needed = task("t2", "j1", 1, 0, 1.0).with_constraints(vec![Constraint::RequiresGpu(true)]);
    assert!(scheduler.select_machine(&gpu_needed, &cell.snapshot()).is_none());
}

#[test]
fn priority_scheduler_offers_preemption_placements() {
    //given: the only machine is saturated
    let cell = cell();
    cell.add_machine(machine("m1", 8, 0, 16.0));
    let hog = task("hog", "j0", 8, 0, 16.0);
    cell.add_job(batch_job("j0", vec![hog.clone()]));
    assert!(commit_single(&cell, &hog, "m1", 0).is_clean());

    let urgent = service_job("j1", vec![task("t1", "j1", 4, 0, 8.0)]);
    cell.add_job(urgent.clone());
    let mut scheduler = PriorityScheduler::new("prio", Arc::clone(&cell));

    //when: planning still names the machine, since its total capacity fits
    let mut snapshot = cell.snapshot();
    let txn = scheduler.schedule_job(&urgent, &mut snapshot).unwrap();
    assert_eq!(placements_of(&txn), [("t1", "m1")]);

    //then: the live fit check arbitrates and the retry loop gives up
    let outcome = scheduler.attempt_schedule(&urgent, 5, true);
    assert!(!outcome.is_scheduled());
    assert_eq!(scheduler.core().statistics().conflicts, 5);
}

#[test]
fn retry_loop_counts_partial_commits_as_success() {
    //given: t1 fits, t2 only as a preemption bet that must conflict
    let cell = cell();
    cell.add_machine(machine("m1", 8, 0, 16.0));
    let filler = task("filler", "j0", 6, 0, 12.0);
    cell.add_job(batch_job("j0", vec![filler.clone()]));
    assert!(commit_single(&cell, &filler, "m1", 0).is_clean());

    let job = service_job(
        "j1",
        vec![task("t1", "j1", 2, 0, 4.0), task("t2", "j1", 4, 0, 8.0)],
    );
    cell.add_job(job.clone());
    let mut scheduler = PriorityScheduler::new("prio", Arc::clone(&cell));

    //when
    let outcome = scheduler.attempt_schedule(&job, 5, true);

    //then
    match outcome {
        crate::scheduler::ScheduleOutcome::Scheduled { placed } => assert_eq!(placed, ["t1"]),
        crate::scheduler::ScheduleOutcome::Failed => panic!("partial commit should count"),
    }
    let stats = scheduler.core().statistics();
    assert_eq!(stats.jobs_scheduled, 1);
    assert_eq!(stats.tasks_scheduled, 1);
    assert_eq!(stats.conflicts, 1);
}

#[test]
fn attempt_schedule_accumulates_statistics() {
    let cell = cell();
    cell.add_machine(machine("m1", 8, 0, 16.0));
    let job = batch_job("j1", vec![task("t1", "j1", 2, 0, 4.0)]);
    cell.add_job(job.clone());
    let mut scheduler = BatchScheduler::new("batch", Arc::clone(&cell));

    assert!(scheduler.attempt_schedule(&job, 5, true).is_scheduled());

    let stats = scheduler.core().statistics();
    assert_eq!(stats.jobs_scheduled, 1);
    assert_eq!(stats.tasks_scheduled, 1);
    assert_eq!(stats.conflicts, 0);
    assert!(stats.total_decision_time > 0.0);
    assert!(stats.busy_time > 0.0);
}

#[test]
fn attempt_schedule_fails_when_nothing_fits() {
    let cell = cell();
    cell.add_machine(machine("m1", 2, 0, 4.0));
    let job = batch_job("j1", vec![task("t1", "j1", 16, 0, 64.0)]);
    cell.add_job(job.clone());
    let mut scheduler = BatchScheduler::new("batch", Arc::clone(&cell));

    assert!(!scheduler.attempt_schedule(&job, 5, true).is_scheduled());
    assert_eq!(scheduler.core().statistics().jobs_scheduled, 0);
}

#[test]
fn mapreduce_sizes_workers_from_idle_capacity() {
    let cell = cell();
    cell.add_machine(machine("m1", 8, 0, 16.0));
    cell.add_machine(machine("m2", 8, 0, 16.0));
    let scheduler = MapReduceScheduler::new("mr", Arc::clone(&cell), ScalingPolicy::MaxParallelism);

    // 16 idle cores / 2 per task and 32 GB / 4 GB both bound at 8.
    let job = batch_job("j1", vec![task("t1", "j1", 2, 0, 4.0)]);
    assert_eq!(scheduler.optimal_workers(&job, &cell.snapshot()), 8);

    // A zero-demand dimension is non-binding.
    let job = batch_job("j2", vec![task("t2", "j2", 0, 0, 4.0)]);
    assert_eq!(scheduler.optimal_workers(&job, &cell.snapshot()), 8);

    // Both demands zero: the 10x task-count cap is the only bound.
    let job = batch_job("j3", vec![task("t3", "j3", 0, 0, 0.0)]);
    assert_eq!(scheduler.optimal_workers(&job, &cell.snapshot()), 10);
}

#[test]
fn mapreduce_global_cap_scales_only_below_target() {
    let cell = cell();
    cell.add_machine(machine("m1", 8, 0, 16.0));
    let scheduler = MapReduceScheduler::new("mr", Arc::clone(&cell), ScalingPolicy::GlobalCap);

    let job = batch_job(
        "j1",
        vec![task("t1", "j1", 1, 0, 1.0), task("t2", "j1", 1, 0, 1.0)],
    );

    // Idle cluster: scale factor 1 + 0.6 * 5 = 4.
    assert_eq!(scheduler.optimal_workers(&job, &cell.snapshot()), 8);

    // Push utilization past the target; no opportunistic scaling.
    let hog = task("hog", "j0", 7, 0, 14.0);
    cell.add_job(batch_job("j0", vec![hog.clone()]));
    assert!(commit_single(&cell, &hog, "m1", 0).is_clean());
    assert_eq!(scheduler.optimal_workers(&job, &cell.snapshot()), 2);
}

#[test]
fn mapreduce_relative_job_size_caps_the_scale() {
    let cell = cell();
    for i in 0..8 {
        cell.add_machine(machine(&format!("m{i}"), 8, 0, 16.0));
    }
    let scheduler = MapReduceScheduler::new("mr", Arc::clone(&cell), ScalingPolicy::RelativeJobSize);

    // Capacity would allow 64 workers; the 4x job-size cap wins.
    let job = batch_job(
        "j1",
        vec![task("t1", "j1", 1, 0, 1.0), task("t2", "j1", 1, 0, 1.0)],
    );
    assert_eq!(scheduler.optimal_workers(&job, &cell.snapshot()), 8);
}

#[test]
fn mapreduce_prefers_freest_machines() {
    let cell = cell();
    cell.add_machine(machine("m_busy", 8, 0, 16.0));
    cell.add_machine(machine("m_idle", 8, 0, 16.0));
    let filler = task("filler", "j0", 6, 0, 12.0);
    cell.add_job(batch_job("j0", vec![filler.clone()]));
    assert!(commit_single(&cell, &filler, "m_busy", 0).is_clean());

    let mut scheduler = MapReduceScheduler::new("mr", Arc::clone(&cell), ScalingPolicy::MaxParallelism);
    let t = task("t1", "j1", 1, 0, 1.0);
    assert_eq!(scheduler.select_machine(&t, &cell.snapshot()).unwrap().id, "m_idle");
}
