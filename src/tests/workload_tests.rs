use crate::types::JobType;
use crate::workload::WorkloadGenerator;

#[test]
fn same_seed_reproduces_the_workload() {
    let jobs_a = WorkloadGenerator::new(42).generate_workload(500.0, 0.8);
    let jobs_b = WorkloadGenerator::new(42).generate_workload(500.0, 0.8);

    assert_eq!(jobs_a.len(), jobs_b.len());
    for (a, b) in jobs_a.iter().zip(&jobs_b) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.job_type, b.job_type);
        assert_eq!(a.submit_time, b.submit_time);
        assert_eq!(a.tasks.len(), b.tasks.len());
    }
}

#[test]
fn jobs_are_well_formed() {
    let jobs = WorkloadGenerator::new(1).generate_workload(2000.0, 0.8);
    assert!(!jobs.is_empty());

    let mut last_submit = 0.0;
    for job in &jobs {
        assert!(job.submit_time >= last_submit);
        last_submit = job.submit_time;
        assert!(!job.tasks.is_empty());
        assert!(job.tasks.len() <= 1000);
        for task in &job.tasks {
            assert_eq!(task.job_id, job.id);
            assert!(task.cpu_req >= 1);
            assert!(task.memory_req >= 0.5);
            assert!(task.duration >= 1.0);
            assert!(task.assigned_machine.is_none());
        }
        if job.gang_schedule {
            assert_eq!(job.job_type, JobType::Service);
        }
    }
}

#[test]
fn batch_ratio_one_yields_only_batch_jobs() {
    let jobs = WorkloadGenerator::new(3).generate_workload(1000.0, 1.0);
    assert!(jobs.iter().all(|j| j.job_type == JobType::Batch));
}

#[test]
fn homogeneous_clusters_use_one_shape() {
    let machines = WorkloadGenerator::new(42).generate_cluster(10, false);
    assert_eq!(machines.len(), 10);
    for m in &machines {
        assert_eq!((m.cpu_cores, m.gpu_count, m.memory_gb), (8, 0, 16.0));
        assert_eq!(m.version, 0);
        assert!(m.tasks.is_empty());
    }
}

#[test]
fn heterogeneous_clusters_mix_known_shapes() {
    let machines = WorkloadGenerator::new(42).generate_cluster(200, true);
    let known = [(8, 0, 16.0), (16, 0, 32.0), (8, 2, 32.0), (32, 0, 128.0)];
    for m in &machines {
        assert!(known.contains(&(m.cpu_cores, m.gpu_count, m.memory_gb)));
    }
    // A cluster this large draws more than one shape.
    let distinct: hashbrown::HashSet<_> =
        machines.iter().map(|m| (m.cpu_cores, m.gpu_count)).collect();
    assert!(distinct.len() > 1);
}
