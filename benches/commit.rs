use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use omega_sim::{CellState, Job, JobType, Machine, Task, Transaction};

fn populated_cell(machines: usize, tasks: usize) -> (Arc<CellState>, Vec<Task>) {
    let cell = Arc::new(CellState::new());
    for i in 0..machines {
        cell.add_machine(Machine::new(format!("machine_{i}"), 64, 0, 256.0));
    }
    let mut all_tasks = Vec::with_capacity(tasks);
    for i in 0..tasks {
        let task = Task::new(format!("t{i}"), format!("j{i}"), 1, 0, 1.0, 60.0, 0);
        cell.add_job(Job::new(
            format!("j{i}"),
            vec![task.clone()],
            JobType::Batch,
            0.0,
            0,
        ));
        all_tasks.push(task);
    }
    (cell, all_tasks)
}

fn bench_snapshot(c: &mut Criterion) {
    let (cell, _) = populated_cell(100, 1000);
    c.bench_function("snapshot_100_machines", |b| b.iter(|| cell.snapshot()));
}

fn bench_commit(c: &mut Criterion) {
    c.bench_function("commit_single_placement", |b| {
        b.iter_batched(
            || populated_cell(100, 1),
            |(cell, tasks)| {
                let snapshot = cell.snapshot();
                let machine = snapshot.machines.values().next().unwrap();
                let mut txn = Transaction::new("bench");
                txn.add_placement(tasks[0].clone(), &machine.id, machine.version);
                cell.commit_transaction(txn, true)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_contended_commits(c: &mut Criterion) {
    c.bench_function("contended_commits_4_threads", |b| {
        b.iter_batched(
            || populated_cell(16, 256),
            |(cell, tasks)| {
                std::thread::scope(|scope| {
                    for chunk in tasks.chunks(64) {
                        let cell = Arc::clone(&cell);
                        scope.spawn(move || {
                            for task in chunk {
                                for _ in 0..4 {
                                    let snapshot = cell.snapshot();
                                    let target = match snapshot
                                        .machines
                                        .values()
                                        .find(|m| m.can_fit(task.cpu_req, task.gpu_req, task.memory_req))
                                    {
                                        Some(m) => m,
                                        None => break,
                                    };
                                    let mut txn = Transaction::new("bench");
                                    txn.add_placement(task.clone(), &target.id, target.version);
                                    if cell.commit_transaction(txn, true).is_clean() {
                                        break;
                                    }
                                }
                            }
                        });
                    }
                });
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_snapshot, bench_commit, bench_contended_commits);
criterion_main!(benches);
