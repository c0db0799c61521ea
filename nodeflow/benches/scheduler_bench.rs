//! Benchmarks for the scheduling loop.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nodeflow::config::ManagerSettings;
use nodeflow::manager::TaskManager;
use nodeflow::pipeline::{StageDescriptor, StageTable};
use nodeflow::testing::{numbered_nodes, NodeOutcome, ScriptedPipeline, StageScript};

fn table() -> StageTable {
    StageTable::new()
        .stage(StageDescriptor::new("set_boot"))
        .fallback(vec![
            StageDescriptor::new("deploy_tree"),
            StageDescriptor::new("deploy_chain"),
        ])
        .stage(StageDescriptor::new("reboot"))
}

fn scheduler_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let failing: Vec<String> = (1..=200).step_by(7).map(|i| format!("n{i:02}")).collect();
    let failing: Vec<&str> = failing.iter().map(String::as_str).collect();

    c.bench_function("200 nodes, 3 stages", |b| {
        b.iter(|| {
            let pipeline = ScriptedPipeline::builder("deploy")
                .script(
                    "deploy_tree",
                    StageScript::new().nodes(&failing, &[NodeOutcome::Fail]),
                )
                .build();
            let manager = TaskManager::builder(pipeline, numbered_nodes("n", 200), table())
                .with_settings(ManagerSettings {
                    watchdog_interval_ms: 50,
                    kill_grace_ms: 50,
                })
                .build()
                .unwrap();
            let report = runtime.block_on(manager.run()).unwrap();
            black_box(report.total())
        })
    });
}

criterion_group!(benches, scheduler_benchmark);
criterion_main!(benches);
