//! Benchmarks for lifecycle fan-out using criterion.
//!
//! Measures the overhead of driving N no-op workers through:
//! - run-to-completion start and stop
//! - fail-fast wait

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use convoy::{NoopObserver, Operation, RunnerConfig, ServiceRunner};
use convoy_testkit::{MockWorker, Script};

fn build_runner(services: usize) -> ServiceRunner {
    let mut runner =
        ServiceRunner::with_observer(RunnerConfig::new("bench"), Arc::new(NoopObserver));
    for idx in 0..services {
        let worker = MockWorker::new(format!("svc-{idx}"));
        runner
            .add(worker.name(), worker.handle())
            .expect("registration should succeed");
    }
    runner
}

/// Benchmark: start then stop every service.
fn bench_start_stop(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");

    let mut group = c.benchmark_group("start_stop");
    group.sample_size(20);

    for services in [1usize, 10, 100, 1_000] {
        group.throughput(Throughput::Elements(services as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(services),
            &services,
            |b, &services| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let mut total = Duration::ZERO;
                    for _ in 0..iters {
                        let runner = build_runner(services);
                        let started = Instant::now();
                        runner.start().await.expect("start should succeed");
                        runner.stop().await.expect("stop should succeed");
                        total += started.elapsed();
                    }
                    total
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: fail-fast wait where one service fails immediately and the
/// rest exit after a short delay.
fn bench_wait_fail_fast(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");

    let mut group = c.benchmark_group("wait_fail_fast");
    group.sample_size(20);

    for services in [10usize, 100] {
        group.throughput(Throughput::Elements(services as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(services),
            &services,
            |b, &services| {
                b.to_async(&rt).iter_custom(|iters| async move {
                    let mut total = Duration::ZERO;
                    for _ in 0..iters {
                        let mut runner = ServiceRunner::with_observer(
                            RunnerConfig::new("bench"),
                            Arc::new(NoopObserver),
                        );
                        for idx in 0..services {
                            let script = if idx == 0 {
                                Script::fail("crashed")
                            } else {
                                Script::ok().after_ms(5)
                            };
                            let worker =
                                MockWorker::new(format!("svc-{idx}")).on(Operation::Wait, script);
                            runner
                                .add(worker.name(), worker.handle())
                                .expect("registration should succeed");
                        }

                        let started = Instant::now();
                        runner
                            .wait()
                            .await
                            .expect_err("wait should report the crashed service");
                        total += started.elapsed();
                    }
                    total
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_start_stop, bench_wait_fail_fast);
criterion_main!(benches);
