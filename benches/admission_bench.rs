//! Benchmarks for the admission scheduler.
//!
//! Benchmarks cover:
//! - Pending queue ordering (priority then FIFO)
//! - Minimal victim-set search over growing candidate lists
//! - End-to-end submission through the scheduler

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;

use prometheus_admission::builders::SchedulerBuilder;
use prometheus_admission::config::{
    ClusterConfig, FlavorConfig, FlavorQuotaConfig, QueuePoolConfig, RetryConfig, SchedulerConfig,
};
use prometheus_admission::core::preemption::{select_victims, Preemptor};
use prometheus_admission::core::{
    Candidate, JobSpec, JobType, PendingEntry, PendingQueue, PriorityTable, ResourceLedger,
    ResourceRequest,
};
use prometheus_admission::infra::{InMemoryPendingQueue, InMemorySubstrate};
use prometheus_admission::util::serde::{PriorityClass, ResourceVector};

use tokio::runtime::Runtime;

// ============================================================================
// Fixtures
// ============================================================================

fn gpus(n: u64) -> ResourceVector {
    ResourceVector::new(n, 0, 0)
}

fn cluster(nominal: u64) -> ClusterConfig {
    ClusterConfig::new("c1")
        .with_flavor(FlavorConfig::gpu("a100", "a100"))
        .with_pool(QueuePoolConfig::new("p").with_flavor(FlavorQuotaConfig::new("a100", gpus(nominal))))
}

fn entry(i: u64) -> PendingEntry {
    PendingEntry {
        job_id: uuid::Uuid::new_v4(),
        pool: "p".into(),
        priority: PriorityClass::ALL[(i % 4) as usize],
        submitted_at_ms: u128::from(i),
    }
}

fn candidates(n: u64) -> Vec<Candidate> {
    let table = PriorityTable::default();
    (0..n)
        .map(|i| {
            let priority = if i % 3 == 0 { PriorityClass::Low } else { PriorityClass::Normal };
            Candidate {
                job_id: uuid::Uuid::new_v4(),
                pool: "p".into(),
                flavor: "a100".into(),
                usage: gpus(1 + i % 4),
                borrowed: ResourceVector::ZERO,
                priority,
                priority_value: table.value(priority),
                preemptible: true,
                admitted_at_ms: u128::from(i),
            }
        })
        .collect()
}

// ============================================================================
// Queue Benchmarks
// ============================================================================

fn bench_pending_queue_ordering(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending_queue_ordering");

    for size in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut queue = InMemoryPendingQueue::new();
                for i in 0..size {
                    queue.enqueue(entry(i));
                }
                black_box(queue.ordered());
            });
        });
    }

    group.finish();
}

// ============================================================================
// Preemption Benchmarks
// ============================================================================

fn bench_victim_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("victim_search");
    let table = PriorityTable::default();

    for size in [8u64, 64, 512] {
        let list = candidates(size);
        let total: u64 = list.iter().map(|c| c.usage.gpu).sum();
        let ledger = ResourceLedger::from_config(&cluster(total)).expect("ledger");
        {
            let mut usage = ledger.lock_pool("p").expect("pool");
            for c in &list {
                usage.charge(&c.pool, &c.flavor, &c.usage).expect("charge");
            }
        }
        let request = ResourceRequest::gpus("a100", 6);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            let usage = ledger.lock_pool("p").expect("pool");
            let who = Preemptor {
                job_id: uuid::Uuid::new_v4(),
                pool: "p",
                resources: &request,
                priority_value: table.value(PriorityClass::Critical),
                can_preempt: true,
            };
            b.iter(|| black_box(select_victims(&usage, &who, &list)));
        });
    }

    group.finish();
}

// ============================================================================
// End-to-End Benchmarks
// ============================================================================

fn bench_submit(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("submit");
    group.sample_size(20);

    for jobs in [10u64, 100] {
        group.throughput(Throughput::Elements(jobs));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &jobs, |b, &jobs| {
            b.to_async(&rt).iter(|| async move {
                let config = SchedulerConfig::new(cluster(jobs / 2))
                    .with_fallback_pool("p")
                    .with_retry(RetryConfig {
                        substrate_backoff_ms: 1,
                        substrate_max_backoff_ms: 2,
                        ..RetryConfig::default()
                    });
                let scheduler = SchedulerBuilder::new(config)
                    .with_substrate("c1", Arc::new(InMemorySubstrate::new()))
                    .build()
                    .expect("scheduler");
                for i in 0..jobs {
                    let priority = PriorityClass::ALL[(i % 4) as usize];
                    let spec = JobSpec::new(format!("job-{i}"), "bench", JobType::Batch, ResourceRequest::gpus("a100", 1))
                        .with_priority(priority);
                    black_box(scheduler.submit(spec, None).await.expect("submit"));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(queue_benches, bench_pending_queue_ordering);
criterion_group!(preemption_benches, bench_victim_search);
criterion_group!(scenario_benches, bench_submit);

criterion_main!(queue_benches, preemption_benches, scenario_benches);
