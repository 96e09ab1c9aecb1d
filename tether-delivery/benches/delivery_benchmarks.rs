//! Benchmarks for the delivery ledger
//!
//! Every transition takes the coordinator mutex, so these measure how much
//! time a send spends inside it:
//! - the happy path (`mark_sending` then `mark_sent`)
//! - a failed send (`mark_sending` then `mark_pending`)
//! - a retry sweep over pending messages of varying size
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{hint::black_box, sync::Arc};

use async_trait::async_trait;
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tether_common::{MessageId, Payload, TelemetryCounters, UserId};
use tether_delivery::{DeliveryConfig, DeliveryError, MessageDeliveryCoordinator, SendCallback};

struct Accepting;

#[async_trait]
impl SendCallback for Accepting {
    async fn send(
        &self,
        _user_id: &UserId,
        _payload: &Payload,
        _retry: bool,
    ) -> Result<bool, DeliveryError> {
        Ok(true)
    }
}

fn coordinator() -> MessageDeliveryCoordinator {
    MessageDeliveryCoordinator::new(DeliveryConfig::default(), Arc::new(TelemetryCounters::new()))
}

fn payload() -> Payload {
    Arc::new(serde_json::json!({
        "type": "agent_message",
        "text": "The quick brown fox jumps over the lazy dog",
    }))
}

fn bench_transitions(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_transitions");
    let coordinator = coordinator();
    let user = UserId::from("bench-user");
    let payload = payload();

    group.bench_function("sending_then_sent", |b| {
        b.iter(|| {
            let id = MessageId::generate();
            coordinator.mark_sending(id.clone(), user.clone(), payload.clone());
            coordinator.mark_sent(black_box(&id));
        });
    });

    group.bench_function("sending_then_pending", |b| {
        b.iter(|| {
            let id = MessageId::generate();
            coordinator.mark_sending(id.clone(), user.clone(), payload.clone());
            coordinator.mark_pending(black_box(id), user.clone(), payload.clone());
        });
    });

    group.finish();
}

fn bench_retry_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_sweep");
    let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");
    let user = UserId::from("bench-user");

    for count in [10_usize, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.to_async(&runtime).iter_batched(
                || {
                    let coordinator = coordinator();
                    for _ in 0..count {
                        let id = MessageId::generate();
                        coordinator.mark_sending(id.clone(), user.clone(), payload());
                        coordinator.mark_pending(id, user.clone(), payload());
                    }
                    coordinator
                },
                |coordinator| async move {
                    black_box(coordinator.retry_pending(&Accepting).await)
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_transitions, bench_retry_sweep);
criterion_main!(benches);
