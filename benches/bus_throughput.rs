//! Event bus throughput benchmark.
//!
//! Measures post → deliver latency for batches of immediate messages and
//! the cost of expression evaluation used by rule conditions.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use exen_core::bus::{EventBus, MessageListener};
use exen_core::language::une::expr::Expression;
use exen_core::message::Message;
use exen_core::types::{BusConfig, Value};
use exen_core::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counter {
    seen: AtomicUsize,
}

impl MessageListener for Counter {
    fn on_message(&self, _message: &Message) -> Result<()> {
        self.seen.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn bench_post_deliver(c: &mut Criterion) {
    let bus = EventBus::new(BusConfig::default());
    let counter = Arc::new(Counter::default());
    bus.add(counter.clone());
    bus.start().unwrap();

    let batch_sizes: &[usize] = &[1, 64, 1024];
    let mut group = c.benchmark_group("post_deliver");
    for &size in batch_sizes {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &n| {
            b.iter(|| {
                let target = counter.seen.load(Ordering::Relaxed) + n;
                for i in 0..n {
                    bus.post(black_box(Message::device_changed("Temp", Value::Int(i as i64), true)))
                        .unwrap();
                }
                while counter.seen.load(Ordering::Relaxed) < target {
                    std::hint::spin_loop();
                }
            });
        });
    }
    group.finish();
    bus.stop();
}

fn bench_condition_eval(c: &mut Criterion) {
    let expr = Expression::parse("(Temp > 20 and Humidity < 60) or max(Temp, Floor) >= 30").unwrap();
    let mut vars = HashMap::new();
    vars.insert("Temp".to_string(), Value::Int(25));
    vars.insert("Humidity".to_string(), Value::Float(55.5));
    vars.insert("Floor".to_string(), Value::Int(18));

    c.bench_function("condition_eval", |b| {
        b.iter(|| expr.eval(black_box(&vars)).unwrap());
    });
}

criterion_group!(benches, bench_post_deliver, bench_condition_eval);
criterion_main!(benches);
