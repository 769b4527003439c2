//! Event loop cycle benchmarks.
//!
//! Measures the cost of the pieces every cycle touches:
//! - Lane draining (ticks in snapshot batches, microtasks to exhaustion)
//! - Timer firing with and without cancellation tombstones
//! - Task polling through explicit wakes
//!
//! Run:
//!   cargo bench --bench cycle_bench

#![allow(missing_docs)]
#![allow(clippy::semicolon_if_nothing_returned)]

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use phaseloop::{EventLoop, Lane, VirtualClock};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// HELPERS
// =============================================================================

fn virtual_loop() -> EventLoop {
    EventLoop::builder()
        .clock(Arc::new(VirtualClock::new()))
        .build()
        .expect("default config is valid")
}

fn counter_callback(counter: &Rc<Cell<u64>>) -> impl FnOnce() -> phaseloop::CallbackResult + 'static {
    let counter = Rc::clone(counter);
    move || {
        counter.set(counter.get() + 1);
        Ok(())
    }
}

// =============================================================================
// LANES
// =============================================================================

fn bench_lanes(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle/lanes");

    for &count in &[64u64, 1_024, 8_192] {
        group.throughput(Throughput::Elements(count));
        for lane in [Lane::Tick, Lane::Microtask, Lane::Immediate] {
            group.bench_with_input(BenchmarkId::new(lane.name(), count), &count, |b, &count| {
                b.iter_batched(
                    || {
                        let event_loop = virtual_loop();
                        let counter = Rc::new(Cell::new(0));
                        for _ in 0..count {
                            event_loop.schedule(lane, counter_callback(&counter));
                        }
                        (event_loop, counter)
                    },
                    |(event_loop, counter)| {
                        event_loop.run_once().expect("callbacks succeed");
                        black_box(counter.get())
                    },
                    BatchSize::SmallInput,
                )
            });
        }
    }

    group.finish();
}

// =============================================================================
// TIMERS
// =============================================================================

fn bench_timers(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle/timers");

    for &count in &[256u64, 4_096] {
        group.throughput(Throughput::Elements(count));

        group.bench_with_input(BenchmarkId::new("fire_all_due", count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let event_loop = virtual_loop();
                    let counter = Rc::new(Cell::new(0));
                    for i in 0..count {
                        let delay = Duration::from_micros(i % 17);
                        event_loop.add_timer(delay, counter_callback(&counter));
                    }
                    (event_loop, counter)
                },
                |(event_loop, counter)| {
                    event_loop.run().expect("timers succeed");
                    black_box(counter.get())
                },
                BatchSize::SmallInput,
            )
        });

        // Half of the timers are cancelled before the loop runs, leaving
        // tombstones for the heap to skip or rebuild away.
        group.bench_with_input(BenchmarkId::new("half_cancelled", count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let event_loop = virtual_loop();
                    let counter = Rc::new(Cell::new(0));
                    let ids: Vec<_> = (0..count)
                        .map(|i| {
                            let delay = Duration::from_micros(i % 17);
                            event_loop.add_timer(delay, counter_callback(&counter))
                        })
                        .collect();
                    for id in ids.iter().step_by(2) {
                        event_loop.cancel_timer(*id);
                    }
                    (event_loop, counter)
                },
                |(event_loop, counter)| {
                    event_loop.run().expect("timers succeed");
                    black_box(counter.get())
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

// =============================================================================
// TASKS
// =============================================================================

fn bench_tasks(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle/tasks");

    for &count in &[64u64, 1_024] {
        group.throughput(Throughput::Elements(count * 4));
        group.bench_with_input(BenchmarkId::new("yield_four_times", count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let event_loop = virtual_loop();
                    for _ in 0..count {
                        event_loop.add_task(async {
                            for _ in 0..4 {
                                phaseloop::yield_now().await;
                            }
                            Ok(())
                        });
                    }
                    event_loop
                },
                |event_loop| {
                    event_loop.run().expect("tasks succeed");
                    black_box(event_loop.task_stats().completed)
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_lanes, bench_timers, bench_tasks);
criterion_main!(benches);
