//! Benchmarks the ramped interval generator's per-tick cost, which bounds how
//! fast DMA waveforms can be prepared ahead of the hardware.

use cells::Cell;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use stepgen::{ConstAcc, Dir, IntervalGen, MotorView, RunCommand, StepScale};

struct BenchMotor {
    active: AtomicBool,
    update: AtomicBool,
    target: AtomicI64,
}

impl MotorView for BenchMotor {
    fn step_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
    fn take_param_update(&self) -> bool {
        self.update.swap(false, Ordering::Relaxed)
    }
    fn target_raw_pos(&self) -> i64 {
        self.target.load(Ordering::Relaxed)
    }
    fn target_dir(&self) -> Dir {
        Dir::Fwd
    }
}

fn ramp_to_target(c: &mut Criterion) {
    c.bench_function("constacc goto 100k usteps", |b| {
        b.iter(|| {
            let motor = Arc::new(BenchMotor {
                active: AtomicBool::new(true),
                update: AtomicBool::new(false),
                target: AtomicI64::new(100_000),
            });
            let mut gen = ConstAcc::new(
                motor,
                Arc::new(Cell::new("slow_tps", 100.0)),
                Arc::new(Cell::new("fast_tps", 2000.0)),
                Arc::new(Cell::new("slope", 1000.0)),
                RunCommand::OneGoto,
                0,
                StepScale::new(16, 16),
            );
            let mut ticks = 0u64;
            while let Some(item) = gen.next_tick() {
                black_box(item);
                ticks += 1;
            }
            black_box(ticks)
        })
    });
}

criterion_group!(benches, ramp_to_target);
criterion_main!(benches);
