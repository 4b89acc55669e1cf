//! The constant-slope ramping interval generator.

use crate::{Dir, IntervalGen, Motor, RunCommand, StepScale, TickItem, START_SETTLE_SECS};
use cells::Cell;
use std::sync::Arc;
use tracing::debug;

/// Full steps of margin added to the computed deceleration distance, so the
/// ramp-down always completes before the target rather than exactly on it.
const DECEL_MARGIN_STEPS: f64 = 5.0;

/// Generates step timings with constant-slope ramping.
///
/// The rate starts at `slow_tps` (full steps per second), accelerates by
/// `slope` steps/sec² up to `fast_tps`, and decelerates symmetrically when a
/// stop is requested, the direction must reverse, or (in goto mode) the
/// remaining distance drops below the computed ramp-down distance. Direction
/// only reverses once the rate is back down to `slow_tps`.
///
/// All three parameters are live cells, re-read whenever the owning motor
/// flags an update; in goto mode the deceleration distance is recomputed on
/// parameter changes and as the rate rises.
pub struct ConstAcc {
    motor: Motor,
    slow_tps: Arc<Cell<f64>>,
    fast_tps: Arc<Cell<f64>>,
    slope: Arc<Cell<f64>>,
    command: RunCommand,
    scale: StepScale,

    pos: i64,
    target: i64,
    dir: Option<Dir>,
    want_dir: Dir,

    // Parameter snapshot, refreshed on the motor's update flag.
    slow: f64,
    fast: f64,
    slope_v: f64,

    tps: f64,
    tick: f64,
    decel_usteps: f64,
    started: bool,
}

impl ConstAcc {
    pub fn new(
        motor: Arc<dyn crate::MotorView>,
        slow_tps: Arc<Cell<f64>>,
        fast_tps: Arc<Cell<f64>>,
        slope: Arc<Cell<f64>>,
        command: RunCommand,
        initial_pos: i64,
        scale: StepScale,
    ) -> ConstAcc {
        let start = slow_tps.get();
        ConstAcc {
            motor,
            slow_tps,
            fast_tps,
            slope,
            command,
            scale,
            pos: initial_pos,
            target: initial_pos,
            dir: None,
            want_dir: Dir::Fwd,
            slow: start,
            fast: start,
            slope_v: 1.0,
            tps: start,
            tick: 0.0,
            decel_usteps: 0.0,
            started: false,
        }
    }

    fn refresh(&mut self) {
        self.slow = self.slow_tps.get();
        self.fast = self.fast_tps.get();
        self.slope_v = self.slope.get();
        if self.command.is_goto() {
            self.target = self.motor.target_raw_pos();
        } else {
            self.want_dir = self.motor.target_dir();
        }
        self.tick = 1.0 / (self.tps * self.scale.factor as f64);
        self.recompute_decel();
        debug!(
            slow = self.slow,
            fast = self.fast,
            slope = self.slope_v,
            "ramp parameters refreshed"
        );
    }

    /// Distance from target (in raw units) at which deceleration must begin
    /// for the current rate.
    fn recompute_decel(&mut self) {
        let decel_time = (self.tps - self.slow) / self.slope_v;
        let average_tps = (self.tps + self.slow) / 2.0;
        let full_steps = average_tps * decel_time;
        self.decel_usteps = (full_steps + DECEL_MARGIN_STEPS) * self.scale.max_step_factor as f64;
    }

    fn step(&mut self) -> Option<TickItem> {
        let dir = self.dir.expect("direction committed before first step");
        self.pos += dir.sign() * self.scale.pos_delta;
        Some(TickItem::Step {
            interval: self.tick,
        })
    }

    fn decelerate_step(&mut self) -> Option<TickItem> {
        self.tps = (self.tps - self.slope_v * self.tick).max(self.slow);
        self.tick = 1.0 / (self.tps * self.scale.factor as f64);
        self.step()
    }
}

impl IntervalGen for ConstAcc {
    fn next_tick(&mut self) -> Option<TickItem> {
        if !self.motor.step_active() {
            // Stop requested: ramp back down to the start/stop rate, then end.
            if self.dir.is_some() && self.tps > self.slow {
                return self.decelerate_step();
            }
            return None;
        }

        if self.motor.take_param_update() || !self.started {
            self.started = true;
            self.refresh();
        }

        let offset = self.target - self.pos;
        let want = if self.command.is_goto() {
            match offset {
                0 => self.dir.unwrap_or(self.want_dir),
                o => Dir::from_sign(o),
            }
        } else {
            self.want_dir
        };
        let dir_mismatch = Some(want) != self.dir;
        let within_decel = self.command.is_goto() && (offset.abs() as f64) < self.decel_usteps;

        if dir_mismatch || within_decel {
            if self.tps > self.slow {
                return self.decelerate_step();
            }
            if dir_mismatch {
                let interval = if self.dir.is_none() {
                    START_SETTLE_SECS
                } else {
                    self.tick
                };
                self.dir = Some(want);
                debug!(dir = %want, "ramp direction set");
                return Some(TickItem::DirSet {
                    dir: want,
                    interval,
                });
            }
            // Right direction, at the slow rate: creep up to the target.
            if (offset.abs() as f64) < self.scale.pos_delta as f64 / 2.0 {
                return match self.command {
                    RunCommand::OneGoto => None,
                    _ => Some(TickItem::Idle),
                };
            }
            return self.step();
        }

        if self.tps < self.fast {
            self.tps = (self.tps + self.slope_v * self.tick).min(self.fast);
            self.tick = 1.0 / (self.tps * self.scale.factor as f64);
            let item = self.step();
            if self.command.is_goto() {
                self.recompute_decel();
            }
            return item;
        }

        // At full rate: cruise.
        self.step()
    }

    fn position(&self) -> i64 {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestMotor;
    use float_cmp::approx_eq;

    fn cellv(name: &str, v: f64) -> Arc<Cell<f64>> {
        Arc::new(Cell::new(name.to_string(), v))
    }

    fn ramp(
        motor: Arc<TestMotor>,
        command: RunCommand,
        initial_pos: i64,
        scale: StepScale,
        slow: f64,
        fast: f64,
        slope: f64,
    ) -> ConstAcc {
        ConstAcc::new(
            motor,
            cellv("slow_tps", slow),
            cellv("fast_tps", fast),
            cellv("slope", slope),
            command,
            initial_pos,
            scale,
        )
    }

    /// Collects step intervals until the generator ends or `limit` items.
    fn intervals(gen: &mut ConstAcc, limit: usize) -> Vec<f64> {
        let mut out = Vec::new();
        for _ in 0..limit {
            match gen.next_tick() {
                Some(TickItem::Step { interval }) => out.push(interval),
                Some(_) => {}
                None => break,
            }
        }
        out
    }

    #[test]
    fn ramp_accelerates_then_cruises() {
        let motor = TestMotor::new(0);
        let scale = StepScale::new(1, 1);
        let mut gen = ramp(motor, RunCommand::Run, 0, scale, 100.0, 1000.0, 500.0);

        match gen.next_tick() {
            Some(TickItem::DirSet { dir, interval }) => {
                assert_eq!(dir, Dir::Fwd);
                assert_eq!(interval, START_SETTLE_SECS);
            }
            other => panic!("expected DirSet, got {other:?}"),
        }
        let ticks = intervals(&mut gen, 4000);
        // Monotonically decreasing until the cruise rate is reached.
        let cruise = 1.0 / 1000.0;
        let mut reached = false;
        for window in ticks.windows(2) {
            if approx_eq!(f64, window[0], cruise, epsilon = 1e-12) {
                reached = true;
            }
            if !reached {
                assert!(window[1] < window[0], "intervals must shrink while ramping");
            } else {
                assert!(approx_eq!(f64, window[1], cruise, epsilon = 1e-12));
            }
        }
        assert!(reached, "must reach the fast rate");
        assert!(approx_eq!(f64, ticks[0], 1.0 / 105.0, epsilon = 1e-9));
    }

    #[test]
    fn acceleration_is_slope_bounded() {
        let motor = TestMotor::new(0);
        let scale = StepScale::new(1, 1);
        let slope = 500.0;
        let mut gen = ramp(motor.clone(), RunCommand::Run, 0, scale, 100.0, 1000.0, slope);
        gen.next_tick(); // DirSet
        let ticks = intervals(&mut gen, 2000);
        motor.stop();
        for window in ticks.windows(2) {
            let rate_delta = (1.0 / window[1] - 1.0 / window[0]).abs();
            let bound = slope * window[0].max(window[1]) + 1e-9;
            assert!(
                rate_delta <= bound,
                "rate jump {rate_delta} exceeds slope bound {bound}"
            );
        }
    }

    #[test]
    fn stop_ramps_back_down_to_slow() {
        let motor = TestMotor::new(0);
        let scale = StepScale::new(1, 1);
        let mut gen = ramp(motor.clone(), RunCommand::Run, 0, scale, 100.0, 1000.0, 500.0);
        gen.next_tick();
        // Ramp-up takes (1000-100)/500 = 1.8s; run well past it.
        let _ = intervals(&mut gen, 2500);

        motor.stop();
        let tail = intervals(&mut gen, 5000);
        assert!(!tail.is_empty());
        for window in tail.windows(2) {
            assert!(window[1] >= window[0], "intervals must grow while stopping");
        }
        let last = *tail.last().unwrap();
        assert!(approx_eq!(f64, last, 1.0 / 100.0, epsilon = 1e-9));
        assert_eq!(gen.next_tick(), None);
    }

    #[test]
    fn goto_decelerates_flips_once_and_settles_on_new_target() {
        let max_step_factor = 16u32;
        let motor = TestMotor::new(1000);
        let scale = StepScale::new(16, max_step_factor);
        let mut gen = ramp(
            motor.clone(),
            RunCommand::Goto,
            0,
            scale,
            100.0,
            1000.0,
            500.0,
        );

        let mut dirsets = Vec::new();
        let mut retargeted = false;
        let mut settled = 0;
        for _ in 0..500_000 {
            if !retargeted && gen.position() >= 400 {
                motor.retarget(-200);
                retargeted = true;
            }
            match gen.next_tick() {
                Some(TickItem::DirSet { dir, .. }) => dirsets.push(dir),
                Some(TickItem::Step { .. }) => {}
                Some(TickItem::Idle) => {
                    settled += 1;
                    if settled > 3 {
                        break;
                    }
                }
                None => panic!("goto keeps monitoring, must not end"),
            }
        }
        assert!(retargeted);
        assert_eq!(dirsets, vec![Dir::Fwd, Dir::Rev]);
        // Settled within one microstep of the new target.
        assert!((gen.position() - -200).abs() < scale.pos_delta);
    }

    #[test]
    fn equal_slow_and_fast_degenerates_to_constant_rate() {
        let motor = TestMotor::new(4000);
        let scale = StepScale::new(1, 1);
        let mut gen = ramp(
            motor.clone(),
            RunCommand::OneGoto,
            0,
            scale,
            250.0,
            250.0,
            500.0,
        );
        gen.next_tick();
        let ticks = intervals(&mut gen, 100_000);
        assert!(!ticks.is_empty());
        for tick in &ticks {
            assert!(approx_eq!(f64, *tick, 1.0 / 250.0, epsilon = 1e-12));
        }
        assert_eq!(gen.position(), 4000);
    }

    #[test]
    fn run_reversal_waits_for_slow_rate() {
        let motor = TestMotor::new(0);
        let scale = StepScale::new(1, 1);
        let mut gen = ramp(motor.clone(), RunCommand::Run, 0, scale, 100.0, 1000.0, 500.0);
        gen.next_tick();
        let _ = intervals(&mut gen, 2000); // at cruise now

        motor.reverse();
        let mut saw_dirset_at = None;
        let mut last_tick = 0.0f64;
        for n in 0..500_000 {
            match gen.next_tick() {
                Some(TickItem::Step { interval }) => last_tick = interval,
                Some(TickItem::DirSet { dir, interval }) => {
                    assert_eq!(dir, Dir::Rev);
                    // The reversal is issued at the slow rate's interval.
                    assert!(approx_eq!(f64, interval, 1.0 / 100.0, epsilon = 1e-9));
                    saw_dirset_at = Some(n);
                    break;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(saw_dirset_at.is_some());
        assert!(approx_eq!(f64, last_tick, 1.0 / 100.0, epsilon = 1e-9));
    }
}
