//! The single-rate interval generator.

use crate::{Dir, IntervalGen, Motor, RunCommand, StepScale, TickItem, START_SETTLE_SECS};
use cells::Cell;
use std::sync::Arc;
use tracing::debug;

/// A very basic generator: every step uses the same interval, derived from a
/// live `steprate` parameter (full steps per second).
///
/// In goto mode the generator tracks the motor's target position and flips
/// direction when the target moves behind the current position; in run mode
/// it follows the motor's target-direction cell. Rate and target changes are
/// picked up whenever the motor's update flag is set.
pub struct OneSpeed {
    motor: Motor,
    steprate: Arc<Cell<f64>>,
    command: RunCommand,
    scale: StepScale,
    pos: i64,
    target: i64,
    dir: Option<Dir>,
    tick: f64,
    started: bool,
}

impl OneSpeed {
    pub fn new(
        motor: Arc<dyn crate::MotorView>,
        steprate: Arc<Cell<f64>>,
        command: RunCommand,
        initial_pos: i64,
        scale: StepScale,
    ) -> OneSpeed {
        OneSpeed {
            motor,
            steprate,
            command,
            scale,
            pos: initial_pos,
            target: initial_pos,
            dir: None,
            tick: 0.0,
            started: false,
        }
    }

    /// Re-reads the live parameters; returns a direction change to emit, if
    /// one was committed.
    fn refresh(&mut self) -> Option<TickItem> {
        let rate = self.steprate.get();
        self.tick = 1.0 / (rate * self.scale.factor as f64);
        let new_dir = if self.command.is_goto() {
            self.target = self.motor.target_raw_pos();
            match self.target - self.pos {
                0 => self.dir.unwrap_or(Dir::Fwd),
                offset => Dir::from_sign(offset),
            }
        } else {
            self.motor.target_dir()
        };
        if Some(new_dir) != self.dir {
            let interval = if self.dir.is_none() {
                START_SETTLE_SECS
            } else {
                self.tick
            };
            self.dir = Some(new_dir);
            debug!(dir = %new_dir, tick = self.tick, "onespeed direction set");
            return Some(TickItem::DirSet {
                dir: new_dir,
                interval,
            });
        }
        None
    }
}

impl IntervalGen for OneSpeed {
    fn next_tick(&mut self) -> Option<TickItem> {
        if !self.motor.step_active() {
            return None;
        }
        if self.motor.take_param_update() || !self.started {
            self.started = true;
            if let Some(dirset) = self.refresh() {
                return Some(dirset);
            }
        }
        let dir = self.dir.expect("direction committed before first step");
        if self.command.is_goto() {
            let remaining = self.target - self.pos;
            if remaining.abs() < self.scale.pos_delta {
                // At target (to within one step at this level).
                return match self.command {
                    RunCommand::OneGoto => None,
                    _ => Some(TickItem::Idle),
                };
            }
        }
        self.pos += dir.sign() * self.scale.pos_delta;
        Some(TickItem::Step {
            interval: self.tick,
        })
    }

    fn position(&self) -> i64 {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestMotor;
    use std::sync::atomic::Ordering;

    fn rate_cell(rate: f64) -> Arc<Cell<f64>> {
        Arc::new(Cell::new("steprate", rate))
    }

    #[test]
    fn goto_steps_to_target_with_exact_ticks() {
        let motor = TestMotor::new(256);
        // max factor 16, running at factor 2: 8 raw units per step.
        let scale = StepScale::new(2, 16);
        let mut gen = OneSpeed::new(motor.clone(), rate_cell(100.0), RunCommand::OneGoto, 0, scale);

        match gen.next_tick() {
            Some(TickItem::DirSet { dir, interval }) => {
                assert_eq!(dir, Dir::Fwd);
                assert_eq!(interval, START_SETTLE_SECS);
            }
            other => panic!("expected DirSet, got {other:?}"),
        }
        let expected_tick = 1.0 / (100.0 * 2.0);
        let mut steps = 0;
        while let Some(item) = gen.next_tick() {
            match item {
                TickItem::Step { interval } => {
                    assert_eq!(interval, expected_tick);
                    steps += 1;
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(steps, 32); // 256 / (16/2)
        assert_eq!(gen.position(), 256);
    }

    #[test]
    fn goto_idles_at_target_and_resumes_on_retarget() {
        let motor = TestMotor::new(16);
        let scale = StepScale::new(1, 16);
        let mut gen = OneSpeed::new(motor.clone(), rate_cell(50.0), RunCommand::Goto, 0, scale);

        assert!(matches!(gen.next_tick(), Some(TickItem::DirSet { .. })));
        assert!(matches!(gen.next_tick(), Some(TickItem::Step { .. })));
        assert!(matches!(gen.next_tick(), Some(TickItem::Idle)));
        assert!(matches!(gen.next_tick(), Some(TickItem::Idle)));

        // Move the target behind us: a single DirSet, then steps again.
        motor.retarget(-16);
        match gen.next_tick() {
            Some(TickItem::DirSet { dir, interval }) => {
                assert_eq!(dir, Dir::Rev);
                assert_eq!(interval, 1.0 / 50.0);
            }
            other => panic!("expected DirSet, got {other:?}"),
        }
        assert!(matches!(gen.next_tick(), Some(TickItem::Step { .. })));
        assert_eq!(gen.position(), 0);
    }

    #[test]
    fn run_follows_target_dir_and_stop_flag() {
        let motor = TestMotor::new(0);
        let scale = StepScale::new(4, 16);
        let mut gen = OneSpeed::new(motor.clone(), rate_cell(200.0), RunCommand::Run, 0, scale);

        assert!(matches!(gen.next_tick(), Some(TickItem::DirSet { .. })));
        for _ in 0..10 {
            assert!(matches!(gen.next_tick(), Some(TickItem::Step { .. })));
        }
        assert_eq!(gen.position(), 40);

        motor.active.store(false, Ordering::SeqCst);
        assert_eq!(gen.next_tick(), None);
    }

    #[test]
    fn rate_change_applies_on_update_flag_only() {
        let motor = TestMotor::new(0);
        let scale = StepScale::new(1, 1);
        let rate = rate_cell(100.0);
        let mut gen = OneSpeed::new(motor.clone(), rate.clone(), RunCommand::Run, 0, scale);

        assert!(matches!(gen.next_tick(), Some(TickItem::DirSet { .. })));
        assert_eq!(
            gen.next_tick(),
            Some(TickItem::Step { interval: 0.01 })
        );

        // A cell edit without the flag is not picked up yet.
        rate.set(1000.0, cells::Agent::User).unwrap();
        assert_eq!(
            gen.next_tick(),
            Some(TickItem::Step { interval: 0.01 })
        );

        motor.update.store(true, Ordering::SeqCst);
        assert_eq!(
            gen.next_tick(),
            Some(TickItem::Step { interval: 0.001 })
        );
    }
}
