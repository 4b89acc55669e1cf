//! # Step Interval Generators
//!
//! Lazy producers of step-to-step time intervals for stepper motors. A
//! generator is created for one run and pulled one tick at a time; on every
//! iteration it re-reads the live parameters it depends on (target position,
//! target direction, speed settings) when the owning motor has flagged a
//! change, so a running motor responds to edits without restarting.
//!
//! The generators work in their own time frame, so the same sequence can
//! drive a real-time software step loop or pre-compute DMA waveforms.
//!
//! Two generators are provided:
//!
//! - [`OneSpeed`]: a fixed step rate, direction-aware, with target tracking.
//! - [`ConstAcc`]: constant-slope ramping between a start/stop rate and a
//!   maximum rate, with symmetric acceleration and deceleration and
//!   ramped-down direction reversal.

use std::sync::Arc;

mod constacc;
mod onespeed;

pub use constacc::ConstAcc;
pub use onespeed::OneSpeed;

/// Settle interval used for the very first direction-pin write of a run, in
/// seconds. Subsequent direction changes restart at the generator's current
/// (slow) interval instead.
pub const START_SETTLE_SECS: f64 = 20e-6;

/// Motor direction, named after the conventional direction-pin values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dir {
    Fwd,
    Rev,
}

impl Dir {
    /// Position change sign: `+1` forward, `-1` reverse.
    pub fn sign(self) -> i64 {
        match self {
            Dir::Fwd => 1,
            Dir::Rev => -1,
        }
    }

    pub fn from_sign(sign: i64) -> Dir {
        if sign >= 0 {
            Dir::Fwd
        } else {
            Dir::Rev
        }
    }
}

impl std::fmt::Display for Dir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Dir::Fwd => "F",
            Dir::Rev => "R",
        })
    }
}

/// The command a generator is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCommand {
    /// Travel to the target position and keep monitoring it.
    Goto,
    /// Travel to the target position, then end the run.
    OneGoto,
    /// Run in the target direction until stopped.
    Run,
}

impl RunCommand {
    pub fn is_goto(self) -> bool {
        matches!(self, RunCommand::Goto | RunCommand::OneGoto)
    }
}

/// One item of a generator's output sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickItem {
    /// A direction change was committed; write the direction pin and wait
    /// `interval` seconds before the next step.
    DirSet { dir: Dir, interval: f64 },
    /// Issue one step after `interval` seconds.
    Step { interval: f64 },
    /// No step required; poll again after a short sleep. Emitted in goto mode
    /// at target while the generator keeps monitoring for target changes.
    Idle,
}

/// The generator's read-only view of its owning motor.
///
/// Generators hold this as a non-owning back-handle (the motor owns its
/// step-modes, which in turn create generators per run), so the borrow runs
/// through a trait rather than a cycle of owned references.
pub trait MotorView: Send + Sync {
    /// `false` ends the sequence; the generator winds down and returns `None`.
    fn step_active(&self) -> bool;
    /// Reads and clears the parameter-update flag.
    fn take_param_update(&self) -> bool;
    /// Target raw position (goto commands).
    fn target_raw_pos(&self) -> i64;
    /// Target direction (run commands).
    fn target_dir(&self) -> Dir;
}

/// A lazy, cancellable sequence of [`TickItem`]s.
///
/// `next_tick` never blocks; `None` means the run is over (the motor cleared
/// `step_active`, or a one-goto reached its target).
pub trait IntervalGen: Send {
    fn next_tick(&mut self) -> Option<TickItem>;

    /// The raw position after every step issued so far, tracked in units of
    /// the motor's maximum microstep factor.
    fn position(&self) -> i64;
}

/// Static geometry a generator needs from its motor: the active microstep
/// factor and the raw-position change per issued step.
#[derive(Debug, Clone, Copy)]
pub struct StepScale {
    /// Microsteps per full step at the active level (`F_active`).
    pub factor: u32,
    /// Raw position units moved per issued step (`max_step_factor / F_active`).
    pub pos_delta: i64,
    /// The motor's maximum microstep factor (raw units per full step).
    pub max_step_factor: u32,
}

impl StepScale {
    pub fn new(factor: u32, max_step_factor: u32) -> StepScale {
        StepScale {
            factor,
            pos_delta: (max_step_factor / factor) as i64,
            max_step_factor,
        }
    }
}

pub(crate) type Motor = Arc<dyn MotorView>;
