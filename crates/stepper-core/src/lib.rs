//! # Stepper Core
//!
//! The step-timing engine for driving multiple stepper motors through a
//! DMA-capable GPIO daemon. High-level commands ("go to position P", "run in
//! direction D", "stop") become precisely timed GPIO edge streams, delivered
//! either by a software step loop (low rate, immediately responsive) or by
//! pre-computed DMA waveforms (high rate, microsecond-accurate).
//!
//! ## Structure
//!
//! - [`pins`]: named-value output pins, trigger pins, and microstep pin sets.
//! - [`driver`]: the [`driver::StepDriver`] capability set with chip
//!   (A4988/DRV8825-style) and direct (ULN2003-style) implementations.
//! - [`pulse`]: per-motor pulse synthesis, turning interval streams into
//!   `(on_mask, off_mask, microsecond)` records.
//! - [`motor`]: command lifecycle, mode machine, and the software step loop.
//! - [`group`]: the multi-motor pulse merger and DMA wave scheduler.
//! - [`config`]: JSON motor-set descriptors and group bootstrap.
//!
//! Motor state is shared through observable [`cells`], so front ends can
//! watch positions and modes and push parameter edits into running motors.

pub mod config;
pub mod driver;
pub mod error;
pub mod group;
pub mod motor;
pub mod pins;
pub mod pulse;

pub use config::{build_group, MotorSetConfig};
pub use error::{CommandError, ConfigError};
pub use group::{GroupMode, MotorGroup};
pub use motor::{Command, Dispatch, Motor, OpMode};
pub use pulse::{Action, PulseRecord};
