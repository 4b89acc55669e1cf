//! Error types for the stepping engine.
//!
//! Three kinds are distinguished: configuration errors are fatal at startup,
//! command (precondition) errors leave motor state untouched, and engine
//! (I/O) errors abort the affected run.

use crate::motor::OpMode;
use pigpiod_client::PigpioError;
use thiserror::Error;

/// A problem in the motor-set description, reported before any motor starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("motor set could not be parsed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("motor {motor}: microstep level {level:?} is not in the microstep table")]
    UnknownUstepLevel { motor: String, level: String },

    #[error("motor {motor}: microstep level {level:?} has {got} pin values for {want} pins")]
    UstepTableMismatch {
        motor: String,
        level: String,
        got: usize,
        want: usize,
    },

    #[error("motor {motor}: microstep table is empty")]
    EmptyUstepTable { motor: String },

    #[error("motor {motor}: step mode {mode}: slow_tps {slow} exceeds fast_tps {fast}")]
    RampRates {
        motor: String,
        mode: String,
        slow: f64,
        fast: f64,
    },

    #[error("motor {motor}: step mode {mode}: {field} must be positive")]
    NonPositive {
        motor: String,
        mode: String,
        field: &'static str,
    },

    #[error("pin {pin}: close value {value:?} is not in the pin's vocabulary")]
    BadCloseValue { pin: String, value: String },

    #[error(transparent)]
    Engine(#[from] PigpioError),
}

/// A command issued against the wrong state, or an engine failure while
/// carrying one out.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("motor {0} is closed")]
    Closed(String),

    #[error("motor {motor} must be stopped for {command} (currently {mode})")]
    NotStopped {
        motor: String,
        command: &'static str,
        mode: OpMode,
    },

    #[error("motor {motor}: unknown step mode {mode:?}")]
    UnknownStepMode { motor: String, mode: String },

    #[error("unknown motor {0:?}")]
    UnknownMotor(String),

    #[error("motor group is closed")]
    GroupClosed,

    #[error("fast stepping already active")]
    GroupBusy,

    #[error(transparent)]
    Engine(#[from] PigpioError),
}
