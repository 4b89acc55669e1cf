//! Error types for the pigpio daemon client.

use thiserror::Error;

/// Errors raised by daemon communication or reported by the daemon itself.
#[derive(Debug, Error)]
pub enum PigpioError {
    /// Socket-level failure talking to the daemon.
    #[error("pigpiod i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The daemon returned a negative status for a command.
    #[error("pigpiod rejected {cmd} with {name} ({code})")]
    Daemon {
        cmd: &'static str,
        code: i32,
        name: &'static str,
    },

    /// The daemon's reply did not match the request framing.
    #[error("pigpiod protocol error: {0}")]
    Protocol(String),
}

impl PigpioError {
    /// Builds a [`PigpioError::Daemon`] from a negative daemon status code.
    pub fn daemon(cmd: &'static str, code: i32) -> Self {
        PigpioError::Daemon {
            cmd,
            code,
            name: error_name(code),
        }
    }
}

/// Symbolic names for the daemon error codes this crate can provoke.
fn error_name(code: i32) -> &'static str {
    match code {
        -2 => "PI_BAD_USER_GPIO",
        -3 => "PI_BAD_GPIO",
        -4 => "PI_BAD_MODE",
        -5 => "PI_BAD_LEVEL",
        -8 => "PI_BAD_DUTYCYCLE",
        -33 => "PI_BAD_WAVE_MODE",
        -36 => "PI_TOO_MANY_PULSES",
        -46 => "PI_BAD_PULSELEN",
        -66 => "PI_BAD_WAVE_ID",
        -67 => "PI_TOO_MANY_CBS",
        -68 => "PI_TOO_MANY_OOL",
        -69 => "PI_EMPTY_WAVEFORM",
        -70 => "PI_NO_WAVEFORM_ID",
        _ => "PI_UNKNOWN",
    }
}
