//! Command numbers for the pigpio daemon socket interface.
//!
//! Only the commands this crate actually issues are listed. The numbers are
//! fixed by the daemon's wire protocol.

/// A daemon command code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Cmd {
    /// Set a pin's mode (`set_mode`).
    Modes = 0,
    /// Write a pin's level (`write`).
    Write = 4,
    /// Set a pin's PWM duty cycle (`set_PWM_dutycycle`).
    Pwm = 5,
    /// Clear all waveforms (`wave_clear`).
    WvClr = 27,
    /// Add generic pulses to the wave being built (`wave_add_generic`).
    WvAg = 28,
    /// Wave micros query (`wave_get_micros` family; submode in p1).
    WvSm = 34,
    /// Wave pulses query (`wave_get_pulses` family; submode in p1).
    WvSp = 35,
    /// Wave control-block query (`wave_get_cbs` family; submode in p1).
    WvSc = 36,
    /// Trigger pulse on a pin (`gpio_trigger`).
    Trig = 37,
    /// Create a waveform from added pulses (`wave_create`).
    WvCre = 49,
    /// Delete a waveform (`wave_delete`).
    WvDel = 50,
    /// Transmit a waveform in a given mode (`wave_send_using_mode`).
    WvTxm = 100,
    /// Query the currently transmitting waveform (`wave_tx_at`).
    WvTat = 101,
    /// Create a waveform padded to a percentage of maximum size
    /// (`wave_create_and_pad`).
    WvCap = 118,
}

/// Submode selector for the `WvSm`/`WvSp`/`WvSc` size queries: current value.
pub const SUBCMD_CURRENT: u32 = 0;
/// Submode selector for the `WvSm`/`WvSp`/`WvSc` size queries: hardware maximum.
pub const SUBCMD_MAX: u32 = 2;
