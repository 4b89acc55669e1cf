//! # pigpio Daemon Client
//!
//! A blocking client for the pigpio daemon's socket interface, covering the
//! subset of the command set a stepper driver needs: pin mode/level writes,
//! PWM duty cycles, trigger pulses, and the DMA waveform family
//! (`wave_add_generic`, `wave_create_and_pad`, `wave_send_using_mode`,
//! `wave_tx_at`, `wave_delete`, and the size-limit queries).
//!
//! ## Key Components
//!
//! - **[`DmaEngine`]**: the capability trait the stepping engine is written
//!   against. The real daemon client implements it; test doubles can too.
//! - **[`client::PigpiodClient`]**: a `TcpStream`-backed implementation
//!   talking to `pigpiod` (default `127.0.0.1:8888`).
//! - **[`codec`]**: the daemon's 16-byte little-endian request/response
//!   framing and the 12-byte wave pulse encoding.

pub mod client;
pub mod codec;
pub mod commands;
pub mod error;

pub use client::PigpiodClient;
pub use error::PigpioError;

/// Identifier of a created waveform.
pub type WaveId = u32;

/// The id the daemon reports from `wave_tx_at` when no wave is transmitting.
pub const NO_WAVE: u32 = 9999;

/// One DMA pulse: bits to set, bits to clear, and the delay before the next
/// pulse takes effect, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavePulse {
    pub gpio_on: u32,
    pub gpio_off: u32,
    pub delay_us: u32,
}

impl WavePulse {
    pub fn new(gpio_on: u32, gpio_off: u32, delay_us: u32) -> Self {
        WavePulse {
            gpio_on,
            gpio_off,
            delay_us,
        }
    }
}

/// GPIO pin mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

/// Wave transmission mode for `wave_send_using_mode`.
///
/// `OneShotSync` chains a wave to begin the instant its predecessor ends,
/// which is what gives gap-free multi-wave step trains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    OneShot = 0,
    Repeat = 1,
    OneShotSync = 2,
    RepeatSync = 3,
}

/// The daemon capability the stepping engine consumes.
///
/// All access is process-local; a single connection is shared behind the
/// implementation. Wave calls are made only from the group scheduler thread;
/// pin calls may come from any thread.
pub trait DmaEngine: Send + Sync {
    fn set_mode(&self, gpio: u32, mode: PinMode) -> Result<(), PigpioError>;
    fn write(&self, gpio: u32, level: u8) -> Result<(), PigpioError>;
    fn set_pwm_dutycycle(&self, gpio: u32, duty: u8) -> Result<(), PigpioError>;
    /// Drives `gpio` to `level` for `pulse_us` microseconds, then reverts.
    fn gpio_trigger(&self, gpio: u32, pulse_us: u32, level: u8) -> Result<(), PigpioError>;

    fn wave_clear(&self) -> Result<(), PigpioError>;
    /// Adds pulses to the wave being built; returns the new total pulse count.
    fn wave_add_generic(&self, pulses: &[WavePulse]) -> Result<u32, PigpioError>;
    fn wave_create(&self) -> Result<WaveId, PigpioError>;
    /// Creates a wave padded to `percent` of the maximum resources, so a
    /// later same-size wave can reuse the freed control blocks.
    fn wave_create_and_pad(&self, percent: u32) -> Result<WaveId, PigpioError>;
    fn wave_send_using_mode(&self, wave: WaveId, mode: TxMode) -> Result<u32, PigpioError>;
    /// The wave currently being transmitted, or `None` when idle.
    fn wave_tx_at(&self) -> Result<Option<WaveId>, PigpioError>;
    fn wave_delete(&self, wave: WaveId) -> Result<(), PigpioError>;

    fn wave_get_micros(&self) -> Result<u32, PigpioError>;
    fn wave_get_cbs(&self) -> Result<u32, PigpioError>;
    fn wave_get_max_pulses(&self) -> Result<u32, PigpioError>;
    fn wave_get_max_micros(&self) -> Result<u32, PigpioError>;
    fn wave_get_max_cbs(&self) -> Result<u32, PigpioError>;
}
