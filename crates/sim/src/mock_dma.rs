//! The simulated DMA engine.

use parking_lot::Mutex;
use pigpiod_client::{DmaEngine, PigpioError, PinMode, TxMode, WaveId, WavePulse};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Plausible hardware limits, mirroring a stock pigpio daemon.
const MAX_PULSES: u32 = 12_000;
const MAX_MICROS: u32 = 1_800_000_000;
const MAX_CBS: u32 = 25_016;

#[derive(Debug, Default)]
struct MockState {
    pin_modes: BTreeMap<u32, PinMode>,
    pin_levels: BTreeMap<u32, u8>,
    pwm_duties: BTreeMap<u32, u8>,
    /// `(gpio, pulse_us, level)` per trigger call.
    triggers: Vec<(u32, u32, u8)>,

    building: Vec<WavePulse>,
    /// Live waves (created, not yet deleted).
    waves: BTreeMap<WaveId, Vec<WavePulse>>,
    /// Every wave ever created, surviving deletion, for trace capture.
    archive: BTreeMap<WaveId, Vec<WavePulse>>,
    next_wave_id: WaveId,
    /// Waves in submission order.
    submitted: Vec<WaveId>,
    deleted: Vec<WaveId>,
    /// `wave_tx_at` call count; each poll advances the simulated execution
    /// by one wave.
    polls: usize,
    in_flight: usize,
    max_in_flight: usize,
    /// When set, `wave_create_and_pad` fails once this many waves exist.
    fail_create_at: Option<usize>,
}

/// A recording [`DmaEngine`] double.
///
/// Wave completion is modelled deterministically: the `n`-th call to
/// `wave_tx_at` reports the `n`-th submitted wave as executing (so every
/// earlier wave has completed), and reports idle once polls outrun
/// submissions. One poll therefore retires exactly one wave, which keeps
/// pipeline tests independent of real time.
#[derive(Default)]
pub struct MockDma {
    state: Mutex<MockState>,
}

impl MockDma {
    pub fn new() -> Arc<MockDma> {
        Arc::new(MockDma::default())
    }

    /// Makes `wave_create_and_pad` fail once `count` waves have been created.
    pub fn fail_create_at(&self, count: usize) {
        self.state.lock().fail_create_at = Some(count);
    }

    pub fn pin_level(&self, gpio: u32) -> Option<u8> {
        self.state.lock().pin_levels.get(&gpio).copied()
    }

    pub fn pin_mode(&self, gpio: u32) -> Option<PinMode> {
        self.state.lock().pin_modes.get(&gpio).copied()
    }

    pub fn pwm_duty(&self, gpio: u32) -> Option<u8> {
        self.state.lock().pwm_duties.get(&gpio).copied()
    }

    pub fn triggers(&self) -> Vec<(u32, u32, u8)> {
        self.state.lock().triggers.clone()
    }

    /// Submitted waves in dispatch order, with their pulses.
    pub fn submitted_waves(&self) -> Vec<(WaveId, Vec<WavePulse>)> {
        let state = self.state.lock();
        state
            .submitted
            .iter()
            .map(|id| (*id, state.archive.get(id).cloned().unwrap_or_default()))
            .collect()
    }

    pub fn deleted_waves(&self) -> Vec<WaveId> {
        self.state.lock().deleted.clone()
    }

    /// The largest number of waves that were in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    /// Every pulse of every submitted wave, concatenated in dispatch order.
    pub fn all_pulses(&self) -> Vec<WavePulse> {
        self.submitted_waves()
            .into_iter()
            .flat_map(|(_, pulses)| pulses)
            .collect()
    }
}

impl DmaEngine for MockDma {
    fn set_mode(&self, gpio: u32, mode: PinMode) -> Result<(), PigpioError> {
        self.state.lock().pin_modes.insert(gpio, mode);
        Ok(())
    }

    fn write(&self, gpio: u32, level: u8) -> Result<(), PigpioError> {
        self.state.lock().pin_levels.insert(gpio, level);
        Ok(())
    }

    fn set_pwm_dutycycle(&self, gpio: u32, duty: u8) -> Result<(), PigpioError> {
        self.state.lock().pwm_duties.insert(gpio, duty);
        Ok(())
    }

    fn gpio_trigger(&self, gpio: u32, pulse_us: u32, level: u8) -> Result<(), PigpioError> {
        self.state.lock().triggers.push((gpio, pulse_us, level));
        Ok(())
    }

    fn wave_clear(&self) -> Result<(), PigpioError> {
        let mut state = self.state.lock();
        state.building.clear();
        state.waves.clear();
        Ok(())
    }

    fn wave_add_generic(&self, pulses: &[WavePulse]) -> Result<u32, PigpioError> {
        let mut state = self.state.lock();
        if pulses.is_empty() {
            return Err(PigpioError::daemon("wave_add_generic", -69));
        }
        state.building.extend_from_slice(pulses);
        Ok(state.building.len() as u32)
    }

    fn wave_create(&self) -> Result<WaveId, PigpioError> {
        self.wave_create_and_pad(0)
    }

    fn wave_create_and_pad(&self, _percent: u32) -> Result<WaveId, PigpioError> {
        let mut state = self.state.lock();
        if state.building.is_empty() {
            return Err(PigpioError::daemon("wave_create_and_pad", -69));
        }
        if let Some(limit) = state.fail_create_at {
            if state.archive.len() >= limit {
                return Err(PigpioError::daemon("wave_create_and_pad", -67));
            }
        }
        let id = state.next_wave_id;
        state.next_wave_id += 1;
        let pulses = std::mem::take(&mut state.building);
        state.archive.insert(id, pulses.clone());
        state.waves.insert(id, pulses);
        Ok(id)
    }

    fn wave_send_using_mode(&self, wave: WaveId, _mode: TxMode) -> Result<u32, PigpioError> {
        let mut state = self.state.lock();
        if !state.waves.contains_key(&wave) {
            return Err(PigpioError::daemon("wave_send_using_mode", -66));
        }
        state.submitted.push(wave);
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        debug!(wave, in_flight = state.in_flight, "mock wave submitted");
        Ok(0)
    }

    fn wave_tx_at(&self) -> Result<Option<WaveId>, PigpioError> {
        let mut state = self.state.lock();
        let executing = state.submitted.get(state.polls).copied();
        state.polls += 1;
        Ok(executing)
    }

    fn wave_delete(&self, wave: WaveId) -> Result<(), PigpioError> {
        let mut state = self.state.lock();
        if state.waves.remove(&wave).is_none() {
            return Err(PigpioError::daemon("wave_delete", -66));
        }
        state.deleted.push(wave);
        state.in_flight -= 1;
        Ok(())
    }

    fn wave_get_micros(&self) -> Result<u32, PigpioError> {
        Ok(0)
    }

    fn wave_get_cbs(&self) -> Result<u32, PigpioError> {
        Ok(0)
    }

    fn wave_get_max_pulses(&self) -> Result<u32, PigpioError> {
        Ok(MAX_PULSES)
    }

    fn wave_get_max_micros(&self) -> Result<u32, PigpioError> {
        Ok(MAX_MICROS)
    }

    fn wave_get_max_cbs(&self) -> Result<u32, PigpioError> {
        Ok(MAX_CBS)
    }
}
