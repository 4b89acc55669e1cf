//! The motor group: k-way pulse merging, DMA wave packing, and the
//! pipelined one-shot-synchronous dispatch loop.
//!
//! `run_fast` collects a pulse generator from every motor taking part,
//! merges their streams by microsecond timestamp, packs bounded waves, and
//! keeps a FIFO of waves in flight. As each wave completes it is deleted
//! from the engine and the positions it carried are committed back to the
//! motors; motors whose terminal record passed through are returned to
//! `stopped`.

use crate::config::WaveConfig;
use crate::error::CommandError;
use crate::motor::{Command, Dispatch, Motor, OpMode};
use crate::pulse::{Action, PulseGen, PulseRecord};
use cells::{Agent, Cell};
use parking_lot::Mutex;
use pigpiod_client::{DmaEngine, PigpioError, TxMode, WavePulse};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Sleep between completion polls of the DMA engine.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// The group's mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    /// Shut down; terminal.
    Closed,
    /// No DMA activity.
    Off,
    /// The scheduler thread is streaming waves.
    DmaStepping,
}

impl std::fmt::Display for GroupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            GroupMode::Closed => "closed",
            GroupMode::Off => "off",
            GroupMode::DmaStepping => "dma-stepping",
        })
    }
}

/// Observable group state: mode, advisory wave limits, and the engine's
/// reported hardware maxima.
pub struct GroupShared {
    pub mode: Cell<GroupMode>,
    pub max_pulses_per_wave: Cell<u32>,
    pub max_wave_micros: Cell<u32>,
    pub max_pending_waves: Cell<u32>,
    pub engine_max_pulses: Cell<u32>,
    pub engine_max_micros: Cell<u32>,
    pub engine_max_cbs: Cell<u32>,
}

/// Coordinated access to multiple motors, in particular merged fast
/// stepping through DMA waves.
pub struct MotorGroup {
    engine: Arc<dyn DmaEngine>,
    motors: BTreeMap<String, Arc<Motor>>,
    shared: Arc<GroupShared>,
    scheduler: Mutex<Option<JoinHandle<Result<(), PigpioError>>>>,
}

impl std::fmt::Debug for MotorGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorGroup")
            .field("motors", &self.motors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MotorGroup {
    pub(crate) fn new(
        engine: Arc<dyn DmaEngine>,
        motors: BTreeMap<String, Arc<Motor>>,
        wave: &WaveConfig,
    ) -> Result<MotorGroup, PigpioError> {
        let shared = Arc::new(GroupShared {
            mode: Cell::new("group.mode", GroupMode::Off),
            max_pulses_per_wave: Cell::bounded(
                "group.max_pulses_per_wave",
                wave.max_pulses,
                100,
                u32::MAX,
            ),
            max_wave_micros: Cell::bounded(
                "group.max_wave_micros",
                wave.max_micros,
                1000,
                1_000_000,
            ),
            max_pending_waves: Cell::bounded("group.max_pending_waves", wave.max_pending, 2, 9),
            engine_max_pulses: Cell::new("group.engine_max_pulses", engine.wave_get_max_pulses()?),
            engine_max_micros: Cell::new("group.engine_max_micros", engine.wave_get_max_micros()?),
            engine_max_cbs: Cell::new("group.engine_max_cbs", engine.wave_get_max_cbs()?),
        });
        info!(
            max_pulses = shared.engine_max_pulses.get(),
            max_micros = shared.engine_max_micros.get(),
            max_cbs = shared.engine_max_cbs.get(),
            "dma engine limits"
        );
        Ok(MotorGroup {
            engine,
            motors,
            shared,
            scheduler: Mutex::new(None),
        })
    }

    pub fn state(&self) -> &Arc<GroupShared> {
        &self.shared
    }

    pub fn motor(&self, name: &str) -> Option<&Arc<Motor>> {
        self.motors.get(name)
    }

    pub fn motors(&self) -> impl Iterator<Item = &Arc<Motor>> {
        self.motors.values()
    }

    /// Starts fast (DMA) stepping for the given motor commands.
    ///
    /// Commands whose step-mode uses the software path are dispatched as
    /// normal; every DMA dispatch contributes a pulse stream to the merged
    /// wave schedule. Returns once the scheduler thread is running; use
    /// [`MotorGroup::wait_idle`] to collect its outcome.
    pub fn run_fast(&self, requests: Vec<(String, Command)>) -> Result<(), CommandError> {
        match self.shared.mode.get() {
            GroupMode::Closed => return Err(CommandError::GroupClosed),
            GroupMode::DmaStepping => return Err(CommandError::GroupBusy),
            GroupMode::Off => {}
        }
        // Collect a leftover scheduler handle from a previous run.
        if let Some(handle) = self.scheduler.lock().take() {
            if let Ok(Err(err)) = handle.join() {
                warn!(%err, "previous fast-step run had failed");
            }
        }

        let mut streams: Vec<PulseGen> = Vec::new();
        let mut running: Vec<Arc<Motor>> = Vec::new();
        for (name, command) in requests {
            let motor = self
                .motors
                .get(&name)
                .ok_or_else(|| CommandError::UnknownMotor(name.clone()))?;
            match motor.do_this(command) {
                Ok(Dispatch::Wave(stream)) => {
                    let _ = motor.state().op_mode.set(OpMode::RunningDma, Agent::App);
                    streams.push(stream);
                    running.push(motor.clone());
                }
                Ok(Dispatch::Done) => {}
                Err(err) => {
                    // Unwind the motors already prepared for this run.
                    for prepared in &running {
                        prepared
                            .state()
                            .step_active
                            .store(false, Ordering::Release);
                        prepared.finish_dma_run();
                    }
                    return Err(err);
                }
            }
        }
        if streams.is_empty() {
            return Ok(());
        }

        let _ = self.shared.mode.set(GroupMode::DmaStepping, Agent::App);
        info!(motors = running.len(), "fast stepping starts");
        let engine = self.engine.clone();
        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("group_faststep".to_string())
            .spawn(move || fast_step(engine, shared, running, streams))
            .map_err(|err| {
                let _ = self.shared.mode.set(GroupMode::Off, Agent::App);
                CommandError::Engine(PigpioError::Io(err))
            })?;
        *self.scheduler.lock() = Some(handle);
        Ok(())
    }

    /// Waits for the scheduler thread to drain and returns its outcome.
    pub fn wait_idle(&self) -> Result<(), PigpioError> {
        if let Some(handle) = self.scheduler.lock().take() {
            match handle.join() {
                Ok(result) => return result,
                Err(_) => error!("scheduler thread panicked"),
            }
        }
        Ok(())
    }

    /// Stops every motor, waits for their runs to wind down, and closes the
    /// group.
    pub fn clean_stop(&self) {
        info!("group clean stop");
        for motor in self.motors.values() {
            if let Err(err) = motor.do_this(Command::Close) {
                debug!(motor = motor.name(), %err, "close skipped");
            }
        }
        if let Err(err) = self.wait_idle() {
            warn!(%err, "fast stepping failed during close");
        }
        for motor in self.motors.values() {
            motor.wait_stop();
        }
        let _ = self.shared.mode.set(GroupMode::Closed, Agent::App);
    }
}

/// Scheduler thread body: runs the wave pipeline and restores group state,
/// disabling all drives if the engine failed mid-run.
fn fast_step(
    engine: Arc<dyn DmaEngine>,
    shared: Arc<GroupShared>,
    motors: Vec<Arc<Motor>>,
    streams: Vec<PulseGen>,
) -> Result<(), PigpioError> {
    let by_name: BTreeMap<Arc<str>, Arc<Motor>> = motors
        .iter()
        .map(|m| (m.state().name.clone(), m.clone()))
        .collect();
    let result = run_waves(engine.as_ref(), &shared, &by_name, streams);
    if let Err(err) = &result {
        error!(%err, "fast stepping aborted");
        for motor in &motors {
            motor.state().step_active.store(false, Ordering::Release);
            if let Err(err) = motor.driver().set_enabled(false) {
                warn!(motor = motor.name(), %err, "drive disable failed");
            }
        }
    }
    // Whatever happened, no motor may stay in running-dma.
    for motor in &motors {
        if motor.state().op_mode.get() == OpMode::RunningDma {
            motor.finish_dma_run();
        }
    }
    let _ = shared.mode.set(GroupMode::Off, Agent::App);
    info!("fast stepping ends");
    result
}

/// End-of-wave state: the last position and action seen per motor.
type EndStates = BTreeMap<Arc<str>, (i64, Action)>;

fn run_waves(
    engine: &dyn DmaEngine,
    shared: &GroupShared,
    motors: &BTreeMap<Arc<str>, Arc<Motor>>,
    streams: Vec<PulseGen>,
) -> Result<(), PigpioError> {
    let max_pulses = shared.max_pulses_per_wave.get() as usize;
    let max_micros = shared.max_wave_micros.get() as u64;
    let max_pending = shared.max_pending_waves.get() as usize;
    let pad_percent = 100 / max_pending as u32;

    let mut merge = PulseMerge::new(streams);
    let mut pending: VecDeque<(u32, EndStates)> = VecDeque::new();
    let mut exhausted = false;
    engine.wave_clear()?;

    loop {
        while !exhausted && pending.len() < max_pending {
            let (pulses, ends, stream_done) = pack_wave(&mut merge, max_pulses, max_micros);
            exhausted = stream_done;
            if pulses.is_empty() {
                break;
            }
            let duration: u64 = pulses.iter().map(|p| p.delay_us as u64).sum();
            engine.wave_add_generic(&pulses)?;
            let wave = engine.wave_create_and_pad(pad_percent)?;
            engine.wave_send_using_mode(wave, TxMode::OneShotSync)?;
            debug!(
                wave,
                pulses = pulses.len(),
                duration_us = duration,
                "wave submitted"
            );
            pending.push_back((wave, ends));
        }
        if pending.is_empty() {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
        let current = engine.wave_tx_at()?;
        // Everything ahead of the executing wave has finished.
        while pending
            .front()
            .is_some_and(|(front, _)| current != Some(*front))
        {
            if let Some((wave, ends)) = pending.pop_front() {
                engine.wave_delete(wave)?;
                debug!(wave, remaining = pending.len(), "wave complete");
                commit_end_states(motors, &ends);
            }
        }
    }
    Ok(())
}

fn commit_end_states(motors: &BTreeMap<Arc<str>, Arc<Motor>>, ends: &EndStates) {
    for (name, (raw_pos, action)) in ends {
        let Some(motor) = motors.get(name) else {
            continue;
        };
        let _ = motor.state().raw_pos.set(*raw_pos, Agent::App);
        if *action == Action::Terminal {
            motor.finish_dma_run();
        }
    }
}

/// Packs the next wave from the merged stream.
///
/// Stops at the pulse-count or microsecond limit, when the stream ends (the
/// final record is flushed with a 1 µs delay), or after packing a terminal
/// record. Records sharing one timestamp are coalesced into a single pulse
/// slot so co-timed edges on different pins stay coincident.
fn pack_wave(
    merge: &mut PulseMerge,
    max_pulses: usize,
    max_micros: u64,
) -> (Vec<WavePulse>, EndStates, bool) {
    let mut pulses = Vec::new();
    let mut ends = EndStates::new();
    let mut micros: u64 = 0;

    while pulses.len() < max_pulses && micros < max_micros {
        let Some(record) = merge.next_record() else {
            return (pulses, ends, true);
        };
        let mut gpio_on = record.gpio_on;
        let mut gpio_off = record.gpio_off;
        let mut terminal = record.action == Action::Terminal;
        ends.insert(record.motor.clone(), (record.raw_pos, record.action));
        while let Some(extra) = merge.next_if_at(record.us_clock) {
            gpio_on |= extra.gpio_on;
            gpio_off |= extra.gpio_off;
            terminal |= extra.action == Action::Terminal;
            ends.insert(extra.motor.clone(), (extra.raw_pos, extra.action));
        }
        match merge.peek() {
            None => {
                // Last record overall: flush it with a minimal delay.
                pulses.push(WavePulse::new(gpio_on, gpio_off, 1));
                return (pulses, ends, true);
            }
            Some(next) => {
                let delay = next.us_clock - record.us_clock;
                pulses.push(WavePulse::new(gpio_on, gpio_off, delay as u32));
                micros += delay;
            }
        }
        if terminal {
            break;
        }
    }
    (pulses, ends, false)
}

/// A stable k-way merge of per-motor pulse streams, ordered by `us_clock`.
///
/// Ties are yielded adjacently in stream order; terminal records pass
/// through without ending the merge, which only finishes when every stream
/// is exhausted.
struct PulseMerge {
    sources: Vec<PulseGen>,
    heads: Vec<Option<PulseRecord>>,
}

impl PulseMerge {
    fn new(sources: Vec<PulseGen>) -> PulseMerge {
        let mut merge = PulseMerge {
            heads: Vec::with_capacity(sources.len()),
            sources,
        };
        for index in 0..merge.sources.len() {
            let head = merge.sources[index].next();
            merge.heads.push(head);
        }
        merge
    }

    fn min_index(&self) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (index, head) in self.heads.iter().enumerate() {
            if let Some(record) = head {
                match best {
                    Some((_, clock)) if record.us_clock >= clock => {}
                    _ => best = Some((index, record.us_clock)),
                }
            }
        }
        best.map(|(index, _)| index)
    }

    fn peek(&self) -> Option<&PulseRecord> {
        self.min_index().and_then(|index| self.heads[index].as_ref())
    }

    fn next_record(&mut self) -> Option<PulseRecord> {
        let index = self.min_index()?;
        let record = self.heads[index].take();
        self.heads[index] = self.sources[index].next();
        record
    }

    /// Takes the next record only if it shares `us_clock`, for coalescing
    /// co-timed pulses into one slot.
    fn next_if_at(&mut self, us_clock: u64) -> Option<PulseRecord> {
        if self.peek()?.us_clock != us_clock {
            return None;
        }
        self.next_record()
    }
}
