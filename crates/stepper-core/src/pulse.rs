//! Per-motor pulse synthesis.
//!
//! A pulse synthesiser wraps an interval generator and turns its tick items
//! into timestamped `(on_mask, off_mask)` records, ready for merging with
//! other motors and packing into DMA waves. Timestamps are microseconds on a
//! per-run clock; fractional microseconds carry over between steps so long
//! trains do not drift from the generator's real-valued intervals.

use crate::motor::MotorShared;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use stepgen::{Dir, IntervalGen, TickItem};
use tracing::debug;

/// How the scheduler should treat a pulse record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// An ordinary timed edge.
    Normal,
    /// The motor's run is complete; commit the position and stop the motor.
    Terminal,
    /// No edge; the motor is stationary but may resume. Paces the scheduler
    /// while a goto waits for its target to move.
    Noop,
}

/// One synthesised pulse.
#[derive(Debug, Clone)]
pub struct PulseRecord {
    pub gpio_on: u32,
    pub gpio_off: u32,
    /// Microseconds since the start of this motor's run.
    pub us_clock: u64,
    /// Raw position after this pulse takes effect.
    pub raw_pos: i64,
    pub motor: Arc<str>,
    pub action: Action,
}

/// A boxed per-motor pulse stream.
pub type PulseGen = Box<dyn Iterator<Item = PulseRecord> + Send>;

/// Clock advance used for a no-op record, in microseconds.
const NOOP_ADVANCE_US: u64 = 100_000;

/// Microsecond clock with fractional carry.
#[derive(Debug, Default)]
struct UsClock {
    us: u64,
    overflow: f64,
}

impl UsClock {
    fn us(&self) -> u64 {
        self.us
    }

    /// Advances by `seconds`, carrying the sub-microsecond remainder forward.
    fn advance(&mut self, seconds: f64) {
        let total = seconds * 1e6 + self.overflow;
        let whole = total.floor();
        self.overflow = total - whole;
        self.us += whole as u64;
    }

    fn advance_us(&mut self, us: u64) {
        self.us += us;
    }

    /// Clamps the clock to at least `us`, keeping same-pin edges strictly
    /// ordered even when an interval is shorter than the trigger pulse.
    fn ensure_past(&mut self, us: u64) {
        if self.us <= us {
            self.us = us + 1;
        }
    }
}

/// Mask bundle for a chip-driven motor's pulse synthesis.
#[derive(Debug, Clone, Copy)]
pub struct ChipMasks {
    pub step_on: (u32, u32),
    pub step_off: (u32, u32),
    pub dir_fwd: (u32, u32),
    pub dir_rev: (u32, u32),
    pub enable_on: (u32, u32),
    pub enable_off: (u32, u32),
    pub ustep: (u32, u32),
    pub pulse_width_us: u64,
}

/// Pulse synthesiser for chip-driven motors (dedicated step/dir/enable pins).
///
/// Each step becomes a pair of records: step pin on, then off after the
/// trigger pulse width. The first committed direction change also carries the
/// drive-enable-on and microstep-level bits, so the whole setup lands in one
/// pulse slot; later direction changes carry direction bits alone.
pub struct ChipPulseGen {
    gen: Box<dyn IntervalGen>,
    shared: Arc<MotorShared>,
    masks: ChipMasks,
    clock: UsClock,
    queue: VecDeque<PulseRecord>,
    setup_done: bool,
    finished: bool,
}

impl ChipPulseGen {
    pub fn new(gen: Box<dyn IntervalGen>, shared: Arc<MotorShared>, masks: ChipMasks) -> Self {
        ChipPulseGen {
            gen,
            shared,
            masks,
            clock: UsClock::default(),
            queue: VecDeque::new(),
            setup_done: false,
            finished: false,
        }
    }

    fn record(&self, bits: (u32, u32), us_clock: u64, action: Action) -> PulseRecord {
        PulseRecord {
            gpio_on: bits.0,
            gpio_off: bits.1,
            us_clock,
            raw_pos: self.gen.position(),
            motor: self.shared.name.clone(),
            action,
        }
    }

    fn terminal(&mut self) -> PulseRecord {
        self.finished = true;
        let hold = self.shared.hold_stopped.get();
        let bits = if hold > 0.0 {
            self.clock.advance_us((hold * 1e6).round() as u64);
            self.masks.enable_off
        } else {
            // Drive stays enabled; the terminal record only carries the
            // position commit.
            self.clock.advance_us(1);
            (0, 0)
        };
        debug!(motor = %self.shared.name, us = self.clock.us(), "pulse stream terminal");
        self.record(bits, self.clock.us(), Action::Terminal)
    }
}

impl Iterator for ChipPulseGen {
    type Item = PulseRecord;

    fn next(&mut self) -> Option<PulseRecord> {
        if let Some(queued) = self.queue.pop_front() {
            return Some(queued);
        }
        if self.finished {
            return None;
        }
        match self.gen.next_tick() {
            Some(TickItem::DirSet { dir, interval }) => {
                let mut bits = match dir {
                    Dir::Fwd => self.masks.dir_fwd,
                    Dir::Rev => self.masks.dir_rev,
                };
                if !self.setup_done {
                    self.setup_done = true;
                    bits.0 |= self.masks.enable_on.0 | self.masks.ustep.0;
                    bits.1 |= self.masks.enable_on.1 | self.masks.ustep.1;
                }
                let rec = self.record(bits, self.clock.us(), Action::Normal);
                self.clock.advance(interval);
                Some(rec)
            }
            Some(TickItem::Step { interval }) => {
                let on_time = self.clock.us();
                let off_time = on_time + self.masks.pulse_width_us;
                let on = self.record(self.masks.step_on, on_time, Action::Normal);
                self.queue
                    .push_back(self.record(self.masks.step_off, off_time, Action::Normal));
                self.clock.advance(interval);
                self.clock.ensure_past(off_time);
                Some(on)
            }
            Some(TickItem::Idle) => {
                let rec = self.record((0, 0), self.clock.us(), Action::Noop);
                self.clock.advance_us(NOOP_ADVANCE_US);
                Some(rec)
            }
            None => Some(self.terminal()),
        }
    }
}

/// Pulse synthesiser for directly switched motors.
///
/// Each step drives the next winding pattern of the active table; there is no
/// separate step pin, so one record per step suffices. The winding index is
/// shared with the driver so software and DMA runs stay phase-continuous.
pub struct DirectPulseGen {
    gen: Box<dyn IntervalGen>,
    shared: Arc<MotorShared>,
    /// `(on, off)` per winding pattern row.
    rows: Vec<(u32, u32)>,
    index: Arc<Mutex<usize>>,
    /// Off-mask covering all winding pins, for the hold-expiry terminal.
    all_off: u32,
    dir: Dir,
    clock: UsClock,
    finished: bool,
}

impl DirectPulseGen {
    pub fn new(
        gen: Box<dyn IntervalGen>,
        shared: Arc<MotorShared>,
        rows: Vec<(u32, u32)>,
        all_off: u32,
        index: Arc<Mutex<usize>>,
    ) -> Self {
        DirectPulseGen {
            gen,
            shared,
            rows,
            index,
            all_off,
            dir: Dir::Fwd,
            clock: UsClock::default(),
            finished: false,
        }
    }

    fn record(&self, bits: (u32, u32), us_clock: u64, action: Action) -> PulseRecord {
        PulseRecord {
            gpio_on: bits.0,
            gpio_off: bits.1,
            us_clock,
            raw_pos: self.gen.position(),
            motor: self.shared.name.clone(),
            action,
        }
    }

    fn current_row(&self) -> (u32, u32) {
        self.rows[*self.index.lock()]
    }

    fn advance_row(&mut self) -> (u32, u32) {
        let mut index = self.index.lock();
        *index = match self.dir {
            Dir::Fwd => (*index + 1) % self.rows.len(),
            Dir::Rev => (*index + self.rows.len() - 1) % self.rows.len(),
        };
        self.rows[*index]
    }
}

impl Iterator for DirectPulseGen {
    type Item = PulseRecord;

    fn next(&mut self) -> Option<PulseRecord> {
        if self.finished {
            return None;
        }
        match self.gen.next_tick() {
            Some(TickItem::DirSet { dir, interval }) => {
                self.dir = dir;
                // Re-assert the current pattern as the setup record.
                let rec = self.record(self.current_row(), self.clock.us(), Action::Normal);
                self.clock.advance(interval);
                Some(rec)
            }
            Some(TickItem::Step { interval }) => {
                let bits = self.advance_row();
                let rec = self.record(bits, self.clock.us(), Action::Normal);
                self.clock.advance(interval);
                Some(rec)
            }
            Some(TickItem::Idle) => {
                let rec = self.record((0, 0), self.clock.us(), Action::Noop);
                self.clock.advance_us(NOOP_ADVANCE_US);
                Some(rec)
            }
            None => {
                self.finished = true;
                let hold = self.shared.hold_stopped.get();
                let bits = if hold > 0.0 {
                    self.clock.advance_us((hold * 1e6).round() as u64);
                    (0, self.all_off)
                } else {
                    self.clock.advance_us(1);
                    (0, 0)
                };
                Some(self.record(bits, self.clock.us(), Action::Terminal))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::UsClock;

    #[test]
    fn fractional_microseconds_carry_without_drift() {
        // 3.3 µs per tick: naive truncation would lose 0.3 µs per step.
        let mut clock = UsClock::default();
        for _ in 0..1000 {
            clock.advance(3.3e-6);
        }
        assert_eq!(clock.us(), 3300);
    }

    #[test]
    fn ensure_past_only_moves_forward() {
        let mut clock = UsClock::default();
        clock.advance_us(10);
        clock.ensure_past(4);
        assert_eq!(clock.us(), 10);
        clock.ensure_past(10);
        assert_eq!(clock.us(), 11);
    }
}
