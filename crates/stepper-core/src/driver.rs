//! Motor driver capability set.
//!
//! A [`StepDriver`] owns a motor's output pins and knows how to issue steps
//! three ways: pin writes from the software step loop, and pulse-record
//! synthesis for DMA runs. Two drivers are provided: [`ChipDriver`] for
//! A4988/DRV8825-style controller chips and [`DirectDriver`] for directly
//! switched windings behind a ULN2003-style switch array.

use crate::config::{ChipConfig, DirectConfig};
use crate::error::ConfigError;
use crate::motor::MotorShared;
use crate::pins::{OutPin, TriggerPin, UstepPins};
use crate::pulse::{ChipMasks, ChipPulseGen, DirectPulseGen, PulseGen};
use cells::Agent;
use parking_lot::Mutex;
use pigpiod_client::{DmaEngine, PigpioError, PinMode};
use std::sync::Arc;
use stepgen::{Dir, IntervalGen};
use tracing::{debug, info};

/// Value names for the drive-enable pin.
pub const ENABLE: &str = "enable";
pub const DISABLE: &str = "disable";

/// The capabilities the motor core needs from a concrete driver.
pub trait StepDriver: Send + Sync {
    /// Raw-position units per full motor step.
    fn max_step_factor(&self) -> u32;

    /// Microsteps per full step for a named level, if the level exists.
    fn ustep_factor(&self, level: &str) -> Option<u32>;

    fn ustep_level_names(&self) -> Vec<String>;

    /// Pin setup at the start of a software run (microstep level selection).
    fn begin_soft_run(&self, level: &str) -> Result<(), PigpioError>;

    fn direction_set(&self, dir: Dir) -> Result<(), PigpioError>;

    /// Issues one step.
    fn step_trigger(&self) -> Result<(), PigpioError>;

    /// Applies or removes drive current.
    fn set_enabled(&self, enabled: bool) -> Result<(), PigpioError>;

    /// Resets motor outputs when a run (software or DMA) completes.
    fn end_stepping(&self) -> Result<(), PigpioError>;

    /// Releases the motor's pins on close.
    fn shutdown(&self) -> Result<(), PigpioError>;

    /// Wraps an interval generator in this driver's pulse synthesiser.
    fn pulse_gen(
        &self,
        shared: Arc<MotorShared>,
        level: &str,
        gen: Box<dyn IntervalGen>,
    ) -> Result<PulseGen, PigpioError>;
}

/// A4988/DRV8825-style driver: enable, direction, and step pins plus a
/// microstep level pin set.
pub struct ChipDriver {
    enable: OutPin,
    direction: OutPin,
    step: TriggerPin,
    usteps: UstepPins,
}

impl ChipDriver {
    pub fn new(
        engine: Arc<dyn DmaEngine>,
        motor: &str,
        cfg: &ChipConfig,
    ) -> Result<ChipDriver, ConfigError> {
        // Drive current stays off until a run starts, unless the config
        // explicitly asks otherwise.
        let mut enable_cfg = cfg.drive_enable.clone();
        if enable_cfg.value.is_none() {
            enable_cfg.value = Some(DISABLE.to_string());
        }
        let driver = ChipDriver {
            enable: OutPin::new(
                engine.clone(),
                format!("{motor}.drive_enable"),
                [ENABLE, DISABLE],
                &enable_cfg,
            )?,
            direction: OutPin::new(
                engine.clone(),
                format!("{motor}.direction"),
                ["F", "R"],
                &cfg.direction,
            )?,
            step: TriggerPin::new(engine.clone(), format!("{motor}.step"), &cfg.step)?,
            usteps: UstepPins::new(engine, motor, &cfg.microsteps)?,
        };
        info!(motor, "chip driver ready");
        Ok(driver)
    }
}

impl StepDriver for ChipDriver {
    fn max_step_factor(&self) -> u32 {
        self.usteps.max_factor()
    }

    fn ustep_factor(&self, level: &str) -> Option<u32> {
        self.usteps.factor(level)
    }

    fn ustep_level_names(&self) -> Vec<String> {
        self.usteps.level_names()
    }

    fn begin_soft_run(&self, level: &str) -> Result<(), PigpioError> {
        self.usteps.set(level, Agent::App)
    }

    fn direction_set(&self, dir: Dir) -> Result<(), PigpioError> {
        self.direction.set(&dir.to_string(), Agent::App)?;
        Ok(())
    }

    fn step_trigger(&self) -> Result<(), PigpioError> {
        self.step.trigger()
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), PigpioError> {
        self.enable
            .set(if enabled { ENABLE } else { DISABLE }, Agent::App)?;
        Ok(())
    }

    fn end_stepping(&self) -> Result<(), PigpioError> {
        self.set_enabled(false)
    }

    fn shutdown(&self) -> Result<(), PigpioError> {
        self.enable.shutdown()?;
        self.direction.shutdown()?;
        self.step.shutdown()?;
        self.usteps.shutdown()
    }

    fn pulse_gen(
        &self,
        shared: Arc<MotorShared>,
        level: &str,
        gen: Box<dyn IntervalGen>,
    ) -> Result<PulseGen, PigpioError> {
        let masks = ChipMasks {
            step_on: self.step.on_bits(),
            step_off: self.step.off_bits(),
            dir_fwd: self.direction.bits("F"),
            dir_rev: self.direction.bits("R"),
            enable_on: self.enable.bits(ENABLE),
            enable_off: self.enable.bits(DISABLE),
            ustep: self.usteps.bits(level),
            pulse_width_us: self.step.pulse_us() as u64,
        };
        Ok(Box::new(ChipPulseGen::new(gen, shared, masks)))
    }
}

/// One winding table: PWM duty per pin, stepped through row by row.
struct WindingTable {
    name: &'static str,
    factor: u32,
    rows: &'static [[u8; 4]],
}

/// The built-in winding tables. Values above 127 switch the winding on in
/// DMA mode; in software mode they are PWM duty cycles.
const WINDING_TABLES: &[WindingTable] = &[
    WindingTable {
        name: "single",
        factor: 1,
        // Energise each coil in turn.
        rows: &[
            [255, 0, 0, 0],
            [0, 255, 0, 0],
            [0, 0, 255, 0],
            [0, 0, 0, 255],
        ],
    },
    WindingTable {
        name: "double",
        factor: 1,
        // Energise pairs of coils in turn.
        rows: &[
            [255, 255, 0, 0],
            [0, 255, 255, 0],
            [0, 0, 255, 255],
            [255, 0, 0, 255],
        ],
    },
    WindingTable {
        name: "two",
        factor: 2,
        rows: &[
            [255, 0, 0, 0],
            [128, 128, 0, 0],
            [0, 255, 0, 0],
            [0, 128, 128, 0],
            [0, 0, 255, 0],
            [0, 0, 128, 128],
            [0, 0, 0, 255],
            [128, 0, 0, 128],
        ],
    },
    WindingTable {
        name: "four",
        factor: 4,
        rows: &[
            [255, 0, 0, 0],
            [192, 64, 0, 0],
            [128, 128, 0, 0],
            [64, 192, 0, 0],
            [0, 255, 0, 0],
            [0, 192, 64, 0],
            [0, 128, 128, 0],
            [0, 64, 192, 0],
            [0, 0, 255, 0],
            [0, 0, 192, 64],
            [0, 0, 128, 128],
            [0, 0, 64, 192],
            [0, 0, 0, 255],
            [64, 0, 0, 192],
            [128, 0, 0, 128],
            [192, 0, 0, 64],
        ],
    },
];

/// Directly switched unipolar driver: four winding pins, no controller chip.
pub struct DirectDriver {
    engine: Arc<dyn DmaEngine>,
    pins: [u32; 4],
    hold_power: u8,
    /// Index into the active table's rows; persists across runs so the
    /// winding phase stays continuous.
    index: Arc<Mutex<usize>>,
    active_table: Mutex<Option<usize>>,
    last_duties: Mutex<[Option<u8>; 4]>,
    dir: Mutex<Dir>,
}

impl DirectDriver {
    pub fn new(
        engine: Arc<dyn DmaEngine>,
        motor: &str,
        cfg: &DirectConfig,
    ) -> Result<DirectDriver, ConfigError> {
        let driver = DirectDriver {
            engine,
            pins: cfg.drive_pins,
            hold_power: cfg.drive_hold_power,
            index: Arc::new(Mutex::new(0)),
            active_table: Mutex::new(None),
            last_duties: Mutex::new([None; 4]),
            dir: Mutex::new(Dir::Fwd),
        };
        for pin in driver.pins {
            driver.engine.set_pwm_dutycycle(pin, 0)?;
        }
        info!(motor, pins = ?driver.pins, "direct driver ready");
        Ok(driver)
    }

    fn table(&self, level: &str) -> Option<&'static WindingTable> {
        WINDING_TABLES.iter().find(|t| t.name == level)
    }

    fn current_row(&self) -> [u8; 4] {
        match *self.active_table.lock() {
            Some(table) => WINDING_TABLES[table].rows[*self.index.lock() % WINDING_TABLES[table].rows.len()],
            None => [0; 4],
        }
    }

    fn write_duties(&self, duties: [u8; 4]) -> Result<(), PigpioError> {
        let mut last = self.last_duties.lock();
        for (slot, (pin, duty)) in self.pins.iter().zip(duties).enumerate() {
            if last[slot] != Some(duty) {
                self.engine.set_pwm_dutycycle(*pin, duty)?;
                last[slot] = Some(duty);
            }
        }
        Ok(())
    }
}

impl StepDriver for DirectDriver {
    fn max_step_factor(&self) -> u32 {
        WINDING_TABLES.iter().map(|t| t.factor).max().unwrap_or(1)
    }

    fn ustep_factor(&self, level: &str) -> Option<u32> {
        self.table(level).map(|t| t.factor)
    }

    fn ustep_level_names(&self) -> Vec<String> {
        WINDING_TABLES.iter().map(|t| t.name.to_string()).collect()
    }

    fn begin_soft_run(&self, level: &str) -> Result<(), PigpioError> {
        let table = WINDING_TABLES.iter().position(|t| t.name == level);
        *self.active_table.lock() = table;
        *self.last_duties.lock() = [None; 4];
        debug!(level, "direct driver soft run begins");
        Ok(())
    }

    fn direction_set(&self, dir: Dir) -> Result<(), PigpioError> {
        *self.dir.lock() = dir;
        Ok(())
    }

    fn step_trigger(&self) -> Result<(), PigpioError> {
        let Some(table) = *self.active_table.lock() else {
            return Ok(());
        };
        let rows = WINDING_TABLES[table].rows;
        let row = {
            let mut index = self.index.lock();
            *index = match *self.dir.lock() {
                Dir::Fwd => (*index + 1) % rows.len(),
                Dir::Rev => (*index + rows.len() - 1) % rows.len(),
            };
            rows[*index]
        };
        self.write_duties(row)
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), PigpioError> {
        let duties = if enabled {
            let row = self.current_row();
            row.map(|duty| if duty > 0 { self.hold_power } else { 0 })
        } else {
            [0; 4]
        };
        self.write_duties(duties)
    }

    fn end_stepping(&self) -> Result<(), PigpioError> {
        self.write_duties([0; 4])
    }

    fn shutdown(&self) -> Result<(), PigpioError> {
        self.write_duties([0; 4])?;
        for pin in self.pins {
            self.engine.set_mode(pin, PinMode::Input)?;
        }
        Ok(())
    }

    fn pulse_gen(
        &self,
        shared: Arc<MotorShared>,
        level: &str,
        gen: Box<dyn IntervalGen>,
    ) -> Result<PulseGen, PigpioError> {
        let Some(table) = self.table(level) else {
            // Levels are validated at configuration time.
            return Ok(Box::new(std::iter::empty()));
        };
        let mut all_mask = 0u32;
        for pin in self.pins {
            self.engine.set_mode(pin, PinMode::Output)?;
            self.engine.write(pin, 0)?;
            all_mask |= 1 << pin;
        }
        let rows = table
            .rows
            .iter()
            .map(|row| {
                let mut on = 0;
                let mut off = 0;
                for (pin, duty) in self.pins.iter().zip(row) {
                    if *duty > 127 {
                        on |= 1 << pin;
                    } else {
                        off |= 1 << pin;
                    }
                }
                (on, off)
            })
            .collect();
        // Keep the shared index within the new table.
        {
            let mut index = self.index.lock();
            *index %= table.rows.len();
        }
        Ok(Box::new(DirectPulseGen::new(
            gen,
            shared,
            rows,
            all_mask,
            self.index.clone(),
        )))
    }
}
