//! GPIO pin abstractions.
//!
//! Pins carry a two-element value vocabulary (e.g. `enable`/`disable` or
//! `F`/`R`) mapped onto logic 0/1, so the rest of the engine never deals in
//! bare levels. Every pin also exposes its on/off bit masks for DMA waveform
//! construction.
//!
//! A pin number of `-1` means the signal is hard-wired and not reachable from
//! software: all operations become no-ops returning zero masks.

use crate::config::{OutPinConfig, TriggerPinConfig, UstepConfig};
use crate::error::ConfigError;
use cells::{Agent, Cell};
use pigpiod_client::{DmaEngine, PigpioError, PinMode};
use std::sync::Arc;
use tracing::{debug, info};

/// An output pin with named values.
pub struct OutPin {
    name: String,
    pinno: i32,
    /// Value names by logic level; index 0 drives the pin low.
    values: [String; 2],
    close_value: Option<String>,
    value: Cell<String>,
    engine: Arc<dyn DmaEngine>,
}

impl OutPin {
    /// Sets the pin up for output and drives the initial value.
    ///
    /// `values` is the vocabulary in logic order `[low, high]`; the config's
    /// `invert` flag swaps the mapping.
    pub fn new(
        engine: Arc<dyn DmaEngine>,
        name: impl Into<String>,
        values: [&str; 2],
        cfg: &OutPinConfig,
    ) -> Result<OutPin, ConfigError> {
        let name = name.into();
        let values = if cfg.invert {
            [values[1].to_string(), values[0].to_string()]
        } else {
            [values[0].to_string(), values[1].to_string()]
        };
        if let Some(close) = &cfg.close_value {
            if !values.contains(close) {
                return Err(ConfigError::BadCloseValue {
                    pin: name,
                    value: close.clone(),
                });
            }
        }
        let initial = cfg.value.clone().unwrap_or_else(|| values[0].clone());
        let pin = OutPin {
            pinno: cfg.pinno,
            close_value: cfg.close_value.clone(),
            value: Cell::new(format!("{name}.value"), initial.clone()),
            values,
            engine,
            name,
        };
        if pin.pinno >= 0 {
            pin.engine.set_mode(pin.pinno as u32, PinMode::Output)?;
            pin.write_level(&initial)?;
            info!(pin = %pin.name, pinno = pin.pinno, value = %initial, "output pin initialised");
        } else {
            info!(pin = %pin.name, "no physical pin");
        }
        Ok(pin)
    }

    pub fn pinno(&self) -> i32 {
        self.pinno
    }

    pub fn get(&self) -> String {
        self.value.get()
    }

    fn level_of(&self, value: &str) -> u8 {
        if value == self.values[0] {
            0
        } else {
            1
        }
    }

    fn write_level(&self, value: &str) -> Result<(), PigpioError> {
        if self.pinno >= 0 {
            self.engine.write(self.pinno as u32, self.level_of(value))?;
        }
        Ok(())
    }

    /// Writes the named value to the pin and the observable; returns whether
    /// the stored value changed.
    pub fn set(&self, value: &str, agent: Agent) -> Result<bool, PigpioError> {
        let changed = self
            .value
            .set(value.to_string(), agent)
            .unwrap_or_default();
        if changed {
            self.write_level(value)?;
            debug!(pin = %self.name, value, "pin set");
        }
        Ok(changed)
    }

    /// The `(on_mask, off_mask)` a DMA pulse needs to drive this pin to the
    /// named value. Exactly one mask carries the pin's bit; both are zero for
    /// a hard-wired pin.
    pub fn bits(&self, value: &str) -> (u32, u32) {
        if self.pinno < 0 {
            return (0, 0);
        }
        let bit = 1u32 << self.pinno;
        if self.level_of(value) == 0 {
            (0, bit)
        } else {
            (bit, 0)
        }
    }

    /// Drives the configured close value and leaves the pin as an output, or
    /// reverts the pin to input mode when no close value is configured.
    pub fn shutdown(&self) -> Result<(), PigpioError> {
        if self.pinno < 0 {
            return Ok(());
        }
        match &self.close_value {
            Some(value) => {
                let value = value.clone();
                self.write_level(&value)?;
                debug!(pin = %self.name, value = %value, "pin closed to value");
            }
            None => {
                self.engine.set_mode(self.pinno as u32, PinMode::Input)?;
                debug!(pin = %self.name, "pin reverted to input");
            }
        }
        Ok(())
    }
}

/// An output pin that issues timed trigger pulses on a step signal.
pub struct TriggerPin {
    name: String,
    pinno: i32,
    pulse_us: u32,
    /// Level driven during the pulse; the pin idles at the inverse.
    pulse_level: u8,
    engine: Arc<dyn DmaEngine>,
}

impl TriggerPin {
    pub fn new(
        engine: Arc<dyn DmaEngine>,
        name: impl Into<String>,
        cfg: &TriggerPinConfig,
    ) -> Result<TriggerPin, ConfigError> {
        let pin = TriggerPin {
            name: name.into(),
            pinno: cfg.pinno,
            pulse_us: cfg.pulse_us,
            pulse_level: if cfg.pulse1 { 1 } else { 0 },
            engine,
        };
        if pin.pinno >= 0 {
            pin.engine.set_mode(pin.pinno as u32, PinMode::Output)?;
            pin.engine
                .write(pin.pinno as u32, 1 - pin.pulse_level)?;
            info!(pin = %pin.name, pinno = pin.pinno, pulse_us = pin.pulse_us, "trigger pin initialised");
        }
        Ok(pin)
    }

    pub fn pulse_us(&self) -> u32 {
        self.pulse_us
    }

    /// Drives the pulse level for the configured duration, then reverts.
    pub fn trigger(&self) -> Result<(), PigpioError> {
        if self.pinno >= 0 {
            self.engine
                .gpio_trigger(self.pinno as u32, self.pulse_us, self.pulse_level)?;
        }
        Ok(())
    }

    /// Masks for the pulse's leading edge.
    pub fn on_bits(&self) -> (u32, u32) {
        self.edge_bits(self.pulse_level)
    }

    /// Masks for the pulse's trailing edge.
    pub fn off_bits(&self) -> (u32, u32) {
        self.edge_bits(1 - self.pulse_level)
    }

    fn edge_bits(&self, level: u8) -> (u32, u32) {
        if self.pinno < 0 {
            return (0, 0);
        }
        let bit = 1u32 << self.pinno;
        if level == 1 {
            (bit, 0)
        } else {
            (0, bit)
        }
    }

    pub fn shutdown(&self) -> Result<(), PigpioError> {
        if self.pinno >= 0 {
            self.engine.set_mode(self.pinno as u32, PinMode::Input)?;
        }
        Ok(())
    }
}

/// One entry of a microstep table.
#[derive(Debug, Clone)]
pub struct UstepEntry {
    pub name: String,
    /// Microsteps per full motor step at this level.
    pub factor: u32,
    /// Logic level per microstep pin.
    pub pattern: Vec<u8>,
}

/// The set of pins selecting a motor controller's microstep level.
pub struct UstepPins {
    pins: Vec<OutPin>,
    levels: Vec<UstepEntry>,
    level: Cell<String>,
    max_factor: u32,
}

impl UstepPins {
    pub fn new(
        engine: Arc<dyn DmaEngine>,
        motor: &str,
        cfg: &UstepConfig,
    ) -> Result<UstepPins, ConfigError> {
        if cfg.levels.is_empty() {
            return Err(ConfigError::EmptyUstepTable {
                motor: motor.to_string(),
            });
        }
        for level in &cfg.levels {
            if level.table.len() != cfg.pins.len() {
                return Err(ConfigError::UstepTableMismatch {
                    motor: motor.to_string(),
                    level: level.name.clone(),
                    got: level.table.len(),
                    want: cfg.pins.len(),
                });
            }
        }
        let mut pins = Vec::with_capacity(cfg.pins.len());
        for (index, pin_cfg) in cfg.pins.iter().enumerate() {
            pins.push(OutPin::new(
                engine.clone(),
                format!("{motor}.ustep{index}"),
                ["0", "1"],
                pin_cfg,
            )?);
        }
        let levels: Vec<UstepEntry> = cfg
            .levels
            .iter()
            .map(|level| UstepEntry {
                name: level.name.clone(),
                factor: level.factor,
                pattern: level.table.clone(),
            })
            .collect();
        let max_factor = levels.iter().map(|l| l.factor).max().unwrap_or(1);
        let initial = cfg
            .value
            .clone()
            .unwrap_or_else(|| levels[0].name.clone());
        let pinset = UstepPins {
            pins,
            levels,
            level: Cell::new(format!("{motor}.usteplevel"), initial.clone()),
            max_factor,
        };
        pinset
            .entry(&initial)
            .ok_or_else(|| ConfigError::UnknownUstepLevel {
                motor: motor.to_string(),
                level: initial.clone(),
            })?;
        pinset.set(&initial, Agent::App)?;
        info!(motor, levels = pinset.levels.len(), max_factor, "microstep pins created");
        Ok(pinset)
    }

    fn entry(&self, name: &str) -> Option<&UstepEntry> {
        self.levels.iter().find(|l| l.name == name)
    }

    pub fn level_names(&self) -> Vec<String> {
        self.levels.iter().map(|l| l.name.clone()).collect()
    }

    pub fn factor(&self, name: &str) -> Option<u32> {
        self.entry(name).map(|l| l.factor)
    }

    pub fn max_factor(&self) -> u32 {
        self.max_factor
    }

    /// Writes all pins for the named level.
    pub fn set(&self, name: &str, agent: Agent) -> Result<(), PigpioError> {
        let Some(entry) = self.entry(name) else {
            // Validated at construction; unknown names cannot arrive here.
            return Ok(());
        };
        let pattern = entry.pattern.clone();
        let _ = self.level.set(name.to_string(), agent);
        for (pin, level) in self.pins.iter().zip(pattern) {
            pin.set(if level == 0 { "0" } else { "1" }, agent)?;
        }
        Ok(())
    }

    /// Combined `(on, off)` masks for the named level.
    pub fn bits(&self, name: &str) -> (u32, u32) {
        let Some(entry) = self.entry(name) else {
            return (0, 0);
        };
        let mut on = 0;
        let mut off = 0;
        for (pin, level) in self.pins.iter().zip(&entry.pattern) {
            let (pin_on, pin_off) = pin.bits(if *level == 0 { "0" } else { "1" });
            on |= pin_on;
            off |= pin_off;
        }
        (on, off)
    }

    pub fn shutdown(&self) -> Result<(), PigpioError> {
        for pin in &self.pins {
            pin.shutdown()?;
        }
        Ok(())
    }
}
