//! Motor-set configuration.
//!
//! A motor set is described by a JSON document: per-motor driver class, pin
//! assignments, microstep table, and a map of named step-modes, plus a
//! top-level section with DMA wave limits. Loading is strict: unknown
//! generator classes, microstep levels that are not in the motor's table, and
//! inconsistent ramp rates all fail the bootstrap before any thread starts.

use crate::driver::{ChipDriver, DirectDriver, StepDriver};
use crate::error::ConfigError;
use crate::group::MotorGroup;
use crate::motor::{Motor, StepMode};
use pigpiod_client::DmaEngine;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// The whole motor-set file.
#[derive(Debug, Clone, Deserialize)]
pub struct MotorSetConfig {
    #[serde(default)]
    pub wave: WaveConfig,
    pub motors: BTreeMap<String, MotorConfig>,
}

impl MotorSetConfig {
    pub fn from_json(text: &str) -> Result<MotorSetConfig, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Advisory limits for DMA wave construction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    /// Maximum pulses packed into one wave.
    pub max_pulses: u32,
    /// Maximum duration of one wave, in microseconds.
    pub max_micros: u32,
    /// Number of waves kept in flight.
    pub max_pending: u32,
}

impl Default for WaveConfig {
    fn default() -> Self {
        WaveConfig {
            max_pulses: 1000,
            max_micros: 500_000,
            max_pending: 3,
        }
    }
}

/// One motor's descriptor, selected by driver class.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum MotorConfig {
    /// A step/direction/enable controller chip (A4988, DRV8825, ...).
    Chip(ChipConfig),
    /// Directly switched windings (ULN2003-style).
    Direct(DirectConfig),
}

impl MotorConfig {
    pub fn step_modes(&self) -> &BTreeMap<String, StepModeConfig> {
        match self {
            MotorConfig::Chip(c) => &c.stepmodes,
            MotorConfig::Direct(c) => &c.stepmodes,
        }
    }

    pub fn hold_stopped(&self) -> f64 {
        match self {
            MotorConfig::Chip(c) => c.hold_stopped,
            MotorConfig::Direct(c) => c.hold_stopped,
        }
    }
}

fn default_hold_stopped() -> f64 {
    0.5
}

/// Chip-driven motor: dedicated enable, direction, and step pins plus a
/// microstep level pin set.
#[derive(Debug, Clone, Deserialize)]
pub struct ChipConfig {
    /// Seconds of drive current applied after the last step; 0 keeps the
    /// drive enabled forever.
    #[serde(default = "default_hold_stopped")]
    pub hold_stopped: f64,
    pub drive_enable: OutPinConfig,
    pub direction: OutPinConfig,
    pub step: TriggerPinConfig,
    pub microsteps: UstepConfig,
    pub stepmodes: BTreeMap<String, StepModeConfig>,
}

/// Directly switched motor: four winding pins.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectConfig {
    #[serde(default = "default_hold_stopped")]
    pub hold_stopped: f64,
    pub drive_pins: [u32; 4],
    /// PWM duty applied to energised windings while holding position.
    #[serde(default = "default_hold_power")]
    pub drive_hold_power: u8,
    pub stepmodes: BTreeMap<String, StepModeConfig>,
}

fn default_hold_power() -> u8 {
    55
}

/// An output pin assignment. `pinno` of `-1` marks a hard-wired signal.
#[derive(Debug, Clone, Deserialize)]
pub struct OutPinConfig {
    pub pinno: i32,
    /// Swap the logic mapping of the pin's two named values.
    #[serde(default)]
    pub invert: bool,
    /// Initial value name; defaults to the logic-low name.
    #[serde(default)]
    pub value: Option<String>,
    /// Value driven on shutdown (pin stays an output); absent reverts the
    /// pin to input mode.
    #[serde(default)]
    pub close_value: Option<String>,
}

impl OutPinConfig {
    pub fn pin(pinno: i32) -> OutPinConfig {
        OutPinConfig {
            pinno,
            invert: false,
            value: None,
            close_value: None,
        }
    }
}

fn default_pulse_us() -> u32 {
    2
}

fn default_pulse1() -> bool {
    true
}

/// The step trigger pin.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerPinConfig {
    pub pinno: i32,
    /// Trigger pulse duration in microseconds.
    #[serde(default = "default_pulse_us")]
    pub pulse_us: u32,
    /// `true` pulses logic 1 and idles at 0; `false` the inverse.
    #[serde(default = "default_pulse1")]
    pub pulse1: bool,
}

/// Microstep control pins and the level table.
#[derive(Debug, Clone, Deserialize)]
pub struct UstepConfig {
    /// Pins selecting the level; may be empty when levels are hard-wired.
    #[serde(default)]
    pub pins: Vec<OutPinConfig>,
    pub levels: Vec<UstepLevelConfig>,
    /// Initial level name; defaults to the first entry.
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UstepLevelConfig {
    pub name: String,
    /// Microsteps per full motor step at this level.
    pub factor: u32,
    /// Logic level per pin in `pins`, same length.
    pub table: Vec<u8>,
}

/// A named step-mode: driver path, microstep level, and the interval
/// generator class with its parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "generator", rename_all = "snake_case")]
pub enum StepModeConfig {
    /// Fixed-rate generator.
    Onespeed {
        mode: DriverModeConfig,
        usteplevel: String,
        /// Full steps per second.
        steprate: f64,
    },
    /// Constant-slope ramping generator.
    Constacc {
        mode: DriverModeConfig,
        usteplevel: String,
        /// Start/stop rate in full steps per second.
        slow_tps: f64,
        /// Maximum rate in full steps per second.
        fast_tps: f64,
        /// Rate change in steps per second per second.
        slope: f64,
    },
}

impl StepModeConfig {
    pub fn usteplevel(&self) -> &str {
        match self {
            StepModeConfig::Onespeed { usteplevel, .. } => usteplevel,
            StepModeConfig::Constacc { usteplevel, .. } => usteplevel,
        }
    }

    pub fn mode(&self) -> DriverModeConfig {
        match self {
            StepModeConfig::Onespeed { mode, .. } => *mode,
            StepModeConfig::Constacc { mode, .. } => *mode,
        }
    }
}

/// Whether a step-mode drives the step pin from software or via DMA waves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverModeConfig {
    Software,
    Dma,
}

/// Builds the motor group: constructs every motor's driver and pins, wires
/// the step-modes, and validates the whole description.
pub fn build_group(
    engine: Arc<dyn DmaEngine>,
    config: &MotorSetConfig,
) -> Result<MotorGroup, ConfigError> {
    let mut motors = BTreeMap::new();
    for (name, motor_cfg) in &config.motors {
        let motor = build_motor(engine.clone(), name, motor_cfg)?;
        motors.insert(name.clone(), motor);
    }
    info!(motors = motors.len(), "motor set configured");
    MotorGroup::new(engine, motors, &config.wave).map_err(ConfigError::Engine)
}

fn build_motor(
    engine: Arc<dyn DmaEngine>,
    name: &str,
    cfg: &MotorConfig,
) -> Result<Arc<Motor>, ConfigError> {
    let driver: Arc<dyn StepDriver> = match cfg {
        MotorConfig::Chip(chip) => Arc::new(ChipDriver::new(engine, name, chip)?),
        MotorConfig::Direct(direct) => Arc::new(DirectDriver::new(engine, name, direct)?),
    };
    validate_step_modes(name, cfg, driver.as_ref())?;
    let mut modes = Vec::new();
    let shared = Motor::shared_state(name, driver.max_step_factor(), cfg.hold_stopped());
    for (mode_name, mode_cfg) in cfg.step_modes() {
        modes.push(Arc::new(StepMode::from_config(
            mode_name,
            mode_cfg,
            shared.clone(),
        )));
    }
    Ok(Motor::new(name, driver, shared, modes))
}

fn validate_step_modes(
    motor: &str,
    cfg: &MotorConfig,
    driver: &dyn StepDriver,
) -> Result<(), ConfigError> {
    for (mode_name, mode_cfg) in cfg.step_modes() {
        let level = mode_cfg.usteplevel();
        if driver.ustep_factor(level).is_none() {
            return Err(ConfigError::UnknownUstepLevel {
                motor: motor.to_string(),
                level: level.to_string(),
            });
        }
        let positive = |value: f64, field: &'static str| {
            if value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::NonPositive {
                    motor: motor.to_string(),
                    mode: mode_name.clone(),
                    field,
                })
            }
        };
        match mode_cfg {
            StepModeConfig::Onespeed { steprate, .. } => positive(*steprate, "steprate")?,
            StepModeConfig::Constacc {
                slow_tps,
                fast_tps,
                slope,
                ..
            } => {
                positive(*slow_tps, "slow_tps")?;
                positive(*fast_tps, "fast_tps")?;
                positive(*slope, "slope")?;
                if slow_tps > fast_tps {
                    return Err(ConfigError::RampRates {
                        motor: motor.to_string(),
                        mode: mode_name.clone(),
                        slow: *slow_tps,
                        fast: *fast_tps,
                    });
                }
            }
        }
    }
    Ok(())
}
