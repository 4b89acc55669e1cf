//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};
use stepper_core::{build_group, MotorGroup, MotorSetConfig};

/// Broadcom pin numbers used by the test motor set.
pub const ENABLE_PIN: u32 = 23;
pub const DIR_PIN: u32 = 24;
pub const STEP_PIN: u32 = 18;
pub const STEP_PIN_2: u32 = 19;

/// A chip-driven motor with a 1/2/16 microstep table (`max_step_factor` 16)
/// and both software and DMA step-modes.
pub fn chip_motor_json(step_pin: u32) -> String {
    format!(
        r#"{{
            "driver": "chip",
            "drive_enable": {{"pinno": {ENABLE_PIN}}},
            "direction": {{"pinno": {DIR_PIN}}},
            "step": {{"pinno": {step_pin}, "pulse_us": 2}},
            "microsteps": {{
                "pins": [{{"pinno": 14}}, {{"pinno": 15}}],
                "levels": [
                    {{"name": "full", "factor": 1, "table": [0, 0]}},
                    {{"name": "half", "factor": 2, "table": [1, 0]}},
                    {{"name": "sixteenth", "factor": 16, "table": [1, 1]}}
                ]
            }},
            "stepmodes": {{
                "soft": {{"generator": "onespeed", "mode": "software",
                          "usteplevel": "sixteenth", "steprate": 200.0}},
                "fast": {{"generator": "onespeed", "mode": "dma",
                          "usteplevel": "half", "steprate": 100.0}},
                "ramp": {{"generator": "constacc", "mode": "dma",
                          "usteplevel": "half", "slow_tps": 100.0,
                          "fast_tps": 1000.0, "slope": 500.0}}
            }}
        }}"#
    )
}

pub fn one_motor_config() -> MotorSetConfig {
    let json = format!(r#"{{"motors": {{"m1": {}}}}}"#, chip_motor_json(STEP_PIN));
    MotorSetConfig::from_json(&json).expect("test config parses")
}

pub fn two_motor_config() -> MotorSetConfig {
    let json = format!(
        r#"{{"motors": {{"m1": {}, "m2": {}}}}}"#,
        chip_motor_json(STEP_PIN),
        chip_motor_json(STEP_PIN_2)
    );
    MotorSetConfig::from_json(&json).expect("test config parses")
}

pub fn group_with(engine: Arc<sim::MockDma>, config: &MotorSetConfig) -> MotorGroup {
    build_group(engine, config).expect("test group builds")
}

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}
