//! Configuration validation: every inconsistency fails the bootstrap before
//! any motor thread exists.

mod common;

use common::*;
use sim::MockDma;
use stepper_core::{build_group, ConfigError, MotorSetConfig};

fn chip_with_stepmode(stepmode: &str) -> String {
    format!(
        r#"{{
            "motors": {{
                "m1": {{
                    "driver": "chip",
                    "drive_enable": {{"pinno": 23}},
                    "direction": {{"pinno": 24}},
                    "step": {{"pinno": 18}},
                    "microsteps": {{
                        "pins": [{{"pinno": 14}}, {{"pinno": 15}}],
                        "levels": [
                            {{"name": "full", "factor": 1, "table": [0, 0]}},
                            {{"name": "half", "factor": 2, "table": [1, 0]}}
                        ]
                    }},
                    "stepmodes": {{ "mode1": {stepmode} }}
                }}
            }}
        }}"#
    )
}

#[test]
fn unknown_microstep_level_fails_startup() {
    let json = chip_with_stepmode(
        r#"{"generator": "onespeed", "mode": "dma", "usteplevel": "quarter", "steprate": 10.0}"#,
    );
    let config = MotorSetConfig::from_json(&json).expect("syntax is fine");
    let err = build_group(MockDma::new(), &config).expect_err("level must exist");
    assert!(matches!(err, ConfigError::UnknownUstepLevel { .. }));
    assert!(err.to_string().contains("quarter"));
}

#[test]
fn unknown_generator_class_fails_parse() {
    let json = chip_with_stepmode(
        r#"{"generator": "warp", "mode": "dma", "usteplevel": "half", "steprate": 10.0}"#,
    );
    let err = MotorSetConfig::from_json(&json).expect_err("unknown generator class");
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn missing_parameter_fails_parse() {
    let json = chip_with_stepmode(r#"{"generator": "onespeed", "mode": "dma", "usteplevel": "half"}"#);
    assert!(MotorSetConfig::from_json(&json).is_err());
}

#[test]
fn inverted_ramp_rates_fail_startup() {
    let json = chip_with_stepmode(
        r#"{"generator": "constacc", "mode": "software", "usteplevel": "half",
            "slow_tps": 500.0, "fast_tps": 100.0, "slope": 50.0}"#,
    );
    let config = MotorSetConfig::from_json(&json).expect("syntax is fine");
    let err = build_group(MockDma::new(), &config).expect_err("slow must not exceed fast");
    assert!(matches!(err, ConfigError::RampRates { .. }));
}

#[test]
fn non_positive_rate_fails_startup() {
    let json = chip_with_stepmode(
        r#"{"generator": "onespeed", "mode": "software", "usteplevel": "half", "steprate": 0.0}"#,
    );
    let config = MotorSetConfig::from_json(&json).expect("syntax is fine");
    let err = build_group(MockDma::new(), &config).expect_err("rate must be positive");
    assert!(matches!(err, ConfigError::NonPositive { .. }));
}

#[test]
fn microstep_table_width_is_checked() {
    let json = r#"{
        "motors": {
            "m1": {
                "driver": "chip",
                "drive_enable": {"pinno": 23},
                "direction": {"pinno": 24},
                "step": {"pinno": 18},
                "microsteps": {
                    "pins": [{"pinno": 14}, {"pinno": 15}],
                    "levels": [{"name": "full", "factor": 1, "table": [0]}]
                },
                "stepmodes": {}
            }
        }
    }"#;
    let config = MotorSetConfig::from_json(json).expect("syntax is fine");
    let err = build_group(MockDma::new(), &config).expect_err("table width mismatch");
    assert!(matches!(err, ConfigError::UstepTableMismatch { .. }));
}

#[test]
fn wave_limit_cells_enforce_their_ranges() {
    let engine = MockDma::new();
    let group = group_with(engine, &one_motor_config());
    // Defaults from the wave section.
    assert_eq!(group.state().max_pulses_per_wave.get(), 1000);
    assert_eq!(group.state().max_wave_micros.get(), 500_000);
    assert_eq!(group.state().max_pending_waves.get(), 3);
    // Engine maxima were queried at construction.
    assert!(group.state().engine_max_pulses.get() > 0);

    assert!(group
        .state()
        .max_pending_waves
        .set(1, cells::Agent::User)
        .is_err());
    assert!(group
        .state()
        .max_wave_micros
        .set(500, cells::Agent::User)
        .is_err());
    assert!(group
        .state()
        .max_wave_micros
        .set(250_000, cells::Agent::User)
        .is_ok());
}

#[test]
fn hardwired_pins_produce_zero_masks() {
    // Pin -1 signals are hard-wired: construction succeeds and DMA setup
    // records simply omit their bits.
    let json = r#"{
        "motors": {
            "m1": {
                "driver": "chip",
                "drive_enable": {"pinno": -1},
                "direction": {"pinno": 24},
                "step": {"pinno": 18},
                "microsteps": {
                    "pins": [],
                    "levels": [{"name": "full", "factor": 1, "table": []}]
                },
                "stepmodes": {
                    "fast": {"generator": "onespeed", "mode": "dma",
                             "usteplevel": "full", "steprate": 100.0}
                }
            }
        }
    }"#;
    let config = MotorSetConfig::from_json(json).expect("config parses");
    let engine = MockDma::new();
    let group = group_with(engine, &config);
    let motor = group.motor("m1").unwrap();
    let stepper_core::Dispatch::Wave(stream) = motor
        .do_this(stepper_core::Command::OneGoto {
            target: 4,
            step_mode: "fast".to_string(),
        })
        .expect("dispatch succeeds")
    else {
        panic!("expected a DMA pulse stream");
    };
    let records: Vec<_> = stream.collect();
    let enable_bit = 1u32 << 23;
    assert!(records
        .iter()
        .all(|r| r.gpio_on & enable_bit == 0 && r.gpio_off & enable_bit == 0));
    assert_eq!(records.last().unwrap().raw_pos, 4);
}
