//! Motor lifecycle tests: the software step loop, command preconditions,
//! and close semantics, against the simulated engine.

mod common;

use common::*;
use sim::MockDma;
use std::time::Duration;
use stepgen::Dir;
use stepper_core::{Command, Dispatch, OpMode};

#[test]
fn software_one_goto_steps_to_target_and_stops() {
    let engine = MockDma::new();
    let group = group_with(engine.clone(), &one_motor_config());
    let motor = group.motor("m1").unwrap().clone();

    // "soft" runs at factor 16 (pos delta 1) and 200 steps/s: 40 steps is
    // a handful of milliseconds of wall clock.
    match motor
        .do_this(Command::OneGoto {
            target: 40,
            step_mode: "soft".to_string(),
        })
        .expect("run starts")
    {
        Dispatch::Done => {}
        Dispatch::Wave(_) => panic!("software mode must not produce a pulse stream"),
    }
    assert_eq!(motor.state().op_mode.get(), OpMode::RunningSoft);

    assert!(wait_until(Duration::from_secs(5), || {
        motor.state().op_mode.get() == OpMode::Stopped
    }));
    assert_eq!(motor.state().raw_pos.get(), 40);
    assert_eq!(engine.triggers().len(), 40);
    // Every trigger pulsed the step pin.
    assert!(engine.triggers().iter().all(|(pin, _, _)| *pin == STEP_PIN));
    // end_stepping disabled the active-low drive again.
    assert_eq!(engine.pin_level(ENABLE_PIN), Some(1));
}

#[test]
fn software_run_winds_down_on_stop() {
    let engine = MockDma::new();
    let group = group_with(engine.clone(), &one_motor_config());
    let motor = group.motor("m1").unwrap().clone();

    motor
        .do_this(Command::Run {
            dir: Dir::Fwd,
            step_mode: "soft".to_string(),
        })
        .expect("run starts");
    assert!(wait_until(Duration::from_secs(5), || {
        !engine.triggers().is_empty()
    }));
    motor.do_this(Command::Stop).expect("stop accepted");
    // Stopping twice is the same as stopping once.
    motor.do_this(Command::Stop).expect("stop is idempotent");

    assert!(wait_until(Duration::from_secs(5), || {
        motor.state().op_mode.get() == OpMode::Stopped
    }));
    let steps = engine.triggers().len() as i64;
    assert!(steps > 0);
    assert_eq!(motor.state().raw_pos.get(), steps);
}

#[test]
fn running_goto_retargets_without_restart() {
    let engine = MockDma::new();
    let group = group_with(engine, &one_motor_config());
    let motor = group.motor("m1").unwrap().clone();

    // Plain goto at its target: the loop idles and keeps watching.
    motor
        .do_this(Command::Goto {
            target: 0,
            step_mode: "soft".to_string(),
        })
        .expect("run starts");
    assert!(wait_until(Duration::from_secs(5), || {
        motor.state().op_mode.get() == OpMode::RunningSoft
    }));

    // A second goto while running only moves the target.
    motor
        .do_this(Command::Goto {
            target: 24,
            step_mode: "soft".to_string(),
        })
        .expect("retarget accepted");
    assert_eq!(motor.state().op_mode.get(), OpMode::RunningSoft);
    assert!(wait_until(Duration::from_secs(5), || {
        motor.state().raw_pos.get() == 24
    }));

    motor.do_this(Command::Stop).expect("stop accepted");
    assert!(wait_until(Duration::from_secs(5), || {
        motor.state().op_mode.get() == OpMode::Stopped
    }));
    assert_eq!(motor.state().raw_pos.get(), 24);
}

#[test]
fn set_pos_requires_stopped() {
    let engine = MockDma::new();
    let group = group_with(engine, &one_motor_config());
    let motor = group.motor("m1").unwrap().clone();

    motor
        .do_this(Command::SetPos { pos: -500 })
        .expect("set-pos while stopped");
    assert_eq!(motor.state().raw_pos.get(), -500);
    // Idempotent.
    motor
        .do_this(Command::SetPos { pos: -500 })
        .expect("set-pos again");
    assert_eq!(motor.state().raw_pos.get(), -500);

    motor
        .do_this(Command::Run {
            dir: Dir::Fwd,
            step_mode: "soft".to_string(),
        })
        .expect("run starts");
    let err = motor
        .do_this(Command::SetPos { pos: 0 })
        .expect_err("set-pos while running is rejected");
    assert!(err.to_string().contains("must be stopped"));
    // The register is untouched by the failed command.
    motor.do_this(Command::Stop).expect("stop accepted");
    assert!(wait_until(Duration::from_secs(5), || {
        motor.state().op_mode.get() == OpMode::Stopped
    }));
}

#[test]
fn closed_motor_rejects_everything_but_none() {
    let engine = MockDma::new();
    let group = group_with(engine.clone(), &one_motor_config());
    let motor = group.motor("m1").unwrap().clone();

    motor.do_this(Command::Close).expect("close accepted");
    assert_eq!(motor.state().op_mode.get(), OpMode::Closed);
    // Pins were released: the step pin reverted to input mode.
    assert_eq!(
        engine.pin_mode(STEP_PIN),
        Some(pigpiod_client::PinMode::Input)
    );

    motor.do_this(Command::None).expect("none is always a no-op");
    let pos_before = motor.state().raw_pos.get();
    for command in [
        Command::Stop,
        Command::Close,
        Command::SetPos { pos: 1 },
        Command::Goto {
            target: 10,
            step_mode: "soft".to_string(),
        },
    ] {
        let err = motor.do_this(command).expect_err("closed is terminal");
        assert!(err.to_string().contains("closed"));
    }
    assert_eq!(motor.state().raw_pos.get(), pos_before);
}

#[test]
fn unknown_step_mode_is_rejected() {
    let engine = MockDma::new();
    let group = group_with(engine, &one_motor_config());
    let motor = group.motor("m1").unwrap().clone();
    let err = motor
        .do_this(Command::Run {
            dir: Dir::Rev,
            step_mode: "warp".to_string(),
        })
        .expect_err("unknown step mode");
    assert!(err.to_string().contains("unknown step mode"));
    assert_eq!(motor.state().op_mode.get(), OpMode::Stopped);
}

#[test]
fn close_while_running_winds_down_first() {
    let engine = MockDma::new();
    let group = group_with(engine, &one_motor_config());
    let motor = group.motor("m1").unwrap().clone();

    motor
        .do_this(Command::Run {
            dir: Dir::Fwd,
            step_mode: "soft".to_string(),
        })
        .expect("run starts");
    motor.do_this(Command::Close).expect("close accepted");
    assert_eq!(motor.state().op_mode.get(), OpMode::Closed);
}
