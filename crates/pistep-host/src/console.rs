//! The interactive motor console.
//!
//! A line-oriented command surface over the motor group's observable cells:
//! movement commands, live parameter edits (applied as agent `user`, so app
//! subscriptions can tell them apart), and state snapshots. This is the
//! process's stand-in for an external UI layer.

use anyhow::Result;
use cells::{Agent, AgentSet};
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::io::BufRead;
use std::time::Duration;
use stepgen::Dir;
use stepper_core::{Command, GroupMode, Motor, MotorGroup};
use tracing::info;

const HELP: &str = "\
commands:
  status                           show group and motor state
  goto <motor> <pos> <stepmode>    travel to a raw position (keeps tracking)
  onegoto <motor> <pos> <stepmode> travel to a raw position, then stop
  run <motor> fwd|rev <stepmode>   run until stopped
  stop <motor> | stopall           wind a run down through its ramp
  setpos <motor> <pos>             reset the position register (stopped only)
  set <motor> <cell> <value>       edit a cell (hold_stopped, target_raw_pos,
                                   target_dir, or <stepmode>.<param>)
  quit                             stop everything and exit";

/// Runs the console until `quit` or end of input.
pub fn run(group: &MotorGroup) -> Result<()> {
    watch_motors(group);
    println!("{HELP}");

    // Stdin is read on its own thread so the console loop stays responsive
    // and can be extended with other event sources.
    let (tx, rx) = bounded::<String>(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(line) => {
                let words: Vec<&str> = line.split_whitespace().collect();
                if words.is_empty() {
                    continue;
                }
                if words[0] == "quit" {
                    return Ok(());
                }
                if let Err(err) = dispatch(group, &words) {
                    println!("error: {err}");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

/// Logs motor mode changes made by the engine, the way a UI would subscribe.
fn watch_motors(group: &MotorGroup) {
    for motor in group.motors() {
        let name = motor.name().to_string();
        motor
            .state()
            .op_mode
            .subscribe(AgentSet::APP, move |_, new, _| {
                info!(motor = %name, mode = %new, "mode change");
            });
    }
}

fn dispatch(group: &MotorGroup, words: &[&str]) -> Result<()> {
    match words {
        ["help"] => println!("{HELP}"),
        ["status"] => status(group),
        ["goto", motor, pos, mode] => {
            movement(
                group,
                motor,
                Command::Goto {
                    target: pos.parse()?,
                    step_mode: mode.to_string(),
                },
            )?;
        }
        ["onegoto", motor, pos, mode] => {
            movement(
                group,
                motor,
                Command::OneGoto {
                    target: pos.parse()?,
                    step_mode: mode.to_string(),
                },
            )?;
        }
        ["run", motor, dir, mode] => {
            let dir = match *dir {
                "fwd" => Dir::Fwd,
                "rev" => Dir::Rev,
                other => anyhow::bail!("direction must be fwd or rev, not {other:?}"),
            };
            movement(
                group,
                motor,
                Command::Run {
                    dir,
                    step_mode: mode.to_string(),
                },
            )?;
        }
        ["stop", motor] => {
            find(group, motor)?.do_this(Command::Stop)?;
        }
        ["stopall"] => {
            for motor in group.motors() {
                motor.do_this(Command::Stop)?;
            }
        }
        ["setpos", motor, pos] => {
            find(group, motor)?.do_this(Command::SetPos { pos: pos.parse()? })?;
        }
        ["set", motor, cell, value] => set_cell(group, motor, cell, value)?,
        _ => println!("unrecognised command; try 'help'"),
    }
    Ok(())
}

fn find<'a>(group: &'a MotorGroup, name: &str) -> Result<&'a std::sync::Arc<Motor>> {
    group
        .motor(name)
        .ok_or_else(|| anyhow::anyhow!("unknown motor {name:?}"))
}

/// Routes a movement command: live retargets go straight to the motor, new
/// runs go through the group so DMA streams get scheduled.
fn movement(group: &MotorGroup, motor: &str, command: Command) -> Result<()> {
    if group.state().mode.get() == GroupMode::DmaStepping {
        find(group, motor)?.do_this(command)?;
    } else {
        group.run_fast(vec![(motor.to_string(), command)])?;
    }
    Ok(())
}

fn set_cell(group: &MotorGroup, motor: &str, cell: &str, value: &str) -> Result<()> {
    let motor = find(group, motor)?;
    match cell {
        "hold_stopped" => {
            motor.state().hold_stopped.set(value.parse()?, Agent::User)?;
        }
        "target_raw_pos" => {
            motor
                .state()
                .target_raw_pos
                .set(value.parse()?, Agent::User)?;
        }
        "target_dir" => {
            let dir = match value {
                "fwd" => Dir::Fwd,
                "rev" => Dir::Rev,
                other => anyhow::bail!("direction must be fwd or rev, not {other:?}"),
            };
            motor.state().target_dir.set(dir, Agent::User)?;
        }
        // "<stepmode>.<param>" edits a generator parameter cell.
        dotted => {
            let Some((mode_name, param)) = dotted.split_once('.') else {
                anyhow::bail!("unknown cell {dotted:?}");
            };
            let mode = motor
                .step_mode(mode_name)
                .ok_or_else(|| anyhow::anyhow!("unknown step mode {mode_name:?}"))?;
            let cell = mode
                .param_cells()
                .into_iter()
                .find(|(name, _)| *name == param)
                .map(|(_, cell)| cell)
                .ok_or_else(|| anyhow::anyhow!("unknown parameter {param:?}"))?;
            cell.set(value.parse()?, Agent::User)?;
        }
    }
    Ok(())
}

fn status(group: &MotorGroup) {
    println!("group: {}", group.state().mode.get());
    for motor in group.motors() {
        let state = motor.state();
        println!(
            "  {:10} {:12} pos {:8} target {:8} step-mode {} overruns {}",
            motor.name(),
            state.op_mode.get().to_string(),
            state.raw_pos.get(),
            state.target_raw_pos.get(),
            state.active_step_mode.get(),
            state.overruns.get(),
        );
    }
}
