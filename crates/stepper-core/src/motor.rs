//! The motor core: command lifecycle, mode machine, and the software step
//! loop.
//!
//! A motor accepts a small number of commands:
//!
//! - `close`: shut the motor down; it cannot be used again.
//! - `stop`: wind down a running motor through its generator's ramp.
//! - `goto` / `one-goto`: travel to a target raw position (`goto` keeps
//!   monitoring the target afterwards, `one-goto` ends the run there).
//! - `run`: step in a target direction until stopped.
//! - `set-pos`: reset the position register while stopped.
//!
//! Step-modes bind a command to a driver path (software loop or DMA waves),
//! a microstep level, and an interval generator with live-editable
//! parameters. While a motor is running, new goto/run commands only update
//! the target cells; the running generator picks the changes up on its next
//! iteration.

use crate::config::{DriverModeConfig, StepModeConfig};
use crate::driver::StepDriver;
use crate::error::CommandError;
use crate::pulse::PulseGen;
use cells::{Agent, AgentSet, Cell};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use stepgen::{ConstAcc, Dir, IntervalGen, MotorView, OneSpeed, RunCommand, StepScale};
use tracing::{debug, error, info, warn};

/// Interval between observable position commits during a software run.
const POS_COMMIT_INTERVAL: Duration = Duration::from_millis(800);

/// Sleep applied when a goto is idling at its target.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// A motor's operation mode, set by the motor itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    /// Shut down; terminal.
    Closed,
    /// Not stepping. Drive current may still hold position.
    Stopped,
    /// A software step loop owns the motor.
    RunningSoft,
    /// A DMA pulse stream owns the motor.
    RunningDma,
}

impl std::fmt::Display for OpMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OpMode::Closed => "closed",
            OpMode::Stopped => "stopped",
            OpMode::RunningSoft => "running-soft",
            OpMode::RunningDma => "running-dma",
        })
    }
}

/// The observable state shared between a motor, its generators, and external
/// front ends.
pub struct MotorShared {
    pub name: Arc<str>,
    pub op_mode: Cell<OpMode>,
    /// Position in raw units (microsteps at the maximum microstep factor).
    /// Not fully current while a DMA run is in flight.
    pub raw_pos: Cell<i64>,
    pub target_raw_pos: Cell<i64>,
    pub target_dir: Cell<Dir>,
    /// Seconds of drive current after the last step; 0 never disables.
    pub hold_stopped: Cell<f64>,
    /// Name of the step-mode in use while running.
    pub active_step_mode: Cell<String>,
    /// Cumulative count of software step-loop deadline overruns.
    pub overruns: Cell<u64>,
    /// Cleared to end a running generator; it winds down and exits.
    pub step_active: AtomicBool,
    /// Tells the running generator to re-read targets and parameters.
    pub update_params: AtomicBool,
    pub max_step_factor: u32,
}

impl MotorShared {
    fn new(name: &str, max_step_factor: u32, hold_stopped: f64) -> MotorShared {
        MotorShared {
            name: Arc::from(name),
            op_mode: Cell::new(format!("{name}.op_mode"), OpMode::Stopped),
            raw_pos: Cell::new(format!("{name}.raw_pos"), 0),
            target_raw_pos: Cell::new(format!("{name}.target_raw_pos"), 0),
            target_dir: Cell::new(format!("{name}.target_dir"), Dir::Fwd),
            hold_stopped: Cell::with_validator(
                format!("{name}.hold_stopped"),
                hold_stopped,
                |v| {
                    if *v >= 0.0 {
                        Ok(())
                    } else {
                        Err("must not be negative".to_string())
                    }
                },
            ),
            active_step_mode: Cell::new(format!("{name}.active_step_mode"), "-".to_string()),
            overruns: Cell::new(format!("{name}.overruns"), 0),
            step_active: AtomicBool::new(false),
            update_params: AtomicBool::new(false),
            max_step_factor,
        }
    }

    fn flag_update(&self) {
        self.update_params.store(true, Ordering::Release);
    }
}

impl MotorView for MotorShared {
    fn step_active(&self) -> bool {
        self.step_active.load(Ordering::Acquire)
    }

    fn take_param_update(&self) -> bool {
        self.update_params.swap(false, Ordering::AcqRel)
    }

    fn target_raw_pos(&self) -> i64 {
        self.target_raw_pos.get()
    }

    fn target_dir(&self) -> Dir {
        self.target_dir.get()
    }
}

/// Generator parameters owned by a step-mode. Edits through these cells are
/// picked up by a running generator.
enum GenParams {
    OneSpeed {
        steprate: Arc<Cell<f64>>,
    },
    ConstAcc {
        slow_tps: Arc<Cell<f64>>,
        fast_tps: Arc<Cell<f64>>,
        slope: Arc<Cell<f64>>,
    },
}

/// A named step-mode: driver path, microstep level, generator parameters.
pub struct StepMode {
    pub name: String,
    pub driver_mode: DriverModeConfig,
    pub ustep_level: String,
    params: GenParams,
}

impl StepMode {
    /// Builds a step-mode from its configuration, wiring every parameter
    /// cell to raise the motor's update flag on change.
    pub(crate) fn from_config(
        name: &str,
        cfg: &StepModeConfig,
        shared: Arc<MotorShared>,
    ) -> StepMode {
        let motor = &shared.name;
        let param = |field: &str, value: f64| {
            let cell = Arc::new(Cell::with_validator(
                format!("{motor}.{name}.{field}"),
                value,
                |v: &f64| {
                    if *v > 0.0 {
                        Ok(())
                    } else {
                        Err("must be positive".to_string())
                    }
                },
            ));
            let flag = shared.clone();
            cell.subscribe(AgentSet::ALL, move |_, _, _| flag.flag_update());
            cell
        };
        let params = match cfg {
            StepModeConfig::Onespeed { steprate, .. } => GenParams::OneSpeed {
                steprate: param("steprate", *steprate),
            },
            StepModeConfig::Constacc {
                slow_tps,
                fast_tps,
                slope,
                ..
            } => GenParams::ConstAcc {
                slow_tps: param("slow_tps", *slow_tps),
                fast_tps: param("fast_tps", *fast_tps),
                slope: param("slope", *slope),
            },
        };
        StepMode {
            name: name.to_string(),
            driver_mode: cfg.mode(),
            ustep_level: cfg.usteplevel().to_string(),
            params,
        }
    }

    /// The step-mode's live parameter cells, by field name.
    pub fn param_cells(&self) -> Vec<(&'static str, Arc<Cell<f64>>)> {
        match &self.params {
            GenParams::OneSpeed { steprate } => vec![("steprate", steprate.clone())],
            GenParams::ConstAcc {
                slow_tps,
                fast_tps,
                slope,
            } => vec![
                ("slow_tps", slow_tps.clone()),
                ("fast_tps", fast_tps.clone()),
                ("slope", slope.clone()),
            ],
        }
    }

    fn make_generator(
        &self,
        shared: Arc<MotorShared>,
        command: RunCommand,
        initial_pos: i64,
        scale: StepScale,
    ) -> Box<dyn IntervalGen> {
        match &self.params {
            GenParams::OneSpeed { steprate } => Box::new(OneSpeed::new(
                shared,
                steprate.clone(),
                command,
                initial_pos,
                scale,
            )),
            GenParams::ConstAcc {
                slow_tps,
                fast_tps,
                slope,
            } => Box::new(ConstAcc::new(
                shared,
                slow_tps.clone(),
                fast_tps.clone(),
                slope.clone(),
                command,
                initial_pos,
                scale,
            )),
        }
    }
}

/// A command for [`Motor::do_this`].
#[derive(Debug, Clone)]
pub enum Command {
    None,
    Close,
    Stop,
    Goto { target: i64, step_mode: String },
    OneGoto { target: i64, step_mode: String },
    Run { dir: Dir, step_mode: String },
    SetPos { pos: i64 },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::None => "none",
            Command::Close => "close",
            Command::Stop => "stop",
            Command::Goto { .. } => "goto",
            Command::OneGoto { .. } => "one-goto",
            Command::Run { .. } => "run",
            Command::SetPos { .. } => "set-pos",
        }
    }
}

/// What a successfully dispatched command produced.
pub enum Dispatch {
    /// Handled (possibly by spawning a software step loop).
    Done,
    /// A DMA pulse stream; the caller owns scheduling it and must move the
    /// motor to [`OpMode::RunningDma`].
    Wave(PulseGen),
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Done => f.write_str("Dispatch::Done"),
            Dispatch::Wave(_) => f.write_str("Dispatch::Wave(..)"),
        }
    }
}

/// One stepper motor.
pub struct Motor {
    name: Arc<str>,
    driver: Arc<dyn StepDriver>,
    shared: Arc<MotorShared>,
    step_modes: Vec<Arc<StepMode>>,
    step_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Motor {
    /// Creates the observable state block for a motor under construction.
    pub(crate) fn shared_state(
        name: &str,
        max_step_factor: u32,
        hold_stopped: f64,
    ) -> Arc<MotorShared> {
        let shared = Arc::new(MotorShared::new(name, max_step_factor, hold_stopped));
        // Target edits from any agent reach a running generator.
        let flag = shared.clone();
        shared
            .target_raw_pos
            .subscribe(AgentSet::ALL, move |_, _, _| flag.flag_update());
        let flag = shared.clone();
        shared
            .target_dir
            .subscribe(AgentSet::ALL, move |_, _, _| flag.flag_update());
        shared
    }

    pub(crate) fn new(
        name: &str,
        driver: Arc<dyn StepDriver>,
        shared: Arc<MotorShared>,
        step_modes: Vec<Arc<StepMode>>,
    ) -> Arc<Motor> {
        info!(
            motor = name,
            max_step_factor = driver.max_step_factor(),
            step_modes = step_modes.len(),
            "motor ready"
        );
        Arc::new(Motor {
            name: Arc::from(name),
            driver,
            shared,
            step_modes,
            step_thread: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &Arc<MotorShared> {
        &self.shared
    }

    pub fn step_mode(&self, name: &str) -> Option<&Arc<StepMode>> {
        self.step_modes.iter().find(|m| m.name == name)
    }

    pub fn step_mode_names(&self) -> Vec<String> {
        self.step_modes.iter().map(|m| m.name.clone()).collect()
    }

    pub(crate) fn driver(&self) -> &Arc<dyn StepDriver> {
        &self.driver
    }

    /// Dispatches a command. Precondition failures leave motor state
    /// untouched.
    pub fn do_this(self: &Arc<Self>, command: Command) -> Result<Dispatch, CommandError> {
        let mode = self.shared.op_mode.get();
        if mode == OpMode::Closed && !matches!(command, Command::None) {
            return Err(CommandError::Closed(self.name.to_string()));
        }
        match command {
            Command::None => Ok(Dispatch::Done),
            Command::Close => {
                self.shared.step_active.store(false, Ordering::Release);
                self.join_step_thread();
                if let Err(err) = self.driver.set_enabled(false) {
                    warn!(motor = %self.name, %err, "drive disable failed on close");
                }
                if let Err(err) = self.driver.shutdown() {
                    warn!(motor = %self.name, %err, "pin shutdown failed on close");
                }
                let _ = self.shared.op_mode.set(OpMode::Closed, Agent::App);
                info!(motor = %self.name, "closed");
                Ok(Dispatch::Done)
            }
            Command::Stop => {
                if matches!(mode, OpMode::RunningSoft | OpMode::RunningDma) {
                    debug!(motor = %self.name, "stop requested");
                    self.shared.step_active.store(false, Ordering::Release);
                }
                Ok(Dispatch::Done)
            }
            Command::SetPos { pos } => {
                if mode != OpMode::Stopped {
                    return Err(CommandError::NotStopped {
                        motor: self.name.to_string(),
                        command: "set-pos",
                        mode,
                    });
                }
                let _ = self.shared.raw_pos.set(pos, Agent::App);
                Ok(Dispatch::Done)
            }
            Command::Goto { target, step_mode } => {
                self.movement(mode, RunCommand::Goto, Some(target), None, step_mode, "goto")
            }
            Command::OneGoto { target, step_mode } => self.movement(
                mode,
                RunCommand::OneGoto,
                Some(target),
                None,
                step_mode,
                "one-goto",
            ),
            Command::Run { dir, step_mode } => {
                self.movement(mode, RunCommand::Run, None, Some(dir), step_mode, "run")
            }
        }
    }

    fn movement(
        self: &Arc<Self>,
        mode: OpMode,
        command: RunCommand,
        target: Option<i64>,
        dir: Option<Dir>,
        step_mode: String,
        verb: &'static str,
    ) -> Result<Dispatch, CommandError> {
        if matches!(mode, OpMode::RunningSoft | OpMode::RunningDma) {
            // Live retarget: the running generator picks this up.
            if let Some(target) = target {
                let _ = self.shared.target_raw_pos.set(target, Agent::App);
            }
            if let Some(dir) = dir {
                let _ = self.shared.target_dir.set(dir, Agent::App);
            }
            self.shared.flag_update();
            return Ok(Dispatch::Done);
        }
        if mode != OpMode::Stopped {
            return Err(CommandError::NotStopped {
                motor: self.name.to_string(),
                command: verb,
                mode,
            });
        }
        let step_mode = self
            .step_mode(&step_mode)
            .cloned()
            .ok_or_else(|| CommandError::UnknownStepMode {
                motor: self.name.to_string(),
                mode: step_mode.clone(),
            })?;
        // Validated at configuration time; the level is in the table.
        let factor = self
            .driver
            .ustep_factor(&step_mode.ustep_level)
            .unwrap_or(1);
        let scale = StepScale::new(factor, self.driver.max_step_factor());

        if let Some(target) = target {
            let _ = self.shared.target_raw_pos.set(target, Agent::App);
        }
        if let Some(dir) = dir {
            let _ = self.shared.target_dir.set(dir, Agent::App);
        }
        self.shared.step_active.store(true, Ordering::Release);
        self.shared.flag_update();
        let _ = self
            .shared
            .active_step_mode
            .set(step_mode.name.clone(), Agent::App);
        let gen =
            step_mode.make_generator(self.shared.clone(), command, self.shared.raw_pos.get(), scale);

        match step_mode.driver_mode {
            DriverModeConfig::Software => {
                let _ = self.shared.op_mode.set(OpMode::RunningSoft, Agent::App);
                info!(motor = %self.name, step_mode = %step_mode.name, verb, "software run starts");
                let motor = self.clone();
                let handle = std::thread::Builder::new()
                    .name(format!("{}_softrun", self.name))
                    .spawn(move || motor.soft_run(gen, command, step_mode))
                    .map_err(|err| {
                        let _ = self.shared.op_mode.set(OpMode::Stopped, Agent::App);
                        CommandError::Engine(pigpiod_client::PigpioError::Io(err))
                    })?;
                *self.step_thread.lock() = Some(handle);
                Ok(Dispatch::Done)
            }
            DriverModeConfig::Dma => {
                info!(motor = %self.name, step_mode = %step_mode.name, verb, "dma pulse stream prepared");
                let pulses =
                    self.driver
                        .pulse_gen(self.shared.clone(), &step_mode.ustep_level, gen)?;
                Ok(Dispatch::Wave(pulses))
            }
        }
    }

    /// The software step loop. Runs on its own thread until the generator
    /// ends, then commits the final position and returns the motor to
    /// `stopped`.
    fn soft_run(self: Arc<Self>, mut gen: Box<dyn IntervalGen>, command: RunCommand, mode: Arc<StepMode>) {
        let shared = &self.shared;
        let driver = &self.driver;
        let started = Instant::now();
        let mut overruns = 0u64;
        let mut overrun_time = Duration::ZERO;
        let mut ticks = 0u64;

        let outcome = (|| -> Result<(), pigpiod_client::PigpioError> {
            driver.begin_soft_run(&mode.ustep_level)?;
            driver.set_enabled(true)?;
            let mut next_tick = Instant::now();
            let mut next_commit = next_tick + POS_COMMIT_INTERVAL;
            let mut stopped_since: Option<Instant> = None;
            let mut drive_off = false;

            loop {
                match gen.next_tick() {
                    None => break,
                    Some(stepgen::TickItem::DirSet { dir, interval }) => {
                        driver.direction_set(dir)?;
                        next_tick += Duration::from_secs_f64(interval);
                    }
                    Some(stepgen::TickItem::Step { interval }) => {
                        if drive_off {
                            driver.set_enabled(true)?;
                            drive_off = false;
                        }
                        stopped_since = None;
                        driver.step_trigger()?;
                        ticks += 1;
                        next_tick += Duration::from_secs_f64(interval);
                    }
                    Some(stepgen::TickItem::Idle) => {
                        let hold = shared.hold_stopped.get();
                        if hold > 0.0 {
                            match stopped_since {
                                None => stopped_since = Some(Instant::now()),
                                Some(since) => {
                                    if !drive_off && since.elapsed().as_secs_f64() >= hold {
                                        driver.set_enabled(false)?;
                                        drive_off = true;
                                        info!(motor = %self.name, "drive current off while idle");
                                    }
                                }
                            }
                        }
                        next_tick += IDLE_POLL;
                    }
                }
                let now = Instant::now();
                if now >= next_commit {
                    let _ = shared.raw_pos.set(gen.position(), Agent::App);
                    next_commit += POS_COMMIT_INTERVAL;
                }
                if next_tick > now {
                    std::thread::sleep(next_tick - now);
                } else {
                    overruns += 1;
                    overrun_time += now - next_tick;
                }
            }
            Ok(())
        })();
        if let Err(err) = outcome {
            error!(motor = %self.name, %err, "software run aborted");
        }

        let _ = shared.raw_pos.set(gen.position(), Agent::App);
        let _ = shared
            .overruns
            .set(shared.overruns.get() + overruns, Agent::App);
        if let Err(err) = driver.end_stepping() {
            warn!(motor = %self.name, %err, "end_stepping failed");
        }
        shared.step_active.store(false, Ordering::Release);
        if shared.op_mode.get() != OpMode::Closed {
            let _ = shared.op_mode.set(OpMode::Stopped, Agent::App);
        }
        info!(
            motor = %self.name,
            command = ?command,
            pos = gen.position(),
            ticks,
            overruns,
            overrun_ms = overrun_time.as_millis() as u64,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "software run complete"
        );
    }

    /// Called by the group scheduler when a wave carries this motor's
    /// terminal record: reset outputs and return to `stopped`.
    pub(crate) fn finish_dma_run(&self) {
        if let Err(err) = self.driver.end_stepping() {
            warn!(motor = %self.name, %err, "end_stepping failed");
        }
        self.shared.step_active.store(false, Ordering::Release);
        if self.shared.op_mode.get() != OpMode::Closed {
            let _ = self.shared.op_mode.set(OpMode::Stopped, Agent::App);
        }
        debug!(motor = %self.name, "dma run finished");
    }

    fn join_step_thread(&self) {
        if let Some(handle) = self.step_thread.lock().take() {
            if handle.join().is_err() {
                error!(motor = %self.name, "step loop panicked");
            }
        }
    }

    /// Blocks until a software step loop (if any) has wound down.
    pub fn wait_stop(&self) {
        self.join_step_thread();
    }
}
