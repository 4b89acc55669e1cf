//! Blocking TCP client for the pigpio daemon.

use crate::codec::{self, HEADER_LEN};
use crate::commands::{Cmd, SUBCMD_CURRENT, SUBCMD_MAX};
use crate::error::PigpioError;
use crate::{DmaEngine, PinMode, TxMode, WaveId, WavePulse, NO_WAVE};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::TcpStream;
use tracing::{debug, info};

/// Default daemon address on the local machine.
pub const DEFAULT_ADDR: &str = "127.0.0.1:8888";

/// A connection to `pigpiod`.
///
/// The daemon processes one command per request on a connection, so the
/// stream is serialised behind a mutex; callers on any thread see a
/// consistent request/response pairing.
pub struct PigpiodClient {
    stream: Mutex<TcpStream>,
    addr: String,
}

impl PigpiodClient {
    /// Connects to the daemon at `addr` (see [`DEFAULT_ADDR`]).
    pub fn connect(addr: &str) -> Result<Self, PigpioError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        info!(addr, "connected to pigpiod");
        Ok(PigpiodClient {
            stream: Mutex::new(stream),
            addr: addr.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Sends one command and returns the daemon's signed result word.
    fn command(
        &self,
        cmd: Cmd,
        name: &'static str,
        p1: u32,
        p2: u32,
        ext: &[u8],
    ) -> Result<i32, PigpioError> {
        let mut stream = self.stream.lock();
        let header = codec::encode_request_ext_len(cmd, p1, p2, ext.len() as u32);
        stream.write_all(&header)?;
        if !ext.is_empty() {
            stream.write_all(ext)?;
        }
        let mut reply = [0u8; HEADER_LEN];
        stream.read_exact(&mut reply)?;
        drop(stream);
        let result = codec::decode_response(cmd, &reply).map_err(|echoed| {
            PigpioError::Protocol(format!(
                "reply command {echoed} does not match request {name}"
            ))
        })?;
        debug!(cmd = name, p1, p2, result, "pigpiod command");
        Ok(result)
    }

    /// As [`Self::command`], but maps negative results to daemon errors.
    fn checked(
        &self,
        cmd: Cmd,
        name: &'static str,
        p1: u32,
        p2: u32,
        ext: &[u8],
    ) -> Result<u32, PigpioError> {
        let result = self.command(cmd, name, p1, p2, ext)?;
        if result < 0 {
            return Err(PigpioError::daemon(name, result));
        }
        Ok(result as u32)
    }
}

impl DmaEngine for PigpiodClient {
    fn set_mode(&self, gpio: u32, mode: PinMode) -> Result<(), PigpioError> {
        let mode = match mode {
            PinMode::Input => 0,
            PinMode::Output => 1,
        };
        self.checked(Cmd::Modes, "set_mode", gpio, mode, &[])?;
        Ok(())
    }

    fn write(&self, gpio: u32, level: u8) -> Result<(), PigpioError> {
        self.checked(Cmd::Write, "write", gpio, level as u32, &[])?;
        Ok(())
    }

    fn set_pwm_dutycycle(&self, gpio: u32, duty: u8) -> Result<(), PigpioError> {
        self.checked(Cmd::Pwm, "set_pwm_dutycycle", gpio, duty as u32, &[])?;
        Ok(())
    }

    fn gpio_trigger(&self, gpio: u32, pulse_us: u32, level: u8) -> Result<(), PigpioError> {
        let ext = (level as u32).to_le_bytes();
        self.checked(Cmd::Trig, "gpio_trigger", gpio, pulse_us, &ext)?;
        Ok(())
    }

    fn wave_clear(&self) -> Result<(), PigpioError> {
        self.checked(Cmd::WvClr, "wave_clear", 0, 0, &[])?;
        Ok(())
    }

    fn wave_add_generic(&self, pulses: &[WavePulse]) -> Result<u32, PigpioError> {
        let ext = codec::encode_pulses(pulses);
        self.checked(Cmd::WvAg, "wave_add_generic", 0, 0, &ext)
    }

    fn wave_create(&self) -> Result<WaveId, PigpioError> {
        self.checked(Cmd::WvCre, "wave_create", 0, 0, &[])
    }

    fn wave_create_and_pad(&self, percent: u32) -> Result<WaveId, PigpioError> {
        self.checked(Cmd::WvCap, "wave_create_and_pad", percent, 0, &[])
    }

    fn wave_send_using_mode(&self, wave: WaveId, mode: TxMode) -> Result<u32, PigpioError> {
        self.checked(Cmd::WvTxm, "wave_send_using_mode", wave, mode as u32, &[])
    }

    fn wave_tx_at(&self) -> Result<Option<WaveId>, PigpioError> {
        let id = self.checked(Cmd::WvTat, "wave_tx_at", 0, 0, &[])?;
        Ok(if id == NO_WAVE { None } else { Some(id) })
    }

    fn wave_delete(&self, wave: WaveId) -> Result<(), PigpioError> {
        self.checked(Cmd::WvDel, "wave_delete", wave, 0, &[])?;
        Ok(())
    }

    fn wave_get_micros(&self) -> Result<u32, PigpioError> {
        self.checked(Cmd::WvSm, "wave_get_micros", SUBCMD_CURRENT, 0, &[])
    }

    fn wave_get_cbs(&self) -> Result<u32, PigpioError> {
        self.checked(Cmd::WvSc, "wave_get_cbs", SUBCMD_CURRENT, 0, &[])
    }

    fn wave_get_max_pulses(&self) -> Result<u32, PigpioError> {
        self.checked(Cmd::WvSp, "wave_get_max_pulses", SUBCMD_MAX, 0, &[])
    }

    fn wave_get_max_micros(&self) -> Result<u32, PigpioError> {
        self.checked(Cmd::WvSm, "wave_get_max_micros", SUBCMD_MAX, 0, &[])
    }

    fn wave_get_max_cbs(&self) -> Result<u32, PigpioError> {
        self.checked(Cmd::WvSc, "wave_get_max_cbs", SUBCMD_MAX, 0, &[])
    }
}
