//! Request/response framing for the pigpio daemon socket protocol.
//!
//! Every request is a 16-byte little-endian header `(cmd, p1, p2, p3)`
//! followed by `p3` bytes of extension data. The daemon replies with another
//! 16-byte header echoing `cmd`, `p1`, `p2`; the fourth word is the result,
//! interpreted as a signed status (negative means a daemon error).

use crate::commands::Cmd;
use crate::WavePulse;
use bytes::{BufMut, BytesMut};

/// Size of a request or response header on the wire.
pub const HEADER_LEN: usize = 16;

/// Bytes occupied by one encoded [`WavePulse`].
pub const PULSE_LEN: usize = 12;

/// Encodes a request header with no extension payload.
pub fn encode_request(cmd: Cmd, p1: u32, p2: u32) -> [u8; HEADER_LEN] {
    encode_request_ext_len(cmd, p1, p2, 0)
}

/// Encodes a request header announcing `ext_len` bytes of extension data.
pub fn encode_request_ext_len(cmd: Cmd, p1: u32, p2: u32, ext_len: u32) -> [u8; HEADER_LEN] {
    let mut buf = [0u8; HEADER_LEN];
    buf[0..4].copy_from_slice(&(cmd as u32).to_le_bytes());
    buf[4..8].copy_from_slice(&p1.to_le_bytes());
    buf[8..12].copy_from_slice(&p2.to_le_bytes());
    buf[12..16].copy_from_slice(&ext_len.to_le_bytes());
    buf
}

/// Encodes the extension payload for `wave_add_generic`.
pub fn encode_pulses(pulses: &[WavePulse]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(pulses.len() * PULSE_LEN);
    for pulse in pulses {
        buf.put_u32_le(pulse.gpio_on);
        buf.put_u32_le(pulse.gpio_off);
        buf.put_u32_le(pulse.delay_us);
    }
    buf
}

/// Extracts the signed result word from a response header.
///
/// Returns `Err` with the echoed command word if it does not match `cmd`,
/// which indicates the stream has lost framing.
pub fn decode_response(cmd: Cmd, header: &[u8; HEADER_LEN]) -> Result<i32, u32> {
    let echoed = u32::from_le_bytes(header[0..4].try_into().unwrap());
    if echoed != cmd as u32 {
        return Err(echoed);
    }
    Ok(i32::from_le_bytes(header[12..16].try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_layout() {
        let buf = encode_request(Cmd::Write, 21, 1);
        assert_eq!(&buf[0..4], &4u32.to_le_bytes());
        assert_eq!(&buf[4..8], &21u32.to_le_bytes());
        assert_eq!(&buf[8..12], &1u32.to_le_bytes());
        assert_eq!(&buf[12..16], &0u32.to_le_bytes());
    }

    #[test]
    fn pulse_extension_layout() {
        let pulses = [
            WavePulse::new(1 << 17, 0, 250),
            WavePulse::new(0, 1 << 17, 2),
        ];
        let ext = encode_pulses(&pulses);
        assert_eq!(ext.len(), 2 * PULSE_LEN);
        assert_eq!(&ext[0..4], &(1u32 << 17).to_le_bytes());
        assert_eq!(&ext[8..12], &250u32.to_le_bytes());
        assert_eq!(&ext[16..20], &(1u32 << 17).to_le_bytes());
        assert_eq!(&ext[20..24], &2u32.to_le_bytes());
    }

    #[test]
    fn response_result_is_signed() {
        let mut header = encode_request(Cmd::WvCre, 0, 0);
        header[12..16].copy_from_slice(&(-69i32).to_le_bytes());
        assert_eq!(decode_response(Cmd::WvCre, &header), Ok(-69));
    }

    #[test]
    fn response_with_wrong_echo_is_rejected() {
        let header = encode_request(Cmd::WvDel, 3, 0);
        assert_eq!(decode_response(Cmd::WvCre, &header), Err(Cmd::WvDel as u32));
    }
}
