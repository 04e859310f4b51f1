//! Wire framing for the insufflator bus.
//!
//! A frame is `[FEND, address, code, data_lo, data_hi, crc8]` where every byte
//! after the leading marker is byte-stuffed: `FEND` becomes `FESC TFEND` and
//! `FESC` becomes `FESC TFESC`.

use std::fmt;
use std::mem;

use crate::checksum::{append_checksum, validate_checksum};
use crate::constants::{FEND, FESC, FRAME_LEN, PAYLOAD_LEN, TFEND, TFESC};
use crate::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub address: u8,
    pub code: u8,
    pub data: u16,
}

impl Command {
    pub const fn new(address: u8, code: u8, data: u16) -> Self {
        Self {
            address,
            code,
            data,
        }
    }
}

/// Decoded reply. The device echoes the command code as `tag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub address: u8,
    pub tag: u8,
    pub value: u16,
}

impl Response {
    fn from_payload(payload: &[u8]) -> Self {
        Self {
            address: payload[1],
            tag: payload[2],
            value: u16::from_le_bytes([payload[3], payload[4]]),
        }
    }
}

pub fn encode(command: Command) -> Vec<u8> {
    encode_with_marker(command, FEND)
}

pub fn encode_with_marker(command: Command, marker: u8) -> Vec<u8> {
    let [data_lo, data_hi] = command.data.to_le_bytes();
    let frame = append_checksum(&[marker, command.address, command.code, data_lo, data_hi]);
    stuff(&frame)
}

/// Escapes every byte but the first.
pub fn stuff(frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() * 2);
    let Some((first, rest)) = frame.split_first() else {
        return out;
    };
    out.push(*first);
    for &byte in rest {
        match byte {
            FEND => out.extend_from_slice(&[FESC, TFEND]),
            FESC => out.extend_from_slice(&[FESC, TFESC]),
            _ => out.push(byte),
        }
    }
    out
}

pub fn unstuff(raw: &[u8]) -> Result<Vec<u8>, FrameError> {
    let Some((&first, rest)) = raw.split_first() else {
        return Err(FrameError::FrameTooShort(0));
    };
    if first != FEND {
        return Err(FrameError::MissingMarker(first));
    }

    let mut out = Vec::with_capacity(raw.len());
    out.push(first);
    let mut bytes = rest.iter().copied();
    while let Some(byte) = bytes.next() {
        if byte != FESC {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(TFEND) => out.push(FEND),
            Some(TFESC) => out.push(FESC),
            Some(other) => return Err(FrameError::InvalidEscape(other)),
            None => return Err(FrameError::DanglingEscape),
        }
    }
    Ok(out)
}

/// Decodes a raw frame and verifies its trailing checksum.
pub fn decode(raw: &[u8]) -> Result<Response, FrameError> {
    let frame = unstuff(raw)?;
    if frame.len() < FRAME_LEN {
        return Err(FrameError::FrameTooShort(frame.len()));
    }
    validate_checksum(&frame[..FRAME_LEN])?;
    Ok(Response::from_payload(&frame))
}

/// Decodes a raw frame without looking at the checksum byte, for firmware
/// that does not fill it in reliably.
pub fn decode_unverified(raw: &[u8]) -> Result<Response, FrameError> {
    let frame = unstuff(raw)?;
    if frame.len() < PAYLOAD_LEN {
        return Err(FrameError::FrameTooShort(frame.len()));
    }
    Ok(Response::from_payload(&frame))
}

/// Formats bytes as contiguous lowercase hex for logs.
pub struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<empty>");
        }
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Collects bytes from a stream into complete stuffed frames.
///
/// Anything before a marker is dropped. A bare marker in the middle of a
/// frame restarts assembly from that marker.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    raw: Vec<u8>,
    unstuffed: usize,
    escaped: bool,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        if byte == FEND && !self.escaped {
            self.reset();
            self.raw.push(byte);
            self.unstuffed = 1;
            return None;
        }
        if self.raw.is_empty() {
            return None;
        }

        self.raw.push(byte);
        if self.escaped {
            self.escaped = false;
            self.unstuffed += 1;
        } else if byte == FESC {
            self.escaped = true;
        } else {
            self.unstuffed += 1;
        }

        if self.unstuffed == FRAME_LEN {
            self.unstuffed = 0;
            return Some(mem::take(&mut self.raw));
        }
        None
    }

    pub fn reset(&mut self) {
        self.raw.clear();
        self.unstuffed = 0;
        self.escaped = false;
    }
}
