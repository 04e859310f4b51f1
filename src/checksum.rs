use crate::constants::{CHECKSUM_INIT, CHECKSUM_POLY};
use crate::error::FrameError;

/// Reflected CRC-8 (poly 0x8C, init 0xDE) used by every subsystem on the bus.
pub fn checksum(data: &[u8]) -> u8 {
    let mut crc = CHECKSUM_INIT;
    for byte in data {
        crc ^= *byte;
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ CHECKSUM_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

pub fn append_checksum(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.extend_from_slice(payload);
    out.push(checksum(payload));
    out
}

/// Checks the trailing byte of an unstuffed frame against the rest of it.
pub fn validate_checksum(frame: &[u8]) -> Result<(), FrameError> {
    let Some((&seen, body)) = frame.split_last() else {
        return Err(FrameError::FrameTooShort(0));
    };
    let expected = checksum(body);
    if expected != seen {
        return Err(FrameError::ChecksumInvalid {
            expected,
            actual: seen,
        });
    }
    Ok(())
}
