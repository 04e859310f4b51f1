use std::io;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame does not start with marker: got 0x{0:02X}")]
    MissingMarker(u8),
    #[error("frame too short: {0} bytes after unstuffing")]
    FrameTooShort(usize),
    #[error("frame ends inside an escape sequence")]
    DanglingEscape,
    #[error("invalid escape sequence: 0xDB 0x{0:02X}")]
    InvalidEscape(u8),
    #[error("invalid frame checksum: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumInvalid { expected: u8, actual: u8 },
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no response from device")]
    NoResponse,
    #[error("no reply to 0x{address:02X}/0x{code:02X} within {elapsed_ms} ms")]
    TransportTimeout {
        address: u8,
        code: u8,
        elapsed_ms: u128,
    },
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),
    #[error("serial i/o: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("degenerate calibration: both points have flow {0}")]
    DegenerateCalibration(f64),
    #[error("calibration points incomplete: pwm1={pwm1}, flow1={flow1}, pwm2={pwm2}, flow2={flow2}")]
    IncompletePoints {
        pwm1: i32,
        flow1: f64,
        pwm2: i32,
        flow2: f64,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error("calibration is not running")]
    NotRunning,
}
