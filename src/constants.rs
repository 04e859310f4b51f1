pub const FEND: u8 = 0xC0;
pub const FESC: u8 = 0xDB;
pub const TFEND: u8 = 0xDC;
pub const TFESC: u8 = 0xDD;

pub const CHECKSUM_INIT: u8 = 0xDE;
pub const CHECKSUM_POLY: u8 = 0x8C;

/// Unstuffed frame length: marker, address, code, data lo, data hi, checksum.
pub const FRAME_LEN: usize = 6;
/// Unstuffed frame length without the trailing checksum.
pub const PAYLOAD_LEN: usize = 5;

/// Key-input subsystem.
pub mod keys {
    pub const ADDRESS: u8 = 0xB4;

    /// Low byte carries the key signal, high byte UI flags.
    pub const KEY_SIG: u8 = 0x12;
}

/// Signals understood by the key-input subsystem.
pub mod signals {
    pub const KEY_SERVICE_SIG: u16 = 22;
}

/// Pressure/flow regulator subsystem.
pub mod regul {
    pub const ADDRESS: u8 = 0xB0;

    /// mmHg
    pub const SET_PRES: u8 = 0x02;
    /// l/min * 100
    pub const GET_MSR_FLOW: u8 = 0x08;
}

/// Reducer (valve) subsystem.
pub mod reduc {
    pub const ADDRESS: u8 = 0xB8;

    pub const ON_FLOW: u8 = 0x12;
    pub const OFF_FLOW: u8 = 0x13;
    /// Applied immediately.
    pub const SET_SHIM: u8 = 0x14;
    pub const SHUT_OFF: u8 = 0x15;
}

pub const PWM_INIT: u16 = 2900;
pub const PWM_MAX: u16 = 4000;
pub const PULSE_TIME: u32 = 20;
pub const PAUSE: u32 = 4;
pub const PWM_GAIN: f64 = 10.0;
pub const FLOW_SCALE: f64 = 100.0;

pub const SERVICE_PRESSURE: u16 = 30;
pub const POINT1_TARGET_FLOW: f64 = 2.0;
pub const POINT2_TARGET_FLOW: f64 = 20.0;
pub const CONVERGENCE_TOLERANCE: f64 = 0.3;
pub const CALIBRATION_OFFSET_BIAS: f64 = 800.0;

pub const DEFAULT_BAUD: u32 = 115_200;
pub const DEFAULT_TICK_MS: u64 = 100;
pub const DEFAULT_EXCHANGE_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_SETTLE_MS: u64 = 2000;
pub const READ_POLL_MS: u64 = 1;
