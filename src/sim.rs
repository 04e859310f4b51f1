use crate::constants::{FLOW_SCALE, PWM_INIT, PWM_MAX, keys, reduc, regul, signals};
use crate::frame::{Command, Response};

/// PWM at which the simulated valve stops passing gas.
const ZERO_FLOW_PWM: f64 = 3300.0;
const PWM_PER_LPM: f64 = 95.0;
/// Fraction of the remaining gap to equilibrium closed per measurement.
const FLOW_LAG: f64 = 0.5;

/// Insufflator model answering bus commands the way the real firmware does:
/// every command is acknowledged with its own code as tag.
#[derive(Debug, Clone)]
pub struct SimDevice {
    service_mode: bool,
    flow_enabled: bool,
    valve_open: bool,
    pwm: u16,
    flow: f64,
}

impl SimDevice {
    pub fn new() -> Self {
        Self {
            service_mode: false,
            flow_enabled: false,
            valve_open: false,
            pwm: PWM_INIT,
            flow: 0.0,
        }
    }

    pub fn handle(&mut self, command: Command) -> Response {
        let value = match (command.address, command.code) {
            (keys::ADDRESS, keys::KEY_SIG) => {
                if command.data & 0x00FF == signals::KEY_SERVICE_SIG {
                    self.service_mode = true;
                }
                command.data
            }
            (regul::ADDRESS, regul::GET_MSR_FLOW) => {
                self.step();
                clamp_u16(self.flow * FLOW_SCALE)
            }
            (reduc::ADDRESS, reduc::ON_FLOW) => {
                self.flow_enabled = self.service_mode;
                self.valve_open = self.flow_enabled;
                command.data
            }
            (reduc::ADDRESS, reduc::OFF_FLOW) => {
                self.flow_enabled = false;
                self.valve_open = false;
                command.data
            }
            (reduc::ADDRESS, reduc::SET_SHIM) => {
                self.pwm = command.data.min(PWM_MAX);
                self.valve_open = self.flow_enabled;
                command.data
            }
            (reduc::ADDRESS, reduc::SHUT_OFF) => {
                self.valve_open = false;
                command.data
            }
            _ => command.data,
        };

        Response {
            address: command.address,
            tag: command.code,
            value,
        }
    }

    #[cfg(test)]
    pub fn service_mode(&self) -> bool {
        self.service_mode
    }

    #[cfg(test)]
    pub fn valve_open(&self) -> bool {
        self.valve_open
    }

    fn step(&mut self) {
        let target = if self.valve_open {
            equilibrium_flow(self.pwm)
        } else {
            0.0
        };
        self.flow += (target - self.flow) * FLOW_LAG;
    }
}

/// Steady-state flow in l/min for a given drive value.
pub fn equilibrium_flow(pwm: u16) -> f64 {
    ((ZERO_FLOW_PWM - f64::from(pwm)) / PWM_PER_LPM).max(0.0)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_u16(value: f64) -> u16 {
    let clamped = value.round().clamp(0.0, f64::from(u16::MAX));
    clamped as u16
}

#[cfg(test)]
mod tests {
    use super::{SimDevice, equilibrium_flow};
    use crate::constants::{keys, reduc, regul, signals};
    use crate::frame::Command;

    #[test]
    fn acknowledges_with_command_code() {
        let mut device = SimDevice::new();
        let response = device.handle(Command::new(
            keys::ADDRESS,
            keys::KEY_SIG,
            signals::KEY_SERVICE_SIG,
        ));
        assert_eq!(response.tag, keys::KEY_SIG);
        assert_eq!(response.address, keys::ADDRESS);
        assert!(device.service_mode());
    }

    #[test]
    fn flow_settles_toward_equilibrium_while_open() {
        let mut device = in_service_mode();
        device.handle(Command::new(reduc::ADDRESS, reduc::ON_FLOW, 0));
        device.handle(Command::new(reduc::ADDRESS, reduc::SET_SHIM, 1400));

        let mut raw = 0;
        for _ in 0..30 {
            raw = device
                .handle(Command::new(regul::ADDRESS, regul::GET_MSR_FLOW, 1))
                .value;
        }
        let expected = equilibrium_flow(1400);
        assert!((f64::from(raw) / 100.0 - expected).abs() < 0.02);
    }

    #[test]
    fn shut_off_closes_valve_and_flow_decays() {
        let mut device = in_service_mode();
        device.handle(Command::new(reduc::ADDRESS, reduc::ON_FLOW, 0));
        for _ in 0..10 {
            device.handle(Command::new(regul::ADDRESS, regul::GET_MSR_FLOW, 1));
        }
        device.handle(Command::new(reduc::ADDRESS, reduc::SHUT_OFF, 0));
        assert!(!device.valve_open());

        let mut raw = u16::MAX;
        for _ in 0..20 {
            raw = device
                .handle(Command::new(regul::ADDRESS, regul::GET_MSR_FLOW, 1))
                .value;
        }
        assert_eq!(raw, 0);
    }

    #[test]
    fn flow_stays_disabled_outside_service_mode() {
        let mut device = SimDevice::new();
        device.handle(Command::new(reduc::ADDRESS, reduc::ON_FLOW, 0));
        assert!(!device.valve_open());
    }

    #[test]
    fn equilibrium_is_never_negative() {
        assert!(equilibrium_flow(4000).abs() < f64::EPSILON);
        assert!((equilibrium_flow(1400) - 20.0).abs() < 1e-9);
    }

    fn in_service_mode() -> SimDevice {
        let mut device = SimDevice::new();
        device.handle(Command::new(
            keys::ADDRESS,
            keys::KEY_SIG,
            signals::KEY_SERVICE_SIG,
        ));
        device
    }
}
