//! Duty-cycle flow regulation.
//!
//! The valve alternates between a short open pulse and a longer pause. At the
//! end of each open pulse the drive value is corrected in proportion to the
//! flow error measured during the pulse.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::constants::{
    FLOW_SCALE, PAUSE, PULSE_TIME, PWM_GAIN, PWM_INIT, PWM_MAX, SERVICE_PRESSURE, keys, reduc,
    regul, signals,
};
use crate::error::LinkError;
use crate::frame::Command;
use crate::link::DeviceLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValveState {
    pub open: bool,
    pub pwm: u16,
    /// Ticks left before the next pulse transition.
    pub delay_ticks: u32,
}

#[derive(Debug, Clone)]
pub struct FlowController {
    target_flow: f64,
    gas_selector: u16,
    valve: ValveState,
    pulse_duration: u32,
    current_flow: f64,
    error: Option<f64>,
}

impl FlowController {
    /// The valve is taken as open: flow has just been enabled by
    /// [`activate`], so the first transition is an off-pulse.
    pub fn new(target_flow: f64, gas_selector: u16) -> Self {
        Self {
            target_flow,
            gas_selector,
            valve: ValveState {
                open: true,
                pwm: PWM_INIT,
                delay_ticks: PAUSE,
            },
            pulse_duration: PULSE_TIME - PAUSE,
            current_flow: 0.0,
            error: None,
        }
    }

    pub fn target_flow(&self) -> f64 {
        self.target_flow
    }

    pub fn pwm(&self) -> u16 {
        self.valve.pwm
    }

    #[cfg(test)]
    pub fn valve(&self) -> ValveState {
        self.valve
    }

    pub fn current_flow(&self) -> f64 {
        self.current_flow
    }

    /// Error computed at the most recent off-pulse.
    pub fn error(&self) -> Option<f64> {
        self.error
    }

    pub fn is_converged(&self, tolerance: f64) -> bool {
        self.error.is_some_and(|error| error.abs() < tolerance)
    }

    pub fn tick(&mut self, link: &mut DeviceLink) -> Result<(), LinkError> {
        let reading = link.request(Command::new(
            regul::ADDRESS,
            regul::GET_MSR_FLOW,
            self.gas_selector,
        ))?;
        self.current_flow = f64::from(reading.value) / FLOW_SCALE;
        debug!(flow = self.current_flow, raw = reading.value, "measured flow");

        self.valve.delay_ticks = self.valve.delay_ticks.saturating_sub(1);
        if self.valve.delay_ticks == 0 {
            if self.valve.open {
                self.off_pulse(link)?;
            } else {
                self.on_pulse(link)?;
            }
        }
        Ok(())
    }

    fn on_pulse(&mut self, link: &mut DeviceLink) -> Result<(), LinkError> {
        link.request(Command::new(reduc::ADDRESS, reduc::SET_SHIM, self.valve.pwm))?;
        self.valve.open = true;
        self.valve.delay_ticks = self.pulse_duration;
        Ok(())
    }

    fn off_pulse(&mut self, link: &mut DeviceLink) -> Result<(), LinkError> {
        let error = self.current_flow - self.target_flow;
        self.error = Some(error);
        self.valve.pwm = adjust_pwm(self.valve.pwm, error);
        debug!(error, pwm = self.valve.pwm, "off pulse");

        link.request(Command::new(reduc::ADDRESS, reduc::SHUT_OFF, 0))?;
        self.valve.open = false;
        self.valve.delay_ticks = PAUSE;
        Ok(())
    }
}

/// Proportional correction of the drive value, clamped to the actuator range.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn adjust_pwm(pwm: u16, error: f64) -> u16 {
    let corrected = f64::from(pwm) + (PWM_GAIN * error).round();
    corrected.clamp(0.0, f64::from(PWM_MAX)) as u16
}

/// Puts the device into service mode and enables gas flow at the service
/// pressure.
pub fn activate(link: &mut DeviceLink, settle: Duration) -> Result<(), LinkError> {
    link.request(Command::new(
        keys::ADDRESS,
        keys::KEY_SIG,
        signals::KEY_SERVICE_SIG,
    ))?;
    if !settle.is_zero() {
        thread::sleep(settle);
    }
    link.request(Command::new(
        regul::ADDRESS,
        regul::SET_PRES,
        SERVICE_PRESSURE,
    ))?;
    link.request(Command::new(reduc::ADDRESS, reduc::ON_FLOW, 0))?;
    info!("service mode active, flow enabled");
    Ok(())
}

/// Closes the valve and disables flow. Both commands are attempted even if
/// the first one fails; the first failure is returned.
pub fn shut_down(link: &mut DeviceLink) -> Result<(), LinkError> {
    let valve = link.request(Command::new(reduc::ADDRESS, reduc::SHUT_OFF, 0));
    if let Err(err) = &valve {
        warn!("shutting valve failed: {err}");
    }
    let flow = link.request(Command::new(reduc::ADDRESS, reduc::OFF_FLOW, 0));
    if let Err(err) = &flow {
        warn!("disabling flow failed: {err}");
    }
    valve.and(flow).map(drop)
}
