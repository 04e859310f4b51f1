//! Two-point calibration run.
//!
//! `Idle -> SeekingPoint1 -> SeekingPoint2 -> Approximating -> Done`.
//! Entering a seeking state performs the device handshake and starts a fresh
//! controller; leaving it closes the valve and disables flow. Any failure
//! moves the session to `Failed` after the close-down has been attempted.
//! Dropping a session mid-phase also closes the valve.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::calibrate::{CalibrationPoints, CalibrationResult, approximate_recorded};
use crate::constants::{
    CONVERGENCE_TOLERANCE, DEFAULT_SETTLE_MS, POINT1_TARGET_FLOW, POINT2_TARGET_FLOW,
};
use crate::controller::{self, FlowController};
use crate::error::SessionError;
use crate::interface::GasKind;
use crate::link::DeviceLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    SeekingPoint1,
    SeekingPoint2,
    Approximating,
    Done,
    Failed,
}

impl ControllerState {
    pub const fn is_seeking(self) -> bool {
        matches!(self, Self::SeekingPoint1 | Self::SeekingPoint2)
    }

    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::SeekingPoint1 | Self::SeekingPoint2 | Self::Approximating
        )
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::SeekingPoint1 => "Point 1",
            Self::SeekingPoint2 => "Point 2",
            Self::Approximating => "Fitting",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wait after entering service mode before the device accepts setpoints.
    pub settle: Duration,
    pub gas: GasKind,
    pub point1_target: f64,
    pub point2_target: f64,
    pub tolerance: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            gas: GasKind::default(),
            point1_target: POINT1_TARGET_FLOW,
            point2_target: POINT2_TARGET_FLOW,
            tolerance: CONVERGENCE_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub pwm: u16,
    pub flow: f64,
    pub error: Option<f64>,
    pub target: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Milestone {
    PointRecorded { index: u8, pwm: i32, flow: f64 },
    Finished(CalibrationResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TickReport {
    pub measurement: Option<Measurement>,
    pub milestone: Option<Milestone>,
}

pub struct CalibrationSession {
    link: DeviceLink,
    config: SessionConfig,
    state: ControllerState,
    controller: Option<FlowController>,
    points: CalibrationPoints,
}

impl CalibrationSession {
    pub fn new(link: DeviceLink, config: SessionConfig) -> Self {
        Self {
            link,
            config,
            state: ControllerState::Idle,
            controller: None,
            points: CalibrationPoints::default(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    #[cfg(test)]
    pub fn points(&self) -> CalibrationPoints {
        self.points
    }

    /// Begins a new run from scratch, closing down any run in progress.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state.is_active() {
            self.stop()?;
        }
        self.points = CalibrationPoints::default();
        self.transition(ControllerState::SeekingPoint1)
            .map_err(|err| self.fail(err))
    }

    /// Abandons the run. The close-down sequence runs if a phase is active.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        let outcome = self.exit();
        self.controller = None;
        self.state = ControllerState::Idle;
        outcome
    }

    pub fn tick(&mut self) -> Result<TickReport, SessionError> {
        match self.tick_inner() {
            Ok(report) => Ok(report),
            Err(SessionError::NotRunning) => Err(SessionError::NotRunning),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn tick_inner(&mut self) -> Result<TickReport, SessionError> {
        match self.state {
            ControllerState::SeekingPoint1 | ControllerState::SeekingPoint2 => self.seek(),
            ControllerState::Approximating => {
                let result = approximate_recorded(&self.points)?;
                info!(slope = result.slope, offset = result.offset, "approximation");
                        self.transition(ControllerState::Done)?;
                Ok(TickReport {
                    measurement: None,
                    milestone: Some(Milestone::Finished(result)),
                })
            }
            ControllerState::Idle | ControllerState::Done | ControllerState::Failed => {
                Err(SessionError::NotRunning)
            }
        }
    }

    fn seek(&mut self) -> Result<TickReport, SessionError> {
        let Some(controller) = self.controller.as_mut() else {
            return Err(SessionError::NotRunning);
        };
        controller.tick(&mut self.link)?;

        let measurement = Measurement {
            pwm: controller.pwm(),
            flow: controller.current_flow(),
            error: controller.error(),
            target: controller.target_flow(),
        };
        if !controller.is_converged(self.config.tolerance) {
            return Ok(TickReport {
                measurement: Some(measurement),
                milestone: None,
            });
        }

        let pwm = i32::from(measurement.pwm);
        let flow = measurement.flow;
        let (index, next) = if self.state == ControllerState::SeekingPoint1 {
            self.points.pwm1 = pwm;
            self.points.flow1 = flow;
            (1, ControllerState::SeekingPoint2)
        } else {
            self.points.pwm2 = pwm;
            self.points.flow2 = flow;
            (2, ControllerState::Approximating)
        };
        info!(index, pwm, flow, "point recorded");
        self.transition(next)?;

        Ok(TickReport {
            measurement: Some(measurement),
            milestone: Some(Milestone::PointRecorded { index, pwm, flow }),
        })
    }

    fn transition(&mut self, next: ControllerState) -> Result<(), SessionError> {
        self.exit()?;
        info!(from = self.state.label(), to = next.label(), "phase change");
        self.state = next;
        self.enter()
    }

    fn enter(&mut self) -> Result<(), SessionError> {
        let target = match self.state {
            ControllerState::SeekingPoint1 => self.config.point1_target,
            ControllerState::SeekingPoint2 => self.config.point2_target,
            _ => return Ok(()),
        };
        controller::activate(&mut self.link, self.config.settle)?;
        self.controller = Some(FlowController::new(target, self.config.gas.selector()));
        Ok(())
    }

    fn exit(&mut self) -> Result<(), SessionError> {
        if !self.state.is_seeking() {
            return Ok(());
        }
        self.controller = None;
        controller::shut_down(&mut self.link)?;
        Ok(())
    }

    fn fail(&mut self, err: SessionError) -> SessionError {
        if self.state.is_seeking()
            && let Err(shutdown_err) = controller::shut_down(&mut self.link)
        {
            error!("close-down after failure did not complete: {shutdown_err}");
        }
        error!("calibration failed: {err}");
        self.controller = None;
        self.state = ControllerState::Failed;
        err
    }
}

impl Drop for CalibrationSession {
    fn drop(&mut self) {
        if !self.state.is_seeking() {
            return;
        }
        warn!(phase = self.state.label(), "session dropped mid-run, closing valve");
        if let Err(err) = controller::shut_down(&mut self.link) {
            error!("close-down on drop did not complete: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::{CalibrationSession, ControllerState, Milestone, SessionConfig};
    use crate::backend::mock::MockTransport;
    use crate::backend::sim::SimTransport;
    use crate::constants::{keys, reduc};
    use crate::error::{LinkError, SessionError};
    use crate::frame::{Command, decode};
    use crate::link::DeviceLink;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            settle: Duration::ZERO,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn calibrates_against_simulated_device() {
        let (journal_tx, journal_rx) = mpsc::channel();
        let link = DeviceLink::new(
            Box::new(SimTransport::with_journal(journal_tx)),
            Duration::from_millis(200),
        );
        let mut session = CalibrationSession::new(link, fast_config());

        session.start().expect("session should start");
        assert_eq!(session.state(), ControllerState::SeekingPoint1);

        let mut milestones = Vec::new();
        for _ in 0..10_000 {
            if session.state() == ControllerState::Done {
                break;
            }
            let report = session.tick().expect("tick should work");
            milestones.extend(report.milestone);
        }

        assert_eq!(session.state(), ControllerState::Done);
        let recorded: Vec<_> = milestones
            .iter()
            .filter_map(|milestone| match milestone {
                Milestone::PointRecorded { index, .. } => Some(*index),
                Milestone::Finished(_) => None,
            })
            .collect();
        assert_eq!(recorded, vec![1, 2]);
        let finished: Vec<_> = milestones
            .iter()
            .filter_map(|milestone| match milestone {
                Milestone::Finished(result) => Some(*result),
                Milestone::PointRecorded { .. } => None,
            })
            .collect();
        assert_eq!(finished.len(), 1);

        let points = session.points();
        assert!(points.is_complete());
        assert!((points.flow1 - 2.0).abs() < 0.3);
        assert!((points.flow2 - 20.0).abs() < 0.3);
        assert!(points.pwm1 > points.pwm2);
        assert!(finished[0].slope > 0.0);

        let commands: Vec<Command> = journal_rx.try_iter().collect();
        let handshakes = commands
            .iter()
            .filter(|command| command.address == keys::ADDRESS && command.code == keys::KEY_SIG)
            .count();
        assert_eq!(handshakes, 2);
        let disables = commands
            .iter()
            .filter(|command| command.code == reduc::OFF_FLOW)
            .count();
        assert_eq!(disables, 2);
        let tail: Vec<(u8, u8)> = commands
            .iter()
            .rev()
            .take(2)
            .rev()
            .map(|command| (command.address, command.code))
            .collect();
        assert_eq!(
            tail,
            vec![
                (reduc::ADDRESS, reduc::SHUT_OFF),
                (reduc::ADDRESS, reduc::OFF_FLOW)
            ]
        );
    }

    #[test]
    fn stop_closes_valve_and_returns_to_idle() {
        let (journal_tx, journal_rx) = mpsc::channel();
        let link = DeviceLink::new(
            Box::new(SimTransport::with_journal(journal_tx)),
            Duration::from_millis(200),
        );
        let mut session = CalibrationSession::new(link, fast_config());
        session.start().expect("session should start");
        for _ in 0..3 {
            session.tick().expect("tick should work");
        }

        session.stop().expect("stop should work");
        assert_eq!(session.state(), ControllerState::Idle);
        let codes: Vec<u8> = journal_rx.try_iter().map(|command| command.code).collect();
        assert_eq!(
            codes[codes.len() - 2..].to_vec(),
            vec![reduc::SHUT_OFF, reduc::OFF_FLOW]
        );

        let err = session.tick().expect_err("idle session should not tick");
        assert!(matches!(err, SessionError::NotRunning));
        assert_eq!(session.state(), ControllerState::Idle);
    }

    #[test]
    fn dropping_running_session_closes_valve() {
        let (journal_tx, journal_rx) = mpsc::channel();
        let link = DeviceLink::new(
            Box::new(SimTransport::with_journal(journal_tx)),
            Duration::from_millis(200),
        );
        let mut session = CalibrationSession::new(link, fast_config());
        session.start().expect("session should start");
        session.tick().expect("tick should work");

        drop(session);

        let codes: Vec<u8> = journal_rx.try_iter().map(|command| command.code).collect();
        assert!(
            codes.ends_with(&[reduc::SHUT_OFF, reduc::OFF_FLOW]),
            "journal: {codes:02X?}"
        );
    }

    #[test]
    fn dropping_idle_session_sends_nothing() {
        let mock = MockTransport::new();
        let link = DeviceLink::new(Box::new(mock.clone()), Duration::from_millis(10));
        let session = CalibrationSession::new(link, fast_config());

        drop(session);

        assert!(mock.written().is_empty());
    }

    #[test]
    fn silent_device_fails_start_and_still_attempts_close_down() {
        let mock = MockTransport::new();
        let link = DeviceLink::new(Box::new(mock.clone()), Duration::from_millis(10));
        let mut session = CalibrationSession::new(link, fast_config());

        let err = session.start().expect_err("handshake should time out");
        assert!(matches!(
            err,
            SessionError::Link(LinkError::TransportTimeout {
                code: keys::KEY_SIG,
                ..
            })
        ));

        let codes: Vec<u8> = mock
            .written()
            .iter()
            .map(|raw| decode(raw).expect("frame should decode").tag)
            .collect();
        assert_eq!(
            codes,
            vec![keys::KEY_SIG, reduc::SHUT_OFF, reduc::OFF_FLOW]
        );
        assert_eq!(session.state(), ControllerState::Failed);
    }
}
