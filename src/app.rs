use std::collections::VecDeque;

use crate::calibrate::{CalibrationPoints, CalibrationResult};
use crate::interface::InterfaceMode;
use crate::session::Measurement;

const HISTORY_LEN: usize = 240;
const LOG_LEN: usize = 200;

#[derive(Debug)]
pub struct AppState {
    pub connected: bool,
    pub running: bool,
    pub phase: &'static str,
    pub interface: InterfaceMode,
    pub measurement: Option<Measurement>,
    pub points: CalibrationPoints,
    pub result: Option<CalibrationResult>,
    pub flow_history: VecDeque<(f64, f64)>,
    pub target_history: VecDeque<(f64, f64)>,
    pub log: VecDeque<String>,
    pub tick: u32,
    pub should_quit: bool,
}

impl AppState {
    pub fn new(interface: InterfaceMode) -> Self {
        Self {
            connected: false,
            running: false,
            phase: "Idle",
            interface,
            measurement: None,
            points: CalibrationPoints::default(),
            result: None,
            flow_history: VecDeque::with_capacity(HISTORY_LEN),
            target_history: VecDeque::with_capacity(HISTORY_LEN),
            log: VecDeque::with_capacity(LOG_LEN),
            tick: 0,
            should_quit: false,
        }
    }

    /// Clears everything from a previous run.
    pub fn reset_measurement(&mut self) {
        self.measurement = None;
        self.points = CalibrationPoints::default();
        self.result = None;
        self.flow_history.clear();
        self.target_history.clear();
        self.tick = 0;
    }

    pub fn update_measurement(&mut self, measurement: Measurement) {
        self.measurement = Some(measurement);
        self.push_history(measurement);
    }

    pub fn record_point(&mut self, index: u8, pwm: i32, flow: f64) {
        if index == 1 {
            self.points.pwm1 = pwm;
            self.points.flow1 = flow;
        } else {
            self.points.pwm2 = pwm;
            self.points.flow2 = flow;
        }
    }

    pub fn append_log(&mut self, line: String) {
        self.log.push_back(line);
        while self.log.len() > LOG_LEN {
            self.log.pop_front();
        }
    }

    fn push_history(&mut self, measurement: Measurement) {
        let tick = f64::from(self.tick);
        self.flow_history.push_back((tick, measurement.flow));
        self.target_history.push_back((tick, measurement.target));
        self.tick = self.tick.wrapping_add(1);
        while self.flow_history.len() > HISTORY_LEN {
            self.flow_history.pop_front();
        }
        while self.target_history.len() > HISTORY_LEN {
            self.target_history.pop_front();
        }
    }
}
