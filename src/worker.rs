use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use color_eyre::eyre::{self, WrapErr};
use tracing::{info, warn};

use crate::backend::build_transport;
use crate::calibrate::CalibrationResult;
use crate::interface::InterfaceMode;
use crate::link::DeviceLink;
use crate::session::{CalibrationSession, Measurement, Milestone, SessionConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    Start,
    Stop,
    Terminate,
}

#[derive(Debug)]
pub enum WorkerEvent {
    Connection(bool),
    Running(bool),
    Phase(&'static str),
    Values(Measurement),
    Point { index: u8, pwm: i32, flow: f64 },
    Result(CalibrationResult),
    Log(String),
    Error(eyre::Report),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub port: Option<String>,
    pub baud: u32,
    pub interface: InterfaceMode,
    pub tick_interval: Duration,
    pub exchange_timeout: Duration,
    pub verify_checksum: bool,
}

pub fn spawn_worker(
    config: WorkerConfig,
    session_config: SessionConfig,
    command_rx: Receiver<WorkerCommand>,
    event_tx: Sender<WorkerEvent>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let result = run_worker_loop(&config, session_config, &command_rx, &event_tx);

        if let Err(err) = result {
            let _ = event_tx.send(WorkerEvent::Error(err));
        }
    })
}

fn run_worker_loop(
    config: &WorkerConfig,
    session_config: SessionConfig,
    command_rx: &Receiver<WorkerCommand>,
    event_tx: &Sender<WorkerEvent>,
) -> eyre::Result<()> {
    let transport = build_transport(config).wrap_err("could not connect")?;
    let link = DeviceLink::new(transport, config.exchange_timeout)
        .with_checksum_verification(config.verify_checksum);
    let mut session = CalibrationSession::new(link, session_config);

    let port_label = config.port.as_deref().unwrap_or("simulator");
    info!(port = port_label, "connected");
    event_tx.send(WorkerEvent::Connection(true)).ok();
    event_tx
        .send(WorkerEvent::Log(format!("Connected to {port_label}")))
        .ok();

    loop {
        match command_rx.recv_timeout(config.tick_interval) {
            Ok(WorkerCommand::Start) => {
                event_tx.send(WorkerEvent::Running(true)).ok();
                match session.start() {
                    Ok(()) => {
                        event_tx.send(WorkerEvent::Phase(session.state().label())).ok();
                    }
                    Err(err) => abort_run(&session, event_tx, &format!("Start failed: {err}")),
                }
            }
            Ok(WorkerCommand::Stop) => {
                if session.state().is_active() {
                    if let Err(err) = session.stop() {
                        warn!("close-down on stop failed: {err}");
                        event_tx
                            .send(WorkerEvent::Log(format!("Close-down failed: {err}")))
                            .ok();
                    }
                    event_tx.send(WorkerEvent::Log("Stopped".to_string())).ok();
                }
                event_tx.send(WorkerEvent::Running(false)).ok();
                event_tx.send(WorkerEvent::Phase(session.state().label())).ok();
            }
            Ok(WorkerCommand::Terminate) => break,
            Err(RecvTimeoutError::Timeout) => {
                if session.state().is_active() {
                    tick_session(&mut session, event_tx);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                session.stop().ok();
                return Err(eyre::eyre!("command channel closed"));
            }
        }
    }

    if session.state().is_active() {
        session.stop().wrap_err("close-down on exit")?;
    }
    event_tx.send(WorkerEvent::Connection(false)).ok();
    event_tx.send(WorkerEvent::Log("Disconnected".to_string())).ok();
    Ok(())
}

fn tick_session(session: &mut CalibrationSession, event_tx: &Sender<WorkerEvent>) {
    let report = match session.tick() {
        Ok(report) => report,
        Err(err) => {
            abort_run(session, event_tx, &format!("Calibration failed: {err}"));
            return;
        }
    };

    if let Some(measurement) = report.measurement {
        event_tx.send(WorkerEvent::Values(measurement)).ok();
    }
    match report.milestone {
        Some(Milestone::PointRecorded { index, pwm, flow }) => {
            event_tx.send(WorkerEvent::Point { index, pwm, flow }).ok();
            event_tx
                .send(WorkerEvent::Log(format!(
                    "Point {index}: PWM={pwm}, FLOW={flow:.3}"
                )))
                .ok();
            event_tx.send(WorkerEvent::Phase(session.state().label())).ok();
        }
        Some(Milestone::Finished(result)) => {
            event_tx.send(WorkerEvent::Result(result)).ok();
            event_tx
                .send(WorkerEvent::Log(format!(
                    "Approximation: slope={:.2}, offset={}",
                    result.slope, result.offset
                )))
                .ok();
            event_tx.send(WorkerEvent::Phase(session.state().label())).ok();
            event_tx.send(WorkerEvent::Running(false)).ok();
        }
        None => {}
    }
}

fn abort_run(session: &CalibrationSession, event_tx: &Sender<WorkerEvent>, message: &str) {
    event_tx.send(WorkerEvent::Log(message.to_string())).ok();
    event_tx.send(WorkerEvent::Phase(session.state().label())).ok();
    event_tx.send(WorkerEvent::Running(false)).ok();
}
