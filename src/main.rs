mod app;
mod backend;
mod calibrate;
mod checksum;
mod constants;
mod controller;
mod error;
mod frame;
mod input;
mod interface;
mod link;
mod session;
mod sim;
mod ui;
mod worker;

use std::io;
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use crossterm::event::{self, Event};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use app::AppState;
use constants::{DEFAULT_EXCHANGE_TIMEOUT_MS, DEFAULT_SETTLE_MS, DEFAULT_TICK_MS};
use input::handle_key_event;
use interface::{GasKind, InterfaceMode};
use session::SessionConfig;
use ui::render_ui;
use worker::{WorkerCommand, WorkerConfig, WorkerEvent, spawn_worker};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Insufflator valve PWM-to-flow calibration")]
struct Args {
    /// Serial port path (e.g. /dev/ttyUSB0)
    #[arg(short, long)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Regulation tick interval in milliseconds
    #[arg(short = 'i', long, default_value_t = DEFAULT_TICK_MS)]
    tick_interval: u64,

    /// Reply timeout per command in milliseconds
    #[arg(short, long, default_value_t = DEFAULT_EXCHANGE_TIMEOUT_MS)]
    timeout: u64,

    /// Wait after entering service mode, in milliseconds
    #[arg(long, default_value_t = DEFAULT_SETTLE_MS)]
    settle: u64,

    /// Gas the flow sensor is measuring
    #[arg(long, value_enum, default_value_t = GasKind::Co2)]
    gas: GasKind,

    /// Device interface
    #[arg(short = 'I', long, value_enum, default_value_t = InterfaceMode::Serial)]
    interface: InterfaceMode,

    /// Accept replies without checking their checksum
    #[arg(long, default_value_t = false)]
    lenient_checksum: bool,

    /// Run one calibration without the terminal UI
    #[arg(long, default_value_t = false)]
    headless: bool,
}

#[derive(Debug, Clone)]
struct RuntimeArgs {
    worker: WorkerConfig,
    session: SessionConfig,
    headless: bool,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let runtime = resolve_runtime_args(&args)?;

    if runtime.headless {
        init_tracing();
        return run_headless(runtime);
    }
    run_tui(runtime)
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("valve_tuner=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

fn run_headless(runtime: RuntimeArgs) -> eyre::Result<()> {
    let (command_tx, command_rx) = mpsc::channel();
    let (event_tx, event_rx) = mpsc::channel();
    let handle = spawn_worker(runtime.worker, runtime.session, command_rx, event_tx);

    let interrupt_tx = command_tx.clone();
    ctrlc::set_handler(move || {
        interrupt_tx.send(WorkerCommand::Terminate).ok();
    })
    .wrap_err("install interrupt handler")?;

    command_tx
        .send(WorkerCommand::Start)
        .wrap_err("send start")?;

    let mut outcome: eyre::Result<()> = Err(eyre::eyre!("calibration did not finish"));
    for event in &event_rx {
        match event {
            WorkerEvent::Log(line) => info!("{line}"),
            WorkerEvent::Values(measurement) => debug!(
                pwm = measurement.pwm,
                flow = measurement.flow,
                error = ?measurement.error,
                "tick"
            ),
            WorkerEvent::Result(result) => {
                println!("slope={:.2} offset={}", result.slope, result.offset);
                outcome = Ok(());
            }
            WorkerEvent::Running(false) => break,
            WorkerEvent::Error(err) => {
                outcome = Err(err.wrap_err("serial connection failed"));
                break;
            }
            WorkerEvent::Connection(_)
            | WorkerEvent::Running(true)
            | WorkerEvent::Phase(_)
            | WorkerEvent::Point { .. } => {}
        }
    }

    command_tx.send(WorkerCommand::Terminate).ok();
    handle.join().ok();
    outcome
}

fn run_tui(runtime: RuntimeArgs) -> eyre::Result<()> {
    enable_raw_mode().wrap_err("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).wrap_err("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let (command_tx, command_rx) = mpsc::channel();
    let (event_tx, event_rx) = mpsc::channel();

    let interface = runtime.worker.interface;
    let worker_handle = spawn_worker(runtime.worker, runtime.session, command_rx, event_tx);

    let frame_rate = Duration::from_millis(50);
    let mut app = AppState::new(interface);
    let mut exit_error: Option<eyre::Report> = None;

    loop {
        terminal.draw(|frame| render_ui(frame, &app))?;

        if event::poll(frame_rate)?
            && let Event::Key(key) = event::read()?
            && handle_key_event(key.code, &mut app, &command_tx)?
        {
            break;
        }

        loop {
            match event_rx.try_recv() {
                Ok(event) => apply_event(&mut app, event, &mut exit_error),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    if exit_error.is_none() {
                        exit_error = Some(eyre::eyre!("worker thread disconnected"));
                    }
                    app.should_quit = true;
                    break;
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    command_tx.send(WorkerCommand::Terminate).ok();
    worker_handle.join().ok();

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    if let Some(err) = exit_error {
        return Err(err);
    }

    Ok(())
}

fn apply_event(app: &mut AppState, event: WorkerEvent, exit_error: &mut Option<eyre::Report>) {
    match event {
        WorkerEvent::Connection(connected) => app.connected = connected,
        WorkerEvent::Running(running) => app.running = running,
        WorkerEvent::Phase(phase) => app.phase = phase,
        WorkerEvent::Values(measurement) => app.update_measurement(measurement),
        WorkerEvent::Point { index, pwm, flow } => app.record_point(index, pwm, flow),
        WorkerEvent::Result(result) => app.result = Some(result),
        WorkerEvent::Log(line) => app.append_log(line),
        WorkerEvent::Error(err) => {
            *exit_error = Some(err.wrap_err("serial connection failed"));
            app.should_quit = true;
        }
    }
}

fn resolve_runtime_args(args: &Args) -> eyre::Result<RuntimeArgs> {
    let interface = args.interface;
    let baud = args.baud.unwrap_or(interface.default_baud());

    let port = match interface {
        InterfaceMode::Simulation => None,
        InterfaceMode::Serial => Some(args.port.clone().ok_or_else(|| {
            eyre::eyre!("serial port required unless using simulation interface")
        })?),
    };
    if args.tick_interval == 0 {
        return Err(eyre::eyre!("tick interval must be positive"));
    }
    if args.timeout == 0 {
        return Err(eyre::eyre!("reply timeout must be positive"));
    }

    Ok(RuntimeArgs {
        worker: WorkerConfig {
            port,
            baud,
            interface,
            tick_interval: Duration::from_millis(args.tick_interval),
            exchange_timeout: Duration::from_millis(args.timeout),
            verify_checksum: !args.lenient_checksum,
        },
        session: SessionConfig {
            settle: Duration::from_millis(args.settle),
            gas: args.gas,
            ..SessionConfig::default()
        },
        headless: args.headless,
    })
}
