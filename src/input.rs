use std::sync::mpsc::Sender;

use color_eyre::eyre::{self, WrapErr};
use crossterm::event::KeyCode;

use crate::app::AppState;
use crate::worker::WorkerCommand;

pub fn handle_key_event(
    code: KeyCode,
    app: &mut AppState,
    command_tx: &Sender<WorkerCommand>,
) -> eyre::Result<bool> {
    match code {
        KeyCode::Char('q') | KeyCode::Esc => {
            app.should_quit = true;
            return Ok(true);
        }
        KeyCode::Char('s' | ' ') => {
            if !app.connected {
                app.append_log("Connect to the device first".to_string());
                return Ok(false);
            }
            if app.running {
                command_tx
                    .send(WorkerCommand::Stop)
                    .wrap_err("send stop")?;
            } else {
                app.reset_measurement();
                command_tx
                    .send(WorkerCommand::Start)
                    .wrap_err("send start")?;
            }
        }
        KeyCode::Char('c') => {
            app.log.clear();
        }
        _ => {}
    }

    Ok(false)
}
