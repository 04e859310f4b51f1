use std::collections::VecDeque;
use std::io;
#[cfg(test)]
use std::sync::mpsc::Sender;
use std::time::Duration;

use tracing::debug;

use crate::backend::Transport;
use crate::frame::{self, Command, HexBytes};
use crate::sim::SimDevice;

pub(crate) struct SimTransport {
    device: SimDevice,
    outbox: VecDeque<Vec<u8>>,
    #[cfg(test)]
    journal: Option<Sender<Command>>,
}

impl SimTransport {
    pub(crate) fn new() -> Self {
        Self {
            device: SimDevice::new(),
            outbox: VecDeque::new(),
            #[cfg(test)]
            journal: None,
        }
    }

    /// Reports every command the device accepts on `journal`.
    #[cfg(test)]
    pub(crate) fn with_journal(journal: Sender<Command>) -> Self {
        Self {
            journal: Some(journal),
            ..Self::new()
        }
    }
}

impl Transport for SimTransport {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let request = match frame::decode(frame) {
            Ok(request) => request,
            Err(err) => {
                debug!(bytes = %HexBytes(frame), "simulated device dropped frame: {err}");
                return Ok(());
            }
        };
        let command = Command::new(request.address, request.tag, request.value);

        #[cfg(test)]
        if let Some(journal) = &self.journal {
            journal.send(command).ok();
        }

        let response = self.device.handle(command);
        let reply = frame::encode(Command::new(response.address, response.tag, response.value));
        self.outbox.push_back(reply);
        Ok(())
    }

    fn read_frame(&mut self, _timeout: Duration) -> io::Result<Vec<u8>> {
        Ok(self.outbox.pop_front().unwrap_or_default())
    }
}
