use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use color_eyre::eyre;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::debug;

use crate::backend::Transport;
use crate::constants::READ_POLL_MS;
use crate::frame::{FrameAssembler, HexBytes};

pub(crate) struct SerialTransport {
    port: Box<dyn SerialPort>,
    assembler: FrameAssembler,
    pending: VecDeque<u8>,
}

impl SerialTransport {
    pub(crate) fn open(path: &str, baud: u32) -> eyre::Result<Self> {
        let mut port = serialport::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(READ_POLL_MS))
            .open()
            .map_err(|err| eyre::eyre!("could not connect to {path}: {err}"))?;
        port.write_request_to_send(true)
            .map_err(|err| eyre::eyre!("assert RTS on {path}: {err}"))?;
        port.write_data_terminal_ready(true)
            .map_err(|err| eyre::eyre!("assert DTR on {path}: {err}"))?;
        Ok(Self {
            port,
            assembler: FrameAssembler::new(),
            pending: VecDeque::new(),
        })
    }

    fn drain_pending(&mut self) -> Option<Vec<u8>> {
        while let Some(byte) = self.pending.pop_front() {
            if let Some(frame) = self.assembler.push(byte) {
                return Some(frame);
            }
        }
        None
    }
}

impl Transport for SerialTransport {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()?;
        debug!(len = frame.len(), bytes = %HexBytes(frame), "writing");
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        self.assembler.reset();
        let mut buf = [0u8; 64];

        loop {
            if let Some(frame) = self.drain_pending() {
                debug!(len = frame.len(), bytes = %HexBytes(&frame), "reading");
                return Ok(frame);
            }
            if Instant::now() >= deadline {
                debug!("reading: no data");
                return Ok(Vec::new());
            }
            match self.port.read(&mut buf) {
                Ok(count) => self.pending.extend(&buf[..count]),
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) => {}
                Err(err) => return Err(err),
            }
        }
    }
}
