use std::io;
use std::time::Duration;

use color_eyre::eyre;

use crate::interface::InterfaceMode;
use crate::worker::WorkerConfig;

#[cfg(test)]
pub(crate) mod mock;
mod serial;
pub(crate) mod sim;

/// Half-duplex byte pipe to the device.
pub(crate) trait Transport {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Returns one complete stuffed frame starting with the marker, or an
    /// empty buffer when nothing usable arrived before `timeout`.
    fn read_frame(&mut self, timeout: Duration) -> io::Result<Vec<u8>>;
}

pub(crate) fn build_transport(config: &WorkerConfig) -> eyre::Result<Box<dyn Transport + Send>> {
    match config.interface {
        InterfaceMode::Serial => {
            let port = config
                .port
                .as_ref()
                .ok_or_else(|| eyre::eyre!("serial port required"))?;
            let transport = serial::SerialTransport::open(port, config.baud)?;
            Ok(Box::new(transport))
        }
        InterfaceMode::Simulation => Ok(Box::new(sim::SimTransport::new())),
    }
}
