use std::time::{Duration, Instant};

use tracing::debug;

use crate::backend::Transport;
use crate::error::LinkError;
use crate::frame::{self, Command, Response};

/// Request/response exchange over a single transport. One command is in
/// flight at a time; replies are matched to it by tag.
pub struct DeviceLink {
    transport: Box<dyn Transport + Send>,
    timeout: Duration,
    verify_checksum: bool,
}

impl DeviceLink {
    pub(crate) fn new(transport: Box<dyn Transport + Send>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            verify_checksum: true,
        }
    }

    #[must_use]
    pub fn with_checksum_verification(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    pub fn send(&mut self, address: u8, code: u8, data: u16) -> Result<(), LinkError> {
        let raw = frame::encode(Command::new(address, code, data));
        self.transport.write_frame(&raw)?;
        Ok(())
    }

    /// Reads one reply. An empty read within `timeout` is `NoResponse`.
    pub fn receive(&mut self, timeout: Duration) -> Result<Response, LinkError> {
        let raw = self.transport.read_frame(timeout)?;
        if raw.is_empty() {
            return Err(LinkError::NoResponse);
        }
        let response = if self.verify_checksum {
            frame::decode(&raw)?
        } else {
            frame::decode_unverified(&raw)?
        };
        Ok(response)
    }

    /// Sends a command and waits for the reply tagged `expected_tag`,
    /// discarding any other replies until the deadline passes.
    pub fn exchange(
        &mut self,
        address: u8,
        code: u8,
        data: u16,
        expected_tag: u8,
    ) -> Result<Response, LinkError> {
        self.send(address, code, data)?;
        let started = Instant::now();

        loop {
            let remaining = self.timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(LinkError::TransportTimeout {
                    address,
                    code,
                    elapsed_ms: started.elapsed().as_millis(),
                });
            }
            match self.receive(remaining) {
                Ok(response) if response.tag == expected_tag => return Ok(response),
                Ok(response) => {
                    debug!(
                        expected = expected_tag,
                        tag = response.tag,
                        value = response.value,
                        "discarding reply with foreign tag"
                    );
                }
                Err(LinkError::NoResponse) => {}
                Err(err) => return Err(err),
            }
        }
    }

    /// Exchange where the device acknowledges with the command's own code.
    pub fn request(&mut self, command: Command) -> Result<Response, LinkError> {
        self.exchange(command.address, command.code, command.data, command.code)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::DeviceLink;
    use crate::backend::mock::MockTransport;
    use crate::constants::{reduc, regul};
    use crate::error::{FrameError, LinkError};
    use crate::frame::{Command, encode};

    fn link_with(mock: &MockTransport, timeout_ms: u64) -> DeviceLink {
        DeviceLink::new(Box::new(mock.clone()), Duration::from_millis(timeout_ms))
    }

    #[test]
    fn send_writes_encoded_frame() {
        let mock = MockTransport::new();
        let mut link = link_with(&mock, 100);
        link.send(reduc::ADDRESS, reduc::SHUT_OFF, 0)
            .expect("send should work");
        assert_eq!(
            mock.written(),
            vec![vec![0xC0, 0xB8, 0x15, 0x00, 0x00, 0x2C]]
        );
    }

    #[test]
    fn receive_reports_empty_read_as_no_response() {
        let mock = MockTransport::new();
        let mut link = link_with(&mock, 100);
        let err = link
            .receive(Duration::from_millis(100))
            .expect_err("empty read should fail");
        assert!(matches!(err, LinkError::NoResponse));
    }

    #[test]
    fn exchange_skips_foreign_tags_and_timeouts() {
        let mock = MockTransport::new();
        mock.push_reply(encode(Command::new(regul::ADDRESS, regul::SET_PRES, 30)));
        mock.push_reply(Vec::new());
        mock.push_reply(encode(Command::new(regul::ADDRESS, regul::GET_MSR_FLOW, 1234)));
        let mut link = link_with(&mock, 500);

        let response = link
            .exchange(regul::ADDRESS, regul::GET_MSR_FLOW, 1, regul::GET_MSR_FLOW)
            .expect("matching reply expected");
        assert_eq!(response.value, 1234);
        assert_eq!(mock.written().len(), 1);
    }

    #[test]
    fn exchange_gives_up_after_deadline() {
        let mock = MockTransport::new();
        mock.push_reply(encode(Command::new(reduc::ADDRESS, reduc::ON_FLOW, 0)));
        let mut link = link_with(&mock, 20);

        let err = link
            .request(Command::new(reduc::ADDRESS, reduc::SHUT_OFF, 0))
            .expect_err("no matching reply should time out");
        assert!(matches!(
            err,
            LinkError::TransportTimeout {
                address: reduc::ADDRESS,
                code: reduc::SHUT_OFF,
                ..
            }
        ));
    }

    #[test]
    fn exchange_aborts_on_corrupted_frame() {
        let mock = MockTransport::new();
        mock.push_reply(vec![0xC0, 0xB8, 0x15, 0x00, 0x00, 0x2D]);
        let mut link = link_with(&mock, 500);

        let err = link
            .request(Command::new(reduc::ADDRESS, reduc::SHUT_OFF, 0))
            .expect_err("bad checksum should abort");
        assert!(matches!(
            err,
            LinkError::Frame(FrameError::ChecksumInvalid { .. })
        ));
    }

    #[test]
    fn lenient_link_accepts_bad_checksum() {
        let mock = MockTransport::new();
        mock.push_reply(vec![0xC0, 0xB8, 0x15, 0x00, 0x00, 0x2D]);
        let mut link = link_with(&mock, 500).with_checksum_verification(false);

        let response = link
            .request(Command::new(reduc::ADDRESS, reduc::SHUT_OFF, 0))
            .expect("checksum should be ignored");
        assert_eq!(response.tag, reduc::SHUT_OFF);
    }
}
