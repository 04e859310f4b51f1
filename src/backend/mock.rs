use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::Transport;

/// Scripted transport: replies are handed out in order, one per read, and
/// every written frame is recorded.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockTransport {
    replies: Arc<Mutex<VecDeque<Vec<u8>>>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a raw reply. An empty buffer stands for a read timeout.
    pub(crate) fn push_reply(&self, raw: Vec<u8>) {
        self.replies.lock().expect("mock lock").push_back(raw);
    }

    pub(crate) fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().expect("mock lock").clone()
    }
}

impl Transport for MockTransport {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.written.lock().expect("mock lock").push(frame.to_vec());
        Ok(())
    }

    fn read_frame(&mut self, _timeout: Duration) -> io::Result<Vec<u8>> {
        Ok(self
            .replies
            .lock()
            .expect("mock lock")
            .pop_front()
            .unwrap_or_default())
    }
}
