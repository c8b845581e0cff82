//! Reusable test doubles
//!
//! A single scripted [`transport::Transport`](crate::transport::Transport) implementation,
//! shared by this crate's own unit tests and available to downstream integration tests that
//! want to exercise [`crate::uds`]/[`crate::obd2`] clients without real hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::frame::CanFrame;
use crate::transport::{Transport, TransportError};

/// A transport that replays a fixed queue of response frames, one per `recv` call, and
/// otherwise reports an empty receive (simulating silence, not an error).
///
/// Every `send`d frame is recorded in [`ScriptedTransport::sent`] for assertions.
pub struct ScriptedTransport {
    responses: Arc<Mutex<VecDeque<CanFrame>>>,
    sent: Arc<Mutex<Vec<CanFrame>>>,
}

impl ScriptedTransport {
    /// Builds a transport that will reply with `responses` in order, one frame per poll.
    pub fn new(responses: Vec<CanFrame>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A handle to the frames sent through this transport so far, shareable across threads.
    pub fn sent_handle(&self) -> Arc<Mutex<Vec<CanFrame>>> {
        self.sent.clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, frame: &CanFrame) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(frame.clone());
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<CanFrame>, TransportError> {
        if let Some(frame) = self.responses.lock().unwrap().pop_front() {
            return Ok(vec![frame]);
        }
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        Ok(Vec::new())
    }

    fn close(&mut self) {}
}
