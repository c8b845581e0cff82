//! Transport capability (external contract)
//!
//! The core never speaks to hardware directly. Callers supply a [`Transport`] — typically a
//! thin wrapper around a PassThru (SAE J2534) driver, SocketCAN, or similar — and the core
//! owns the receive loop on top of it. This is the only concession to the wide variety of
//! driver shapes a host might provide.

use std::time::Duration;

use crate::frame::CanFrame;

/// Error returned by a [`Transport`] implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The underlying driver reported an error. `code` is driver-specific.
    DriverError {
        /// Driver-specific error code
        code: i32,
        /// Human-readable description
        desc: String,
    },
    /// The transport was closed and no further operations are possible.
    Closed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::DriverError { code, desc } => {
                write!(f, "transport driver error {}: {}", code, desc)
            }
            TransportError::Closed => write!(f, "transport is closed"),
        }
    }
}

impl std::error::Error for TransportError {}

/// The capability the core consumes to exchange raw framed messages with an ECU.
///
/// Implementations are expected to be **polling-based**: `recv` waits at most `timeout` and
/// may return an empty vector without it being an error. The core owns the receive loop
/// ([`crate::can::CanProtocol`]'s dispatch thread); a `Transport` never pushes frames on its
/// own.
pub trait Transport: Send {
    /// Enqueues one outbound frame. May block briefly, but must not block for an entire
    /// caller-specified request timeout.
    fn send(&mut self, frame: &CanFrame) -> Result<(), TransportError>;

    /// Drains 0..=N inbound frames, waiting at most `timeout`. An empty result on timeout is
    /// not an error.
    fn recv(&mut self, timeout: Duration) -> Result<Vec<CanFrame>, TransportError>;

    /// Idempotent teardown. Safe to call more than once.
    fn close(&mut self);
}
