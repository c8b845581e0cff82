#![deny(
    missing_docs,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_imports,
    unused_import_braces,
    unused_qualifications
)]

//! Protocol machinery for talking to vehicle ECUs over a PassThru-style transport.
//!
//! This crate does not own a hardware adapter or its driver loading; callers supply a
//! [`transport::Transport`] implementation (a thin wrapper around SocketCAN, a J2534 DLL, or a
//! test double) and everything above that line — CAN framing and filtering, request/response
//! correlation, UDS, OBD-II, and ECU flash programming — lives here.
//!
//! ## Layering
//!
//! * [`frame`] — the CAN wire data model: identifiers, frames, filters.
//! * [`transport`] — the capability boundary a caller implements.
//! * [`can`] — owns the dispatch thread, filter evaluation and subscriber fan-out.
//! * [`coordinator`] — blocking request/response correlation, shared by every protocol above.
//! * [`dtc`] / [`hex`] — small stateless helpers shared by more than one protocol.
//! * [`uds`] — ISO14229 Unified Diagnostic Services.
//! * [`obd2`] — ISO9141/SAE J1979 On-Board Diagnostics (legislated mode 01-0A access).
//! * [`flash`] — Intel HEX / Motorola S-Record parsing and the UDS-based flash sequencer.
//!
//! ## Error handling
//!
//! Protocol-level failures surface as [`DiagError`]; lower layers ([`transport::TransportError`],
//! [`coordinator::ExchangeError`], [`flash::parser::ParseError`]) convert into it via `From`, so
//! callers can propagate with `?` all the way up to a single error type.
//!
//! ## Logging
//!
//! This crate logs through the [`log`] facade at `debug`/`warn`/`error`; attach any `log`
//! backend (`env_logger` in the test suite) to see it.

pub mod can;
pub mod coordinator;
pub mod dtc;
pub mod flash;
pub mod frame;
pub mod hex;
pub mod obd2;
pub mod testing;
pub mod transport;
pub mod uds;

use coordinator::ExchangeError;
use flash::manager::FlashError;
use flash::parser::ParseError;
use transport::TransportError;

/// Result type returned by every blocking protocol operation in this crate.
pub type DiagServerResult<T> = Result<T, DiagError>;

/// Error produced by the diagnostic protocol stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagError {
    /// The underlying transport failed to send or close.
    Transport(TransportError),
    /// A response was malformed, empty, or echoed the wrong identifier/sub-function for its
    /// request. Carries a human-readable description of what was expected.
    Protocol(String),
    /// The ECU returned a negative response (`0x7F`) that isn't one of the security-access
    /// denial codes handled by [`DiagError::SecurityDenied`].
    NegativeResponse {
        /// The service ID the negative response refers to.
        service: u8,
        /// The raw negative response code.
        nrc: u8,
    },
    /// The ECU denied a security access request (invalid key, too many attempts, or a
    /// mandatory delay not yet elapsed).
    SecurityDenied(u8),
    /// No response arrived before the applicable deadline.
    Timeout,
    /// The request was cancelled because its coordinator was shut down while outstanding.
    Cancelled,
    /// A flash programming operation failed.
    Flash(FlashError),
    /// A flash image file failed to parse.
    Parse(ParseError),
    /// The requested operation is not supported by this client.
    NotSupported,
}

impl std::fmt::Display for DiagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagError::Transport(e) => write!(f, "transport error: {e}"),
            DiagError::Protocol(desc) => write!(f, "protocol error: {desc}"),
            DiagError::NegativeResponse { service, nrc } => {
                write!(f, "ECU rejected service 0x{service:02X} with NRC 0x{nrc:02X}")
            }
            DiagError::SecurityDenied(nrc) => write!(f, "security access denied (NRC 0x{nrc:02X})"),
            DiagError::Timeout => write!(f, "timed out waiting for a response"),
            DiagError::Cancelled => write!(f, "request cancelled"),
            DiagError::Flash(e) => write!(f, "flash programming error: {e}"),
            DiagError::Parse(e) => write!(f, "flash image parse error: {e}"),
            DiagError::NotSupported => write!(f, "operation not supported"),
        }
    }
}

impl std::error::Error for DiagError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DiagError::Transport(e) => Some(e),
            DiagError::Flash(e) => Some(e),
            DiagError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for DiagError {
    fn from(e: TransportError) -> Self {
        DiagError::Transport(e)
    }
}

impl From<ExchangeError> for DiagError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::Timeout => DiagError::Timeout,
            ExchangeError::TransportFailure => DiagError::Transport(TransportError::Closed),
            ExchangeError::Cancelled => DiagError::Cancelled,
        }
    }
}

impl From<FlashError> for DiagError {
    fn from(e: FlashError) -> Self {
        DiagError::Flash(e)
    }
}

impl From<ParseError> for DiagError {
    fn from(e: ParseError) -> Self {
        DiagError::Parse(e)
    }
}

/// Error establishing a protocol client over a transport (bad configuration, unsupported
/// baud rate, and similar setup-time failures).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    /// The CAN configuration was rejected (e.g. an unsupported baud rate).
    #[error("CAN configuration rejected")]
    BadCanConfig,
    /// A numeric configuration field was out of its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
