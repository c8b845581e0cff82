//! Service 0x10 — Diagnostic Session Control

use super::{DiagError, DiagServerResult, UdsClient, UdsService};

/// The ECU's diagnostic session. Security unlocks and the tester-present ticker's activity
/// both follow this transition: leaving any non-default session clears unlocked levels, and
/// entering one starts the ticker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionType {
    /// 0x01 — default session, no special diagnostics available.
    Default = 0x01,
    /// 0x02 — programming session, required before `RequestDownload`/`TransferData`.
    Programming = 0x02,
    /// 0x03 — extended diagnostic session.
    ExtendedDiagnostic = 0x03,
    /// 0x04 — safety system diagnostic session.
    SafetySystem = 0x04,
}

impl From<SessionType> for u8 {
    fn from(s: SessionType) -> u8 {
        s as u8
    }
}

impl TryFrom<u8> for SessionType {
    type Error = DiagError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(SessionType::Default),
            0x02 => Ok(SessionType::Programming),
            0x03 => Ok(SessionType::ExtendedDiagnostic),
            0x04 => Ok(SessionType::SafetySystem),
            other => Err(DiagError::Protocol(format!("unknown session type 0x{other:02X}"))),
        }
    }
}

impl UdsClient {
    /// Requests a transition to `mode`. On a positive response, updates the client's session
    /// state, clears any cached security unlocks (a session change invalidates them on the
    /// ECU side too) and starts or stops the tester-present ticker accordingly. On a negative
    /// response or timeout the client's session state is left untouched.
    pub fn diagnostic_session_control(&self, mode: SessionType) -> DiagServerResult<()> {
        let resp = self.raw_exchange(&[UdsService::DiagnosticSessionControl as u8, mode.into()])?;
        if resp.get(1) != Some(&mode.into()) {
            return Err(DiagError::Protocol("session control response echoed the wrong session type".into()));
        }
        self.set_session(mode);
        Ok(())
    }
}
