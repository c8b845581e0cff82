//! Service 0x11 — ECU Reset

use super::{DiagServerResult, UdsClient, UdsService};

/// Reset type sub-function values (ISO14229 Table 34).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ResetType {
    /// 0x01 — hard reset
    Hard = 0x01,
    /// 0x02 — key off/on
    KeyOffOn = 0x02,
    /// 0x03 — soft reset
    Soft = 0x03,
}

impl UdsClient {
    /// Requests an ECU reset. A positive response means the ECU is about to reset, which
    /// drops the session back to [`super::SessionType::Default`] and clears every cached
    /// security unlock on our side, matching what will happen on the ECU's.
    pub fn ecu_reset(&self, reset_type: ResetType) -> DiagServerResult<()> {
        self.raw_exchange(&[UdsService::EcuReset as u8, reset_type as u8])?;
        self.invalidate_session_state();
        Ok(())
    }
}
