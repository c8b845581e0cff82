//! Service 0x28 — Communication Control

use super::{DiagServerResult, UdsClient, UdsService};

/// `controlType` values (ISO14229 Table 48).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlType {
    /// 0x00 — enable Rx and Tx.
    EnableRxAndTx = 0x00,
    /// 0x01 — enable Rx, disable Tx.
    EnableRxDisableTx = 0x01,
    /// 0x02 — disable Rx, enable Tx.
    DisableRxEnableTx = 0x02,
    /// 0x03 — disable Rx and Tx.
    DisableRxAndTx = 0x03,
}

/// `communicationType` bit field: which network(s) the control applies to. Normal
/// communication messages only, both application and network layer, is `0x01`; we expose that
/// single value as most flash sequences only ever need it.
pub const NORMAL_COMMUNICATION: u8 = 0x01;

impl UdsClient {
    /// Enables or disables communication of `communication_type` per `control_type`. Used by
    /// the flash manager to silence unrelated bus traffic while programming.
    pub fn communication_control(&self, control_type: ControlType, communication_type: u8) -> DiagServerResult<()> {
        self.raw_exchange(&[UdsService::CommunicationControl as u8, control_type as u8, communication_type])?;
        Ok(())
    }
}
