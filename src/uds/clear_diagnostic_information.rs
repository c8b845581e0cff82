//! Service 0x14 — Clear Diagnostic Information

use super::{DiagServerResult, UdsClient, UdsService};

impl UdsClient {
    /// Clears stored DTCs in `group_of_dtc` (`0xFFFFFF` selects every group).
    pub fn clear_diagnostic_information(&self, group_of_dtc: u32) -> DiagServerResult<()> {
        let bytes = group_of_dtc.to_be_bytes();
        self.raw_exchange(&[
            UdsService::ClearDiagnosticInformation as u8,
            bytes[1],
            bytes[2],
            bytes[3],
        ])?;
        Ok(())
    }
}
