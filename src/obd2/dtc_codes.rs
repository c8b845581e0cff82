//! Modes 0x03 / 0x04 / 0x07 / 0x0A — stored/pending/permanent DTCs and DTC clearing.

use super::{DiagError, DiagServerResult, ObdClient};
use crate::dtc::{bytes_to_dtc, is_padding_pair};

/// Which DTC bucket to read; each maps to its own OBD-II mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum DtcMode {
    /// 0x03 — DTCs that commanded the MIL on.
    Stored = 0x03,
    /// 0x07 — DTCs detected during the current or last completed driving cycle.
    Pending = 0x07,
    /// 0x0A — permanent DTCs, clearable only by the ECU itself.
    Permanent = 0x0A,
}

impl ObdClient {
    /// Reads DTCs for `mode`. Response shape is `<mode+0x40> <count> <DTC pairs...>`; `00 00`
    /// padding pairs are dropped.
    pub fn read_dtcs(&self, mode: DtcMode) -> DiagServerResult<Vec<String>> {
        let resp = self.raw_exchange(&[mode as u8])?;
        let pairs = resp.get(2..).unwrap_or(&[]);
        let mut codes = Vec::with_capacity(pairs.len() / 2);
        for chunk in pairs.chunks_exact(2) {
            let bytes = [chunk[0], chunk[1]];
            if is_padding_pair(bytes) {
                continue;
            }
            let raw = u16::from_be_bytes(bytes);
            codes.push(bytes_to_dtc(raw).map_err(|e| DiagError::Protocol(e.to_string()))?);
        }
        Ok(codes)
    }

    /// Mode 0x04 — clears stored and pending DTCs and resets the MIL.
    pub fn clear_dtcs(&self) -> DiagServerResult<()> {
        self.raw_exchange(&[0x04])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::CanProtocol;
    use crate::coordinator::RequestCoordinator;
    use crate::frame::{CanFrame, CanId};
    use crate::obd2::ObdConfig;
    use crate::testing::ScriptedTransport;

    #[test]
    fn dtc_pairs_decode_and_padding_dropped() {
        let resp = CanFrame::new(
            CanId::Standard(0x7E8),
            &[0x43, 0x02, 0x01, 0x71, 0x00, 0x00],
            false,
        )
        .unwrap();
        let can = CanProtocol::new(Box::new(ScriptedTransport::new(vec![resp])));
        let coordinator = RequestCoordinator::new(can.clone());
        let client = super::super::ObdClient::new(can, coordinator, ObdConfig::default());
        let codes = client.read_dtcs(DtcMode::Stored).unwrap();
        assert_eq!(codes, vec!["P0171".to_string()]);
        client.shutdown();
    }
}
