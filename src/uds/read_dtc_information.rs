//! Services 0x19 (Read DTC Information, `reportDTCByStatusMask` sub-function) and 0x14
//! (Clear Diagnostic Information is implemented separately in
//! [`super::clear_diagnostic_information`]).

use super::{DiagError, DiagServerResult, UdsClient, UdsService};
use crate::dtc::UdsDtc;

const REPORT_DTC_BY_STATUS_MASK: u8 = 0x02;

impl UdsClient {
    /// Reads every DTC whose status matches any bit set in `status_mask`
    /// (`reportDTCByStatusMask`, ISO14229 sub-function `0x02`).
    pub fn read_dtc_by_status_mask(&self, status_mask: u8) -> DiagServerResult<Vec<UdsDtc>> {
        let resp = self.raw_exchange(&[
            UdsService::ReadDtcInformation as u8,
            REPORT_DTC_BY_STATUS_MASK,
            status_mask,
        ])?;
        if resp.get(1) != Some(&REPORT_DTC_BY_STATUS_MASK) {
            return Err(DiagError::Protocol("read-DTC response echoed the wrong sub-function".into()));
        }
        // byte 2 is the DTC status availability mask, records follow as 4-byte groups.
        let records = resp.get(3..).unwrap_or(&[]);
        let mut dtcs = Vec::with_capacity(records.len() / 4);
        for chunk in records.chunks_exact(4) {
            dtcs.push(UdsDtc::from_record([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        Ok(dtcs)
    }
}
