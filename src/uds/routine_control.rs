//! Service 0x31 — Routine Control

use super::{DiagError, DiagServerResult, UdsClient, UdsService};

/// Routine control sub-function.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum RoutineSubFunction {
    /// 0x01 — start the routine.
    Start = 0x01,
    /// 0x02 — stop the routine.
    Stop = 0x02,
    /// 0x03 — poll for routine results.
    RequestResults = 0x03,
}

impl UdsClient {
    /// Issues a routine control request for `routine_id`. `data` is the routine's
    /// option-record payload, which may be empty. Returns the routine's status record, if
    /// any.
    pub fn routine_control(
        &self,
        sub_function: RoutineSubFunction,
        routine_id: u16,
        data: &[u8],
    ) -> DiagServerResult<Vec<u8>> {
        let [hi, lo] = routine_id.to_be_bytes();
        let mut payload = vec![UdsService::RoutineControl as u8, sub_function as u8, hi, lo];
        payload.extend_from_slice(data);
        let resp = self.raw_exchange(&payload)?;
        if resp.get(1) != Some(&(sub_function as u8)) || resp.get(2..4) != Some(&[hi, lo][..]) {
            return Err(DiagError::Protocol("routine control response echoed the wrong routine".into()));
        }
        Ok(resp[4..].to_vec())
    }
}
