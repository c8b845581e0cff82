//! Service 0x23 — Read Memory By Address
//!
//! Used by [`crate::flash::manager::FlashManager`]'s verification stage when the ECU supports
//! it, falling back to per-block DIDs when it isn't supported.

use super::{DiagServerResult, UdsClient, UdsService};

impl UdsClient {
    /// Reads `length` bytes starting at `address` (`addressAndLengthFormatIdentifier` `0x44`:
    /// 4 address bytes, 4 length bytes, matching [`UdsClient::request_download`]'s framing).
    pub fn read_memory_by_address(&self, address: u32, length: u32) -> DiagServerResult<Vec<u8>> {
        let mut payload = vec![UdsService::ReadMemoryByAddress as u8, 0x44];
        payload.extend_from_slice(&address.to_be_bytes());
        payload.extend_from_slice(&length.to_be_bytes());
        let resp = self.raw_exchange(&payload)?;
        Ok(resp[1..].to_vec())
    }
}
