//! Services 0x34 / 0x36 / 0x37 — Request Download, Transfer Data, Request Transfer Exit
//!
//! The flash manager ([`crate::flash::manager`]) is this trio's main caller, but they are
//! plain UDS services in their own right.

use super::{DiagError, DiagServerResult, UdsClient, UdsService};

/// `dataFormatIdentifier` the download requests advertise: raw, uncompressed, unencrypted.
const DATA_FORMAT_RAW: u8 = 0x00;

impl UdsClient {
    /// Requests a download of `length` bytes starting at `address`. Returns the
    /// ECU-negotiated maximum number of bytes per `TransferData` block (including that
    /// service's own 2-byte header).
    pub fn request_download(&self, address: u32, length: u32) -> DiagServerResult<u32> {
        // addressAndLengthFormatIdentifier 0x44: 4 address bytes, 4 length bytes.
        let mut payload = vec![UdsService::RequestDownload as u8, DATA_FORMAT_RAW, 0x44];
        payload.extend_from_slice(&address.to_be_bytes());
        payload.extend_from_slice(&length.to_be_bytes());

        let resp = self.raw_exchange(&payload)?;
        let format = *resp
            .get(1)
            .ok_or_else(|| DiagError::Protocol("request download response missing length format".into()))?;
        let size = (format >> 4) as usize;
        let max_len_bytes = resp
            .get(2..2 + size)
            .ok_or_else(|| DiagError::Protocol("request download response truncated".into()))?;
        let mut max_len: u32 = 0;
        for b in max_len_bytes {
            max_len = (max_len << 8) | *b as u32;
        }
        Ok(max_len)
    }

    /// Transfers one block of `data` at `sequence` (wrapping `0x00..=0xFF` per ISO14229).
    /// Returns any transfer-response parameter record the ECU attached.
    pub fn transfer_data(&self, sequence: u8, data: &[u8]) -> DiagServerResult<Vec<u8>> {
        let mut payload = vec![UdsService::TransferData as u8, sequence];
        payload.extend_from_slice(data);
        let resp = self.raw_exchange(&payload)?;
        if resp.get(1) != Some(&sequence) {
            return Err(DiagError::Protocol("transfer data response echoed the wrong sequence number".into()));
        }
        Ok(resp[2..].to_vec())
    }

    /// Ends the current download/upload transfer.
    pub fn request_transfer_exit(&self) -> DiagServerResult<Vec<u8>> {
        let resp = self.raw_exchange(&[UdsService::RequestTransferExit as u8])?;
        Ok(resp[1..].to_vec())
    }
}
