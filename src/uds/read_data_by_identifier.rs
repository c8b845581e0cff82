//! Services 0x22 / 0x2E — Read/Write Data By Identifier

use super::{DiagError, DiagServerResult, UdsClient, UdsService};

impl UdsClient {
    /// Reads the data record for `did`. Returns the raw record bytes (the DID echo is
    /// stripped).
    pub fn read_data_by_identifier(&self, did: u16) -> DiagServerResult<Vec<u8>> {
        let [hi, lo] = did.to_be_bytes();
        let resp = self.raw_exchange(&[UdsService::ReadDataByIdentifier as u8, hi, lo])?;
        if resp.get(1..3) != Some(&[hi, lo][..]) {
            return Err(DiagError::Protocol("read-data response echoed the wrong identifier".into()));
        }
        Ok(resp[3..].to_vec())
    }

    /// Writes `data` to the record for `did`.
    pub fn write_data_by_identifier(&self, did: u16, data: &[u8]) -> DiagServerResult<()> {
        let [hi, lo] = did.to_be_bytes();
        let mut payload = vec![UdsService::WriteDataByIdentifier as u8, hi, lo];
        payload.extend_from_slice(data);
        let resp = self.raw_exchange(&payload)?;
        if resp.get(1..3) != Some(&[hi, lo][..]) {
            return Err(DiagError::Protocol("write-data response echoed the wrong identifier".into()));
        }
        Ok(())
    }
}
