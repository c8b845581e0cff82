//! Service 0x3E — Tester Present
//!
//! The background ticker in [`UdsClient::new`] sends these automatically while the session is
//! non-default; this module exposes a manual trigger for callers that want to assert activity
//! immediately (e.g. right after a session change, before the ticker's next tick).

use super::{DiagServerResult, UdsClient, UdsService};

impl UdsClient {
    /// Sends a single suppress-positive-response tester-present frame without waiting for a
    /// reply.
    pub fn send_tester_present(&self) -> DiagServerResult<()> {
        self.fire_and_forget(&[UdsService::TesterPresent as u8, 0x80])
    }
}
