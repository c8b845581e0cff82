//! Service 0x27 — Security Access
//!
//! Two-phase seed/key unlock: `request_seed(level)` returns the ECU-issued seed bytes, the
//! caller (or a [`SeedToKey`] callback) computes the key, and `send_key(level, key)` submits
//! it. By UDS convention the odd sub-function requests a seed for a level and the following
//! even sub-function submits its key.

use std::sync::Arc;

use super::{DiagError, DiagServerResult, UdsClient, UdsService};

/// A user-supplied seed-to-key algorithm, invoked by [`UdsClient::unlock_security_level`].
pub type SeedToKey = Arc<dyn Fn(&[u8], u8) -> Vec<u8> + Send + Sync>;

fn request_seed_subfunction(level: u8) -> u8 {
    level.saturating_mul(2).saturating_sub(1)
}

fn send_key_subfunction(level: u8) -> u8 {
    level.saturating_mul(2)
}

impl UdsClient {
    /// Requests a seed for `level`. Returns the raw seed bytes the ECU supplied; an all-zero
    /// seed conventionally means the level is already unlocked, which is left for the caller
    /// to interpret.
    pub fn request_seed(&self, level: u8) -> DiagServerResult<Vec<u8>> {
        let sub_function = request_seed_subfunction(level);
        let resp = self.raw_exchange(&[UdsService::SecurityAccess as u8, sub_function])?;
        if resp.get(1) != Some(&sub_function) {
            return Err(DiagError::Protocol("security access response echoed the wrong sub-function".into()));
        }
        Ok(resp[2..].to_vec())
    }

    /// Submits `key` to unlock `level`. On a positive response, marks `level` unlocked until
    /// the next session change or ECU reset.
    pub fn send_key(&self, level: u8, key: &[u8]) -> DiagServerResult<()> {
        let sub_function = send_key_subfunction(level);
        let mut payload = vec![UdsService::SecurityAccess as u8, sub_function];
        payload.extend_from_slice(key);
        let resp = self.raw_exchange(&payload)?;
        if resp.get(1) != Some(&sub_function) {
            return Err(DiagError::Protocol("security access response echoed the wrong sub-function".into()));
        }
        self.unlocked_levels.lock().unwrap().insert(level);
        Ok(())
    }

    /// Convenience wrapper running the full seed/key handshake for `level` with a caller
    /// supplied algorithm.
    pub fn unlock_security_level(&self, level: u8, algorithm: &SeedToKey) -> DiagServerResult<()> {
        let seed = self.request_seed(level)?;
        let key = algorithm(&seed, level);
        self.send_key(level, &key)
    }
}
