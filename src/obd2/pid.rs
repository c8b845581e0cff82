//! Mode 0x01 — current data: PID value decoding and supported-PID bit-map discovery.

use super::{DiagError, DiagServerResult, ObdClient};

const MODE_CURRENT_DATA: u8 = 0x01;

/// One decoded OBD-II parameter: the PID requested, its raw response bytes, and the decoded
/// `(value, unit)` per the fixed formula table below.
#[derive(Debug, Clone, PartialEq)]
pub struct ObdParameter {
    /// The PID this parameter was read for.
    pub pid: u8,
    /// The raw response bytes, after the mode+PID echo is stripped.
    pub raw: Vec<u8>,
    /// The decoded physical value.
    pub value: f64,
    /// The value's unit, or `"raw"` for PIDs with no known formula.
    pub unit: String,
}

/// Decodes `raw` (the bytes following the mode+PID echo) for `pid` per the fixed formula
/// table. Unknown PIDs decode to the first byte with unit `"raw"`.
pub fn decode_pid(pid: u8, raw: &[u8]) -> ObdParameter {
    let a = raw.first().copied().unwrap_or(0) as f64;
    let b = raw.get(1).copied().unwrap_or(0) as f64;
    let (value, unit): (f64, &str) = match pid {
        0x04 => (a * 100.0 / 255.0, "%"),
        0x05 => (a - 40.0, "°C"),
        0x0A => (a * 3.0, "kPa"),
        0x0B => (a, "kPa"),
        0x0C => ((256.0 * a + b) / 4.0, "RPM"),
        0x0D => (a, "km/h"),
        0x0E => (a / 2.0 - 64.0, "°"),
        0x0F => (a - 40.0, "°C"),
        0x10 => ((256.0 * a + b) / 100.0, "g/s"),
        0x11 => (a * 100.0 / 255.0, "%"),
        0x1F => (256.0 * a + b, "s"),
        0x21 => (256.0 * a + b, "km"),
        0x2F => (a * 100.0 / 255.0, "%"),
        0x31 => (256.0 * a + b, "km"),
        0x33 => (a, "kPa"),
        _ => (a, "raw"),
    };
    ObdParameter {
        pid,
        raw: raw.to_vec(),
        value,
        unit: unit.to_string(),
    }
}

/// Decodes a mode 0x01 PID-support bit-map response (4 bytes, MSB-first) into 32 flags: bit
/// `i` means PID `base + i + 1` is supported.
fn decode_support_bitmap(data: &[u8]) -> Option<[bool; 32]> {
    let bytes: [u8; 4] = data.get(0..4)?.try_into().ok()?;
    let bitmap = u32::from_be_bytes(bytes);
    let mut out = [false; 32];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = bitmap & (1 << (31 - i)) != 0;
    }
    Some(out)
}

impl ObdClient {
    /// Reads and decodes a single mode 0x01 PID.
    pub fn read_pid(&self, pid: u8) -> DiagServerResult<ObdParameter> {
        let resp = self.raw_exchange(&[MODE_CURRENT_DATA, pid])?;
        if resp.get(1) != Some(&pid) {
            return Err(DiagError::Protocol("mode 0x01 response echoed the wrong PID".into()));
        }
        Ok(decode_pid(pid, &resp[2..]))
    }

    /// Discovers every PID the ECU supports by following the `0x00 -> 0x20 -> 0x40 -> ...`
    /// bit-map chain, stopping at the first bucket whose own continuation bit is unset.
    /// Caches the result until [`ObdClient::shutdown`].
    pub fn discover_supported_pids(&self) -> DiagServerResult<Vec<u8>> {
        let mut supported: Vec<bool> = vec![false; 0xE0];
        let mut base: u8 = 0x00;
        loop {
            let resp = self.raw_exchange(&[MODE_CURRENT_DATA, base])?;
            if resp.get(1) != Some(&base) {
                return Err(DiagError::Protocol("PID support response echoed the wrong base PID".into()));
            }
            let bits = decode_support_bitmap(&resp[2..])
                .ok_or_else(|| DiagError::Protocol("PID support response truncated".into()))?;
            for (i, &set) in bits.iter().enumerate() {
                let pid = base as usize + i + 1;
                if pid <= supported.len() && set {
                    supported[pid - 1] = true;
                }
            }
            // bit 31 (pid = base + 32) gates the next bucket in the chain.
            if !bits[31] {
                break;
            }
            base = match base.checked_add(0x20) {
                Some(next) if next <= 0xC0 => next,
                _ => break,
            };
        }

        let list: Vec<u8> = supported
            .iter()
            .enumerate()
            .filter_map(|(i, &set)| set.then_some((i + 1) as u8))
            .collect();
        *self.inner.supported_pids.lock().unwrap() = Some(supported);
        Ok(list)
    }

    /// Whether `pid` was reported supported by the last [`ObdClient::discover_supported_pids`]
    /// call. Returns `None` if discovery has not run yet.
    pub fn is_pid_supported(&self, pid: u8) -> Option<bool> {
        let cache = self.inner.supported_pids.lock().unwrap();
        cache.as_ref().map(|bits| bits.get(pid as usize - 1).copied().unwrap_or(false))
    }
}
