//! OBD-II (ISO9141 / SAE J1979) engine (component E)
//!
//! Encodes mode+PID requests, decodes fixed-formula PID values, enumerates supported PIDs via
//! bit-map chaining, decodes DTC byte pairs, reads the VIN, and drives periodic monitoring.

mod dtc_codes;
mod monitor;
mod pid;
mod vehicle_info;

pub use dtc_codes::DtcMode;
pub use monitor::ObdMonitorSink;
pub use pid::ObdParameter;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::can::CanProtocol;
use crate::coordinator::{ExchangeError, RequestCoordinator};
use crate::frame::can_id_from_raw;
use crate::{DiagError, DiagServerResult};

/// OBD-II client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObdConfig {
    /// CAN ID the client transmits requests on.
    pub request_id: u32,
    /// CAN ID the client expects responses on.
    pub response_id: u32,
    /// Additional ECU response IDs the caller expects to see traffic from.
    ///
    /// The source this crate is grounded on accepts this list in configuration but its
    /// monitoring dispatch only ever matches the single `response_id`; this client preserves
    /// that behavior rather than guessing at multi-ECU correlation semantics. See DESIGN.md.
    pub ecu_ids: Vec<u32>,
    /// Use 29-bit identifiers for `request_id`/`response_id` instead of inferring from range.
    pub use_extended_ids: bool,
    /// Response deadline, milliseconds.
    pub timeout_ms: u32,
}

impl Default for ObdConfig {
    fn default() -> Self {
        Self {
            request_id: 0x7DF,
            response_id: 0x7E8,
            ecu_ids: Vec::new(),
            use_extended_ids: false,
            timeout_ms: 1000,
        }
    }
}

/// Statistics snapshot for an [`ObdClient`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ObdStats {
    /// Requests sent.
    pub requests_sent: u64,
    /// Requests that received a positive response.
    pub positive_responses: u64,
    /// Requests that received a negative response.
    pub negative_responses: u64,
    /// Requests that timed out.
    pub timeouts: u64,
}

struct Inner {
    can: CanProtocol,
    coordinator: RequestCoordinator,
    config: ObdConfig,
    supported_pids: Mutex<Option<Vec<bool>>>,
    stats: Mutex<ObdStats>,
    monitor_running: AtomicBool,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

/// The OBD-II diagnostic client.
#[derive(Clone)]
pub struct ObdClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ObdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObdClient")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ObdClient {
    /// Builds a new OBD-II client over `coordinator`. `can` is held separately because VIN
    /// readout (mode 09) can span more response frames than a single coordinator `exchange`
    /// correlates, and needs its own short-lived dispatch subscription.
    pub fn new(can: CanProtocol, coordinator: RequestCoordinator, config: ObdConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                can,
                coordinator,
                config,
                supported_pids: Mutex::new(None),
                stats: Mutex::new(ObdStats::default()),
                monitor_running: AtomicBool::new(false),
                monitor_handle: Mutex::new(None),
            }),
        }
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> ObdConfig {
        self.inner.config.clone()
    }

    /// A snapshot of the client's request/response counters.
    pub fn stats(&self) -> ObdStats {
        *self.inner.stats.lock().unwrap()
    }

    /// Stops periodic monitoring (if running) and the underlying coordinator.
    pub fn shutdown(&self) {
        self.stop_monitoring();
        self.inner.coordinator.shutdown();
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.inner.config.timeout_ms as u64)
    }

    fn request_id(&self) -> crate::frame::CanId {
        can_id_from_raw(self.inner.config.request_id)
    }

    fn response_id(&self) -> crate::frame::CanId {
        can_id_from_raw(self.inner.config.response_id)
    }

    /// Sends a raw `<mode> <data...>` request and returns the raw positive-response bytes
    /// (still including the echoed `mode+0x40` byte), or a typed [`DiagError`].
    fn raw_exchange(&self, payload: &[u8]) -> DiagServerResult<Vec<u8>> {
        self.inner.stats.lock().unwrap().requests_sent += 1;
        let result = self.inner.coordinator.exchange(
            self.request_id(),
            payload,
            self.response_id(),
            self.timeout(),
        );

        let response = match result {
            Ok(resp) => resp,
            Err(ExchangeError::Timeout) => {
                self.inner.stats.lock().unwrap().timeouts += 1;
                return Err(DiagError::Timeout);
            }
            Err(e) => return Err(e.into()),
        };

        if response.is_empty() {
            return Err(DiagError::Protocol("ECU returned an empty OBD response".into()));
        }
        if response[0] == 0x7F {
            self.inner.stats.lock().unwrap().negative_responses += 1;
            let nrc = response.get(2).copied().unwrap_or(0);
            log::warn!(
                "ECU negative OBD response for mode 0x{:02X}: code 0x{:02X}",
                response.get(1).copied().unwrap_or(0),
                nrc
            );
            return Err(DiagError::NegativeResponse {
                service: response.get(1).copied().unwrap_or(payload[0]),
                nrc,
            });
        }

        self.inner.stats.lock().unwrap().positive_responses += 1;
        if response[0] != payload[0] + 0x40 {
            return Err(DiagError::Protocol(format!(
                "expected OBD response mode 0x{:02X}, got 0x{:02X}",
                payload[0] + 0x40,
                response[0]
            )));
        }
        Ok(response)
    }

    /// Issues a request whose mode this client has no formula or dedicated decode path for
    /// (modes 0x05, 0x06, 0x08), returning the raw bytes after the mode echo.
    pub fn request_raw(&self, mode: u8, data: &[u8]) -> DiagServerResult<Vec<u8>> {
        let mut payload = vec![mode];
        payload.extend_from_slice(data);
        let resp = self.raw_exchange(&payload)?;
        Ok(resp[1..].to_vec())
    }
}
