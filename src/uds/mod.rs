//! UDS (Unified Diagnostic Services - ISO14229) engine (component D)
//!
//! Encodes service requests, decodes positive/negative responses, owns session state, and
//! handles the pending-response (NRC `0x78`) retries that the [`crate::coordinator`]
//! absorbs on its behalf.

mod clear_diagnostic_information;
mod communication_control;
mod data_transfer;
mod diagnostic_session_control;
mod ecu_reset;
mod read_data_by_identifier;
mod read_dtc_information;
mod read_memory_by_address;
mod routine_control;
mod security_access;
mod tester_present;

pub use diagnostic_session_control::SessionType;
pub use routine_control::RoutineSubFunction;
pub use security_access::SeedToKey;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::coordinator::{ExchangeError, PendingPolicy, RequestCoordinator};
use crate::{DiagError, DiagServerResult};

/// UDS service identifiers this engine issues requests for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum UdsService {
    /// 0x10 — Diagnostic Session Control
    DiagnosticSessionControl = 0x10,
    /// 0x11 — ECU Reset
    EcuReset = 0x11,
    /// 0x14 — Clear Diagnostic Information
    ClearDiagnosticInformation = 0x14,
    /// 0x19 — Read DTC Information
    ReadDtcInformation = 0x19,
    /// 0x22 — Read Data By Identifier
    ReadDataByIdentifier = 0x22,
    /// 0x23 — Read Memory By Address
    ReadMemoryByAddress = 0x23,
    /// 0x27 — Security Access
    SecurityAccess = 0x27,
    /// 0x28 — Communication Control
    CommunicationControl = 0x28,
    /// 0x2E — Write Data By Identifier
    WriteDataByIdentifier = 0x2E,
    /// 0x31 — Routine Control
    RoutineControl = 0x31,
    /// 0x34 — Request Download
    RequestDownload = 0x34,
    /// 0x36 — Transfer Data
    TransferData = 0x36,
    /// 0x37 — Request Transfer Exit
    RequestTransferExit = 0x37,
    /// 0x3E — Tester Present
    TesterPresent = 0x3E,
}

/// Negative response codes the core treats specially; every other NRC surfaces to the caller
/// as [`DiagError::NegativeResponse`] carrying the raw byte.
const NRC_SECURITY_ACCESS_DENIED: u8 = 0x33;
const NRC_INVALID_KEY: u8 = 0x35;
const NRC_EXCEED_NUMBER_OF_ATTEMPTS: u8 = 0x36;
const NRC_REQUIRED_TIME_DELAY_NOT_EXPIRED: u8 = 0x37;

fn is_security_nrc(nrc: u8) -> bool {
    matches!(
        nrc,
        NRC_SECURITY_ACCESS_DENIED
            | NRC_INVALID_KEY
            | NRC_EXCEED_NUMBER_OF_ATTEMPTS
            | NRC_REQUIRED_TIME_DELAY_NOT_EXPIRED
    )
}

/// UDS client configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UdsConfig {
    /// CAN ID the client transmits requests on.
    pub request_id: u32,
    /// CAN ID the client expects responses on.
    pub response_id: u32,
    /// `p2_client`: ordinary per-request response deadline, milliseconds.
    pub timeout_ms: u32,
    /// `p2*`: extended deadline active while the ECU is sending NRC 0x78, milliseconds.
    pub p2_star_ms: u32,
    /// Whether ISO-TP extended addressing is in use.
    pub extended_addressing: bool,
    /// Tester (source) address, used only when `extended_addressing` is set.
    pub source_addr: u8,
    /// Target address, used only when `extended_addressing` is set.
    pub target_addr: u8,
}

impl Default for UdsConfig {
    fn default() -> Self {
        Self {
            request_id: 0x7E0,
            response_id: 0x7E8,
            timeout_ms: 50,
            p2_star_ms: 5000,
            extended_addressing: false,
            source_addr: 0xF1,
            target_addr: 0x00,
        }
    }
}

/// Statistics snapshot for a [`UdsClient`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct UdsStats {
    /// Requests sent (including pending-response retries).
    pub requests_sent: u64,
    /// Requests that received a positive response.
    pub positive_responses: u64,
    /// Requests that received a (non-0x78) negative response.
    pub negative_responses: u64,
    /// Requests that timed out.
    pub timeouts: u64,
}

/// How often the tester-present background ticker fires while in a non-default session.
const TESTER_PRESENT_INTERVAL: Duration = Duration::from_secs(2);

pub(crate) use crate::frame::can_id_from_raw as infer_can_id;

/// The UDS diagnostic client.
///
/// Owns session state and cached security unlocks; every blocking service method serializes
/// through the underlying [`RequestCoordinator`].
#[derive(Debug)]
pub struct UdsClient {
    coordinator: RequestCoordinator,
    config: UdsConfig,
    session: Mutex<SessionType>,
    unlocked_levels: Mutex<HashSet<u8>>,
    stats: Mutex<UdsStats>,
    tester_present_running: Arc<AtomicBool>,
    tester_present_active: Arc<AtomicBool>,
    tester_present_thread: Mutex<Option<JoinHandle<()>>>,
}

impl UdsClient {
    /// Builds a new UDS client over `coordinator`. Starts the tester-present background
    /// ticker immediately; it is a no-op while the session is [`SessionType::Default`].
    pub fn new(coordinator: RequestCoordinator, config: UdsConfig) -> Self {
        let tester_present_running = Arc::new(AtomicBool::new(true));
        let tester_present_active = Arc::new(AtomicBool::new(false));

        let worker_running = tester_present_running.clone();
        let worker_active = tester_present_active.clone();
        let worker_coordinator = coordinator.clone();
        let worker_config = config;

        let handle = std::thread::spawn(move || {
            while worker_running.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(100));
                if !worker_active.load(Ordering::SeqCst) {
                    continue;
                }
                let req_id = infer_can_id(worker_config.request_id);
                // Suppress-positive-response bit set: we don't wait for an answer.
                let _ = worker_coordinator.send_only(req_id, &[UdsService::TesterPresent as u8, 0x80]);
                std::thread::sleep(TESTER_PRESENT_INTERVAL.saturating_sub(Duration::from_millis(100)));
            }
        });

        Self {
            coordinator,
            config,
            session: Mutex::new(SessionType::Default),
            unlocked_levels: Mutex::new(HashSet::new()),
            stats: Mutex::new(UdsStats::default()),
            tester_present_running,
            tester_present_active,
            tester_present_thread: Mutex::new(Some(handle)),
        }
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> UdsConfig {
        self.config
    }

    /// The client's current view of the ECU's diagnostic session.
    pub fn current_session(&self) -> SessionType {
        *self.session.lock().unwrap()
    }

    /// Whether `level` is currently unlocked (per the last successful `send_key`, not yet
    /// invalidated by a session transition or ECU reset).
    pub fn is_unlocked(&self, level: u8) -> bool {
        self.unlocked_levels.lock().unwrap().contains(&level)
    }

    /// A snapshot of the client's request/response counters.
    pub fn stats(&self) -> UdsStats {
        *self.stats.lock().unwrap()
    }

    /// Stops the tester-present ticker and the underlying coordinator.
    pub fn shutdown(&self) {
        self.tester_present_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.tester_present_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.coordinator.shutdown();
    }

    fn invalidate_session_state(&self) {
        *self.session.lock().unwrap() = SessionType::Default;
        self.unlocked_levels.lock().unwrap().clear();
        self.tester_present_active.store(false, Ordering::SeqCst);
    }

    fn set_session(&self, mode: SessionType) {
        *self.session.lock().unwrap() = mode;
        self.unlocked_levels.lock().unwrap().clear();
        self.tester_present_active
            .store(mode != SessionType::Default, Ordering::SeqCst);
    }

    /// Sends a raw service request and returns the raw positive-response bytes (still
    /// including the echoed `SID+0x40` byte), or a typed [`DiagError`] for any negative
    /// response, timeout or transport failure.
    fn raw_exchange(&self, payload: &[u8]) -> DiagServerResult<Vec<u8>> {
        let request_id = infer_can_id(self.config.request_id);
        let response_id = infer_can_id(self.config.response_id);
        let timeout = Duration::from_millis(self.config.timeout_ms as u64);
        let policy = PendingPolicy {
            p2_star: Duration::from_millis(self.config.p2_star_ms as u64),
            overall_deadline: Duration::from_secs(30),
        };

        self.stats.lock().unwrap().requests_sent += 1;
        let result = self
            .coordinator
            .exchange_with_policy(request_id, payload, response_id, timeout, policy);

        let response = match result {
            Ok(resp) => resp,
            Err(ExchangeError::Timeout) => {
                self.stats.lock().unwrap().timeouts += 1;
                return Err(DiagError::Timeout);
            }
            Err(e) => return Err(e.into()),
        };

        if response.is_empty() {
            return Err(DiagError::Protocol("ECU returned an empty response".into()));
        }

        if response[0] == 0x7F {
            self.stats.lock().unwrap().negative_responses += 1;
            let nrc = response.get(2).copied().unwrap_or(0);
            log::warn!(
                "ECU negative response for SID 0x{:02X}: NRC 0x{:02X}",
                response.get(1).copied().unwrap_or(0),
                nrc
            );
            if is_security_nrc(nrc) {
                return Err(DiagError::SecurityDenied(nrc));
            }
            return Err(DiagError::NegativeResponse {
                service: response.get(1).copied().unwrap_or(payload[0]),
                nrc,
            });
        }

        self.stats.lock().unwrap().positive_responses += 1;
        if response[0] != payload[0] + 0x40 {
            return Err(DiagError::Protocol(format!(
                "expected positive response 0x{:02X}, got 0x{:02X}",
                payload[0] + 0x40,
                response[0]
            )));
        }
        Ok(response)
    }

    /// Sends a raw service request without waiting for (or expecting) a response.
    fn fire_and_forget(&self, payload: &[u8]) -> DiagServerResult<()> {
        let request_id = infer_can_id(self.config.request_id);
        self.coordinator
            .send_only(request_id, payload)
            .map_err(DiagError::from)
    }
}

#[cfg(test)]
mod test;
