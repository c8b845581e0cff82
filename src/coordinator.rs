//! Request/response coordinator (component C)
//!
//! Binds a single blocking `exchange` call to the CAN dispatch thread: register an awaiter
//! keyed by the expected response ID, send the request, then block until a matching frame
//! arrives or the deadline passes. Also absorbs the UDS "response pending" (NRC `0x78`)
//! handshake, since both UDS and the flash manager built on top of it need the same retry
//! logic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use crate::can::CanProtocol;
use crate::frame::{CanFrame, CanId};

/// Error produced by [`RequestCoordinator::exchange`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// No matching response arrived before the deadline elapsed.
    Timeout,
    /// The underlying transport failed to send the request.
    TransportFailure,
    /// The coordinator was shut down while this exchange was outstanding.
    Cancelled,
}

impl std::fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeError::Timeout => write!(f, "timed out waiting for a response"),
            ExchangeError::TransportFailure => write!(f, "transport failed to send the request"),
            ExchangeError::Cancelled => write!(f, "exchange cancelled by shutdown"),
        }
    }
}

impl std::error::Error for ExchangeError {}

/// Governs how the coordinator absorbs NRC `0x78` (request correctly received, response
/// pending) retries, a behavior shared by every UDS-derived client (including the flash
/// manager, which rides on the UDS engine's RPC substrate).
#[derive(Debug, Copy, Clone)]
pub struct PendingPolicy {
    /// Deadline applied to each individual wait after a pending response (`p2_star`).
    pub p2_star: Duration,
    /// Total elapsed time across all retries before giving up, regardless of further
    /// pending responses.
    pub overall_deadline: Duration,
}

impl Default for PendingPolicy {
    fn default() -> Self {
        Self {
            p2_star: Duration::from_secs(5),
            overall_deadline: Duration::from_secs(30),
        }
    }
}

enum AwaiterMsg {
    Data(Vec<u8>),
    Cancelled,
}

struct Inner {
    can: CanProtocol,
    sink_id: Mutex<Option<crate::can::SinkId>>,
    awaiters: Mutex<HashMap<CanId, mpsc::Sender<AwaiterMsg>>>,
    id_locks: Mutex<HashMap<CanId, Arc<Mutex<()>>>>,
    running: AtomicBool,
}

/// Serializes request/response exchanges over a [`CanProtocol`], one outstanding exchange
/// per expected response ID at a time.
#[derive(Clone)]
pub struct RequestCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCoordinator")
            .field("running", &self.inner.running.load(Ordering::SeqCst))
            .finish()
    }
}

impl RequestCoordinator {
    /// Builds a coordinator over `can`, installing its dispatch sink immediately.
    pub fn new(can: CanProtocol) -> Self {
        let inner = Arc::new(Inner {
            can,
            sink_id: Mutex::new(None),
            awaiters: Mutex::new(HashMap::new()),
            id_locks: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
        });

        let sink_inner = inner.clone();
        let sink_id = inner.can.subscribe(Box::new(move |frame: &CanFrame| {
            let mut awaiters = sink_inner.awaiters.lock().unwrap();
            if let Some(tx) = awaiters.remove(&frame.id()) {
                let _ = tx.send(AwaiterMsg::Data(frame.data().to_vec()));
            }
        }));
        *inner.sink_id.lock().unwrap() = Some(sink_id);

        Self { inner }
    }

    /// Sends `request` addressed to `request_id` and waits for a frame on `response_id`,
    /// using the default [`PendingPolicy`].
    pub fn exchange(
        &self,
        request_id: CanId,
        request: &[u8],
        response_id: CanId,
        timeout: Duration,
    ) -> Result<Vec<u8>, ExchangeError> {
        self.exchange_with_policy(request_id, request, response_id, timeout, PendingPolicy::default())
    }

    /// As [`exchange`](Self::exchange), but with an explicit [`PendingPolicy`] (UDS clients
    /// derive this from their `p2_star_ms`/overall deadline configuration).
    pub fn exchange_with_policy(
        &self,
        request_id: CanId,
        request: &[u8],
        response_id: CanId,
        timeout: Duration,
        policy: PendingPolicy,
    ) -> Result<Vec<u8>, ExchangeError> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(ExchangeError::Cancelled);
        }

        let id_lock = {
            let mut locks = self.inner.id_locks.lock().unwrap();
            locks
                .entry(response_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _serialize_guard = id_lock.lock().unwrap();

        let start = Instant::now();
        let mut wait = timeout;
        loop {
            if !self.inner.running.load(Ordering::SeqCst) {
                return Err(ExchangeError::Cancelled);
            }

            let (tx, rx) = mpsc::channel();
            self.inner.awaiters.lock().unwrap().insert(response_id, tx);

            let frame = match CanFrame::new(request_id, request, false) {
                Ok(f) => f,
                Err(_) => {
                    self.inner.awaiters.lock().unwrap().remove(&response_id);
                    return Err(ExchangeError::TransportFailure);
                }
            };
            if !self.inner.can.send(&frame) {
                self.inner.awaiters.lock().unwrap().remove(&response_id);
                return Err(ExchangeError::TransportFailure);
            }

            match rx.recv_timeout(wait) {
                Ok(AwaiterMsg::Data(payload)) => {
                    if payload.len() >= 3 && payload[0] == 0x7F && payload[2] == 0x78 {
                        log::debug!("NRC 0x78 (response pending), extending deadline");
                        if start.elapsed() >= policy.overall_deadline {
                            return Err(ExchangeError::Timeout);
                        }
                        wait = policy.p2_star;
                        continue;
                    }
                    return Ok(payload);
                }
                Ok(AwaiterMsg::Cancelled) => return Err(ExchangeError::Cancelled),
                Err(_) => {
                    self.inner.awaiters.lock().unwrap().remove(&response_id);
                    return Err(ExchangeError::Timeout);
                }
            }
        }
    }

    /// Sends `request` addressed to `request_id` without waiting for a response. Used for
    /// fire-and-forget traffic such as a suppress-positive-response tester-present tick.
    pub fn send_only(&self, request_id: CanId, request: &[u8]) -> Result<(), ExchangeError> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(ExchangeError::Cancelled);
        }
        let frame = CanFrame::new(request_id, request, false).map_err(|_| ExchangeError::TransportFailure)?;
        if self.inner.can.send(&frame) {
            Ok(())
        } else {
            Err(ExchangeError::TransportFailure)
        }
    }

    /// Stops accepting new exchanges, resolves every outstanding one with
    /// [`ExchangeError::Cancelled`], and detaches from the CAN dispatch sink.
    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let mut awaiters = self.inner.awaiters.lock().unwrap();
        for (_, tx) in awaiters.drain() {
            let _ = tx.send(AwaiterMsg::Cancelled);
        }
        drop(awaiters);
        if let Some(id) = self.inner.sink_id.lock().unwrap().take() {
            self.inner.can.unsubscribe(id);
        }
    }
}
