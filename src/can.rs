//! CAN framing and dispatch (component B)
//!
//! Validates identifiers, evaluates the installed filter set, and runs the single background
//! dispatch thread that delivers accepted frames to subscribers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::frame::{filter_accepts, CanFilter, CanFrame, VALID_BAUD_RATES};
use crate::transport::{Transport, TransportError};

/// Configuration accepted by [`CanProtocol::initialize`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CanConfig {
    /// Bus speed. Must be one of [`VALID_BAUD_RATES`].
    pub baud_rate: u32,
    /// Listen-only mode: never transmit.
    pub listen_only: bool,
    /// Loop back transmitted frames to the local receiver.
    pub loopback: bool,
    /// Use 29-bit identifiers instead of 11-bit.
    pub extended_frames: bool,
    /// Transmit timeout, milliseconds.
    pub tx_timeout_ms: u32,
    /// Receive timeout, milliseconds.
    pub rx_timeout_ms: u32,
}

/// Statistics snapshot for a [`CanProtocol`] instance.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CanStats {
    /// Frames successfully handed to the transport
    pub sent: u64,
    /// Frames received and accepted by the filter set
    pub received: u64,
    /// Frames received but dropped by the filter set
    pub filter_rejected: u64,
    /// Transport-level receive errors encountered by the dispatch thread
    pub errors: u64,
}

/// A callback invoked synchronously on the dispatch thread for each accepted frame.
///
/// Sinks must not block: the dispatch thread makes no fairness guarantee between a slow sink
/// and the others sharing its thread.
pub type CanSink = Box<dyn Fn(&CanFrame) + Send + Sync>;

/// Opaque handle returned by [`CanProtocol::subscribe`], used to [`CanProtocol::unsubscribe`] later.
pub type SinkId = u64;

const DISPATCH_POLL: Duration = Duration::from_millis(10);
const CONSECUTIVE_ERROR_LIMIT: u32 = 3;

struct Inner {
    transport: Mutex<Box<dyn Transport>>,
    config: Mutex<Option<CanConfig>>,
    filters: Mutex<Vec<CanFilter>>,
    sinks: Mutex<Vec<(SinkId, CanSink)>>,
    stats: Mutex<CanStats>,
    running: AtomicBool,
    next_sink_id: AtomicU64,
    stats_consumers: AtomicU64,
    dispatch_cooldown: Mutex<Duration>,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
}

/// The CAN framing and dispatch component.
///
/// Cheaply cloneable: clones share the same transport, filter set, subscriber list and
/// dispatch thread. The transport need not be internally thread-safe: all access to it is
/// serialized through `Inner::transport`'s mutex.
#[derive(Clone)]
pub struct CanProtocol {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CanProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanProtocol")
            .field("stats", &self.stats())
            .finish()
    }
}

/// RAII guard that keeps the dispatch thread alive for statistics purposes even when no
/// frame sinks are subscribed. Dropping the guard releases the hold.
pub struct StatsConsumerGuard {
    inner: Arc<Inner>,
}

impl Drop for StatsConsumerGuard {
    fn drop(&mut self) {
        self.inner.stats_consumers.fetch_sub(1, Ordering::SeqCst);
        maybe_pause(&self.inner);
    }
}

impl CanProtocol {
    /// Builds a new, uninitialized CAN protocol handle over the given transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport: Mutex::new(transport),
                config: Mutex::new(None),
                filters: Mutex::new(Vec::new()),
                sinks: Mutex::new(Vec::new()),
                stats: Mutex::new(CanStats::default()),
                running: AtomicBool::new(false),
                next_sink_id: AtomicU64::new(1),
                stats_consumers: AtomicU64::new(0),
                dispatch_cooldown: Mutex::new(Duration::from_millis(1000)),
                dispatch_handle: Mutex::new(None),
            }),
        }
    }

    /// Overrides the cool-down applied after [`CONSECUTIVE_ERROR_LIMIT`] consecutive
    /// transport errors before the dispatch thread retries.
    pub fn set_dispatch_cooldown(&self, cooldown: Duration) {
        *self.inner.dispatch_cooldown.lock().unwrap() = cooldown;
    }

    /// Validates `config.baud_rate` against the fixed set of supported rates and stores it.
    /// Returns `false` on an unsupported baud rate.
    pub fn initialize(&self, config: CanConfig) -> bool {
        if !VALID_BAUD_RATES.contains(&config.baud_rate) {
            log::error!("unsupported CAN baud rate: {}", config.baud_rate);
            return false;
        }
        *self.inner.config.lock().unwrap() = Some(config);
        true
    }

    /// The stored configuration, if [`initialize`](Self::initialize) has succeeded.
    pub fn config(&self) -> Option<CanConfig> {
        *self.inner.config.lock().unwrap()
    }

    /// Validates and forwards one frame to the transport, incrementing the sent counter.
    pub fn send(&self, frame: &CanFrame) -> bool {
        let result = self.inner.transport.lock().unwrap().send(frame);
        match result {
            Ok(()) => {
                self.inner.stats.lock().unwrap().sent += 1;
                true
            }
            Err(e) => {
                log::warn!("CAN send failed: {}", e);
                false
            }
        }
    }

    /// Installs a filter rule. Filters are evaluated in insertion order.
    pub fn install_filter(&self, filter: CanFilter) {
        self.inner.filters.lock().unwrap().push(filter);
    }

    /// Removes a single filter rule (by value equality).
    pub fn remove_filter(&self, filter: &CanFilter) {
        self.inner.filters.lock().unwrap().retain(|f| f != filter);
    }

    /// Clears every installed filter, returning to listen-all behavior.
    pub fn clear_filters(&self) {
        self.inner.filters.lock().unwrap().clear();
    }

    /// Subscribes a sink to receive accepted frames. Starts the dispatch thread if it is not
    /// already running.
    pub fn subscribe(&self, sink: CanSink) -> SinkId {
        let id = self.inner.next_sink_id.fetch_add(1, Ordering::SeqCst);
        self.inner.sinks.lock().unwrap().push((id, sink));
        ensure_running(&self.inner);
        id
    }

    /// Removes a previously subscribed sink. If this was the last sink and no statistics
    /// consumer is held, the dispatch thread pauses.
    pub fn unsubscribe(&self, sink_id: SinkId) {
        self.inner.sinks.lock().unwrap().retain(|(id, _)| *id != sink_id);
        maybe_pause(&self.inner);
    }

    /// Acquires a guard that keeps the dispatch thread running for statistics purposes, even
    /// with no frame sinks subscribed.
    pub fn hold_for_stats(&self) -> StatsConsumerGuard {
        self.inner.stats_consumers.fetch_add(1, Ordering::SeqCst);
        ensure_running(&self.inner);
        StatsConsumerGuard {
            inner: self.inner.clone(),
        }
    }

    /// A snapshot of the current counters.
    pub fn stats(&self) -> CanStats {
        *self.inner.stats.lock().unwrap()
    }

    /// Stops the dispatch thread (if running) and closes the transport.
    pub fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.dispatch_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.inner.transport.lock().unwrap().close();
    }
}

fn ensure_running(inner: &Arc<Inner>) {
    let mut handle_slot = inner.dispatch_handle.lock().unwrap();
    if handle_slot.is_some() {
        return;
    }
    inner.running.store(true, Ordering::SeqCst);
    let worker = inner.clone();
    *handle_slot = Some(std::thread::spawn(move || dispatch_loop(worker)));
}

fn maybe_pause(inner: &Arc<Inner>) {
    let sinks_empty = inner.sinks.lock().unwrap().is_empty();
    let no_consumers = inner.stats_consumers.load(Ordering::SeqCst) == 0;
    if sinks_empty && no_consumers {
        inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = inner.dispatch_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn dispatch_loop(inner: Arc<Inner>) {
    let mut consecutive_errors: u32 = 0;
    while inner.running.load(Ordering::SeqCst) {
        let recv_result = inner.transport.lock().unwrap().recv(DISPATCH_POLL);
        match recv_result {
            Ok(frames) => {
                consecutive_errors = 0;
                for frame in frames {
                    let filters = inner.filters.lock().unwrap();
                    let accepted = filter_accepts(&filters, &frame);
                    drop(filters);
                    if !accepted {
                        inner.stats.lock().unwrap().filter_rejected += 1;
                        continue;
                    }
                    inner.stats.lock().unwrap().received += 1;
                    let sinks = inner.sinks.lock().unwrap();
                    for (_, sink) in sinks.iter() {
                        sink(&frame);
                    }
                }
            }
            Err(TransportError::Closed) => {
                log::debug!("transport closed, stopping dispatch thread");
                break;
            }
            Err(e) => {
                inner.stats.lock().unwrap().errors += 1;
                consecutive_errors += 1;
                log::error!("CAN dispatch recv error ({}): {}", consecutive_errors, e);
                if consecutive_errors >= CONSECUTIVE_ERROR_LIMIT {
                    let cooldown = *inner.dispatch_cooldown.lock().unwrap();
                    log::warn!(
                        "{} consecutive dispatch errors, suspending for {:?}",
                        consecutive_errors,
                        cooldown
                    );
                    std::thread::sleep(cooldown);
                    consecutive_errors = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CanId;
    use std::sync::mpsc;

    struct LoopbackTransport {
        inbox: mpsc::Receiver<CanFrame>,
        sender: mpsc::Sender<CanFrame>,
        fail_next: Arc<AtomicBool>,
    }

    impl Transport for LoopbackTransport {
        fn send(&mut self, frame: &CanFrame) -> Result<(), TransportError> {
            let _ = self.sender.send(frame.clone());
            Ok(())
        }

        fn recv(&mut self, timeout: Duration) -> Result<Vec<CanFrame>, TransportError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(TransportError::DriverError {
                    code: -1,
                    desc: "injected".into(),
                });
            }
            let mut out = Vec::new();
            if let Ok(frame) = self.inbox.recv_timeout(timeout) {
                out.push(frame);
            }
            Ok(out)
        }

        fn close(&mut self) {}
    }

    fn build() -> (CanProtocol, mpsc::Sender<CanFrame>) {
        let (tx, rx) = mpsc::channel();
        let transport = LoopbackTransport {
            inbox: rx,
            sender: tx.clone(),
            fail_next: Arc::new(AtomicBool::new(false)),
        };
        let proto = CanProtocol::new(Box::new(transport));
        (proto, tx)
    }

    #[test]
    fn initialize_rejects_bad_baud() {
        let (proto, _tx) = build();
        assert!(!proto.initialize(CanConfig {
            baud_rate: 12345,
            listen_only: false,
            loopback: false,
            extended_frames: false,
            tx_timeout_ms: 100,
            rx_timeout_ms: 100,
        }));
        assert!(proto.initialize(CanConfig {
            baud_rate: 500_000,
            listen_only: false,
            loopback: false,
            extended_frames: false,
            tx_timeout_ms: 100,
            rx_timeout_ms: 100,
        }));
    }

    #[test]
    fn subscribed_sink_receives_accepted_frames() {
        let (proto, tx) = build();
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let id = proto.subscribe(Box::new(move |f: &CanFrame| {
            received_clone.lock().unwrap().push(f.clone());
        }));
        let frame = CanFrame::new(CanId::Standard(0x7E8), &[1, 2, 3], false).unwrap();
        tx.send(frame.clone()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(received.lock().unwrap().len(), 1);
        proto.unsubscribe(id);
        proto.shutdown();
    }

    #[test]
    fn send_increments_sent_counter() {
        let (proto, _tx) = build();
        let frame = CanFrame::new(CanId::Standard(0x7DF), &[0x01, 0x0C], false).unwrap();
        assert!(proto.send(&frame));
        assert_eq!(proto.stats().sent, 1);
    }

    #[test]
    fn dispatch_pauses_when_last_sink_unsubscribes_without_stats_hold() {
        let (proto, _tx) = build();
        let id = proto.subscribe(Box::new(|_: &CanFrame| {}));
        proto.unsubscribe(id);
        // no panics, no hang: dispatch thread should be joined
        proto.shutdown();
    }
}
