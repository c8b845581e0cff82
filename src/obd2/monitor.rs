//! Periodic PID monitoring.
//!
//! A single background worker polls a fixed PID list on an interval and hands the resulting
//! parameter list to a caller-supplied sink. Cancellation is cooperative: the shutdown flag is
//! only checked between cycles, so the last in-flight cycle always completes.

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::{ObdClient, ObdParameter};

/// Callback invoked with the decoded parameter list at the end of each monitoring cycle.
pub type ObdMonitorSink = Box<dyn Fn(Vec<ObdParameter>) + Send + Sync>;

impl ObdClient {
    /// Starts polling `pids` every `interval`, invoking `sink` with the results of each cycle.
    /// Replaces any previously running monitor. A PID that fails to read is skipped for that
    /// cycle rather than aborting it.
    pub fn start_monitoring(&self, pids: Vec<u8>, interval: Duration, sink: ObdMonitorSink) {
        self.stop_monitoring();
        self.inner.monitor_running.store(true, Ordering::SeqCst);

        let client = self.clone();
        let handle = std::thread::spawn(move || {
            while client.inner.monitor_running.load(Ordering::SeqCst) {
                let mut params = Vec::with_capacity(pids.len());
                for &pid in &pids {
                    match client.read_pid(pid) {
                        Ok(p) => params.push(p),
                        Err(e) => log::warn!("OBD monitoring: failed to read PID 0x{pid:02X}: {e}"),
                    }
                }
                sink(params);
                std::thread::sleep(interval);
            }
        });
        *self.inner.monitor_handle.lock().unwrap() = Some(handle);
    }

    /// Stops the monitoring worker, if one is running, and joins it. The cycle already in
    /// flight is allowed to complete before the thread exits.
    pub fn stop_monitoring(&self) {
        self.inner.monitor_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.monitor_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::CanProtocol;
    use crate::coordinator::RequestCoordinator;
    use crate::frame::{CanFrame, CanId};
    use crate::obd2::ObdConfig;
    use crate::testing::ScriptedTransport;
    use std::sync::{Arc, Mutex};

    #[test]
    fn monitoring_invokes_sink_with_decoded_parameters() {
        let mut frames = Vec::new();
        for _ in 0..5 {
            frames.push(CanFrame::new(CanId::Standard(0x7E8), &[0x41, 0x0C, 0x1A, 0xF8], false).unwrap());
        }
        let can = CanProtocol::new(Box::new(ScriptedTransport::new(frames)));
        let coordinator = RequestCoordinator::new(can.clone());
        let client = ObdClient::new(can, coordinator, ObdConfig {
            timeout_ms: 200,
            ..ObdConfig::default()
        });

        let cycles: Arc<Mutex<Vec<Vec<ObdParameter>>>> = Arc::new(Mutex::new(Vec::new()));
        let cycles_clone = cycles.clone();
        client.start_monitoring(
            vec![0x0C],
            Duration::from_millis(10),
            Box::new(move |params| cycles_clone.lock().unwrap().push(params)),
        );
        std::thread::sleep(Duration::from_millis(100));
        client.stop_monitoring();

        let recorded = cycles.lock().unwrap();
        assert!(!recorded.is_empty());
        assert_eq!(recorded[0][0].pid, 0x0C);
        client.shutdown();
    }
}
