use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::*;
use crate::can::CanProtocol;
use crate::frame::CanFrame;
use crate::transport::{Transport, TransportError};

/// A transport that replies to each sent frame with the next queued response frame, or with
/// nothing at all if the queue is empty (simulating a timeout).
struct ScriptedEcu {
    responses: Arc<Mutex<VecDeque<CanFrame>>>,
}

impl Transport for ScriptedEcu {
    fn send(&mut self, _frame: &CanFrame) -> Result<(), TransportError> {
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Vec<CanFrame>, TransportError> {
        let mut q = self.responses.lock().unwrap();
        if let Some(frame) = q.pop_front() {
            return Ok(vec![frame]);
        }
        drop(q);
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        Ok(Vec::new())
    }

    fn close(&mut self) {}
}

fn client_with_responses(frames: Vec<CanFrame>) -> UdsClient {
    let queue = Arc::new(Mutex::new(VecDeque::from(frames)));
    let can = CanProtocol::new(Box::new(ScriptedEcu { responses: queue }));
    let coordinator = RequestCoordinator::new(can);
    UdsClient::new(
        coordinator,
        UdsConfig {
            request_id: 0x7E0,
            response_id: 0x7E8,
            timeout_ms: 100,
            p2_star_ms: 100,
            ..Default::default()
        },
    )
}

#[test]
fn session_control_updates_state_and_starts_tester_present() {
    let resp = CanFrame::new(CanId::Standard(0x7E8), &[0x50, 0x03], false).unwrap();
    let client = client_with_responses(vec![resp]);
    client
        .diagnostic_session_control(SessionType::ExtendedDiagnostic)
        .unwrap();
    assert_eq!(client.current_session(), SessionType::ExtendedDiagnostic);
    client.shutdown();
}

#[test]
fn negative_response_leaves_session_unchanged() {
    let resp = CanFrame::new(CanId::Standard(0x7E8), &[0x7F, 0x10, 0x12], false).unwrap();
    let client = client_with_responses(vec![resp]);
    let err = client.diagnostic_session_control(SessionType::Programming).unwrap_err();
    assert!(matches!(err, DiagError::NegativeResponse { service: 0x10, nrc: 0x12 }));
    assert_eq!(client.current_session(), SessionType::Default);
    client.shutdown();
}

#[test]
fn security_unlock_round_trip() {
    let seed = CanFrame::new(CanId::Standard(0x7E8), &[0x67, 0x01, 0xAA, 0xBB], false).unwrap();
    let key_ok = CanFrame::new(CanId::Standard(0x7E8), &[0x67, 0x02], false).unwrap();
    let client = client_with_responses(vec![seed, key_ok]);

    let algorithm: SeedToKey = Arc::new(|seed, _level| seed.iter().map(|b| b.wrapping_add(1)).collect());
    client.unlock_security_level(1, &algorithm).unwrap();
    assert!(client.is_unlocked(1));
    client.shutdown();
}

#[test]
fn session_change_invalidates_unlock() {
    let seed = CanFrame::new(CanId::Standard(0x7E8), &[0x67, 0x01, 0x01], false).unwrap();
    let key_ok = CanFrame::new(CanId::Standard(0x7E8), &[0x67, 0x02], false).unwrap();
    let session_ok = CanFrame::new(CanId::Standard(0x7E8), &[0x50, 0x01], false).unwrap();
    let client = client_with_responses(vec![seed, key_ok, session_ok]);

    let algorithm: SeedToKey = Arc::new(|seed, _level| seed.to_vec());
    client.unlock_security_level(1, &algorithm).unwrap();
    assert!(client.is_unlocked(1));

    client.diagnostic_session_control(SessionType::Default).unwrap();
    assert!(!client.is_unlocked(1));
    client.shutdown();
}

#[test]
fn pending_response_is_absorbed_before_positive() {
    let pending = CanFrame::new(CanId::Standard(0x7E8), &[0x7F, 0x22, 0x78], false).unwrap();
    let positive = CanFrame::new(CanId::Standard(0x7E8), &[0x62, 0xF1, 0x90, 0x2A], false).unwrap();
    let client = client_with_responses(vec![pending.clone(), pending, positive]);

    let data = client.read_data_by_identifier(0xF190).unwrap();
    assert_eq!(data, vec![0x2A]);
    client.shutdown();
}

#[test]
fn timeout_without_any_response() {
    let client = client_with_responses(vec![]);
    let err = client.read_data_by_identifier(0xF190).unwrap_err();
    assert_eq!(err, DiagError::Timeout);
    client.shutdown();
}
