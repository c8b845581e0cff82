//! Drives a [`UdsClient`] through a full session/security/DID conversation against a scripted
//! ECU, exercising the same request/response correlation path real hardware would use.

use std::sync::Arc;

use ecu_diag::can::CanProtocol;
use ecu_diag::coordinator::RequestCoordinator;
use ecu_diag::frame::{CanFrame, CanId};
use ecu_diag::testing::ScriptedTransport;
use ecu_diag::uds::{SeedToKey, SessionType, UdsClient, UdsConfig};

fn resp(bytes: &[u8]) -> CanFrame {
    CanFrame::new(CanId::Standard(0x7E8), bytes, false).unwrap()
}

fn client_with_responses(frames: Vec<CanFrame>) -> UdsClient {
    let transport = ScriptedTransport::new(frames);
    let can = CanProtocol::new(Box::new(transport));
    let coordinator = RequestCoordinator::new(can);
    UdsClient::new(
        coordinator,
        UdsConfig {
            request_id: 0x7E0,
            response_id: 0x7E8,
            timeout_ms: 200,
            p2_star_ms: 200,
            ..Default::default()
        },
    )
}

#[test]
fn extended_session_unlock_then_read_did() {
    env_logger::try_init();
    let client = client_with_responses(vec![
        resp(&[0x50, 0x03]),                         // DiagnosticSessionControl(ExtendedDiagnostic)
        resp(&[0x67, 0x01, 0x12, 0x34, 0x56, 0x78]), // request_seed(1)
        resp(&[0x67, 0x02]),                         // send_key(1) accepted
        resp(&[0x62, 0xF1, 0x90, b'V', b'I', b'N']), // ReadDataByIdentifier(0xF190)
    ]);

    client.diagnostic_session_control(SessionType::ExtendedDiagnostic).unwrap();
    assert_eq!(client.current_session(), SessionType::ExtendedDiagnostic);

    let seed_to_key: SeedToKey = Arc::new(|seed, _level| seed.iter().map(|b| b.wrapping_add(1)).collect());
    client.unlock_security_level(1, &seed_to_key).unwrap();
    assert!(client.is_unlocked(1));

    let did = client.read_data_by_identifier(0xF190).unwrap();
    assert_eq!(did, b"VIN");

    client.shutdown();
}

#[test]
fn negative_response_surfaces_as_security_denied() {
    env_logger::try_init();
    let client = client_with_responses(vec![
        resp(&[0x67, 0x01, 0x00, 0x00]), // request_seed(1)
        resp(&[0x7F, 0x27, 0x35]),       // send_key rejected: invalid key
    ]);

    let seed_to_key: SeedToKey = Arc::new(|_seed, _level| vec![0xFF, 0xFF]);
    let err = client.unlock_security_level(1, &seed_to_key).unwrap_err();
    assert!(matches!(err, ecu_diag::DiagError::SecurityDenied(0x35)));
    assert!(!client.is_unlocked(1));

    client.shutdown();
}

#[test]
fn pending_response_is_absorbed_transparently() {
    env_logger::try_init();
    let client = client_with_responses(vec![
        resp(&[0x7F, 0x10, 0x78]), // response pending
        resp(&[0x50, 0x02]),       // the actual positive response
    ]);

    client.diagnostic_session_control(SessionType::Programming).unwrap();
    assert_eq!(client.current_session(), SessionType::Programming);

    client.shutdown();
}
