//! End-to-end flash programming against a scripted ECU: an Intel HEX image is parsed, then
//! driven through [`FlashManager::program`] over the same UDS/coordinator/CAN stack a real
//! PassThru transport would sit under.

use std::sync::Arc;

use ecu_diag::can::CanProtocol;
use ecu_diag::coordinator::RequestCoordinator;
use ecu_diag::flash::manager::{FlashConfig, FlashManager, FlashStage};
use ecu_diag::flash::parser::parse_intel_hex;
use ecu_diag::frame::{CanFrame, CanId};
use ecu_diag::testing::ScriptedTransport;
use ecu_diag::uds::{UdsClient, UdsConfig};

fn resp(bytes: &[u8]) -> CanFrame {
    CanFrame::new(CanId::Standard(0x7E8), bytes, false).unwrap()
}

#[test]
fn program_hex_image_without_security() {
    env_logger::try_init();
    // One 16-byte record at 0x0100, Intel HEX.
    let hex = ":10010000214601360121470136007EFE09D2190140\n:00000001FF\n";
    let file = parse_intel_hex(hex).unwrap();
    assert!(file.validate());
    assert_eq!(file.total_bytes(), 16);

    let transport = ScriptedTransport::new(vec![
        resp(&[0x50, 0x02]),             // DiagnosticSessionControl(Programming)
        resp(&[0x74, 0x20, 0x00, 0x14]), // request_download: negotiated max 20 bytes
        resp(&[0x76, 0x01]),             // transfer_data seq 1 ack
        resp(&[0x77]),                   // request_transfer_exit
    ]);
    let sent = transport.sent_handle();
    let can = CanProtocol::new(Box::new(transport));
    let coordinator = RequestCoordinator::new(can);
    let uds = Arc::new(UdsClient::new(
        coordinator,
        UdsConfig {
            request_id: 0x7E0,
            response_id: 0x7E8,
            timeout_ms: 200,
            p2_star_ms: 200,
            ..Default::default()
        },
    ));

    let manager = FlashManager::new(
        uds,
        FlashConfig {
            erase_before_write: false,
            verify_after_write: false,
            ..FlashConfig::default()
        },
    );

    let stats = manager.program(&file, None).unwrap();
    assert_eq!(stats.blocks_written, 1);
    assert_eq!(stats.bytes_written, 16);
    assert_eq!(stats.blocks_failed, 0);
    assert_eq!(manager.current_stage(), FlashStage::Done);

    let sent_frames = sent.lock().unwrap();
    let download = sent_frames.iter().find(|f| f.data().first() == Some(&0x34)).unwrap();
    assert_eq!(u32::from_be_bytes(download.data()[3..7].try_into().unwrap()), 0x0100);

    manager.shutdown();
}
