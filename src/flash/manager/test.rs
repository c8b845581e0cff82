use std::sync::Arc;

use super::*;
use crate::can::CanProtocol;
use crate::coordinator::RequestCoordinator;
use crate::frame::{CanFrame, CanId};
use crate::testing::ScriptedTransport;
use crate::uds::{UdsClient, UdsConfig};

fn uds_with_responses(frames: Vec<CanFrame>) -> (Arc<UdsClient>, Arc<std::sync::Mutex<Vec<CanFrame>>>) {
    let transport = ScriptedTransport::new(frames);
    let sent = transport.sent_handle();
    let can = CanProtocol::new(Box::new(transport));
    let coordinator = RequestCoordinator::new(can);
    let uds = UdsClient::new(
        coordinator,
        UdsConfig {
            request_id: 0x7E0,
            response_id: 0x7E8,
            timeout_ms: 100,
            p2_star_ms: 100,
            ..Default::default()
        },
    );
    (Arc::new(uds), sent)
}

fn resp(bytes: &[u8]) -> CanFrame {
    CanFrame::new(CanId::Standard(0x7E8), bytes, false).unwrap()
}

fn flash_block(address: u32, bytes: Vec<u8>) -> FlashBlock {
    let checksum = bytes.iter().fold(0u32, |acc, b| acc.wrapping_add(*b as u32));
    FlashBlock { address, bytes, checksum }
}

#[test]
fn end_to_end_program_with_verify() {
    let block_bytes: Vec<u8> = (0..512).map(|i| (i % 256) as u8).collect();
    let file = FlashFile {
        blocks: vec![flash_block(0x8000, block_bytes.clone())],
    };

    let mut responses = vec![
        resp(&[0x50, 0x02]), // DiagnosticSessionControl(Programming)
        resp(&[0x67, 0x01, 0xAA, 0xBB, 0xCC, 0xDD]), // request_seed(1)
        resp(&[0x67, 0x02]), // send_key(1)
        resp(&[0x74, 0x20, 0x01, 0x02]), // request_download: max block length 0x0102 = 258
        resp(&[0x76, 0x01]), // transfer_data seq 1
        resp(&[0x76, 0x02]), // transfer_data seq 2
        resp(&[0x77]),       // request_transfer_exit
    ];
    // read_memory_by_address(0x8000, 512) verify response: SID 0x63 + echoed bytes
    let mut verify_resp = vec![0x63];
    verify_resp.extend_from_slice(&block_bytes);
    responses.push(resp(&verify_resp));

    let (uds, sent) = uds_with_responses(responses);
    let seed_to_key: crate::uds::SeedToKey =
        Arc::new(|seed, _level| seed.iter().map(|b| b ^ 0xFF).collect());
    let config = FlashConfig {
        block_size: 256,
        verify_after_write: true,
        erase_before_write: true,
        security_level: 1,
        seed_to_key: Some(seed_to_key),
        regions: Vec::new(),
        ..FlashConfig::default()
    };
    let manager = FlashManager::new(uds, config);

    let stats = manager.program(&file, None).unwrap();
    assert_eq!(stats.blocks_written, 1);
    assert_eq!(stats.bytes_written, 512);
    assert_eq!(stats.blocks_failed, 0);
    assert_eq!(manager.current_stage(), FlashStage::Done);

    let sent_frames = sent.lock().unwrap();
    let transfer_data_seqs: Vec<u8> = sent_frames
        .iter()
        .filter(|f| f.data().first() == Some(&0x36))
        .map(|f| f.data()[1])
        .collect();
    assert_eq!(transfer_data_seqs, vec![1, 2]);
}

#[test]
fn invalid_file_rejected_before_any_exchange() {
    let (uds, sent) = uds_with_responses(vec![]);
    let file = FlashFile {
        blocks: vec![
            flash_block(0x8000, vec![0u8; 16]),
            flash_block(0x8008, vec![0u8; 16]),
        ],
    };
    let manager = FlashManager::new(uds, FlashConfig::default());
    let err = manager.program(&file, None).unwrap_err();
    assert!(matches!(err, DiagError::Flash(FlashError::FileLoad(_))));
    assert!(sent.lock().unwrap().is_empty());
}

#[test]
fn bootloader_entry_rejection_resets_to_idle() {
    let (uds, _sent) = uds_with_responses(vec![resp(&[0x7F, 0x10, 0x22])]);
    let file = FlashFile {
        blocks: vec![flash_block(0x8000, vec![0xAA; 16])],
    };
    let manager = FlashManager::new(uds, FlashConfig::default());
    let err = manager.program(&file, None).unwrap_err();
    assert!(matches!(err, DiagError::Flash(FlashError::BootloaderEntry)));
    assert_eq!(manager.current_stage(), FlashStage::Idle);
}

#[test]
fn protected_region_blocks_write() {
    let (uds, _sent) = uds_with_responses(vec![resp(&[0x50, 0x02])]);
    let file = FlashFile {
        blocks: vec![flash_block(0x8000, vec![0xAA; 16])],
    };
    let config = FlashConfig {
        regions: vec![FlashRegion {
            address: 0x8000,
            size: 0x1000,
            protected: true,
        }],
        erase_before_write: false,
        ..FlashConfig::default()
    };
    let manager = FlashManager::new(uds, config);
    let err = manager.program(&file, None).unwrap_err();
    assert!(matches!(err, DiagError::Flash(FlashError::RegionProtected { address: 0x8000 })));
}

#[test]
fn progress_callback_reports_every_stage() {
    let block_bytes = vec![0xAAu8; 4];
    let file = FlashFile {
        blocks: vec![flash_block(0x8000, block_bytes.clone())],
    };
    let responses = vec![
        resp(&[0x50, 0x02]),
        resp(&[0x74, 0x20, 0x00, 0x08]),
        resp(&[0x76, 0x01]),
        resp(&[0x77]),
    ];
    let (uds, _sent) = uds_with_responses(responses);
    let manager = FlashManager::new(uds, FlashConfig { erase_before_write: false, ..FlashConfig::default() });

    let stages = Arc::new(std::sync::Mutex::new(Vec::new()));
    let stages_clone = stages.clone();
    let sink: ProgressSink = Box::new(move |stage, _current, _total, _msg| {
        stages_clone.lock().unwrap().push(stage);
    });
    let stats = manager.program(&file, Some(sink)).unwrap();
    assert_eq!(stats.blocks_written, 1);
    let seen = stages.lock().unwrap();
    assert!(seen.contains(&FlashStage::EnteringProgramming));
    assert!(seen.contains(&FlashStage::Writing));
    assert!(seen.contains(&FlashStage::Done));
}
