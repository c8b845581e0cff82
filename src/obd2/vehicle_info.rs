//! Mode 0x09 — vehicle information (InfoType 0x02: VIN).
//!
//! A VIN is 17 characters, far more than one CAN frame's 8-byte payload can carry, so unlike
//! every other request this client issues, the response can span multiple frames on the same
//! ID. [`crate::coordinator::RequestCoordinator::exchange`] only ever resolves one frame per
//! request, so this reads below it, subscribing directly to the CAN dispatch the way the
//! coordinator itself does.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::frame::CanFrame;
use crate::{DiagError, DiagServerResult};

use super::ObdClient;

const MODE_VEHICLE_INFO: u8 = 0x09;
const INFO_TYPE_VIN: u8 = 0x02;
const VIN_LENGTH: usize = 17;

impl ObdClient {
    /// Requests the VIN (mode 0x09, InfoType 0x02) and concatenates the alphanumeric bytes
    /// following the InfoType echo across as many response frames as it takes to reach 17
    /// characters, or until `timeout` elapses. Non-ASCII bytes are dropped.
    pub fn read_vin(&self, timeout: Duration) -> DiagServerResult<String> {
        let request_id = self.request_id();
        let response_id = self.response_id();

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let sink_id = self.inner.can.subscribe(Box::new(move |frame: &CanFrame| {
            if frame.id() != response_id {
                return;
            }
            if frame.data().get(0..2) == Some(&[MODE_VEHICLE_INFO + 0x40, INFO_TYPE_VIN][..]) {
                let _ = tx.send(frame.data().to_vec());
            }
        }));

        let send_result = (|| {
            let frame = CanFrame::new(request_id, &[MODE_VEHICLE_INFO, INFO_TYPE_VIN], false)
                .map_err(|e| DiagError::Protocol(e.to_string()))?;
            if self.inner.can.send(&frame) {
                Ok(())
            } else {
                Err(DiagError::Protocol("failed to send VIN request".into()))
            }
        })();

        let result = send_result.and_then(|()| {
            let mut vin = String::with_capacity(VIN_LENGTH);
            let deadline = Instant::now() + timeout;
            while vin.len() < VIN_LENGTH {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match rx.recv_timeout(remaining) {
                    Ok(payload) => {
                        for &byte in payload.get(2..).unwrap_or(&[]) {
                            if byte.is_ascii_alphanumeric() {
                                vin.push(byte as char);
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
            if vin.len() < VIN_LENGTH {
                return Err(DiagError::Timeout);
            }
            vin.truncate(VIN_LENGTH);
            Ok(vin)
        });

        self.inner.can.unsubscribe(sink_id);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::CanProtocol;
    use crate::coordinator::RequestCoordinator;
    use crate::frame::CanId;
    use crate::obd2::ObdConfig;
    use crate::testing::ScriptedTransport;

    #[test]
    fn vin_assembled_across_frames() {
        let frames = vec![
            CanFrame::new(CanId::Standard(0x7E8), &[0x49, 0x02, b'3', b'1', b'4', b'7', b'A', b'1'], false).unwrap(),
            CanFrame::new(CanId::Standard(0x7E8), &[0x49, 0x02, b'2', b'3', b'4', b'5', b'6', b'7'], false).unwrap(),
            CanFrame::new(CanId::Standard(0x7E8), &[0x49, 0x02, b'8', b'9', b'0', b'1', b'2', b'3'], false).unwrap(),
        ];
        let can = CanProtocol::new(Box::new(ScriptedTransport::new(frames)));
        let coordinator = RequestCoordinator::new(can.clone());
        let client = super::super::ObdClient::new(can, coordinator, ObdConfig::default());
        let vin = client.read_vin(Duration::from_millis(500)).unwrap();
        assert_eq!(vin.len(), 17);
        client.shutdown();
    }
}
