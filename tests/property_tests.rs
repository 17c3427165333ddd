//! Property tests for the frame codecs and the outbound request queue.
//!
//! Host only.

use std::sync::Mutex;

use nrf_ble_link::config::link::{MAX_PAYLOAD, TX_QUEUE_DEPTH};
use nrf_ble_link::link::{Completion, LinkError, StreamLink, Transport, TxStatus, UartDriver};
use nrf_ble_link::protocol::{
    decode_block, decode_frame, encode_block, encode_frame, ServiceId, StreamDecoder,
};
use proptest::prelude::*;

fn arb_service() -> impl Strategy<Value = ServiceId> {
    prop::sample::select(ServiceId::ALL.to_vec())
}

fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD)
}

fn arb_garbage() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// True if a valid frame other than the one at `real` starts anywhere in
/// `data`. Random bytes pass an 8-bit CRC now and then; such input holds a
/// second frame and is not noise.
fn has_other_frame(data: &[u8], real: usize) -> bool {
    (0..data.len().saturating_sub(1)).any(|start| {
        let end = start + data[start + 1] as usize;
        start != real && end <= data.len() && decode_frame(&data[start..end]).is_ok()
    })
}

fn decode_all(data: &[u8]) -> Vec<(ServiceId, Vec<u8>)> {
    let mut decoder = StreamDecoder::new();
    let mut frames = Vec::new();
    decoder.feed(data, |service, payload| frames.push((service, payload.to_vec())));
    // The line goes quiet after the last byte
    decoder.idle(|service, payload| frames.push((service, payload.to_vec())));
    frames
}

// ── Framing ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn stream_round_trip(service in arb_service(), payload in arb_payload()) {
        let frame = encode_frame(service, &payload).unwrap();
        prop_assert_eq!(frame.len(), payload.len() + 3);

        let (decoded_service, decoded) = decode_frame(&frame).unwrap();
        prop_assert_eq!(decoded_service, service);
        prop_assert_eq!(decoded, payload.as_slice());

        prop_assert_eq!(decode_all(&frame), vec![(service, payload)]);
    }

    #[test]
    fn block_round_trip(service in arb_service(), payload in arb_payload()) {
        let block = encode_block(service, &payload).unwrap();
        let (decoded_service, decoded) = decode_block(&block).unwrap();
        prop_assert_eq!(decoded_service, service);
        prop_assert_eq!(decoded, payload.as_slice());
    }

    /// CRC-8 catches every single-bit error; header flips fail earlier checks.
    #[test]
    fn single_bit_flip_rejected(
        service in arb_service(),
        payload in prop::collection::vec(any::<u8>(), 0..=32),
        bit in any::<prop::sample::Index>(),
    ) {
        let mut frame = encode_frame(service, &payload).unwrap();
        let bit = bit.index(frame.len() * 8);
        frame[bit / 8] ^= 1 << (bit % 8);

        prop_assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn resync_after_garbage(
        garbage in arb_garbage(),
        service in arb_service(),
        payload in arb_payload(),
    ) {
        let real = garbage.len();
        let mut data = garbage;
        data.extend_from_slice(&encode_frame(service, &payload).unwrap());
        prop_assume!(!has_other_frame(&data, real));

        prop_assert_eq!(decode_all(&data), vec![(service, payload)]);
    }

    /// A frame failing its CRC does not hide the valid frame that follows.
    #[test]
    fn resync_after_corrupt_frame(
        first in arb_garbage(),
        corrupt_at in any::<prop::sample::Index>(),
        payload in arb_payload(),
    ) {
        let mut data = encode_frame(ServiceId::Data, &first).unwrap().to_vec();
        // Corrupt a payload or CRC byte; the length stays intact
        let at = 2 + corrupt_at.index(data.len() - 2);
        data[at] ^= 0x01;
        let real = data.len();
        data.extend_from_slice(&encode_frame(ServiceId::Manager, &payload).unwrap());
        prop_assume!(!has_other_frame(&data, real));

        prop_assert_eq!(decode_all(&data), vec![(ServiceId::Manager, payload)]);
    }
}

// ── Outbound queue ───────────────────────────────────────────

struct WireLink {
    enabled: bool,
}

impl StreamLink for WireLink {
    fn enable(&mut self) -> Result<(), LinkError> {
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn start_transmit(&mut self, _frame: &[u8]) -> Result<(), LinkError> {
        if self.enabled {
            Ok(())
        } else {
            Err(LinkError::NotEnabled)
        }
    }

    fn peer_alive(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
enum QueueOp {
    Send,
    /// Abort the n-th accepted request, modulo the number accepted.
    Abort(usize),
    Complete,
}

fn arb_queue_op() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        3 => Just(QueueOp::Send),
        2 => (0usize..32).prop_map(QueueOp::Abort),
        2 => Just(QueueOp::Complete),
    ]
}

static COMPLETED: Mutex<Vec<(TxStatus, usize)>> = Mutex::new(Vec::new());

fn on_complete(status: TxStatus, context: usize) {
    COMPLETED.lock().unwrap().push((status, context));
}

proptest! {
    /// Aborted requests never complete; all others complete in send order.
    #[test]
    fn fifo_with_abort(ops in prop::collection::vec(arb_queue_op(), 0..64)) {
        COMPLETED.lock().unwrap().clear();

        let driver = UartDriver::new(WireLink { enabled: false });
        driver.init().unwrap();

        let mut accepted = Vec::new();
        let mut aborted = Vec::new();
        for op in ops {
            match op {
                QueueOp::Send => {
                    let context = accepted.len();
                    let completion = Some(Completion::new(on_complete, context));
                    if let Ok(id) = driver.send(ServiceId::Data, &[context as u8], completion) {
                        accepted.push((id, context));
                    }
                }
                QueueOp::Abort(n) if !accepted.is_empty() => {
                    let (id, context) = accepted[n % accepted.len()];
                    if driver.abort(id) {
                        aborted.push(context);
                    }
                }
                QueueOp::Abort(_) => {}
                QueueOp::Complete => driver.on_transmit_complete(),
            }
        }
        for _ in 0..=TX_QUEUE_DEPTH {
            driver.on_transmit_complete();
        }

        let expected: Vec<(TxStatus, usize)> = accepted
            .iter()
            .map(|&(_, context)| context)
            .filter(|context| !aborted.contains(context))
            .map(|context| (TxStatus::Sent, context))
            .collect();
        prop_assert_eq!(&*COMPLETED.lock().unwrap(), &expected);
    }
}
