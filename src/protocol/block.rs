//! Fixed-size block encoding for the full-duplex link
//!
//! Every transaction moves exactly [`BLOCK_FRAME_SIZE`] bytes in each
//! direction. A side with nothing to say sends [`IDLE_BLOCK`], which carries
//! no start marker and is dropped by the receiver.

use super::crc::crc8;
use super::service::ServiceId;
use super::{FrameError, Payload};
use crate::config::link::{BLOCK_FRAME_SIZE, MAX_PAYLOAD, START_MARKER, START_MASK};

/// One block transaction buffer.
pub type Block = [u8; BLOCK_FRAME_SIZE];

/// All-zero block sent when the outbound queue is empty.
pub const IDLE_BLOCK: Block = [0u8; BLOCK_FRAME_SIZE];

const HEADER_SIZE: usize = 2;
const CRC_OFFSET: usize = BLOCK_FRAME_SIZE - 1;

/// Encode `payload` for `service` into a zero-padded block.
pub fn encode_block(service: ServiceId, payload: &[u8]) -> Result<Block, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::TooLong);
    }
    Ok(encode_unchecked(service, payload))
}

/// Encode an already bounded payload.
pub fn encode_block_payload(service: ServiceId, payload: &Payload) -> Block {
    encode_unchecked(service, payload)
}

fn encode_unchecked(service: ServiceId, payload: &[u8]) -> Block {
    let mut block = IDLE_BLOCK;
    block[0] = service.start_byte();
    block[1] = payload.len() as u8;
    block[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
    block[CRC_OFFSET] = crc8(&block[..CRC_OFFSET]);
    block
}

/// Validate a received block and return its service and payload.
pub fn decode_block(block: &[u8]) -> Result<(ServiceId, &[u8]), FrameError> {
    if block.len() < BLOCK_FRAME_SIZE {
        return Err(FrameError::TooShort);
    }
    if block.len() > BLOCK_FRAME_SIZE {
        return Err(FrameError::BadLength);
    }
    if block[0] & START_MASK != START_MARKER {
        return Err(FrameError::BadStart);
    }
    let service = ServiceId::from_start_byte(block[0]).ok_or(FrameError::BadService)?;

    let len = block[1] as usize;
    if len > MAX_PAYLOAD {
        return Err(FrameError::BadLength);
    }
    if crc8(&block[..CRC_OFFSET]) != block[CRC_OFFSET] {
        return Err(FrameError::CrcMismatch);
    }

    Ok((service, &block[HEADER_SIZE..HEADER_SIZE + len]))
}
