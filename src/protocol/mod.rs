//! Wire protocol between the host MCU and the BLE co-processor
//!
//! Two physical encodings carry the same logical frame
//! `(service id, payload)`:
//!
//! Stream encoding (UART):
//! ```text
//! [0xA0 | service][total length][payload...][crc8]
//! ```
//!
//! Block encoding (full-duplex SPI, fixed size):
//! ```text
//! [0xA0 | service][payload length][payload, zero padded][crc8]
//! ```
//!
//! The CRC-8 covers every preceding byte of the frame.

pub mod block;
pub mod control;
pub mod crc;
pub mod service;
pub mod stream;

pub use block::{decode_block, encode_block, encode_block_payload, Block, IDLE_BLOCK};
pub use service::ServiceId;
pub use stream::{decode_frame, encode_frame, encode_payload, StreamDecoder, StreamFrame};

use crate::config::link::MAX_PAYLOAD;

/// Payload buffer for one logical frame.
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD>;

/// Reasons a frame is rejected by the one-shot decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than header and footer.
    TooShort,
    /// Payload exceeds the link maximum.
    TooLong,
    /// First byte does not carry the start marker.
    BadStart,
    /// Start marker present but service id out of range.
    BadService,
    /// Length field inconsistent with the frame.
    BadLength,
    /// Trailing CRC does not match.
    CrcMismatch,
}
