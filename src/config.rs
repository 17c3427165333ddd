//! Link and BLE session configuration constants

/// Physical link framing constants.
pub mod link {
    /// High nibble of the first byte of every frame.
    pub const START_MARKER: u8 = 0xA0;

    /// Mask selecting the start marker nibble.
    pub const START_MASK: u8 = 0xF0;

    /// Number of multiplexed services (service ids are `0..N_SERVICES`).
    pub const N_SERVICES: usize = 4;

    /// Maximum payload carried by one frame.
    pub const MAX_PAYLOAD: usize = 244;

    /// Stream frame header: start byte + length byte.
    pub const STREAM_HEADER_SIZE: usize = 2;

    /// Stream frame footer: CRC-8.
    pub const STREAM_FOOTER_SIZE: usize = 1;

    /// Header plus footer of a stream frame.
    pub const STREAM_OVERHEAD: usize = STREAM_HEADER_SIZE + STREAM_FOOTER_SIZE;

    /// Largest stream frame on the wire (fits the one-byte length field).
    pub const MAX_STREAM_FRAME: usize = MAX_PAYLOAD + STREAM_OVERHEAD;

    /// Fixed size of one full-duplex block transaction.
    pub const BLOCK_FRAME_SIZE: usize = 2 + MAX_PAYLOAD + 1;

    /// Depth of the outbound transmission queue.
    pub const TX_QUEUE_DEPTH: usize = 8;
}

/// Periodic driver timing.
pub mod timing {
    /// Period of the BLE reconciliation loop.
    pub const LOOP_PERIOD_MS: u32 = 20;

    /// Keepalive status request period.
    pub const PING_PERIOD_MS: u32 = 100;

    /// Minimum cadence of idle full-duplex transactions on the block link.
    pub const SPI_IDLE_POLL_US: u32 = 2000;
}

/// BLE session constants.
pub mod ble {
    /// Depth of the application event queue.
    pub const EVENT_QUEUE_DEPTH: usize = 4;

    /// Depth of the inbound data queue.
    pub const RX_QUEUE_DEPTH: usize = 16;

    /// Depth of the outbound data queue.
    ///
    /// Changing this queue length may reorder messages.
    pub const TX_QUEUE_DEPTH: usize = 1;

    /// Size of one application data packet.
    pub const PACKET_SIZE: usize = super::link::MAX_PAYLOAD;

    /// Advertised device name length (zero padded on the wire).
    pub const ADV_NAME_LEN: usize = 20;

    /// Length of the numeric comparison code in a pairing request.
    pub const PAIRING_CODE_LEN: usize = 6;

    /// Device color byte sent along with advertising data.
    pub const DEFAULT_COLOR: u8 = 0;
}

/// Block link driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Idle-poll period in microseconds.
    pub idle_poll_us: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            idle_poll_us: timing::SPI_IDLE_POLL_US,
        }
    }
}

/// BLE session driver configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BleConfig {
    /// Period at which the periodic loop is driven.
    pub loop_period_ms: u32,
    /// Period of keepalive pings.
    pub ping_period_ms: u32,
    /// Device color advertised to the co-processor.
    pub color: u8,
}

impl BleConfig {
    /// Number of loop periods between two pings (at least one).
    pub fn ping_every(&self) -> u32 {
        if self.loop_period_ms == 0 {
            return 1;
        }
        (self.ping_period_ms / self.loop_period_ms).max(1)
    }
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            loop_period_ms: timing::LOOP_PERIOD_MS,
            ping_period_ms: timing::PING_PERIOD_MS,
            color: ble::DEFAULT_COLOR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes_fit_length_byte() {
        assert!(link::MAX_STREAM_FRAME <= u8::MAX as usize);
        assert_eq!(link::MAX_STREAM_FRAME, 247);
        assert_eq!(link::BLOCK_FRAME_SIZE, 247);
    }

    #[test]
    fn test_ping_every() {
        assert_eq!(BleConfig::default().ping_every(), 5);

        let fast = BleConfig {
            loop_period_ms: 200,
            ..BleConfig::default()
        };
        assert_eq!(fast.ping_every(), 1);
    }
}
