//! Physical link traits for abstraction and testability
//!
//! These traits describe what the framing drivers need from the UART or SPI
//! peripheral. Transfers are started here and complete asynchronously: the
//! board's interrupt handlers report completion back to the driver
//! ([`UartDriver`](crate::link::UartDriver) or
//! [`SpiDriver`](crate::link::SpiDriver)).

use crate::protocol::Block;

/// Errors reported by a physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Peripheral not enabled.
    NotEnabled,
    /// A transfer is already running.
    Busy,
    /// Peripheral reported a fault (overrun, framing, DMA).
    Hardware,
}

/// Byte-stream link (UART).
pub trait StreamLink: Send {
    /// Acquire the peripheral and enable its interrupts.
    fn enable(&mut self) -> Result<(), LinkError>;

    /// Release the peripheral.
    fn disable(&mut self);

    /// Start sending `frame`.
    ///
    /// The implementation copies the bytes; the driver is told about
    /// completion through `UartDriver::on_transmit_complete`.
    fn start_transmit(&mut self, frame: &[u8]) -> Result<(), LinkError>;

    /// State of the co-processor's "alive" signal.
    fn peer_alive(&self) -> bool;
}

/// Fixed-size full-duplex link (SPI).
pub trait BlockLink: Send {
    /// Acquire the peripheral and enable its interrupts.
    fn enable(&mut self) -> Result<(), LinkError>;

    /// Release the peripheral.
    fn disable(&mut self);

    /// Start one full-duplex transaction sending `block`.
    ///
    /// The received block is delivered through
    /// `SpiDriver::on_transfer_complete`.
    fn start_transfer(&mut self, block: &Block) -> Result<(), LinkError>;

    /// State of the co-processor's "alive" signal.
    fn peer_alive(&self) -> bool;
}

#[cfg(test)]
pub mod mock {
    //! Mock links for testing

    use super::*;

    /// Mock UART link recording every started transmission.
    pub struct MockStreamLink {
        /// Whether enable() has been called without disable().
        pub enabled: bool,
        /// Value returned by peer_alive().
        pub alive: bool,
        /// Frames passed to start_transmit().
        pub transmitted: Vec<Vec<u8>>,
        /// Error returned by the next enable().
        pub next_enable_error: Option<LinkError>,
        /// Error returned by the next start_transmit().
        pub next_transmit_error: Option<LinkError>,
    }

    impl MockStreamLink {
        /// Create a mock link with the peer alive.
        pub fn new() -> Self {
            Self {
                enabled: false,
                alive: true,
                transmitted: Vec::new(),
                next_enable_error: None,
                next_transmit_error: None,
            }
        }
    }

    impl Default for MockStreamLink {
        fn default() -> Self {
            Self::new()
        }
    }

    impl StreamLink for MockStreamLink {
        fn enable(&mut self) -> Result<(), LinkError> {
            if let Some(error) = self.next_enable_error.take() {
                return Err(error);
            }
            self.enabled = true;
            Ok(())
        }

        fn disable(&mut self) {
            self.enabled = false;
        }

        fn start_transmit(&mut self, frame: &[u8]) -> Result<(), LinkError> {
            if !self.enabled {
                return Err(LinkError::NotEnabled);
            }
            if let Some(error) = self.next_transmit_error.take() {
                return Err(error);
            }
            self.transmitted.push(frame.to_vec());
            Ok(())
        }

        fn peer_alive(&self) -> bool {
            self.alive
        }
    }

    /// Mock SPI link recording every started transaction.
    pub struct MockBlockLink {
        /// Whether enable() has been called without disable().
        pub enabled: bool,
        /// Value returned by peer_alive().
        pub alive: bool,
        /// Blocks passed to start_transfer().
        pub transfers: Vec<Block>,
        /// Error returned by the next start_transfer().
        pub next_transfer_error: Option<LinkError>,
    }

    impl MockBlockLink {
        /// Create a mock link with the peer alive.
        pub fn new() -> Self {
            Self {
                enabled: false,
                alive: true,
                transfers: Vec::new(),
                next_transfer_error: None,
            }
        }
    }

    impl Default for MockBlockLink {
        fn default() -> Self {
            Self::new()
        }
    }

    impl BlockLink for MockBlockLink {
        fn enable(&mut self) -> Result<(), LinkError> {
            self.enabled = true;
            Ok(())
        }

        fn disable(&mut self) {
            self.enabled = false;
        }

        fn start_transfer(&mut self, block: &Block) -> Result<(), LinkError> {
            if !self.enabled {
                return Err(LinkError::NotEnabled);
            }
            if let Some(error) = self.next_transfer_error.take() {
                return Err(error);
            }
            self.transfers.push(*block);
            Ok(())
        }

        fn peer_alive(&self) -> bool {
            self.alive
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockStreamLink;
    use super::*;

    #[test]
    fn test_mock_transmit_requires_enable() {
        let mut link = MockStreamLink::new();
        assert_eq!(link.start_transmit(&[1]), Err(LinkError::NotEnabled));

        link.enable().unwrap();
        link.start_transmit(&[1, 2]).unwrap();
        assert_eq!(link.transmitted, vec![vec![1, 2]]);
    }

    #[test]
    fn test_mock_transmit_error_clears() {
        let mut link = MockStreamLink::new();
        link.enable().unwrap();
        link.next_transmit_error = Some(LinkError::Hardware);

        assert_eq!(link.start_transmit(&[1]), Err(LinkError::Hardware));
        link.start_transmit(&[2]).unwrap();
        assert_eq!(link.transmitted.len(), 1);
    }
}
