//! BLE session management over the co-processor link
//!
//! [`BleDriver`] owns the connection and pairing state machine. It listens
//! on the Manager service for status and pairing messages and moves
//! application packets over the Data service.

pub mod driver;
pub mod types;

pub use driver::BleDriver;
pub use types::{BleCommand, BleEvent, BleMode, BleState};
