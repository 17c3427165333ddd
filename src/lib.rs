#![cfg_attr(not(test), no_std)]

//! Host-side link to a BLE radio co-processor
//!
//! Layers, bottom up:
//! - [`protocol`]: CRC-8, service ids, stream and block frame codecs, the
//!   control-plane messages.
//! - [`tsqueue`]: bounded two-phase queue used by every driver
//! - [`link`]: UART and SPI framing drivers behind the [`link::Transport`]
//!   trait.
//! - [`ble`]: connection and pairing state machine on top of a transport
//! - `tasks` (feature `embedded`): embassy timers driving the periodic work

pub mod ble;
pub mod config;
pub mod link;
pub mod protocol;
pub mod sync;
pub mod tsqueue;

// Async drivers depend on embassy-time, only available with the embedded feature
#[cfg(feature = "embedded")]
pub mod tasks;
