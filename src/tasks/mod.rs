//! Embassy tasks driving the periodic work
//!
//! The board spawns these from its executor with `'static` driver
//! references; interrupt handlers call the drivers' `on_*` entry points
//! directly.

pub mod ble;
pub mod spi;

pub use ble::ble_loop_task;
pub use spi::spi_poll_task;
