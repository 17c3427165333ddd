//! Framed transport over UART or SPI
//!
//! Both drivers multiplex [`N_SERVICES`](crate::config::link::N_SERVICES)
//! logical services over one physical link and implement [`Transport`].

mod shared;
pub mod spi;
pub mod traits;
pub mod transport;
pub mod uart;

pub use spi::SpiDriver;
pub use traits::{BlockLink, LinkError, StreamLink};
pub use transport::{
    Completion, CompletionFn, SendError, ServiceListener, Transport, TxId, TxStatus,
};
pub use uart::UartDriver;
