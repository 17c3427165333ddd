//! Idle poll for the SPI link

use embassy_time::{Duration, Ticker};

use crate::link::{BlockLink, SpiDriver};

/// Start an idle transaction every `idle_poll_us` so the co-processor can
/// push data while the host has nothing to send.
pub async fn spi_poll_task<'a, L: BlockLink>(spi: &SpiDriver<'a, L>) -> ! {
    let mut ticker = Ticker::every(Duration::from_micros(u64::from(spi.idle_poll_us().max(1))));
    loop {
        ticker.next().await;
        spi.poll();
    }
}
