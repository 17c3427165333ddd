//! BLE reconciliation loop task

use embassy_time::{Duration, Ticker};

use crate::ble::BleDriver;
use crate::link::Transport;

/// Run [`BleDriver::tick`] every `loop_period_ms`.
///
/// Ticks missed while the executor was busy are not caught up.
pub async fn ble_loop_task<'a, T: Transport<'a>>(ble: &BleDriver<'a, T>) -> ! {
    let period = Duration::from_millis(u64::from(ble.config().loop_period_ms.max(1)));
    log::debug!("ble loop: period {}ms", period.as_millis());

    let mut ticker = Ticker::every(period);
    loop {
        ticker.next().await;
        ble.tick();
    }
}
