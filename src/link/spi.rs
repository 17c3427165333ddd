//! Block framing driver for the full-duplex SPI link
//!
//! Every transaction exchanges one fixed-size block in each direction. When
//! nothing is queued the host sends [`IDLE_BLOCK`] so the co-processor still
//! gets a chance to talk. Transactions start when a request is queued, when
//! the co-processor raises its request line, and on the idle poll period.

use log::{debug, info, trace, warn};

use super::shared::LinkShared;
use super::traits::{BlockLink, LinkError};
use super::transport::{Completion, SendError, ServiceListener, Transport, TxId, TxStatus};
use crate::config::LinkConfig;
use crate::protocol::{decode_block, encode_block_payload, Block, ServiceId, IDLE_BLOCK};
use crate::sync::IrqCell;
use crate::tsqueue::Ticket;

struct InFlight {
    ticket: Ticket,
    completion: Option<Completion>,
}

struct TxState {
    busy: bool,
    /// Request carried by the running transaction, `None` for idle blocks.
    in_flight: Option<InFlight>,
    block: Block,
}

/// SPI transport.
pub struct SpiDriver<'a, L: BlockLink> {
    link: IrqCell<L>,
    shared: LinkShared<'a>,
    tx: IrqCell<TxState>,
    config: LinkConfig,
}

impl<'a, L: BlockLink> SpiDriver<'a, L> {
    pub fn new(link: L, config: LinkConfig) -> Self {
        Self {
            link: IrqCell::new(link),
            shared: LinkShared::new(),
            tx: IrqCell::new(TxState {
                busy: false,
                in_flight: None,
                block: IDLE_BLOCK,
            }),
            config,
        }
    }

    /// Enable the link. Does nothing if already running.
    pub fn init(&self) -> Result<(), LinkError> {
        if self.shared.running() {
            return Ok(());
        }

        self.link.lock(|link| {
            if self.shared.enabled() {
                link.disable();
            }
            link.enable()
        })?;
        self.tx.lock(|tx| tx.busy = false);
        self.shared.set_started();
        info!("spi link: started, idle poll {}us", self.config.idle_poll_us);

        if self.shared.has_pending() {
            self.start_transfer();
        }
        Ok(())
    }

    /// Disable the link.
    ///
    /// A request in the running transaction completes with
    /// [`TxStatus::Failed`]; queued requests are dropped without callbacks.
    pub fn deinit(&self) {
        if !self.shared.set_stopped() {
            return;
        }
        self.link.lock(|link| link.disable());

        let in_flight = self.tx.lock(|tx| {
            tx.busy = false;
            tx.in_flight.take()
        });
        self.shared.flush();
        info!("spi link: stopped");

        if let Some(completion) = in_flight.and_then(|f| f.completion) {
            completion.fire(TxStatus::Failed);
        }
    }

    /// Interval between idle transactions.
    pub fn idle_poll_us(&self) -> u32 {
        self.config.idle_poll_us
    }

    /// Periodic poll: exchange a block, idle if nothing is queued.
    pub fn poll(&self) {
        self.start_transfer();
    }

    /// The co-processor raised its request line.
    pub fn on_peer_request(&self) {
        self.start_transfer();
    }

    /// Transaction finished; `rx` holds the received block.
    ///
    /// `hw_ok` is the peripheral's verdict on the transaction. The request
    /// carried by it completes with [`TxStatus::Sent`] only if it is set.
    pub fn on_transfer_complete(&self, rx: &[u8], hw_ok: bool) {
        let finished = self.tx.lock(|tx| {
            tx.busy = false;
            tx.in_flight.take()
        });

        if let Some(finished) = finished {
            self.shared.release(finished.ticket);
            if let Some(completion) = finished.completion {
                let status = if hw_ok { TxStatus::Sent } else { TxStatus::Failed };
                completion.fire(status);
            }
        }

        if hw_ok {
            match decode_block(rx) {
                Ok((service, payload)) => self.shared.dispatch(service, payload),
                Err(error) => trace!("spi link: rx block dropped: {:?}", error),
            }
        } else {
            warn!("spi link: transaction failed");
        }

        if self.shared.has_pending() {
            self.start_transfer();
        }
    }

    /// Unrecoverable peripheral fault; stops communication until the next
    /// [`SpiDriver::init`] and drops queued requests.
    pub fn on_link_error(&self, error: LinkError) {
        warn!("spi link: {:?}, stopping", error);
        if let Some(completion) = self.stop_on_fault() {
            completion.fire(TxStatus::Failed);
        }
    }

    /// Access the underlying link.
    pub fn with_link<R>(&self, f: impl FnOnce(&mut L) -> R) -> R {
        self.link.lock(f)
    }

    /// Clear the running flag and drop queued requests. Returns the
    /// completion of the request in the running transaction, still to be
    /// failed.
    fn stop_on_fault(&self) -> Option<Completion> {
        self.shared.set_failed();
        let in_flight = self.tx.lock(|tx| {
            tx.busy = false;
            tx.in_flight.take()
        });
        self.shared.flush();
        in_flight.and_then(|f| f.completion)
    }

    fn start_transfer(&self) {
        if !self.shared.running() {
            return;
        }

        let refused = self.tx.lock(|tx| {
            if tx.busy {
                return None;
            }

            let claimed = self
                .shared
                .claim_next(|request| encode_block_payload(request.service, &request.payload));
            let in_flight = match claimed {
                Some((ticket, completion, block)) => {
                    tx.block = block;
                    Some(InFlight { ticket, completion })
                }
                None => {
                    tx.block = IDLE_BLOCK;
                    None
                }
            };

            match self.link.lock(|link| link.start_transfer(&tx.block)) {
                Ok(()) => {
                    tx.busy = true;
                    tx.in_flight = in_flight;
                    None
                }
                Err(error) => {
                    let completion = in_flight.and_then(|f| {
                        self.shared.release(f.ticket);
                        f.completion
                    });
                    Some((error, completion))
                }
            }
        });

        if let Some((error, completion)) = refused {
            warn!("spi link: transfer refused: {:?}, stopping", error);
            self.stop_on_fault();
            if let Some(completion) = completion {
                completion.fire(TxStatus::Failed);
            }
        }
    }
}

impl<'a, L: BlockLink> Transport<'a> for SpiDriver<'a, L> {
    fn is_running(&self) -> bool {
        self.shared.running() && self.link.lock(|link| link.peer_alive())
    }

    fn send(
        &self,
        service: ServiceId,
        payload: &[u8],
        completion: Option<Completion>,
    ) -> Result<TxId, SendError> {
        if !self.is_running() {
            return Err(SendError::NotRunning);
        }
        let id = self.shared.enqueue(service, payload, completion)?;
        debug!("spi link: queued #{} for {:?}, {} bytes", id, service, payload.len());

        self.start_transfer();
        Ok(id)
    }

    fn abort(&self, id: TxId) -> bool {
        self.shared.abort(id)
    }

    fn register_listener(&self, service: ServiceId, listener: &'a dyn ServiceListener) -> bool {
        self.shared.register(service, listener)
    }

    fn unregister_listener(&self, service: ServiceId) {
        self.shared.unregister(service)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::link::traits::mock::MockBlockLink;
    use crate::protocol::encode_block;

    struct Recorder {
        frames: IrqCell<Vec<(ServiceId, Vec<u8>)>>,
    }

    impl ServiceListener for Recorder {
        fn on_message(&self, service: ServiceId, payload: &[u8]) {
            self.frames.lock(|f| f.push((service, payload.to_vec())));
        }
    }

    fn started() -> SpiDriver<'static, MockBlockLink> {
        let driver = SpiDriver::new(MockBlockLink::new(), LinkConfig::default());
        driver.init().unwrap();
        driver
    }

    fn transfers(driver: &SpiDriver<'_, MockBlockLink>) -> Vec<Block> {
        driver.with_link(|link| core::mem::take(&mut link.transfers))
    }

    #[test]
    fn test_idle_poll_sends_idle_block() {
        let driver = started();

        driver.poll();
        assert_eq!(transfers(&driver), vec![IDLE_BLOCK]);

        // Busy until the transaction completes
        driver.poll();
        assert!(transfers(&driver).is_empty());

        driver.on_transfer_complete(&IDLE_BLOCK, true);
        driver.on_peer_request();
        assert_eq!(transfers(&driver), vec![IDLE_BLOCK]);
    }

    #[test]
    fn test_send_starts_transfer() {
        let driver = started();

        driver.send(ServiceId::Manager, &[0x00], None).unwrap();
        driver.send(ServiceId::Data, &[1, 2, 3], None).unwrap();

        assert_eq!(
            transfers(&driver),
            vec![encode_block(ServiceId::Manager, &[0x00]).unwrap()]
        );

        // More queued: the next transaction starts right away
        driver.on_transfer_complete(&IDLE_BLOCK, true);
        assert_eq!(
            transfers(&driver),
            vec![encode_block(ServiceId::Data, &[1, 2, 3]).unwrap()]
        );

        // Queue empty: wait for the poll
        driver.on_transfer_complete(&IDLE_BLOCK, true);
        assert!(transfers(&driver).is_empty());
    }

    static STATUS: Mutex<Vec<(TxStatus, usize)>> = Mutex::new(Vec::new());

    fn record(status: TxStatus, context: usize) {
        STATUS.lock().unwrap().push((status, context));
    }

    #[test]
    fn test_completion_follows_hw_status() {
        let driver = started();

        driver
            .send(ServiceId::Data, &[1], Some(Completion::new(record, 10)))
            .unwrap();
        driver
            .send(ServiceId::Data, &[2], Some(Completion::new(record, 20)))
            .unwrap();

        driver.on_transfer_complete(&IDLE_BLOCK, false);
        driver.on_transfer_complete(&IDLE_BLOCK, true);

        assert_eq!(
            *STATUS.lock().unwrap(),
            vec![(TxStatus::Failed, 10), (TxStatus::Sent, 20)]
        );
        // A failed transaction does not stop the link
        assert!(driver.is_running());
    }

    #[test]
    fn test_receive_dispatch() {
        let recorder = Recorder {
            frames: IrqCell::new(Vec::new()),
        };
        let driver = SpiDriver::new(MockBlockLink::new(), LinkConfig::default());
        driver.init().unwrap();
        assert!(driver.register_listener(ServiceId::Data, &recorder));

        driver.poll();
        let rx = encode_block(ServiceId::Data, &[0x55; 244]).unwrap();
        driver.on_transfer_complete(&rx, true);

        driver.poll();
        driver.on_transfer_complete(&IDLE_BLOCK, true);

        // Corrupted block is dropped
        driver.poll();
        let mut bad = encode_block(ServiceId::Data, &[1]).unwrap();
        bad[10] ^= 0x01;
        driver.on_transfer_complete(&bad, true);

        // Received data is not trusted on a failed transaction
        driver.poll();
        driver.on_transfer_complete(&rx, false);

        let frames = recorder.frames.lock(|f| core::mem::take(f));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, ServiceId::Data);
        assert_eq!(frames[0].1, vec![0x55; 244]);
    }

    #[test]
    fn test_stopped_link() {
        let driver = SpiDriver::new(MockBlockLink::new(), LinkConfig { idle_poll_us: 500 });
        assert_eq!(driver.idle_poll_us(), 500);

        driver.poll();
        assert!(transfers(&driver).is_empty());
        assert_eq!(driver.send(ServiceId::Data, &[1], None), Err(SendError::NotRunning));

        driver.init().unwrap();
        driver.with_link(|link| link.alive = false);
        assert_eq!(driver.send(ServiceId::Data, &[1], None), Err(SendError::NotRunning));
    }

    static DEINIT: Mutex<Vec<(TxStatus, usize)>> = Mutex::new(Vec::new());

    fn record_deinit(status: TxStatus, context: usize) {
        DEINIT.lock().unwrap().push((status, context));
    }

    #[test]
    fn test_deinit_fails_in_flight_and_drops_queue() {
        let driver = started();
        let cb = |n| Some(Completion::new(record_deinit, n));

        driver.send(ServiceId::Data, &[1], cb(1)).unwrap();
        driver.send(ServiceId::Data, &[2], cb(2)).unwrap();
        transfers(&driver);

        driver.deinit();
        assert!(!driver.is_running());
        assert!(!driver.with_link(|link| link.enabled));
        assert_eq!(*DEINIT.lock().unwrap(), vec![(TxStatus::Failed, 1)]);

        // A second deinit does nothing
        driver.deinit();
        assert_eq!(DEINIT.lock().unwrap().len(), 1);

        // Nothing left over after a restart: the poll exchanges an idle block
        driver.init().unwrap();
        assert!(transfers(&driver).is_empty());
        driver.poll();
        assert_eq!(transfers(&driver), vec![IDLE_BLOCK]);
        driver.on_transfer_complete(&IDLE_BLOCK, true);
        assert_eq!(DEINIT.lock().unwrap().len(), 1);
    }

    static LINK_ERROR: Mutex<Vec<(TxStatus, usize)>> = Mutex::new(Vec::new());

    fn record_link_error(status: TxStatus, context: usize) {
        LINK_ERROR.lock().unwrap().push((status, context));
    }

    #[test]
    fn test_link_error_and_restart() {
        let driver = started();
        let cb = |n| Some(Completion::new(record_link_error, n));

        driver.send(ServiceId::Data, &[1], cb(1)).unwrap();
        driver.send(ServiceId::Data, &[2], cb(2)).unwrap();
        transfers(&driver);

        driver.on_link_error(LinkError::Hardware);
        assert!(!driver.is_running());
        assert_eq!(*LINK_ERROR.lock().unwrap(), vec![(TxStatus::Failed, 1)]);
        assert_eq!(driver.send(ServiceId::Data, &[3], None), Err(SendError::NotRunning));
        driver.poll();
        assert!(transfers(&driver).is_empty());

        // The queued request was dropped; new requests go out after a restart
        driver.init().unwrap();
        assert!(transfers(&driver).is_empty());
        driver.send(ServiceId::Data, &[4], cb(4)).unwrap();
        assert_eq!(
            transfers(&driver),
            vec![encode_block(ServiceId::Data, &[4]).unwrap()]
        );
        driver.on_transfer_complete(&IDLE_BLOCK, true);
        assert_eq!(
            *LINK_ERROR.lock().unwrap(),
            vec![(TxStatus::Failed, 1), (TxStatus::Sent, 4)]
        );
    }

    static REFUSED: Mutex<Vec<(TxStatus, usize)>> = Mutex::new(Vec::new());

    fn record_refused(status: TxStatus, context: usize) {
        REFUSED.lock().unwrap().push((status, context));
    }

    #[test]
    fn test_refused_transfer_drops_queue() {
        let driver = started();
        let cb = |n| Some(Completion::new(record_refused, n));

        driver.send(ServiceId::Data, &[1], cb(1)).unwrap();
        driver.send(ServiceId::Data, &[2], cb(2)).unwrap();
        driver.send(ServiceId::Data, &[3], cb(3)).unwrap();
        transfers(&driver);

        // Chaining the second request is refused: it fails and the third is dropped
        driver.with_link(|link| link.next_transfer_error = Some(LinkError::Hardware));
        driver.on_transfer_complete(&IDLE_BLOCK, true);
        assert!(!driver.is_running());
        assert_eq!(
            *REFUSED.lock().unwrap(),
            vec![(TxStatus::Sent, 1), (TxStatus::Failed, 2)]
        );

        driver.init().unwrap();
        assert!(transfers(&driver).is_empty());
        driver.poll();
        assert_eq!(transfers(&driver), vec![IDLE_BLOCK]);
        driver.on_transfer_complete(&IDLE_BLOCK, true);
        assert_eq!(REFUSED.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_refused_transfer_stops_link() {
        let driver = started();
        driver.with_link(|link| link.next_transfer_error = Some(LinkError::Hardware));

        driver.poll();
        assert!(!driver.is_running());

        driver.init().unwrap();
        driver.poll();
        assert_eq!(transfers(&driver), vec![IDLE_BLOCK]);
    }
}
