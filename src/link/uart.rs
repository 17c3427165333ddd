//! Stream framing driver for the UART link
//!
//! Outbound requests are framed one at a time into a single transmit buffer.
//! Completion of one transmission starts the next. Inbound bytes run through
//! a [`StreamDecoder`] and complete frames go to the registered listener.
//!
//! The board's UART interrupt handler calls
//! [`UartDriver::on_transmit_complete`], [`UartDriver::on_receive`],
//! [`UartDriver::on_receive_idle`] and [`UartDriver::on_link_error`].

use log::{debug, info, warn};

use super::shared::LinkShared;
use super::traits::{LinkError, StreamLink};
use super::transport::{Completion, SendError, ServiceListener, Transport, TxId, TxStatus};
use crate::protocol::{encode_payload, ServiceId, StreamDecoder, StreamFrame};
use crate::sync::IrqCell;
use crate::tsqueue::Ticket;

struct InFlight {
    ticket: Ticket,
    completion: Option<Completion>,
}

struct TxState {
    in_flight: Option<InFlight>,
    frame: StreamFrame,
}

impl TxState {
    fn transmitting(&self) -> bool {
        self.in_flight.is_some()
    }
}

/// UART transport.
pub struct UartDriver<'a, L: StreamLink> {
    link: IrqCell<L>,
    shared: LinkShared<'a>,
    tx: IrqCell<TxState>,
    rx: IrqCell<StreamDecoder>,
}

impl<'a, L: StreamLink> UartDriver<'a, L> {
    /// Wrap a link; nothing is enabled until [`UartDriver::init`].
    pub fn new(link: L) -> Self {
        Self {
            link: IrqCell::new(link),
            shared: LinkShared::new(),
            tx: IrqCell::new(TxState {
                in_flight: None,
                frame: StreamFrame::new(),
            }),
            rx: IrqCell::new(StreamDecoder::new()),
        }
    }

    /// Enable the link and start the receiver.
    ///
    /// Does nothing if already running. After a link error this restarts
    /// the peripheral.
    pub fn init(&self) -> Result<(), LinkError> {
        if self.shared.running() {
            return Ok(());
        }

        self.rx.lock(|rx| rx.reset());
        self.link.lock(|link| {
            if self.shared.enabled() {
                link.disable();
            }
            link.enable()
        })?;
        self.shared.set_started();
        info!("uart link: started");

        self.start_next();
        Ok(())
    }

    /// Disable the link.
    ///
    /// A transmission in progress completes with [`TxStatus::Failed`];
    /// queued requests are dropped without callbacks.
    pub fn deinit(&self) {
        if !self.shared.set_stopped() {
            return;
        }
        self.link.lock(|link| link.disable());

        let in_flight = self.tx.lock(|tx| tx.in_flight.take());
        self.shared.flush();
        self.rx.lock(|rx| rx.reset());
        info!("uart link: stopped");

        if let Some(completion) = in_flight.and_then(|f| f.completion) {
            completion.fire(TxStatus::Failed);
        }
    }

    /// Transmit interrupt: the current frame has left the peripheral.
    pub fn on_transmit_complete(&self) {
        let finished = self.tx.lock(|tx| tx.in_flight.take());

        if let Some(finished) = finished {
            self.shared.release(finished.ticket);
            if let Some(completion) = finished.completion {
                completion.fire(TxStatus::Sent);
            }
        }

        self.start_next();
    }

    /// Receive interrupt: bytes arrived from the co-processor.
    ///
    /// Bytes arriving while the link is stopped are discarded along with any
    /// partial frame.
    pub fn on_receive(&self, data: &[u8]) {
        self.rx.lock(|rx| {
            if !self.shared.running() {
                rx.reset();
                return;
            }
            rx.feed(data, |service, payload| {
                // A listener's send may have stopped the link mid-chunk
                if self.shared.running() {
                    self.shared.dispatch(service, payload);
                }
            })
        });
    }

    /// Receiver idle interrupt: the line has gone quiet.
    ///
    /// A frame held behind a false start in the decoder is delivered now.
    pub fn on_receive_idle(&self) {
        self.rx.lock(|rx| {
            if !self.shared.running() {
                rx.reset();
                return;
            }
            rx.idle(|service, payload| {
                if self.shared.running() {
                    self.shared.dispatch(service, payload);
                }
            })
        });
    }

    /// Unrecoverable peripheral fault.
    ///
    /// Stops communication until the next [`UartDriver::init`]. The frame in
    /// flight fails; queued requests are dropped without callbacks.
    pub fn on_link_error(&self, error: LinkError) {
        warn!("uart link: {:?}, stopping", error);
        let failed = self.stop_on_fault();
        self.rx.lock(|rx| rx.reset());

        if let Some(completion) = failed {
            completion.fire(TxStatus::Failed);
        }
    }

    /// Access the underlying link.
    pub fn with_link<R>(&self, f: impl FnOnce(&mut L) -> R) -> R {
        self.link.lock(f)
    }

    /// Clear the running flag and drop queued requests. Returns the
    /// completion of the frame in flight, still to be failed.
    ///
    /// Leaves the receiver alone: this may run from inside a listener. The
    /// next [`UartDriver::on_receive`] or [`UartDriver::init`] resets it.
    fn stop_on_fault(&self) -> Option<Completion> {
        self.shared.set_failed();
        let in_flight = self.tx.lock(|tx| tx.in_flight.take());
        self.shared.flush();
        in_flight.and_then(|f| f.completion)
    }

    /// Start the next queued frame if the transmitter is idle.
    fn start_next(&self) {
        if !self.shared.running() {
            return;
        }

        let refused = self.tx.lock(|tx| {
            if tx.transmitting() {
                return None;
            }
            let (ticket, completion, frame) = self
                .shared
                .claim_next(|request| encode_payload(request.service, &request.payload))?;
            tx.frame = frame;

            match self.link.lock(|link| link.start_transmit(&tx.frame)) {
                Ok(()) => {
                    tx.in_flight = Some(InFlight { ticket, completion });
                    None
                }
                Err(error) => {
                    self.shared.release(ticket);
                    Some((error, completion))
                }
            }
        });

        if let Some((error, completion)) = refused {
            warn!("uart link: transmit refused: {:?}, stopping", error);
            self.stop_on_fault();
            if let Some(completion) = completion {
                completion.fire(TxStatus::Failed);
            }
        }
    }
}

impl<'a, L: StreamLink> Transport<'a> for UartDriver<'a, L> {
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
        debug!("uart link: queued #{} for {:?}, {} bytes", id, service, payload.len());

        self.start_next();
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
