//! State common to both framing drivers

use log::{trace, warn};

use super::transport::{Completion, SendError, ServiceListener, TxId, TxRequest};
use crate::config::link::{MAX_PAYLOAD, N_SERVICES, TX_QUEUE_DEPTH};
use crate::protocol::{Payload, ServiceId};
use crate::sync::IrqCell;
use crate::tsqueue::{Ticket, TsQueue};

#[derive(Default)]
struct Flags {
    /// Peripheral acquired.
    enabled: bool,
    /// Communicating; cleared by unrecoverable link errors.
    running: bool,
}

/// Listener table, lifecycle flags and the outbound request queue.
pub(crate) struct LinkShared<'a> {
    listeners: IrqCell<[Option<&'a dyn ServiceListener>; N_SERVICES]>,
    flags: IrqCell<Flags>,
    tx_queue: IrqCell<TsQueue<TxRequest, TX_QUEUE_DEPTH>>,
}

impl<'a> LinkShared<'a> {
    pub fn new() -> Self {
        Self {
            listeners: IrqCell::new([None; N_SERVICES]),
            flags: IrqCell::default(),
            tx_queue: IrqCell::new(TsQueue::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.flags.lock(|f| f.enabled)
    }

    pub fn running(&self) -> bool {
        self.flags.lock(|f| f.running)
    }

    pub fn set_started(&self) {
        self.flags.lock(|f| {
            f.enabled = true;
            f.running = true;
        });
    }

    /// Clear both flags. Returns whether the link was enabled.
    pub fn set_stopped(&self) -> bool {
        self.flags.lock(|f| {
            let was_enabled = f.enabled;
            f.enabled = false;
            f.running = false;
            was_enabled
        })
    }

    pub fn set_failed(&self) {
        self.flags.lock(|f| f.running = false);
    }

    pub fn register(&self, service: ServiceId, listener: &'a dyn ServiceListener) -> bool {
        self.listeners.lock(|table| {
            let entry = &mut table[service.index()];
            if entry.is_some() {
                return false;
            }
            *entry = Some(listener);
            true
        })
    }

    pub fn unregister(&self, service: ServiceId) {
        self.listeners.lock(|table| table[service.index()] = None);
    }

    /// Deliver a decoded frame to the listener for its service.
    pub fn dispatch(&self, service: ServiceId, payload: &[u8]) {
        // Copied out so the listener runs without the table borrowed
        let listener = self.listeners.lock(|table| table[service.index()]);

        match listener {
            Some(listener) => listener.on_message(service, payload),
            None => trace!("link: no listener for {:?}, dropped {} bytes", service, payload.len()),
        }
    }

    /// Accept a request into the queue.
    pub fn enqueue(
        &self,
        service: ServiceId,
        payload: &[u8],
        completion: Option<Completion>,
    ) -> Result<TxId, SendError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(SendError::PayloadTooLarge);
        }
        let payload = Payload::from_slice(payload).map_err(|_| SendError::PayloadTooLarge)?;

        self.tx_queue
            .lock(|q| {
                q.enqueue(TxRequest {
                    service,
                    payload,
                    completion,
                })
            })
            .ok_or_else(|| {
                warn!("link: tx queue full, {:?} request refused", service);
                SendError::QueueFull
            })
    }

    /// Claim the oldest queued request and build its wire form with `encode`.
    pub fn claim_next<R>(
        &self,
        encode: impl FnOnce(&TxRequest) -> R,
    ) -> Option<(Ticket, Option<Completion>, R)> {
        self.tx_queue.lock(|q| {
            let ticket = q.process()?;
            match q.slot(&ticket) {
                Some(request) => {
                    let completion = request.completion;
                    let encoded = encode(request);
                    Some((ticket, completion, encoded))
                }
                None => {
                    q.process_done(ticket);
                    None
                }
            }
        })
    }

    /// Release a claimed request.
    pub fn release(&self, ticket: Ticket) {
        self.tx_queue.lock(|q| q.process_done(ticket));
    }

    pub fn abort(&self, id: TxId) -> bool {
        self.tx_queue.lock(|q| q.abort(id))
    }

    pub fn has_pending(&self) -> bool {
        self.tx_queue.lock(|q| !q.is_empty())
    }

    /// Drop every queued request without running callbacks.
    pub fn flush(&self) {
        self.tx_queue.lock(|q| q.reset());
    }
}
