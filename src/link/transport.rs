//! Service-multiplexed transport contract
//!
//! Both framing drivers implement [`Transport`]. Upper layers (the BLE
//! session driver) only see this trait, so they run unchanged over UART or
//! SPI, and against [`mock::MockTransport`] in tests.

use crate::protocol::{Payload, ServiceId};

/// Id of an accepted send request, never zero.
pub type TxId = u32;

/// Final outcome of a send request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Handed to the link and transmitted.
    Sent,
    /// Transmission started but did not finish.
    Failed,
}

/// Completion callback: status and the caller's context word.
pub type CompletionFn = fn(TxStatus, usize);

/// Callback run exactly once when an accepted request finishes.
///
/// Runs in interrupt context and must not block. Aborted requests never
/// run their callback.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    /// Function called with the final status.
    pub callback: CompletionFn,
    /// Opaque word handed back to `callback`.
    pub context: usize,
}

impl Completion {
    /// Create a completion calling `callback` with `context`.
    pub fn new(callback: CompletionFn, context: usize) -> Self {
        Self { callback, context }
    }

    pub(crate) fn fire(self, status: TxStatus) {
        (self.callback)(status, self.context)
    }
}

/// Reasons a send request is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// Payload longer than the link maximum.
    PayloadTooLarge,
    /// Link stopped or peer not alive.
    NotRunning,
    /// No free request slot.
    QueueFull,
}

/// Receiver of decoded frames for one service.
pub trait ServiceListener: Sync {
    /// Called from the link's receive context with a borrowed payload.
    ///
    /// May call [`Transport::send`] but must not block, and must not
    /// deinitialise the transport.
    fn on_message(&self, service: ServiceId, payload: &[u8]);
}

/// Framed, service-multiplexed link to the co-processor.
pub trait Transport<'a>: Sync {
    /// Link started and peer reports alive.
    fn is_running(&self) -> bool;

    /// Queue `payload` for `service`.
    ///
    /// Requests are transmitted in acceptance order.
    fn send(
        &self,
        service: ServiceId,
        payload: &[u8],
        completion: Option<Completion>,
    ) -> Result<TxId, SendError>;

    /// Drop a queued request that has not started transmitting.
    fn abort(&self, id: TxId) -> bool;

    /// Install the listener for `service`.
    ///
    /// Returns `false` if another listener is already installed.
    fn register_listener(&self, service: ServiceId, listener: &'a dyn ServiceListener) -> bool;

    fn unregister_listener(&self, service: ServiceId);
}

/// Queued send request.
pub(crate) struct TxRequest {
    pub service: ServiceId,
    pub payload: Payload,
    pub completion: Option<Completion>,
}

impl Default for TxRequest {
    fn default() -> Self {
        Self {
            service: ServiceId::Data,
            payload: Payload::new(),
            completion: None,
        }
    }
}
