//! BLE session driver
//!
//! Tracks what the application wants the co-processor to do (the requested
//! mode) against what the co-processor last reported (the current mode) and
//! reconciles the two from a periodic loop. Status and pairing messages
//! arrive on the Manager service, application data on the Data service.
//!
//! ```text
//!   application ── issue_command ──> mode_requested
//!                                        │ tick(): advertising on/off
//!                                        v
//!   co-processor ── status reply ──> mode_current, connected, peer_count
//! ```

use log::{debug, trace, warn};

use super::types::{BleCommand, BleEvent, BleMode, BleState};
use crate::config::ble::{
    ADV_NAME_LEN, EVENT_QUEUE_DEPTH, PACKET_SIZE, PAIRING_CODE_LEN, RX_QUEUE_DEPTH, TX_QUEUE_DEPTH,
};
use crate::config::BleConfig;
use crate::link::{ServiceListener, Transport};
use crate::protocol::control::{
    parse_event, AdvName, ControlCommand, ControlEvent, CoprocessorInfo, StatusReport,
};
use crate::protocol::{Payload, ServiceId};
use crate::sync::IrqCell;
use crate::tsqueue::TsQueue;

struct Session {
    mode_requested: BleMode,
    mode_current: BleMode,
    connected: bool,
    peer_count: u8,
    pairing_requested: bool,
    /// `mode_current` and `connected` come from a real status reply.
    status_valid: bool,
    /// Advertising command sent, no status reply since.
    adv_outstanding: bool,
    adv_name: AdvName,
    accepting: bool,
    ping_counter: u32,
    info: Option<CoprocessorInfo>,
}

impl Session {
    fn new() -> Self {
        Self {
            mode_requested: BleMode::Off,
            mode_current: BleMode::Off,
            connected: false,
            peer_count: 0,
            pairing_requested: false,
            status_valid: false,
            adv_outstanding: false,
            adv_name: [0; ADV_NAME_LEN],
            accepting: false,
            ping_counter: 0,
            info: None,
        }
    }

    fn request_mode(&mut self, mode: BleMode) {
        if self.mode_requested != mode {
            debug!("ble: mode requested {:?} -> {:?}", self.mode_requested, mode);
            self.mode_requested = mode;
            self.adv_outstanding = false;
        }
    }
}

/// BLE session on top of a [`Transport`].
pub struct BleDriver<'a, T: Transport<'a>> {
    transport: &'a T,
    config: BleConfig,
    session: IrqCell<Session>,
    events: IrqCell<TsQueue<Option<BleEvent>, EVENT_QUEUE_DEPTH>>,
    rx_queue: IrqCell<TsQueue<Payload, RX_QUEUE_DEPTH>>,
    tx_queue: IrqCell<TsQueue<Payload, TX_QUEUE_DEPTH>>,
}

impl<'a, T: Transport<'a>> BleDriver<'a, T> {
    pub fn new(transport: &'a T, config: BleConfig) -> Self {
        Self {
            transport,
            config,
            session: IrqCell::new(Session::new()),
            events: IrqCell::new(TsQueue::new()),
            rx_queue: IrqCell::new(TsQueue::new()),
            tx_queue: IrqCell::new(TsQueue::new()),
        }
    }

    /// Register on the Manager and Data services.
    ///
    /// Returns `false`, leaving nothing registered, if either service
    /// already has a listener.
    pub fn init(&'a self) -> bool {
        self.reset();

        let control = self.transport.register_listener(ServiceId::Manager, self);
        let data = self.transport.register_listener(ServiceId::Data, self);
        if control && data {
            return true;
        }

        if control {
            self.transport.unregister_listener(ServiceId::Manager);
        }
        if data {
            self.transport.unregister_listener(ServiceId::Data);
        }
        warn!("ble: service already taken, init failed");
        false
    }

    /// Unregister and drop every queued event and packet.
    pub fn deinit(&self) {
        self.transport.unregister_listener(ServiceId::Manager);
        self.transport.unregister_listener(ServiceId::Data);
        self.reset();
    }

    pub fn config(&self) -> &BleConfig {
        &self.config
    }

    /// Accept inbound application data.
    pub fn start(&self) {
        self.session.lock(|s| s.accepting = true);
    }

    /// Stop accepting inbound data and drop what is queued.
    pub fn stop(&self) {
        self.session.lock(|s| s.accepting = false);
        self.rx_queue.lock(|q| q.reset());
    }

    /// Peer connected and the transport is up.
    pub fn connected(&self) -> bool {
        let connected = self.session.lock(|s| s.connected);
        connected && self.transport.is_running()
    }

    pub fn can_write(&self) -> bool {
        self.connected()
            && self.session.lock(|s| s.accepting)
            && self.tx_queue.lock(|q| q.is_empty())
    }

    /// Send one [`PACKET_SIZE`] packet to the peer.
    ///
    /// Sent straight to the transport when possible, otherwise held in the
    /// outbound queue for the periodic loop. Returns `false` if neither
    /// accepted it.
    pub fn write(&self, data: &[u8]) -> bool {
        if data.len() != PACKET_SIZE {
            return false;
        }
        if !self.connected() || !self.session.lock(|s| s.accepting) {
            return false;
        }
        let Ok(packet) = Payload::from_slice(data) else {
            return false;
        };

        // A held packet goes first
        let held = self.tx_queue.lock(|q| !q.is_empty());
        if !held && self.transport.send(ServiceId::Data, data, None).is_ok() {
            return true;
        }

        let queued = self.tx_queue.lock(|q| q.enqueue(packet)).is_some();
        if !queued {
            trace!("ble: tx packet refused, queue full");
        }
        queued
    }

    pub fn can_read(&self) -> bool {
        !self.rx_queue.lock(|q| q.is_empty())
    }

    /// Copy the oldest received packet into `buf`.
    ///
    /// Returns the packet length, or 0 if nothing is queued or `buf` is
    /// smaller than [`PACKET_SIZE`].
    pub fn read(&self, buf: &mut [u8]) -> usize {
        if buf.len() < PACKET_SIZE {
            return 0;
        }
        self.rx_queue.lock(|q| {
            let Some(ticket) = q.process() else {
                return 0;
            };
            let len = match q.slot(&ticket) {
                Some(packet) => {
                    buf[..packet.len()].copy_from_slice(packet);
                    packet.len()
                }
                None => 0,
            };
            q.process_done(ticket);
            len
        })
    }

    /// Apply an application command.
    ///
    /// Mode commands only record the request and always succeed; the
    /// others report whether the control message was accepted.
    pub fn issue_command(&self, command: BleCommand) -> bool {
        match command {
            BleCommand::SwitchOff => {
                self.session.lock(|s| s.request_mode(BleMode::Off));
                true
            }
            BleCommand::SwitchOn { name } => {
                self.session.lock(|s| {
                    s.adv_name = name;
                    s.request_mode(BleMode::Connectable);
                });
                true
            }
            BleCommand::PairingMode { name } => {
                self.session.lock(|s| {
                    s.adv_name = name;
                    s.request_mode(BleMode::Pairing);
                });
                true
            }
            BleCommand::Disconnect => self.send_control(ControlCommand::Disconnect),
            BleCommand::EraseBonds => self.send_control(ControlCommand::EraseBonds),
            BleCommand::AllowPairing => {
                self.session.lock(|s| s.pairing_requested = false);
                self.send_control(ControlCommand::AllowPairing)
            }
            BleCommand::RejectPairing => {
                self.session.lock(|s| s.pairing_requested = false);
                self.send_control(ControlCommand::RejectPairing)
            }
        }
    }

    pub fn get_event(&self) -> Option<BleEvent> {
        self.events.lock(|q| q.dequeue()).and_then(|(_, event)| event)
    }

    pub fn get_state(&self) -> BleState {
        let running = self.transport.is_running();
        self.session.lock(|s| BleState {
            connected: s.connected && running,
            peer_count: s.peer_count,
            pairing: s.mode_current == BleMode::Pairing,
            connectable: s.mode_current == BleMode::Connectable,
            pairing_requested: s.pairing_requested,
            state_known: s.status_valid,
        })
    }

    /// Firmware versions from the latest status report.
    pub fn peer_info(&self) -> Option<CoprocessorInfo> {
        self.session.lock(|s| s.info)
    }

    /// One period of the reconciliation loop.
    pub fn tick(&self) {
        if !self.transport.is_running() {
            self.session.lock(|s| {
                s.status_valid = false;
                s.adv_outstanding = false;
            });
            return;
        }

        let ping_every = self.config.ping_every();
        let ping_due = self.session.lock(|s| {
            s.ping_counter += 1;
            if s.ping_counter >= ping_every {
                s.ping_counter = 0;
                true
            } else {
                false
            }
        });
        if ping_due {
            self.send_control(ControlCommand::Ping);
        }

        self.flush_tx_queue();
        self.reconcile_mode();
    }

    fn flush_tx_queue(&self) {
        let Some((_, packet)) = self.tx_queue.lock(|q| q.dequeue()) else {
            return;
        };
        if self.transport.send(ServiceId::Data, &packet, None).is_ok() {
            return;
        }
        if self.tx_queue.lock(|q| q.enqueue(packet)).is_none() {
            warn!("ble: tx packet lost on requeue");
        }
    }

    fn reconcile_mode(&self) {
        let color = self.config.color;
        let command = self.session.lock(|s| {
            if s.mode_current == s.mode_requested || s.adv_outstanding {
                return None;
            }
            match s.mode_requested {
                BleMode::Off => Some(ControlCommand::AdvertisingOff),
                BleMode::Connectable => Some(ControlCommand::AdvertisingOn {
                    whitelist: true,
                    color,
                    name: s.adv_name,
                }),
                BleMode::Pairing => Some(ControlCommand::AdvertisingOn {
                    whitelist: false,
                    color,
                    name: s.adv_name,
                }),
                BleMode::Dfu => None,
            }
        });

        if let Some(command) = command {
            if self.send_control(command) {
                self.session.lock(|s| s.adv_outstanding = true);
            }
        }
    }

    fn send_control(&self, command: ControlCommand) -> bool {
        match self
            .transport
            .send(ServiceId::Manager, &command.encode(), None)
        {
            Ok(_) => true,
            Err(error) => {
                debug!("ble: {:?} not sent: {:?}", command.opcode(), error);
                false
            }
        }
    }

    fn push_event(&self, event: BleEvent) -> bool {
        let pushed = self.events.lock(|q| q.enqueue(Some(event))).is_some();
        if !pushed {
            trace!("ble: event queue full, {:?} dropped", event);
        }
        pushed
    }

    fn reset(&self) {
        self.session.lock(|s| *s = Session::new());
        self.events.lock(|q| q.reset());
        self.rx_queue.lock(|q| q.reset());
        self.tx_queue.lock(|q| q.reset());
    }

    fn handle_control(&self, payload: &[u8]) {
        match parse_event(payload) {
            Ok(ControlEvent::Status(report)) => self.on_status(report),
            Ok(ControlEvent::PairingRequest { code }) => self.on_pairing_request(code),
            Ok(ControlEvent::PairingCancelled) => {
                self.session.lock(|s| s.pairing_requested = false);
                debug!("ble: pairing cancelled by peer");
                self.push_event(BleEvent::PairingCancelled);
            }
            Err(error) => debug!("ble: control message dropped: {:?}", error),
        }
    }

    fn on_status(&self, report: StatusReport) {
        let mode = BleMode::from_advertising(report.advertising, report.advertising_whitelist);

        let event = self.session.lock(|s| {
            let was_connected = s.connected;
            let was_pairing = s.mode_current == BleMode::Pairing;

            if s.mode_current != mode {
                debug!("ble: mode {:?} -> {:?}", s.mode_current, mode);
            }
            s.connected = report.connected;
            s.mode_current = mode;
            s.peer_count = report.peer_count;
            s.info = Some(report.info);
            s.status_valid = true;
            s.adv_outstanding = false;

            match (was_connected, report.connected) {
                (false, true) => Some(BleEvent::Connected),
                (true, false) => {
                    if was_pairing || s.mode_requested == BleMode::Pairing {
                        s.request_mode(BleMode::Connectable);
                        s.pairing_requested = false;
                    }
                    Some(BleEvent::Disconnected)
                }
                _ => None,
            }
        });

        if let Some(event) = event {
            debug!("ble: {:?}", event);
            self.push_event(event);
        }
    }

    fn on_pairing_request(&self, code: [u8; PAIRING_CODE_LEN]) {
        let in_pairing = self.session.lock(|s| {
            s.mode_current == BleMode::Pairing && s.mode_requested == BleMode::Pairing
        });

        if in_pairing && self.push_event(BleEvent::PairingRequest { code }) {
            self.session.lock(|s| s.pairing_requested = true);
            debug!("ble: pairing request forwarded");
        } else {
            debug!("ble: pairing request rejected");
            self.send_control(ControlCommand::RejectPairing);
        }
    }

    fn handle_data(&self, payload: &[u8]) {
        if payload.len() != PACKET_SIZE {
            trace!("ble: rx packet of {} bytes dropped", payload.len());
            return;
        }
        if !self.session.lock(|s| s.accepting) {
            return;
        }
        let Ok(packet) = Payload::from_slice(payload) else {
            return;
        };
        if self.rx_queue.lock(|q| q.enqueue(packet)).is_none() {
            trace!("ble: rx queue full, packet dropped");
        }
    }
}

impl<'a, T: Transport<'a>> ServiceListener for BleDriver<'a, T> {
    fn on_message(&self, service: ServiceId, payload: &[u8]) {
        match service {
            ServiceId::Manager => self.handle_control(payload),
            ServiceId::Data => self.handle_data(payload),
            _ => trace!("ble: unexpected message on {:?}", service),
        }
    }
}
