//! Application-facing BLE session types

use crate::config::ble::PAIRING_CODE_LEN;
use crate::protocol::control::{adv_name, AdvName};

/// Radio mode of the co-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BleMode {
    /// Not advertising.
    #[default]
    Off,
    /// Advertising to bonded peers only.
    Connectable,
    /// Advertising to everyone, new bonds allowed.
    Pairing,
    /// Firmware update; never requested by this driver.
    Dfu,
}

impl BleMode {
    /// Mode implied by a status report's advertising flags.
    pub fn from_advertising(advertising: bool, whitelist: bool) -> Self {
        match (advertising, whitelist) {
            (false, _) => BleMode::Off,
            (true, true) => BleMode::Connectable,
            (true, false) => BleMode::Pairing,
        }
    }
}

/// Request from the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleCommand {
    /// Stop advertising.
    SwitchOff,
    /// Advertise to bonded peers under `name`.
    SwitchOn { name: AdvName },
    /// Advertise to new peers under `name`.
    PairingMode { name: AdvName },
    /// Drop the current connection.
    Disconnect,
    /// Forget all bonded peers.
    EraseBonds,
    /// Accept the pending pairing request.
    AllowPairing,
    /// Reject the pending pairing request.
    RejectPairing,
}

impl BleCommand {
    pub fn switch_on(name: &[u8]) -> Self {
        BleCommand::SwitchOn {
            name: adv_name(name),
        }
    }

    pub fn pairing_mode(name: &[u8]) -> Self {
        BleCommand::PairingMode {
            name: adv_name(name),
        }
    }
}

/// Notification for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleEvent {
    Connected,
    Disconnected,
    /// A new peer wants to bond; show `code` and answer with
    /// [`BleCommand::AllowPairing`] or [`BleCommand::RejectPairing`].
    PairingRequest { code: [u8; PAIRING_CODE_LEN] },
    PairingCancelled,
}

/// Snapshot of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BleState {
    /// Peer connected and link running.
    pub connected: bool,
    /// Bonded peers known to the co-processor.
    pub peer_count: u8,
    /// Co-processor currently in pairing mode.
    pub pairing: bool,
    /// Co-processor currently advertising to bonded peers.
    pub connectable: bool,
    /// A pairing request awaits an answer.
    pub pairing_requested: bool,
    /// At least one status report received since the link came up.
    pub state_known: bool,
}
