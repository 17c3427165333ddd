//! BLE control-plane messages carried on the Manager service
//!
//! Every message starts with a one-byte opcode.
//!
//! Host to co-processor:
//!
//! | Op   | Command        | Payload                                  |
//! |------|----------------|------------------------------------------|
//! | 0x00 | Ping           | none                                     |
//! | 0x01 | AdvertisingOn  | `[whitelist: u8][color: u8][name: 20]`   |
//! | 0x02 | AdvertisingOff | none                                     |
//! | 0x03 | EraseBonds     | none                                     |
//! | 0x04 | Disconnect     | none                                     |
//! | 0x05 | Ack            | none                                     |
//! | 0x06 | AllowPairing   | none                                     |
//! | 0x07 | RejectPairing  | none                                     |
//!
//! Co-processor to host:
//!
//! | Op   | Event            | Payload                 |
//! |------|------------------|-------------------------|
//! | 0x01 | Status           | see [`StatusReport`]    |
//! | 0x04 | PairingRequest   | `[code: 6]`             |
//! | 0x05 | PairingCancelled | none                    |

use heapless::Vec;

use crate::config::ble::{ADV_NAME_LEN, PAIRING_CODE_LEN};

/// Advertised name, zero padded.
pub type AdvName = [u8; ADV_NAME_LEN];

/// Largest encoded command (AdvertisingOn).
pub const MAX_COMMAND_SIZE: usize = 3 + ADV_NAME_LEN;

/// Encoded size of a status event.
pub const STATUS_SIZE: usize = 20;

/// Encoded size of a pairing request event.
pub const PAIRING_REQUEST_SIZE: usize = 1 + PAIRING_CODE_LEN;

/// Build an [`AdvName`] from bytes, truncating to [`ADV_NAME_LEN`].
pub fn adv_name(name: &[u8]) -> AdvName {
    let mut out = [0u8; ADV_NAME_LEN];
    let len = name.len().min(ADV_NAME_LEN);
    out[..len].copy_from_slice(&name[..len]);
    out
}

/// Command opcodes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOpcode {
    Ping = 0x00,
    AdvertisingOn = 0x01,
    AdvertisingOff = 0x02,
    EraseBonds = 0x03,
    Disconnect = 0x04,
    Ack = 0x05,
    AllowPairing = 0x06,
    RejectPairing = 0x07,
}

/// Event opcodes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOpcode {
    Status = 0x01,
    PairingRequest = 0x04,
    PairingCancelled = 0x05,
}

impl EventOpcode {
    /// Try to convert a byte to an EventOpcode.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Status),
            0x04 => Some(Self::PairingRequest),
            0x05 => Some(Self::PairingCancelled),
            _ => None,
        }
    }
}

/// Command sent to the co-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Request a status event.
    Ping,
    /// Start advertising; `whitelist` restricts connections to bonded peers.
    AdvertisingOn {
        whitelist: bool,
        color: u8,
        name: AdvName,
    },
    /// Stop advertising.
    AdvertisingOff,
    /// Forget all bonded peers.
    EraseBonds,
    /// Drop the current connection.
    Disconnect,
    /// Generic acknowledgement.
    Ack,
    /// Accept the pending pairing request.
    AllowPairing,
    /// Reject the pending pairing request.
    RejectPairing,
}

impl ControlCommand {
    /// Opcode of this command.
    pub fn opcode(&self) -> CommandOpcode {
        match self {
            ControlCommand::Ping => CommandOpcode::Ping,
            ControlCommand::AdvertisingOn { .. } => CommandOpcode::AdvertisingOn,
            ControlCommand::AdvertisingOff => CommandOpcode::AdvertisingOff,
            ControlCommand::EraseBonds => CommandOpcode::EraseBonds,
            ControlCommand::Disconnect => CommandOpcode::Disconnect,
            ControlCommand::Ack => CommandOpcode::Ack,
            ControlCommand::AllowPairing => CommandOpcode::AllowPairing,
            ControlCommand::RejectPairing => CommandOpcode::RejectPairing,
        }
    }

    /// Serialise to the Manager service payload.
    pub fn encode(&self) -> Vec<u8, MAX_COMMAND_SIZE> {
        let mut out = Vec::new();
        let _ = out.push(self.opcode() as u8);

        if let ControlCommand::AdvertisingOn {
            whitelist,
            color,
            name,
        } = self
        {
            let _ = out.push(*whitelist as u8);
            let _ = out.push(*color);
            let _ = out.extend_from_slice(name);
        }

        out
    }
}

/// Firmware identification from a status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoprocessorInfo {
    /// SoftDevice version number.
    pub sd_version: u8,
    /// SoftDevice company id.
    pub sd_company_id: u16,
    /// SoftDevice subversion number.
    pub sd_subversion: u16,
    /// Co-processor application version.
    pub app_version: u32,
    /// Co-processor bootloader version.
    pub bld_version: u32,
}

/// Status event payload.
///
/// Layout (multi-byte fields little-endian):
/// ```text
/// [0x01][connected][advertising][advertising_whitelist][peer_count]
/// [reserved: 2][sd_version][sd_company_id: 2][sd_subversion: 2]
/// [app_version: 4][bld_version: 4]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusReport {
    pub connected: bool,
    pub advertising: bool,
    pub advertising_whitelist: bool,
    pub peer_count: u8,
    pub info: CoprocessorInfo,
}

impl StatusReport {
    fn parse(data: &[u8]) -> Result<Self, ControlError> {
        if data.len() < STATUS_SIZE {
            return Err(ControlError::TooShort);
        }

        Ok(Self {
            connected: data[1] != 0,
            advertising: data[2] != 0,
            advertising_whitelist: data[3] != 0,
            peer_count: data[4],
            info: CoprocessorInfo {
                sd_version: data[7],
                sd_company_id: u16::from_le_bytes([data[8], data[9]]),
                sd_subversion: u16::from_le_bytes([data[10], data[11]]),
                app_version: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
                bld_version: u32::from_le_bytes([data[16], data[17], data[18], data[19]]),
            },
        })
    }

    /// Serialise as the co-processor would.
    pub fn encode(&self) -> [u8; STATUS_SIZE] {
        let mut out = [0u8; STATUS_SIZE];
        out[0] = EventOpcode::Status as u8;
        out[1] = self.connected as u8;
        out[2] = self.advertising as u8;
        out[3] = self.advertising_whitelist as u8;
        out[4] = self.peer_count;
        out[7] = self.info.sd_version;
        out[8..10].copy_from_slice(&self.info.sd_company_id.to_le_bytes());
        out[10..12].copy_from_slice(&self.info.sd_subversion.to_le_bytes());
        out[12..16].copy_from_slice(&self.info.app_version.to_le_bytes());
        out[16..20].copy_from_slice(&self.info.bld_version.to_le_bytes());
        out
    }
}

/// Event received from the co-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Status(StatusReport),
    PairingRequest { code: [u8; PAIRING_CODE_LEN] },
    PairingCancelled,
}

/// Reasons a control payload is not understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    /// No opcode byte.
    Empty,
    /// Opcode not in the event table.
    UnknownOpcode(u8),
    /// Payload shorter than its opcode requires.
    TooShort,
}

/// Parse a Manager service payload received from the co-processor.
pub fn parse_event(payload: &[u8]) -> Result<ControlEvent, ControlError> {
    let opcode = *payload.first().ok_or(ControlError::Empty)?;

    match EventOpcode::from_byte(opcode) {
        Some(EventOpcode::Status) => StatusReport::parse(payload).map(ControlEvent::Status),
        Some(EventOpcode::PairingRequest) => {
            if payload.len() < PAIRING_REQUEST_SIZE {
                return Err(ControlError::TooShort);
            }
            let mut code = [0u8; PAIRING_CODE_LEN];
            code.copy_from_slice(&payload[1..PAIRING_REQUEST_SIZE]);
            Ok(ControlEvent::PairingRequest { code })
        }
        Some(EventOpcode::PairingCancelled) => Ok(ControlEvent::PairingCancelled),
        None => Err(ControlError::UnknownOpcode(opcode)),
    }
}
