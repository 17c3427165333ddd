//! Logical services multiplexed over the link

use crate::config::link::{N_SERVICES, START_MARKER, START_MASK};

/// Service identifiers.
///
/// The id travels in the low nibble of the first frame byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceId {
    /// Application data exchanged with the BLE peer.
    Data = 0,
    /// BLE connection and advertising control plane.
    Manager = 1,
    /// Co-processor management.
    Management = 2,
    /// Production test channel.
    ProductionTest = 3,
}

impl ServiceId {
    /// All services, indexed by id.
    pub const ALL: [ServiceId; N_SERVICES] = [
        ServiceId::Data,
        ServiceId::Manager,
        ServiceId::Management,
        ServiceId::ProductionTest,
    ];

    /// Try to convert a raw id to a ServiceId.
    pub fn from_u8(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Parse the first byte of a frame (start marker + id).
    pub fn from_start_byte(byte: u8) -> Option<Self> {
        if byte & START_MASK != START_MARKER {
            return None;
        }
        Self::from_u8(byte & !START_MASK)
    }

    /// First byte of a frame carrying this service.
    pub fn start_byte(self) -> u8 {
        START_MARKER | self as u8
    }

    /// Index into per-service tables.
    pub fn index(self) -> usize {
        self as usize
    }
}
