//! CRC-8 frame checksum
//!
//! Polynomial 0x07, initial value 0x00, no reflection, no final XOR
//! (the SMBus parameter set).

use crc::{Crc, CRC_8_SMBUS};

const CRC: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);

/// Calculate the CRC-8 of `data`.
pub fn crc8(data: &[u8]) -> u8 {
    CRC.checksum(data)
}
