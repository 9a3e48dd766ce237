//! Table-driven CRC8 with polynomial `0x07`.
//!
//! The table is built once per process on first use. Appending the CRC of a
//! message to the message and recomputing over the whole yields `0`, which is
//! how every packet in the lab is validated.

use lazy_static::lazy_static;

pub const POLYNOMIAL: u8 = 0x07;
const WIDTH: u32 = u8::BITS;
const TOPBIT: u8 = 1 << (WIDTH - 1);

/// Precomputed remainders, indexed by dividend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrcTable([u8; 256]);

impl CrcTable {
    /// Simulate the polynomial division of every possible byte.
    pub fn init() -> Self {
        let mut table = [0u8; 256];
        for (dividend, slot) in table.iter_mut().enumerate() {
            let mut remainder = (dividend as u8) << (WIDTH - 8);
            for _ in 0..8 {
                remainder = if remainder & TOPBIT != 0 {
                    (remainder << 1) ^ POLYNOMIAL
                } else {
                    remainder << 1
                };
            }
            *slot = remainder;
        }
        Self(table)
    }

    pub fn entry(&self, dividend: u8) -> u8 {
        self.0[dividend as usize]
    }

    pub fn compute(&self, message: &[u8]) -> u8 {
        // With an 8-bit register the `>> (WIDTH - 8)` / `<< 8` terms collapse:
        // the whole remainder is folded into the index and nothing carries over.
        message
            .iter()
            .fold(0u8, |remainder, &byte| self.0[(byte ^ remainder) as usize])
    }
}

lazy_static! {
    static ref CRC_TABLE: CrcTable = CrcTable::init();
}

/// The process-wide table.
pub fn table() -> &'static CrcTable {
    &CRC_TABLE
}

/// CRC8 of `message` using the process-wide table.
pub fn crc8(message: &[u8]) -> u8 {
    CRC_TABLE.compute(message)
}

/// Result of validating a frame whose last byte is its CRC8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcOutcome {
    Ok,
    Mismatch,
}

impl CrcOutcome {
    pub fn of(frame: &[u8]) -> Self {
        if crc8(frame) == 0 {
            CrcOutcome::Ok
        } else {
            CrcOutcome::Mismatch
        }
    }

    pub fn is_ok(self) -> bool {
        self == CrcOutcome::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crc::{CRC_8_SMBUS, Crc};

    #[test]
    fn table_matches_reference_crate() {
        let reference = Crc::<u8>::new(&CRC_8_SMBUS);
        let table = CrcTable::init();
        for d in 0..=255u8 {
            assert_eq!(table.entry(d), reference.checksum(&[d]), "dividend {d}");
        }
    }

    #[test]
    fn table_is_deterministic() {
        assert_eq!(CrcTable::init(), CrcTable::init());
        assert_eq!(&CrcTable::init(), table());
    }

    #[test]
    fn appended_crc_validates_to_zero() {
        let messages: [&[u8]; 5] = [b"", b"A", b"Hello World from GB-N", &[0, 0, 0], &[0xff; 17]];
        for m in messages {
            let mut framed = m.to_vec();
            framed.push(crc8(m));
            assert_eq!(crc8(&framed), 0);
            assert!(CrcOutcome::of(&framed).is_ok());
        }
    }

    #[test]
    fn known_values() {
        assert_eq!(crc8(b"ACK"), 0x7f);
        assert_eq!(crc8(b"NAK"), 0x12);
        assert_eq!(crc8(&[1, b'A', b'C', b'K']), 0x69);
        assert_eq!(crc8(&[0, b'0']), 0x90);
    }

    #[test]
    fn single_bit_flip_is_detected() {
        let mut framed = vec![3, b'l'];
        framed.push(crc8(&framed));
        framed[1] ^= 0x02;
        assert_eq!(CrcOutcome::of(&framed), CrcOutcome::Mismatch);
    }
}
