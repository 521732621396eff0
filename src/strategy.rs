//! # Calculation Strategies
//!
//! Per device family logic the conversation engine delegates to: which
//! checksum a message carries and which byte order `Endian::Device` fields
//! use. One small type per family, injected into the engine at construction.

use crate::variable::Endian;
use crc::{Crc, CRC_16_MODBUS};
use serde::Deserialize;
use std::fmt::Debug;
use std::sync::Arc;

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

pub trait CalculationStrategy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Byte order of fields declared with `Endian::Device`.
    fn byte_order(&self) -> Endian {
        Endian::Big
    }

    /// Width in bytes of the checksum this family appends.
    fn checksum_width(&self) -> usize;

    /// Checksum over `data`, in wire order.
    fn compute_checksum(&self, data: &[u8]) -> Vec<u8>;

    fn verify_checksum(&self, data: &[u8], received: &[u8]) -> bool {
        self.compute_checksum(data) == received
    }

    /// Reorder a numeric field declared with `order` into big-endian.
    fn convert_endianness(&self, bytes: &[u8], order: Endian) -> Vec<u8> {
        let mut out = bytes.to_vec();
        if order.resolve(self.byte_order()) == Endian::Little {
            out.reverse();
        }
        out
    }
}

/// Devices whose frames carry no checksum.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChecksum;

impl CalculationStrategy for NoChecksum {
    fn name(&self) -> &'static str {
        "none"
    }

    fn checksum_width(&self) -> usize {
        0
    }

    fn compute_checksum(&self, _data: &[u8]) -> Vec<u8> {
        Vec::new()
    }
}

/// Arithmetic sum modulo 256, as used by M-Bus long frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum8;

impl CalculationStrategy for Sum8 {
    fn name(&self) -> &'static str {
        "sum8"
    }

    fn checksum_width(&self) -> usize {
        1
    }

    fn compute_checksum(&self, data: &[u8]) -> Vec<u8> {
        vec![data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))]
    }
}

/// Arithmetic sum modulo 65536 in the family's byte order.
#[derive(Debug, Clone, Copy)]
pub struct Sum16 {
    pub order: Endian,
}

impl Default for Sum16 {
    fn default() -> Self {
        Sum16 { order: Endian::Big }
    }
}

impl CalculationStrategy for Sum16 {
    fn name(&self) -> &'static str {
        "sum16"
    }

    fn byte_order(&self) -> Endian {
        self.order
    }

    fn checksum_width(&self) -> usize {
        2
    }

    fn compute_checksum(&self, data: &[u8]) -> Vec<u8> {
        let sum = data
            .iter()
            .fold(0u16, |acc, &b| acc.wrapping_add(b as u16));
        match self.order {
            Endian::Little => sum.to_le_bytes().to_vec(),
            _ => sum.to_be_bytes().to_vec(),
        }
    }
}

/// CRC-16/MODBUS, transmitted low byte first. Register values are big-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc16Modbus;

impl CalculationStrategy for Crc16Modbus {
    fn name(&self) -> &'static str {
        "crc16_modbus"
    }

    fn checksum_width(&self) -> usize {
        2
    }

    fn compute_checksum(&self, data: &[u8]) -> Vec<u8> {
        CRC_MODBUS.checksum(data).to_le_bytes().to_vec()
    }
}

/// XOR of all bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Xor8;

impl CalculationStrategy for Xor8 {
    fn name(&self) -> &'static str {
        "xor8"
    }

    fn checksum_width(&self) -> usize {
        1
    }

    fn compute_checksum(&self, data: &[u8]) -> Vec<u8> {
        vec![data.iter().fold(0u8, |acc, &b| acc ^ b)]
    }
}

/// Strategy selection as it appears in scripts and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    None,
    Sum8,
    Sum16,
    Sum16Le,
    Crc16Modbus,
    Xor8,
}

impl StrategyKind {
    pub fn build(self) -> Arc<dyn CalculationStrategy> {
        match self {
            StrategyKind::None => Arc::new(NoChecksum),
            StrategyKind::Sum8 => Arc::new(Sum8),
            StrategyKind::Sum16 => Arc::new(Sum16 { order: Endian::Big }),
            StrategyKind::Sum16Le => Arc::new(Sum16 {
                order: Endian::Little,
            }),
            StrategyKind::Crc16Modbus => Arc::new(Crc16Modbus),
            StrategyKind::Xor8 => Arc::new(Xor8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_modbus_known_frame() {
        // 01 03 00 00 00 0A -> CRC C5CD, sent as CD C5
        let crc = Crc16Modbus.compute_checksum(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(crc, vec![0xC5, 0xCD]);
        assert!(Crc16Modbus.verify_checksum(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A], &[0xC5, 0xCD]));
    }

    #[test]
    fn test_sum8_wraps() {
        assert_eq!(Sum8.compute_checksum(&[0xFF, 0x02]), vec![0x01]);
        assert_eq!(Sum8.compute_checksum(&[]), vec![0x00]);
    }

    #[test]
    fn test_sum16_byte_order() {
        let data = [0xFF, 0xFF, 0x03];
        assert_eq!(Sum16 { order: Endian::Big }.compute_checksum(&data), vec![0x02, 0x01]);
        assert_eq!(
            Sum16 {
                order: Endian::Little
            }
            .compute_checksum(&data),
            vec![0x01, 0x02]
        );
    }

    #[test]
    fn test_xor8() {
        assert_eq!(Xor8.compute_checksum(&[0x0F, 0xF0, 0x01]), vec![0xFE]);
    }

    #[test]
    fn test_convert_endianness_uses_family_order() {
        let le = Sum16 {
            order: Endian::Little,
        };
        assert_eq!(le.convert_endianness(&[0x34, 0x12], Endian::Device), vec![0x12, 0x34]);
        assert_eq!(le.convert_endianness(&[0x12, 0x34], Endian::Big), vec![0x12, 0x34]);
        assert_eq!(Crc16Modbus.convert_endianness(&[0x12, 0x34], Endian::Device), vec![0x12, 0x34]);
    }

    #[test]
    fn test_kind_deserialize_and_build() {
        let kind: StrategyKind = serde_json::from_str("\"crc16_modbus\"").unwrap();
        assert_eq!(kind.build().name(), "crc16_modbus");
        assert_eq!(StrategyKind::default().build().checksum_width(), 0);
    }
}
