//! Contactless kernel identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

/// EMV contactless kernel (Book C-x)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelId {
    /// Mastercard
    C2,
    /// Visa
    C3,
    /// American Express
    C4,
    /// JCB
    C5,
    /// Discover
    C6,
    /// UnionPay
    C7,
    /// EMVCo common kernel
    C8,
    /// Any other kernel byte
    Other(u8),
}

impl KernelId {
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x02 => Self::C2,
            0x03 => Self::C3,
            0x04 => Self::C4,
            0x05 => Self::C5,
            0x06 => Self::C6,
            0x07 => Self::C7,
            0x08 => Self::C8,
            other => Self::Other(other),
        }
    }

    /// Kernel from a Kernel Identifier (9F2A) value; the first byte carries
    /// the kernel number
    pub fn from_tag_value(value: &[u8]) -> Option<Self> {
        value.first().map(|&b| Self::from_byte(b))
    }

    pub const fn byte(self) -> u8 {
        match self {
            Self::C2 => 0x02,
            Self::C3 => 0x03,
            Self::C4 => 0x04,
            Self::C5 => 0x05,
            Self::C6 => 0x06,
            Self::C7 => 0x07,
            Self::C8 => 0x08,
            Self::Other(b) => b,
        }
    }

    /// Network kernel for an AID, derived from its RID
    pub fn for_aid(aid: &[u8]) -> Option<Self> {
        match aid.get(..5)? {
            [0xA0, 0x00, 0x00, 0x00, 0x04] => Some(Self::C2),
            [0xA0, 0x00, 0x00, 0x00, 0x03] => Some(Self::C3),
            [0xA0, 0x00, 0x00, 0x00, 0x25] => Some(Self::C4),
            [0xA0, 0x00, 0x00, 0x00, 0x65] => Some(Self::C5),
            [0xA0, 0x00, 0x00, 0x01, 0x52] => Some(Self::C6),
            [0xA0, 0x00, 0x00, 0x03, 0x33] => Some(Self::C7),
            _ => None,
        }
    }

    /// Human name, e.g. `"Visa (C3)"`
    pub fn name(self) -> String {
        let network = match self {
            Self::C2 => "Mastercard",
            Self::C3 => "Visa",
            Self::C4 => "American Express",
            Self::C5 => "JCB",
            Self::C6 => "Discover",
            Self::C7 => "UnionPay",
            Self::C8 => "Common Kernel",
            Self::Other(b) => return format!("Kernel {b:02X}"),
        };
        format!("{network} ({self})")
    }
}

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(b) => write!(f, "K{b:02X}"),
            known => write!(f, "C{}", known.byte()),
        }
    }
}
