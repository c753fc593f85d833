//! CEC packet and address types
//!
//! A packet is the caller-facing representation of one CEC message:
//!
//! ```text
//! byte 0:        [dest:4][src:4]   header block
//! byte 1:        [opcode:8]        data block, opcode (absent for POLL)
//! bytes 2..N-1:  operands
//! ```
//!
//! EOM and ACK bits never appear here; the frame codec adds and strips them.

use crate::constants::{
    BROADCAST_ADDRESS, MAX_FRAME_BLOCKS, MAX_OPERANDS, MAX_PHYSICAL_NIBBLE, UNREGISTERED_ADDRESS,
};
use crate::error::{CecError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

// =============================================================================
// Logical address
// =============================================================================

/// 4-bit CEC bus identity (0-15)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalAddress(u8);

impl LogicalAddress {
    pub const TV: Self = Self(0x00);
    pub const BROADCAST: Self = Self(BROADCAST_ADDRESS);
    pub const UNREGISTERED: Self = Self(UNREGISTERED_ADDRESS);

    /// Create an address, rejecting values above 15
    pub fn new(value: u8) -> Result<Self> {
        if value > 0x0F {
            return Err(CecError::invalid_argument(format!(
                "logical address {:#04x} out of range",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Take the low nibble of `value`
    pub const fn from_nibble(value: u8) -> Self {
        Self(value & 0x0F)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub fn is_broadcast(self) -> bool {
        self.0 == BROADCAST_ADDRESS
    }
}

impl TryFrom<u8> for LogicalAddress {
    type Error = CecError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<LogicalAddress> for u8 {
    fn from(address: LogicalAddress) -> u8 {
        address.0
    }
}

impl fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

// =============================================================================
// Physical address
// =============================================================================

/// 16-bit HDMI topology address, four nibbles `a.b.c.d`
///
/// Each nibble is 0..=4, so the largest address is 4.4.4.4 (0x4444).
/// 0.0.0.0 doubles as "not discovered".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PhysicalAddress(u16);

impl PhysicalAddress {
    pub const NONE: Self = Self(0);

    pub fn new(value: u16) -> Result<Self> {
        let address = Self(value);
        if address.nibbles().iter().any(|&n| n > MAX_PHYSICAL_NIBBLE) {
            return Err(CecError::invalid_argument(format!(
                "physical address {:#06x} outside 0.0.0.0-4.4.4.4",
                value
            )));
        }
        Ok(address)
    }

    pub const fn value(self) -> u16 {
        self.0
    }

    /// Nibbles from the root port down: `[a, b, c, d]`
    pub fn nibbles(self) -> [u8; 4] {
        [
            (self.0 >> 12) as u8 & 0x0F,
            (self.0 >> 8) as u8 & 0x0F,
            (self.0 >> 4) as u8 & 0x0F,
            self.0 as u8 & 0x0F,
        ]
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.nibbles();
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

// =============================================================================
// Packet
// =============================================================================

/// One complete CEC message, header block plus optional data blocks
///
/// Always 1..=16 bytes. A single-byte packet is a POLL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CecPacket {
    bytes: Bytes,
}

impl CecPacket {
    /// Build a packet from its parts
    ///
    /// `operands` without an opcode is rejected: a data block always starts
    /// with the opcode.
    pub fn new(
        destination: LogicalAddress,
        source: LogicalAddress,
        opcode: Option<u8>,
        operands: &[u8],
    ) -> Result<Self> {
        if opcode.is_none() && !operands.is_empty() {
            return Err(CecError::invalid_argument("operands without opcode"));
        }
        if operands.len() > MAX_OPERANDS {
            return Err(CecError::invalid_argument(format!(
                "{} operands exceed the maximum of {}",
                operands.len(),
                MAX_OPERANDS
            )));
        }

        let mut buf = BytesMut::with_capacity(2 + operands.len());
        buf.put_u8(header(destination, source));
        if let Some(opcode) = opcode {
            buf.put_u8(opcode);
            buf.put_slice(operands);
        }
        Ok(Self {
            bytes: buf.freeze(),
        })
    }

    /// POLL message probing `address` (source = destination, no data)
    pub fn poll(address: LogicalAddress) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(&[header(address, address)]),
        }
    }

    /// Parse the caller-facing wire layout
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(CecError::invalid_argument("empty packet"));
        }
        if data.len() > MAX_FRAME_BLOCKS {
            return Err(CecError::invalid_argument(format!(
                "packet of {} bytes exceeds the maximum of {}",
                data.len(),
                MAX_FRAME_BLOCKS
            )));
        }
        Ok(Self {
            bytes: Bytes::copy_from_slice(data),
        })
    }

    /// Parse a hex string such as `"4f:82:10:00"` or `"4f821000"`
    pub fn from_hex(text: &str) -> Result<Self> {
        let mut digits = Vec::with_capacity(text.len());
        for c in text.chars().filter(|c| !matches!(c, ':' | ' ' | '-')) {
            let digit = c.to_digit(16).ok_or_else(|| {
                CecError::invalid_argument(format!("'{}' is not hex in '{}'", c, text))
            })?;
            digits.push(digit as u8);
        }
        if digits.len() % 2 != 0 {
            return Err(CecError::invalid_argument(format!(
                "odd number of hex digits in '{}'",
                text
            )));
        }
        let data: Vec<u8> = digits.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect();
        Self::from_bytes(&data)
    }

    pub fn destination(&self) -> LogicalAddress {
        LogicalAddress::from_nibble(self.bytes[0] >> 4)
    }

    pub fn source(&self) -> LogicalAddress {
        LogicalAddress::from_nibble(self.bytes[0])
    }

    pub fn opcode(&self) -> Option<u8> {
        self.bytes.get(1).copied()
    }

    pub fn operands(&self) -> &[u8] {
        self.bytes.get(2..).unwrap_or(&[])
    }

    pub fn is_poll(&self) -> bool {
        self.bytes.len() == 1
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination().is_broadcast()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Never true, a packet always carries its header block
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn header(destination: LogicalAddress, source: LogicalAddress) -> u8 {
    (destination.value() << 4) | source.value()
}

impl fmt::Display for CecPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
