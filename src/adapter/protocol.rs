//! Serial transceiver message protocol
//!
//! Every message is one COBS frame: `[kind:1][payload...]`.
//!
//! Host to transceiver:
//! - `TX` (0x01): blocks, each a big-endian u16 `[data:8][eom:1][ack:1]`
//! - `SET_ACK_MASK` (0x02): big-endian u16 address mask
//! - `QUERY_INFO` (0x03): no payload
//!
//! Transceiver to host:
//! - `TX_RESULT` (0x81): 0 acked, 1 not acked, 2 failed
//! - `RX_FRAME` (0x82): blocks as in `TX`, may be part of a frame
//! - `RX_ABORT` (0x83): the frame being received was lost
//! - `INFO` (0x84): physical address (u16 BE), logical address or 0xFF

use super::{BusInfo, BusResult};
use crate::address::AddressSet;
use crate::codec::RawBlock;
use crate::packet::{LogicalAddress, PhysicalAddress};
use std::fmt;

pub const TX: u8 = 0x01;
pub const SET_ACK_MASK: u8 = 0x02;
pub const QUERY_INFO: u8 = 0x03;

pub const TX_RESULT: u8 = 0x81;
pub const RX_FRAME: u8 = 0x82;
pub const RX_ABORT: u8 = 0x83;
pub const INFO: u8 = 0x84;

/// `INFO` logical address byte when the transceiver holds none
const NO_LOGICAL_ADDRESS: u8 = 0xFF;

/// Command sent to the transceiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    Transmit(&'a [RawBlock]),
    SetAckMask(AddressSet),
    QueryInfo,
}

impl Request<'_> {
    /// Serialize into `output` (cleared first), ready for COBS encoding
    pub fn write_to(&self, output: &mut Vec<u8>) {
        output.clear();
        match self {
            Self::Transmit(blocks) => {
                output.reserve(1 + blocks.len() * 2);
                output.push(TX);
                for block in blocks.iter() {
                    output.extend_from_slice(&block.bits().to_be_bytes());
                }
            }
            Self::SetAckMask(mask) => {
                output.push(SET_ACK_MASK);
                output.extend_from_slice(&mask.mask().to_be_bytes());
            }
            Self::QueryInfo => output.push(QUERY_INFO),
        }
    }
}

/// Message received from the transceiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TxResult(BusResult),
    RxFrame(Vec<RawBlock>),
    RxAbort,
    Info(BusInfo),
}

/// Transceiver message the driver cannot make sense of
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    UnknownKind(u8),
    BadLength { kind: u8, len: usize },
    BadValue { kind: u8, value: u16 },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty message"),
            Self::UnknownKind(kind) => write!(f, "unknown message kind 0x{:02x}", kind),
            Self::BadLength { kind, len } => {
                write!(f, "message 0x{:02x} has bad payload length {}", kind, len)
            }
            Self::BadValue { kind, value } => {
                write!(f, "message 0x{:02x} carries bad value 0x{:x}", kind, value)
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl Event {
    /// Parse one decoded COBS message
    pub fn parse(message: &[u8]) -> Result<Self, ParseError> {
        let Some((&kind, payload)) = message.split_first() else {
            return Err(ParseError::Empty);
        };
        let bad_length = || ParseError::BadLength {
            kind,
            len: payload.len(),
        };

        match kind {
            TX_RESULT => match payload {
                [0] => Ok(Self::TxResult(BusResult::Acked)),
                [1] => Ok(Self::TxResult(BusResult::NotAcked)),
                [2] => Ok(Self::TxResult(BusResult::Failed)),
                [other] => Err(ParseError::BadValue {
                    kind,
                    value: *other as u16,
                }),
                _ => Err(bad_length()),
            },
            RX_FRAME => {
                if payload.is_empty() || payload.len() % 2 != 0 {
                    return Err(bad_length());
                }
                let blocks = payload
                    .chunks_exact(2)
                    .map(|pair| RawBlock::from_bits(u16::from_be_bytes([pair[0], pair[1]])))
                    .collect();
                Ok(Self::RxFrame(blocks))
            }
            RX_ABORT if payload.is_empty() => Ok(Self::RxAbort),
            RX_ABORT => Err(bad_length()),
            INFO => {
                let [hi, lo, logical] = payload else {
                    return Err(bad_length());
                };
                let raw = u16::from_be_bytes([*hi, *lo]);
                let physical_address =
                    PhysicalAddress::new(raw).map_err(|_| ParseError::BadValue { kind, value: raw })?;
                let logical_address = match *logical {
                    NO_LOGICAL_ADDRESS => None,
                    n => Some(LogicalAddress::new(n).map_err(|_| ParseError::BadValue {
                        kind,
                        value: n as u16,
                    })?),
                };
                Ok(Self::Info(BusInfo {
                    physical_address,
                    logical_address,
                }))
            }
            other => Err(ParseError::UnknownKind(other)),
        }
    }
}
