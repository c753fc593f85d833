//! Frame codec between packets and bus blocks
//!
//! Separates framing concerns from the bus:
//! - **Codec**: how a packet becomes blocks with EOM/ACK bits (this module)
//! - **Adapter**: how blocks reach the wire (see `adapter`)
//!
//! Each block on the line is 10 bits: 8 data bits, EOM, ACK (CEC 6.1).
//! The caller-facing header is `[dest:4][src:4]`; the header block on the
//! line is `[initiator:4][destination:4]`, so the codec swaps the nibbles.

pub mod cobs;

use crate::constants::MAX_FRAME_BLOCKS;
use crate::packet::CecPacket;
use std::fmt;
use tracing::debug;

// =============================================================================
// Raw block
// =============================================================================

/// One bus block packed as `[data:8][eom:1][ack:1]` in the low 10 bits
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawBlock(u16);

impl RawBlock {
    const EOM_BIT: u16 = 0b10;
    const ACK_BIT: u16 = 0b01;

    pub fn new(data: u8, eom: bool, ack: bool) -> Self {
        let mut bits = (data as u16) << 2;
        if eom {
            bits |= Self::EOM_BIT;
        }
        if ack {
            bits |= Self::ACK_BIT;
        }
        Self(bits)
    }

    /// Rebuild from the packed form; bits above the tenth are ignored
    pub fn from_bits(bits: u16) -> Self {
        Self(bits & 0x03FF)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn data(self) -> u8 {
        (self.0 >> 2) as u8
    }

    pub fn eom(self) -> bool {
        self.0 & Self::EOM_BIT != 0
    }

    /// ACK bit as seen on the line (low = acknowledged for directed frames)
    pub fn ack(self) -> bool {
        self.0 & Self::ACK_BIT != 0
    }

    pub fn with_ack(self, ack: bool) -> Self {
        Self::new(self.data(), self.eom(), ack)
    }
}

impl fmt::Debug for RawBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}{}{}",
            self.data(),
            if self.eom() { "E" } else { "-" },
            if self.ack() { "1" } else { "0" }
        )
    }
}

/// Reason a block sequence does not form a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// No blocks at all
    Empty,
    /// Last block lacks EOM
    Truncated,
    /// EOM before the last block
    EarlyEom { at: usize },
    /// More blocks than a frame may carry
    TooLong { blocks: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "no blocks"),
            Self::Truncated => write!(f, "frame ends without EOM"),
            Self::EarlyEom { at } => write!(f, "EOM on block {} before end of frame", at),
            Self::TooLong { blocks } => {
                write!(f, "{} blocks exceed the maximum of {}", blocks, MAX_FRAME_BLOCKS)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Swap the header nibbles between caller layout and line layout
fn swap_header(byte: u8) -> u8 {
    byte.rotate_left(4)
}

/// Encode a packet into line blocks
///
/// Clears `output`. EOM is set on the last block only. The initiator
/// leaves every ACK bit high; followers pull it low.
pub fn encode(packet: &CecPacket, output: &mut Vec<RawBlock>) {
    output.clear();
    output.reserve(packet.len());

    let last = packet.len() - 1;
    for (idx, &byte) in packet.as_bytes().iter().enumerate() {
        let data = if idx == 0 { swap_header(byte) } else { byte };
        output.push(RawBlock::new(data, idx == last, true));
    }
}

/// Decode one complete frame, stripping EOM and ACK bits
pub fn decode(blocks: &[RawBlock]) -> Result<CecPacket, DecodeError> {
    let Some(last) = blocks.last() else {
        return Err(DecodeError::Empty);
    };
    if blocks.len() > MAX_FRAME_BLOCKS {
        return Err(DecodeError::TooLong {
            blocks: blocks.len(),
        });
    }
    if let Some(at) = blocks[..blocks.len() - 1].iter().position(|b| b.eom()) {
        return Err(DecodeError::EarlyEom { at });
    }
    if !last.eom() {
        return Err(DecodeError::Truncated);
    }

    let mut data = Vec::with_capacity(blocks.len());
    for (idx, block) in blocks.iter().enumerate() {
        let byte = block.data();
        data.push(if idx == 0 { swap_header(byte) } else { byte });
    }

    // Length was checked above, from_bytes cannot fail here
    CecPacket::from_bytes(&data).map_err(|_| DecodeError::Empty)
}

// =============================================================================
// Streaming assembler
// =============================================================================

/// Accumulates inbound blocks until EOM and yields complete packets
///
/// Blocks may arrive split across any number of `decode` calls.
/// Malformed frames are dropped and counted, never surfaced as errors.
pub struct BlockAssembler {
    pending: Vec<RawBlock>,
    /// Set after an oversized frame until its EOM block goes by
    discarding: bool,
    dropped: u64,
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(MAX_FRAME_BLOCKS),
            discarding: false,
            dropped: 0,
        }
    }

    /// Feed blocks, calling `on_packet` for each complete packet
    pub fn decode(&mut self, blocks: &[RawBlock], mut on_packet: impl FnMut(CecPacket)) {
        for &block in blocks {
            if self.discarding {
                if block.eom() {
                    self.discarding = false;
                }
                continue;
            }

            self.pending.push(block);

            if block.eom() {
                match decode(&self.pending) {
                    Ok(packet) => on_packet(packet),
                    Err(e) => self.drop_pending(e),
                }
                self.pending.clear();
            } else if self.pending.len() >= MAX_FRAME_BLOCKS {
                self.drop_pending(DecodeError::TooLong {
                    blocks: self.pending.len() + 1,
                });
                self.pending.clear();
                self.discarding = true;
            }
        }
    }

    /// Drop a partially assembled frame (line error, start bit lost)
    pub fn abort(&mut self) {
        if !self.pending.is_empty() {
            self.drop_pending(DecodeError::Truncated);
            self.pending.clear();
        }
        self.discarding = false;
    }

    /// Frames dropped as malformed since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.discarding
    }

    fn drop_pending(&mut self, reason: DecodeError) {
        self.dropped += 1;
        debug!("Dropping malformed frame {:?}: {}", self.pending, reason);
    }
}

impl Default for BlockAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::LogicalAddress;
    use proptest::prelude::*;

    fn blocks_of(bytes: &[u8]) -> Vec<RawBlock> {
        let mut out = Vec::new();
        encode(&CecPacket::from_bytes(bytes).unwrap(), &mut out);
        out
    }

    #[test]
    fn test_raw_block_bits() {
        let block = RawBlock::new(0xA5, true, false);
        assert_eq!(block.bits(), 0b10_1001_0110);
        assert_eq!(block.data(), 0xA5);
        assert!(block.eom());
        assert!(!block.ack());
        assert_eq!(RawBlock::from_bits(0xFFFF).bits(), 0x03FF);
    }

    #[test]
    fn test_encode_sets_eom_on_last_block_only() {
        let blocks = blocks_of(&[0x40, 0x04]);
        assert_eq!(blocks.len(), 2);
        assert!(!blocks[0].eom());
        assert!(blocks[1].eom());
        assert!(blocks.iter().all(|b| b.ack()));
    }

    #[test]
    fn test_encode_puts_initiator_first_on_the_line() {
        // dest 0 (TV), src 4 (playback 1)
        let blocks = blocks_of(&[0x04, 0x36]);
        assert_eq!(blocks[0].data(), 0x40);
        assert_eq!(blocks[1].data(), 0x36);
    }

    #[test]
    fn test_encode_poll_is_single_eom_block() {
        let mut out = Vec::new();
        encode(&CecPacket::poll(LogicalAddress::TV), &mut out);
        assert_eq!(out, vec![RawBlock::new(0x00, true, true)]);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(decode(&[]), Err(DecodeError::Empty));
        assert_eq!(
            decode(&[RawBlock::new(0x40, false, false)]),
            Err(DecodeError::Truncated)
        );
        assert_eq!(
            decode(&[RawBlock::new(0x40, true, false), RawBlock::new(0x36, true, false)]),
            Err(DecodeError::EarlyEom { at: 0 })
        );
        let long: Vec<_> = (0..17).map(|i| RawBlock::new(0, i == 16, false)).collect();
        assert_eq!(decode(&long), Err(DecodeError::TooLong { blocks: 17 }));
    }

    #[test]
    fn test_decode_ignores_ack_bits() {
        let blocks = [RawBlock::new(0x4F, false, false), RawBlock::new(0x36, true, true)];
        let packet = decode(&blocks).unwrap();
        assert_eq!(packet.as_bytes(), &[0xF4, 0x36]);
    }

    #[test]
    fn test_assembler_joins_split_frames() {
        let blocks = blocks_of(&[0xF4, 0x82, 0x10, 0x00]);
        let mut assembler = BlockAssembler::new();
        let mut packets = Vec::new();

        assembler.decode(&blocks[..1], |p| packets.push(p));
        assert!(packets.is_empty());
        assert!(assembler.has_pending());

        assembler.decode(&blocks[1..], |p| packets.push(p));
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].as_bytes(), &[0xF4, 0x82, 0x10, 0x00]);
        assert!(!assembler.has_pending());
    }

    #[test]
    fn test_assembler_emits_back_to_back_frames() {
        let mut blocks = blocks_of(&[0xF4, 0x36]);
        blocks.extend(blocks_of(&[0x04]));
        let mut assembler = BlockAssembler::new();
        let mut packets = Vec::new();

        assembler.decode(&blocks, |p| packets.push(p));

        assert_eq!(packets.len(), 2);
        assert!(packets[1].is_poll());
    }

    #[test]
    fn test_assembler_discards_oversized_frame() {
        let mut blocks: Vec<_> = (0..20).map(|i| RawBlock::new(0x4F, i == 19, false)).collect();
        blocks.extend(blocks_of(&[0xF4, 0x36]));
        let mut assembler = BlockAssembler::new();
        let mut packets = Vec::new();

        assembler.decode(&blocks, |p| packets.push(p));

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].as_bytes(), &[0xF4, 0x36]);
        assert_eq!(assembler.dropped(), 1);
    }

    #[test]
    fn test_assembler_abort_drops_truncated_frame() {
        let blocks = blocks_of(&[0xF4, 0x82, 0x10, 0x00]);
        let mut assembler = BlockAssembler::new();
        let mut packets = Vec::new();

        assembler.decode(&blocks[..2], |p| packets.push(p));
        assembler.abort();
        assembler.decode(&blocks_of(&[0xF4, 0x36]), |p| packets.push(p));

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].as_bytes(), &[0xF4, 0x36]);
        assert_eq!(assembler.dropped(), 1);
    }

    proptest! {
        #[test]
        fn prop_encode_then_decode_reproduces_packet(
            dest in 0u8..16,
            src in 0u8..16,
            opcode in proptest::option::of(any::<u8>()),
            operands in proptest::collection::vec(any::<u8>(), 0..=14),
        ) {
            let operands = if opcode.is_some() { operands } else { Vec::new() };
            let packet = CecPacket::new(
                LogicalAddress::new(dest).unwrap(),
                LogicalAddress::new(src).unwrap(),
                opcode,
                &operands,
            ).unwrap();

            let mut blocks = Vec::new();
            encode(&packet, &mut blocks);
            let decoded = decode(&blocks).unwrap();

            prop_assert_eq!(decoded.destination(), packet.destination());
            prop_assert_eq!(decoded.source(), packet.source());
            prop_assert_eq!(decoded.opcode(), packet.opcode());
            prop_assert_eq!(decoded.operands(), packet.operands());
            prop_assert_eq!(decoded.as_bytes(), packet.as_bytes());
        }
    }
}
