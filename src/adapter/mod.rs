//! Bus transceiver abstraction
//!
//! Separates line access from protocol logic:
//! - **Adapter**: how blocks reach the CEC line (serial transceiver, virtual bus)
//! - **Codec**: how packets become blocks (handled separately)
//!
//! Each adapter manages its own execution model internally:
//! - Serial: blocking reader and dispatch threads
//! - Virtual: frames are delivered on the sender's thread
//!
//! # Adding a new adapter
//!
//! 1. Create `adapter/my_adapter.rs`
//! 2. Implement the `BusAdapter` trait
//! 3. Add `pub mod my_adapter;` here

pub mod protocol;
pub mod serial;
pub mod virtual_bus;

pub use serial::SerialAdapter;
pub use virtual_bus::{VirtualAdapter, VirtualBus};

use crate::address::AddressSet;
use crate::codec::RawBlock;
use crate::error::Result;
use crate::packet::{LogicalAddress, PhysicalAddress};
use std::sync::Arc;

/// Line-level result of one send, as judged by the transceiver
///
/// The transceiver already accounts for the inverted ACK meaning of
/// broadcast frames: `Acked` on a broadcast means no follower rejected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusResult {
    Acked,
    NotAcked,
    /// Arbitration lost, line error, or retransmissions exhausted
    Failed,
}

/// What the transceiver learned when it connected to the line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusInfo {
    /// Physical address read from the sink's EDID (0.0.0.0 if unknown)
    pub physical_address: PhysicalAddress,
    /// Logical address claimed by the transceiver itself (source devices)
    pub logical_address: Option<LogicalAddress>,
}

/// Receiver of inbound blocks
///
/// Called by the adapter whenever blocks arrive. Blocks of one frame may be
/// split across calls; the sink reassembles up to the EOM block.
pub trait FrameSink: Send + Sync {
    fn on_raw_frame(&self, blocks: &[RawBlock]);

    /// The transceiver lost the current frame (bad start bit, line error)
    fn on_frame_aborted(&self) {}
}

/// Trait for CEC bus transceivers
///
/// An adapter owns the line. It handles:
/// - Bit timing, arbitration and retransmission
/// - Acknowledging frames for the addresses in its ack mask
/// - Delivering inbound blocks to the attached sink
///
/// An adapter does NOT handle:
/// - EOM/ACK insertion or stripping (that's the codec's job)
/// - Address claiming or filtering (that's the session's job)
///
/// # Lifecycle
///
/// 1. `attach` a sink; returns addresses discovered on connect
/// 2. `send` blocks and `set_ack_mask` while attached
/// 3. `detach` stops delivery; the adapter may be attached again
pub trait BusAdapter: Send + Sync + 'static {
    /// Start delivering inbound frames to `sink`
    ///
    /// # Errors
    ///
    /// `InvalidState` if another sink is already attached, or a platform
    /// error if the line cannot be reached.
    fn attach(&self, sink: Arc<dyn FrameSink>) -> Result<BusInfo>;

    /// Stop delivering inbound frames
    fn detach(&self);

    /// Put one frame on the line and block until the line result is known
    fn send(&self, blocks: &[RawBlock]) -> Result<BusResult>;

    /// Logical addresses the transceiver must acknowledge as follower
    fn set_ack_mask(&self, mask: AddressSet) -> Result<()>;
}
