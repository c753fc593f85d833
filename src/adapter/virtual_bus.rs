//! In-process CEC bus
//!
//! A `VirtualBus` is a shared line; each `VirtualAdapter` tap is one
//! transceiver on it. Frames sent by one tap are delivered to every other
//! attached tap on the sender's thread, after the bus lock is released.
//!
//! Directed frames are acknowledged when another tap's ack mask, or a
//! simulated remote device, covers the destination. Broadcasts are always
//! acknowledged. The bus also offers test controls: injected frames,
//! aborted frames, forced failures and paused sends.

use super::{BusAdapter, BusInfo, BusResult, FrameSink};
use crate::address::AddressSet;
use crate::codec::{self, RawBlock};
use crate::constants::BROADCAST_ADDRESS;
use crate::error::{CecError, Result};
use crate::packet::{CecPacket, LogicalAddress, PhysicalAddress};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Default)]
struct Tap {
    sink: Option<Arc<dyn FrameSink>>,
    ack_mask: AddressSet,
}

#[derive(Default)]
struct BusState {
    physical_address: PhysicalAddress,
    source_address: Option<LogicalAddress>,
    taps: Vec<Tap>,
    /// Addresses acknowledged by devices outside the process
    remote: AddressSet,
    fail_next: usize,
    paused: bool,
    sent: Vec<Vec<RawBlock>>,
}

impl BusState {
    /// Sinks attached to taps other than `except`
    fn sinks_except(&self, except: Option<usize>) -> Vec<Arc<dyn FrameSink>> {
        self.taps
            .iter()
            .enumerate()
            .filter(|(id, _)| Some(*id) != except)
            .filter_map(|(_, tap)| tap.sink.clone())
            .collect()
    }

    fn is_acknowledged(&self, sender: usize, destination: u8) -> bool {
        if destination == BROADCAST_ADDRESS {
            return true;
        }
        let address = LogicalAddress::from_nibble(destination);
        self.remote.contains(address)
            || self
                .taps
                .iter()
                .enumerate()
                .any(|(id, tap)| id != sender && tap.ack_mask.contains(address))
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<BusState>,
    resumed: Condvar,
}

/// Shared in-process bus; clones refer to the same line
#[derive(Clone, Default)]
pub struct VirtualBus {
    shared: Arc<Shared>,
}

impl VirtualBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus whose taps report `physical_address` on attach
    pub fn with_physical_address(physical_address: PhysicalAddress) -> Self {
        let bus = Self::new();
        bus.shared.state.lock().physical_address = physical_address;
        bus
    }

    /// Logical address the taps report as discovered (source hosts)
    pub fn set_source_address(&self, address: Option<LogicalAddress>) {
        self.shared.state.lock().source_address = address;
    }

    /// New transceiver on this bus
    pub fn tap(&self) -> VirtualAdapter {
        let mut state = self.shared.state.lock();
        state.taps.push(Tap::default());
        VirtualAdapter {
            shared: self.shared.clone(),
            id: state.taps.len() - 1,
        }
    }

    /// Simulate a device outside the process that owns `address`
    pub fn add_remote_device(&self, address: LogicalAddress) {
        self.shared.state.lock().remote.insert(address);
    }

    pub fn remove_remote_device(&self, address: LogicalAddress) {
        self.shared.state.lock().remote.remove(address);
    }

    /// Deliver raw blocks from a remote device to every attached tap
    pub fn inject(&self, blocks: &[RawBlock]) {
        let sinks = self.shared.state.lock().sinks_except(None);
        for sink in sinks {
            sink.on_raw_frame(blocks);
        }
    }

    /// Encode and deliver a packet from a remote device
    pub fn inject_packet(&self, packet: &CecPacket) {
        let mut blocks = Vec::new();
        codec::encode(packet, &mut blocks);
        self.inject(&blocks);
    }

    /// Tell every attached tap the current frame was lost
    pub fn abort(&self) {
        let sinks = self.shared.state.lock().sinks_except(None);
        for sink in sinks {
            sink.on_frame_aborted();
        }
    }

    /// The next `count` sends fail as if arbitration was lost
    pub fn fail_next_sends(&self, count: usize) {
        self.shared.state.lock().fail_next = count;
    }

    /// Hold every send until [`VirtualBus::resume_sends`]
    pub fn pause_sends(&self) {
        self.shared.state.lock().paused = true;
    }

    pub fn resume_sends(&self) {
        self.shared.state.lock().paused = false;
        self.shared.resumed.notify_all();
    }

    /// Frames that reached the line, oldest first, as packets
    pub fn sent_packets(&self) -> Vec<CecPacket> {
        self.shared
            .state
            .lock()
            .sent
            .iter()
            .filter_map(|blocks| codec::decode(blocks).ok())
            .collect()
    }

    /// Ack mask currently published by every tap, merged
    pub fn ack_mask(&self) -> AddressSet {
        let state = self.shared.state.lock();
        AddressSet::from_mask(state.taps.iter().fold(0, |acc, tap| acc | tap.ack_mask.mask()))
    }
}

/// One transceiver attached to a [`VirtualBus`]
pub struct VirtualAdapter {
    shared: Arc<Shared>,
    id: usize,
}

impl BusAdapter for VirtualAdapter {
    fn attach(&self, sink: Arc<dyn FrameSink>) -> Result<BusInfo> {
        let mut state = self.shared.state.lock();
        let physical_address = state.physical_address;
        let logical_address = state.source_address;
        let tap = &mut state.taps[self.id];
        if tap.sink.is_some() {
            return Err(CecError::InvalidState {
                reason: "adapter already attached",
            });
        }
        tap.sink = Some(sink);
        debug!("Virtual tap {} attached", self.id);

        Ok(BusInfo {
            physical_address,
            logical_address,
        })
    }

    fn detach(&self) {
        let mut state = self.shared.state.lock();
        let tap = &mut state.taps[self.id];
        tap.sink = None;
        tap.ack_mask = AddressSet::EMPTY;
        debug!("Virtual tap {} detached", self.id);
    }

    fn send(&self, blocks: &[RawBlock]) -> Result<BusResult> {
        let Some(header) = blocks.first() else {
            return Err(CecError::invalid_argument("empty frame"));
        };

        let (result, sinks) = {
            let mut state = self.shared.state.lock();
            while state.paused {
                self.shared.resumed.wait(&mut state);
            }

            if state.fail_next > 0 {
                state.fail_next -= 1;
                trace!("Virtual tap {} send forced to fail", self.id);
                return Ok(BusResult::Failed);
            }

            state.sent.push(blocks.to_vec());
            // Line header is [initiator:4][destination:4]
            let result = if state.is_acknowledged(self.id, header.data() & 0x0F) {
                BusResult::Acked
            } else {
                BusResult::NotAcked
            };
            (result, state.sinks_except(Some(self.id)))
        };

        for sink in sinks {
            sink.on_raw_frame(blocks);
        }
        Ok(result)
    }

    fn set_ack_mask(&self, mask: AddressSet) -> Result<()> {
        self.shared.state.lock().taps[self.id].ack_mask = mask;
        trace!("Virtual tap {} ack mask {:?}", self.id, mask);
        Ok(())
    }
}
