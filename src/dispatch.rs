//! Receive dispatcher
//!
//! Turns inbound adapter blocks into packets and hands them to the receive
//! callback. Runs on whatever thread the adapter delivers from.
//!
//! A packet is delivered when its destination is:
//! - the broadcast address, or
//! - one of the session's own addresses (claimed, or discovered for a
//!   source host), or
//! - anything at all, for a promiscuous session
//!
//! Malformed frames are bus noise: dropped, counted, never reported.

use crate::adapter::FrameSink;
use crate::address::ClaimedAddresses;
use crate::callback::{CallbackSlot, RxCallback};
use crate::codec::{BlockAssembler, RawBlock};
use crate::packet::CecPacket;
use crate::session::SessionHandle;
use crate::stats::Stats;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

pub(crate) struct Dispatcher {
    handle: SessionHandle,
    claimed: ClaimedAddresses,
    promiscuous: bool,
    /// Cleared when the session starts closing
    active: AtomicBool,
    assembler: Mutex<BlockAssembler>,
    rx_callback: Arc<CallbackSlot<RxCallback>>,
    stats: Arc<Stats>,
}

impl Dispatcher {
    pub fn new(
        handle: SessionHandle,
        claimed: ClaimedAddresses,
        promiscuous: bool,
        rx_callback: Arc<CallbackSlot<RxCallback>>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            handle,
            claimed,
            promiscuous,
            active: AtomicBool::new(true),
            assembler: Mutex::new(BlockAssembler::new()),
            rx_callback,
            stats,
        }
    }

    /// Stop delivering; later frames are dropped
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn accepts(&self, packet: &CecPacket) -> bool {
        self.promiscuous
            || packet.is_broadcast()
            || self.claimed.get().contains(packet.destination())
    }

    fn deliver(&self, packet: CecPacket) {
        self.stats.add_rx_frame();

        if !self.accepts(&packet) {
            self.stats.add_rx_filtered();
            trace!("RX {} not for us", packet);
            return;
        }

        debug!("RX {}", packet);
        // Checked again under the slot lock: close may have started meanwhile
        let handle = self.handle;
        let active = &self.active;
        let mut called = false;
        self.rx_callback.invoke(|cb| {
            if active.load(Ordering::Acquire) {
                cb(handle, &packet);
                called = true;
            }
        });
        if called {
            self.stats.add_rx_delivered();
        }
    }
}

impl FrameSink for Dispatcher {
    fn on_raw_frame(&self, blocks: &[RawBlock]) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }

        // Assemble under the lock, deliver outside it
        let mut complete = Vec::new();
        let dropped = {
            let mut assembler = self.assembler.lock();
            assembler.decode(blocks, |packet| complete.push(packet));
            assembler.dropped()
        };
        self.stats.set_rx_malformed(dropped);

        for packet in complete {
            self.deliver(packet);
        }
    }

    fn on_frame_aborted(&self) {
        let mut assembler = self.assembler.lock();
        assembler.abort();
        self.stats.set_rx_malformed(assembler.dropped());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::packet::LogicalAddress;
    use std::num::NonZeroU32;

    struct Fixture {
        dispatcher: Dispatcher,
        claimed: ClaimedAddresses,
        received: Arc<Mutex<Vec<CecPacket>>>,
        stats: Arc<Stats>,
    }

    fn fixture(promiscuous: bool) -> Fixture {
        let claimed = ClaimedAddresses::default();
        let slot: Arc<CallbackSlot<RxCallback>> = Arc::new(CallbackSlot::new());
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        slot.replace(Some(Box::new(move |_, packet: &CecPacket| {
            sink.lock().push(packet.clone());
        })))
        .unwrap();
        let stats = Arc::new(Stats::new());
        let dispatcher = Dispatcher::new(
            SessionHandle::from_raw(NonZeroU32::new(1).unwrap()),
            claimed.clone(),
            promiscuous,
            slot,
            stats.clone(),
        );
        Fixture {
            dispatcher,
            claimed,
            received,
            stats,
        }
    }

    fn line(bytes: &[u8]) -> Vec<RawBlock> {
        let mut blocks = Vec::new();
        codec::encode(&CecPacket::from_bytes(bytes).unwrap(), &mut blocks);
        blocks
    }

    #[test]
    fn test_broadcast_is_delivered() {
        let f = fixture(false);
        f.dispatcher.on_raw_frame(&line(&[0xF4, 0x82, 0x10, 0x00]));

        let received = f.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].as_bytes(), &[0xF4, 0x82, 0x10, 0x00]);
    }

    #[test]
    fn test_unclaimed_destination_is_filtered() {
        let f = fixture(false);
        f.dispatcher.on_raw_frame(&line(&[0x04, 0x8F]));

        assert!(f.received.lock().is_empty());
        assert_eq!(f.stats.snapshot().rx_filtered, 1);
    }

    #[test]
    fn test_claimed_destination_is_delivered() {
        let f = fixture(false);
        f.claimed.insert(LogicalAddress::TV);
        f.dispatcher.on_raw_frame(&line(&[0x04, 0x8F]));

        assert_eq!(f.received.lock().len(), 1);
    }

    #[test]
    fn test_released_destination_stops_delivery() {
        let f = fixture(false);
        f.claimed.insert(LogicalAddress::TV);
        f.dispatcher.on_raw_frame(&line(&[0x04, 0x8F]));
        f.claimed.remove(LogicalAddress::TV);
        f.dispatcher.on_raw_frame(&line(&[0x04, 0x8F]));

        assert_eq!(f.received.lock().len(), 1);
    }

    #[test]
    fn test_promiscuous_sees_everything() {
        let f = fixture(true);
        f.dispatcher.on_raw_frame(&line(&[0x54, 0x8F]));
        f.dispatcher.on_raw_frame(&line(&[0x04, 0x8F]));

        assert_eq!(f.received.lock().len(), 2);
    }

    #[test]
    fn test_malformed_frames_are_dropped_silently() {
        let f = fixture(true);
        let oversized: Vec<_> = (0..18).map(|i| RawBlock::new(0x4F, i == 17, true)).collect();
        f.dispatcher.on_raw_frame(&oversized);
        f.dispatcher.on_raw_frame(&line(&[0xF4, 0x82, 0x10, 0x00])[..2]);
        f.dispatcher.on_frame_aborted();
        f.dispatcher.on_raw_frame(&line(&[0xF4, 0x36]));

        let received = f.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].as_bytes(), &[0xF4, 0x36]);
        assert_eq!(f.stats.snapshot().rx_malformed, 2);
    }

    #[test]
    fn test_deactivated_dispatcher_delivers_nothing() {
        let f = fixture(true);
        f.dispatcher.deactivate();
        f.dispatcher.on_raw_frame(&line(&[0xF4, 0x36]));

        assert!(f.received.lock().is_empty());
    }
}
