//! Logical address ownership
//!
//! Sink hosts claim addresses by POLLing them: a POLL nobody acknowledges
//! means the address is free. Source hosts get their address from the
//! transceiver's own discovery and only report it.
//!
//! The claimed set is shared lock-free with the receive dispatcher, which
//! filters on it from the adapter's thread. A source host's discovered
//! address is held in it too, so directed frames reach the host.

use crate::adapter::{BusAdapter, BusInfo};
use crate::constants::SINK_CLAIMABLE_ADDRESS;
use crate::error::{CecError, Result};
use crate::packet::{CecPacket, LogicalAddress, PhysicalAddress};
use crate::transmit::{TransmitEngine, TxOutcome};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

// =============================================================================
// Address set
// =============================================================================

/// Set of logical addresses as a 16-bit mask
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AddressSet(u16);

impl AddressSet {
    pub const EMPTY: Self = Self(0);

    pub const fn from_mask(mask: u16) -> Self {
        Self(mask)
    }

    pub const fn mask(self) -> u16 {
        self.0
    }

    pub fn contains(self, address: LogicalAddress) -> bool {
        self.0 & bit(address) != 0
    }

    pub fn insert(&mut self, address: LogicalAddress) {
        self.0 |= bit(address);
    }

    pub fn remove(&mut self, address: LogicalAddress) {
        self.0 &= !bit(address);
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Addresses in `self` but not in `other`
    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Addresses in ascending order
    pub fn iter(self) -> impl Iterator<Item = LogicalAddress> {
        (0u8..16)
            .filter(move |n| self.0 & (1 << n) != 0)
            .map(LogicalAddress::from_nibble)
    }
}

fn bit(address: LogicalAddress) -> u16 {
    1 << address.value()
}

impl FromIterator<LogicalAddress> for AddressSet {
    fn from_iter<I: IntoIterator<Item = LogicalAddress>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for address in iter {
            set.insert(address);
        }
        set
    }
}

impl fmt::Debug for AddressSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Claimed set shared between the address manager and the dispatcher
#[derive(Clone, Default)]
pub(crate) struct ClaimedAddresses(Arc<AtomicU16>);

impl ClaimedAddresses {
    pub fn get(&self) -> AddressSet {
        AddressSet(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, set: AddressSet) {
        self.0.store(set.0, Ordering::Release);
    }

    pub fn insert(&self, address: LogicalAddress) {
        self.0.fetch_or(bit(address), Ordering::AcqRel);
    }

    pub fn remove(&self, address: LogicalAddress) {
        self.0.fetch_and(!bit(address), Ordering::AcqRel);
    }
}

// =============================================================================
// Roles and device types
// =============================================================================

/// Whether the host claims its own addresses or reports discovered ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    /// Display side (TV); claims address 0 by POLL
    #[default]
    Sink,
    /// Player, tuner, recorder...; the transceiver discovers the address
    Source,
}

/// CEC device type (CEC 11.2 `[Device Type]` operand)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DeviceType {
    Tv = 0,
    RecordingDevice = 1,
    Tuner = 3,
    PlaybackDevice = 4,
    AudioSystem = 5,
    PureCecSwitch = 6,
    VideoProcessor = 7,
}

impl TryFrom<u8> for DeviceType {
    type Error = CecError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Tv),
            1 => Ok(Self::RecordingDevice),
            3 => Ok(Self::Tuner),
            4 => Ok(Self::PlaybackDevice),
            5 => Ok(Self::AudioSystem),
            6 => Ok(Self::PureCecSwitch),
            7 => Ok(Self::VideoProcessor),
            _ => Err(CecError::invalid_argument(format!(
                "unknown device type {}",
                value
            ))),
        }
    }
}

// =============================================================================
// Address manager
// =============================================================================

pub(crate) struct AddressManager {
    role: DeviceRole,
    claimed: ClaimedAddresses,
    physical: PhysicalAddress,
    /// Source role only, always in 0x1..=0xE
    discovered: Option<LogicalAddress>,
    adapter: Arc<dyn BusAdapter>,
    engine: Arc<TransmitEngine>,
    /// Held for the duration of a claim, release or replace
    busy: Mutex<()>,
}

impl AddressManager {
    /// Fails with `LogicalAddressUnavailable` for a source host whose
    /// transceiver found no usable address.
    pub fn new(
        role: DeviceRole,
        info: BusInfo,
        claimed: ClaimedAddresses,
        adapter: Arc<dyn BusAdapter>,
        engine: Arc<TransmitEngine>,
    ) -> Result<Self> {
        let discovered = match role {
            DeviceRole::Sink => None,
            DeviceRole::Source => match info.logical_address {
                Some(address) if (0x01..0x0F).contains(&address.value()) => Some(address),
                other => {
                    return Err(CecError::LogicalAddressUnavailable {
                        address: other.map_or(0x0F, LogicalAddress::value),
                    })
                }
            },
        };

        let manager = Self {
            role,
            claimed,
            physical: info.physical_address,
            discovered,
            adapter,
            engine,
            busy: Mutex::new(()),
        };
        if let Some(address) = manager.discovered {
            manager.claimed.insert(address);
            manager.publish()?;
            info!("Answering to discovered logical address {}", address);
        }
        Ok(manager)
    }

    /// Claim `address` by POLL; only the sink claimable slot is accepted
    pub fn add(&self, address: LogicalAddress) -> Result<()> {
        self.require_sink()?;
        if address.value() != SINK_CLAIMABLE_ADDRESS {
            return Err(CecError::invalid_argument(format!(
                "only logical address {:X} can be added, got {}",
                SINK_CLAIMABLE_ADDRESS, address
            )));
        }
        let _busy = self.enter()?;

        if self.claimed.get().contains(address) {
            return Ok(());
        }
        self.claim(address)
    }

    /// Release `address`; releasing an address not held succeeds
    pub fn remove(&self, address: LogicalAddress) -> Result<()> {
        self.require_sink()?;
        let _busy = self.enter()?;

        if !self.claimed.get().contains(address) {
            return Ok(());
        }
        self.claimed.remove(address);
        info!("Released logical address {}", address);
        self.publish()
    }

    /// Replace the claimed set, all or nothing
    ///
    /// Addresses not yet held are claimed one by one; if any claim fails the
    /// ones claimed in this batch are released and the previous set restored.
    pub fn replace_all(&self, addresses: &[LogicalAddress]) -> Result<()> {
        self.require_sink()?;
        if let Some(bad) = addresses.iter().find(|a| a.is_broadcast()) {
            return Err(CecError::invalid_argument(format!(
                "logical address {} cannot be claimed",
                bad
            )));
        }
        let _busy = self.enter()?;

        let before = self.claimed.get();
        let target: AddressSet = addresses.iter().copied().collect();

        for address in target.difference(before).iter() {
            if let Err(e) = self.claim(address) {
                warn!(
                    "Claim of {} failed ({}), rolling back to {:?}",
                    address, e, before
                );
                self.claimed.set(before);
                if let Err(publish_err) = self.publish() {
                    warn!("Failed to restore ack mask: {}", publish_err);
                }
                return Err(e);
            }
        }

        self.claimed.set(target);
        info!("Logical addresses set to {:?}", target);
        self.publish()
    }

    /// Address the host answers to for `device_type`
    ///
    /// Sink: the claimed address, or 0xF when none is held.
    /// Source: the address discovered by the transceiver.
    ///
    /// `Tv` is the only type a sink host can be, and the one type a source
    /// host cannot; any other pairing is `InvalidArgument`.
    pub fn logical_address(&self, device_type: DeviceType) -> Result<LogicalAddress> {
        match (self.role, device_type) {
            (DeviceRole::Sink, DeviceType::Tv) => Ok(self
                .claimed
                .get()
                .iter()
                .next()
                .unwrap_or(LogicalAddress::UNREGISTERED)),
            (DeviceRole::Source, ty) if ty != DeviceType::Tv => {
                Ok(self.discovered.unwrap_or(LogicalAddress::UNREGISTERED))
            }
            (role, ty) => Err(CecError::invalid_argument(format!(
                "a {:?} host has no {:?} address",
                role, ty
            ))),
        }
    }

    pub fn physical_address(&self) -> PhysicalAddress {
        self.physical
    }

    /// Whether the host may put `source` in a header it sends
    pub fn may_originate(&self, source: LogicalAddress) -> bool {
        source == LogicalAddress::UNREGISTERED
            || self.claimed.get().contains(source)
            || self.discovered == Some(source)
    }

    /// Drop every claim; used on close, never fails
    pub fn release_all(&self) {
        let _busy = self.busy.lock();
        let held = self.claimed.get();
        if held.is_empty() {
            return;
        }
        self.claimed.set(AddressSet::EMPTY);
        info!("Released logical addresses {:?}", held);
        if let Err(e) = self.publish() {
            warn!("Failed to clear ack mask on release: {}", e);
        }
    }

    fn claim(&self, address: LogicalAddress) -> Result<()> {
        let outcome = self.engine.transmit(&CecPacket::poll(address))?;
        match outcome {
            TxOutcome::NotAcknowledged => {
                self.claimed.insert(address);
                if let Err(e) = self.publish() {
                    self.claimed.remove(address);
                    return Err(e);
                }
                info!("Claimed logical address {}", address);
                Ok(())
            }
            TxOutcome::Acknowledged => {
                info!("Logical address {} is taken", address);
                Err(CecError::LogicalAddressUnavailable {
                    address: address.value(),
                })
            }
            TxOutcome::Failed => Err(CecError::SendFailed),
        }
    }

    fn publish(&self) -> Result<()> {
        self.adapter.set_ack_mask(self.claimed.get())
    }

    fn require_sink(&self) -> Result<()> {
        match self.role {
            DeviceRole::Sink => Ok(()),
            DeviceRole::Source => Err(CecError::invalid_argument(
                "source devices do not manage logical addresses",
            )),
        }
    }

    fn enter(&self) -> Result<parking_lot::MutexGuard<'_, ()>> {
        self.busy.try_lock().ok_or(CecError::InvalidState {
            reason: "another address operation is in progress",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn la(n: u8) -> LogicalAddress {
        LogicalAddress::new(n).unwrap()
    }

    #[test]
    fn test_address_set_basics() {
        let mut set = AddressSet::EMPTY;
        assert!(set.is_empty());

        set.insert(la(0));
        set.insert(la(4));
        assert!(set.contains(la(0)));
        assert!(!set.contains(la(1)));
        assert_eq!(set.len(), 2);
        assert_eq!(set.mask(), 0b1_0001);

        set.remove(la(0));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![la(4)]);
    }

    #[test]
    fn test_address_set_difference() {
        let a: AddressSet = [la(0), la(1), la(4)].into_iter().collect();
        let b: AddressSet = [la(1)].into_iter().collect();
        assert_eq!(a.difference(b).iter().collect::<Vec<_>>(), vec![la(0), la(4)]);
    }

    #[test]
    fn test_claimed_addresses_shared() {
        let claimed = ClaimedAddresses::default();
        let view = claimed.clone();
        claimed.insert(la(0));
        assert!(view.get().contains(la(0)));
        claimed.remove(la(0));
        assert!(view.get().is_empty());
    }

    #[test]
    fn test_device_type_parse() {
        assert_eq!(DeviceType::try_from(0).unwrap(), DeviceType::Tv);
        assert_eq!(DeviceType::try_from(4).unwrap(), DeviceType::PlaybackDevice);
        assert!(DeviceType::try_from(2).is_err());
        assert!(DeviceType::try_from(8).is_err());
    }

    proptest! {
        #[test]
        fn prop_iter_matches_membership(mask in any::<u16>()) {
            let set = AddressSet::from_mask(mask);
            let rebuilt: AddressSet = set.iter().collect();
            prop_assert_eq!(rebuilt, set);
            prop_assert_eq!(set.iter().count(), set.len());
        }
    }
}
