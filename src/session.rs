//! Driver session - one client's access point to the bus
//!
//! The session handles:
//! - Open/close lifecycle and the adapter attachment
//! - The single receive and transmit callback pair
//! - Coordinating address manager, transmit engine and dispatcher
//!
//! The session does NOT handle:
//! - Line timing or arbitration (that's the adapter's job)
//! - Opcode meaning (callers build and parse packets themselves)
//!
//! Operations on one session are not meant to be issued concurrently from
//! several threads; the session rejects overlapping transmits and address
//! operations with `InvalidState` instead of queueing them.

use crate::adapter::BusAdapter;
use crate::address::{AddressManager, ClaimedAddresses, DeviceRole, DeviceType};
use crate::callback::{CallbackSlot, RxCallback, TxCallback};
use crate::dispatch::Dispatcher;
use crate::error::{CecError, Result};
use crate::packet::{CecPacket, LogicalAddress, PhysicalAddress};
use crate::stats::{Stats, StatsSnapshot};
use crate::transmit::{TransmitEngine, TxOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Opaque non-zero session identifier passed to callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(NonZeroU32);

impl SessionHandle {
    fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        loop {
            // Zero only shows up after wrap-around; skip it
            if let Some(id) = NonZeroU32::new(NEXT.fetch_add(1, Ordering::Relaxed)) {
                return Self(id);
            }
        }
    }

    pub(crate) fn from_raw(id: NonZeroU32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a session presents itself on the bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sink hosts claim addresses; source hosts report discovered ones
    pub role: DeviceRole,
    /// Deliver every frame on the bus, whatever its destination
    pub promiscuous: bool,
}

/// An open connection to one CEC bus
///
/// # Example
///
/// ```ignore
/// let bus = VirtualBus::new();
/// let session = Session::open(Arc::new(bus.tap()), SessionConfig::default())?;
/// session.set_rx_callback(|_, packet| println!("RX {}", packet))?;
/// session.add_logical_address(LogicalAddress::TV)?;
/// let outcome = session.transmit(&CecPacket::from_hex("04:8f")?)?;
/// session.close();
/// ```
pub struct Session {
    handle: SessionHandle,
    open: AtomicBool,
    adapter: Arc<dyn BusAdapter>,
    addresses: AddressManager,
    engine: Arc<TransmitEngine>,
    dispatcher: Arc<Dispatcher>,
    rx_callback: Arc<CallbackSlot<RxCallback>>,
    tx_callback: Arc<CallbackSlot<TxCallback>>,
    stats: Arc<Stats>,
}

impl Session {
    /// Attach to the adapter and start the transmit worker
    ///
    /// The session starts with no claimed address, no callbacks, and the
    /// physical address the adapter discovered on connect.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the adapter already serves another session
    /// - `LogicalAddressUnavailable` for a source host without a discovered address
    /// - platform errors from the adapter
    pub fn open(adapter: Arc<dyn BusAdapter>, config: SessionConfig) -> Result<Self> {
        let handle = SessionHandle::next();
        let stats = Arc::new(Stats::new());
        let claimed = ClaimedAddresses::default();
        let rx_callback: Arc<CallbackSlot<RxCallback>> = Arc::new(CallbackSlot::new());
        let tx_callback: Arc<CallbackSlot<TxCallback>> = Arc::new(CallbackSlot::new());

        let dispatcher = Arc::new(Dispatcher::new(
            handle,
            claimed.clone(),
            config.promiscuous,
            rx_callback.clone(),
            stats.clone(),
        ));
        let engine = Arc::new(TransmitEngine::start(
            handle,
            adapter.clone(),
            stats.clone(),
            tx_callback.clone(),
        )?);

        let info = adapter.attach(dispatcher.clone())?;
        let addresses =
            match AddressManager::new(config.role, info, claimed, adapter.clone(), engine.clone()) {
                Ok(addresses) => addresses,
                Err(e) => {
                    dispatcher.deactivate();
                    adapter.detach();
                    return Err(e);
                }
            };

        info!(
            "Session {} open ({:?}, physical address {})",
            handle, config.role, info.physical_address
        );

        Ok(Self {
            handle,
            open: AtomicBool::new(true),
            adapter,
            addresses,
            engine,
            dispatcher,
            rx_callback,
            tx_callback,
            stats,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Release every claimed address, drop both callbacks, detach
    ///
    /// Never fails and may be called any number of times. Waits for a running
    /// callback and for a queued asynchronous transmit to finish.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }

        self.dispatcher.deactivate();
        self.addresses.release_all();

        if let Err(e) = self.rx_callback.replace(None) {
            warn!("Receive callback left registered: {}", e);
        }
        if let Err(e) = self.tx_callback.replace(None) {
            warn!("Transmit callback left registered: {}", e);
        }

        self.engine.shutdown();
        self.adapter.detach();
        info!("Session {} closed", self.handle);
    }

    /// Register the receive handler, replacing any previous one
    ///
    /// Blocks while the previous handler is running. Calling this from inside
    /// the receive handler fails with `InvalidState`.
    pub fn set_rx_callback<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(SessionHandle, &CecPacket) + Send + 'static,
    {
        self.ensure_open()?;
        self.rx_callback.replace(Some(Box::new(callback)))
    }

    /// Disable packet delivery
    pub fn clear_rx_callback(&self) -> Result<()> {
        self.ensure_open()?;
        self.rx_callback.replace(None)
    }

    /// Register the handler for asynchronous transmit outcomes
    ///
    /// Same blocking rules as [`Session::set_rx_callback`].
    pub fn set_tx_callback<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(SessionHandle, TxOutcome) + Send + 'static,
    {
        self.ensure_open()?;
        self.tx_callback.replace(Some(Box::new(callback)))
    }

    /// Drop asynchronous transmit outcomes from now on
    pub fn clear_tx_callback(&self) -> Result<()> {
        self.ensure_open()?;
        self.tx_callback.replace(None)
    }

    /// Claim a logical address for a sink host by POLLing it
    ///
    /// Blocks for the POLL round-trip. Only address 0 may be added.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for any other address, or on a source host
    /// - `LogicalAddressUnavailable` if another device acknowledged the POLL
    /// - `SendFailed` if the POLL could not be sent
    pub fn add_logical_address(&self, address: LogicalAddress) -> Result<()> {
        self.ensure_open()?;
        self.addresses.add(address)
    }

    /// Release a logical address; releasing one not held also succeeds
    pub fn remove_logical_address(&self, address: LogicalAddress) -> Result<()> {
        self.ensure_open()?;
        self.addresses.remove(address)
    }

    /// Replace the whole claimed set, all or nothing; empty clears it
    #[deprecated(note = "races with other devices claiming addresses; use add_logical_address")]
    pub fn set_logical_addresses(&self, addresses: &[LogicalAddress]) -> Result<()> {
        self.ensure_open()?;
        self.addresses.replace_all(addresses)
    }

    /// Logical address for `device_type`
    ///
    /// Sink hosts get 0xF until an address is claimed. Source hosts get the
    /// address the transceiver discovered, always within 0x1..=0xE.
    /// Asking a sink for anything but `Tv`, or a source for `Tv`, is
    /// `InvalidArgument`.
    pub fn logical_address(&self, device_type: DeviceType) -> Result<LogicalAddress> {
        self.ensure_open()?;
        self.addresses.logical_address(device_type)
    }

    /// Physical address cached when the adapter connected
    pub fn physical_address(&self) -> Result<PhysicalAddress> {
        self.ensure_open()?;
        Ok(self.addresses.physical_address())
    }

    /// Send a packet and wait for the line result
    pub fn transmit(&self, packet: &CecPacket) -> Result<TxOutcome> {
        self.check_transmit(packet)?;
        self.engine.transmit(packet)
    }

    /// Queue a packet; the outcome is reported to the transmit callback
    ///
    /// Without a registered transmit callback the outcome is dropped.
    pub fn transmit_async(&self, packet: &CecPacket) -> Result<()> {
        self.check_transmit(packet)?;
        if !self.tx_callback.is_set() {
            debug!("No transmit callback, outcome of {} will be dropped", packet);
        }
        self.engine.transmit_async(packet)
    }

    /// Whether a transmit is waiting for its line result
    pub fn is_transmitting(&self) -> bool {
        self.engine.is_busy()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn check_transmit(&self, packet: &CecPacket) -> Result<()> {
        self.ensure_open()?;
        if !self.addresses.may_originate(packet.source()) {
            return Err(CecError::invalid_argument(format!(
                "source address {} is not held by this host",
                packet.source()
            )));
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CecError::InvalidState {
                reason: "session is closed",
            })
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("open", &self.is_open())
            .finish()
    }
}
