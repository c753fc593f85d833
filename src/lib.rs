//! HDMI-CEC bus driver core
//!
//! Lets a host claim logical addresses on a CEC bus and exchange raw
//! packets with other devices through a pluggable transceiver adapter.
//!
//! - `Session` - open/close, callbacks, address claims, transmit
//! - `codec` - packet <-> 10-bit line blocks
//! - `adapter` - transceivers: serial (COBS framed) and an in-process bus
//!
//! # Example
//!
//! ```ignore
//! use hdmi_cec_driver::{CecPacket, LogicalAddress, Session, SessionConfig, VirtualBus};
//!
//! let bus = VirtualBus::new();
//! let session = Session::open(Arc::new(bus.tap()), SessionConfig::default())?;
//! session.add_logical_address(LogicalAddress::TV)?;
//! session.transmit(&CecPacket::from_hex("0f:36")?)?;
//! ```

pub mod adapter;
pub mod address;
mod callback;
pub mod codec;
pub mod config;
pub mod constants;
mod dispatch;
pub mod error;
pub mod logging;
pub mod packet;
pub mod session;
pub mod stats;
pub mod transmit;

pub use adapter::{BusAdapter, BusInfo, BusResult, FrameSink, SerialAdapter, VirtualAdapter, VirtualBus};
pub use address::{AddressSet, DeviceRole, DeviceType};
pub use callback::{RxCallback, TxCallback};
pub use error::{CecError, Result, Status};
pub use packet::{CecPacket, LogicalAddress, PhysicalAddress};
pub use session::{Session, SessionConfig, SessionHandle};
pub use stats::StatsSnapshot;
pub use transmit::TxOutcome;
