//! Logging for driver tooling
//!
//! - `init_tracing` - installs the `tracing` subscriber for driver logs
//! - `BusRecord` - one observed packet, printable as text or a JSON line

use crate::packet::CecPacket;
use crate::transmit::TxOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Initialize tracing for driver debug output
///
/// Call early in main() before any logging occurs.
/// Set `verbose` to true for debug-level output. `RUST_LOG` is not read.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { "debug" } else { "warn" };

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_file(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(tracing_subscriber::EnvFilter::new(level))
        .try_init();
}

/// Which way a packet crossed the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rx,
    Tx,
}

/// One packet seen by the monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusRecord {
    pub timestamp: String, // HH:MM:SS.mmm
    pub direction: Direction,
    pub source: u8,
    pub destination: u8,
    pub opcode: Option<u8>,
    /// Whole packet, caller layout, `0f:36` style
    pub bytes: String,
    /// Transmit outcome, `None` for received packets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

impl BusRecord {
    /// Current timestamp as HH:MM:SS.mmm
    #[inline]
    fn now() -> String {
        chrono::Local::now().format("%H:%M:%S%.3f").to_string()
    }

    fn new(direction: Direction, packet: &CecPacket, outcome: Option<TxOutcome>) -> Self {
        Self {
            timestamp: Self::now(),
            direction,
            source: packet.source().value(),
            destination: packet.destination().value(),
            opcode: packet.opcode(),
            bytes: packet.to_string(),
            outcome: outcome.map(|o| o.status().to_string()),
        }
    }

    pub fn received(packet: &CecPacket) -> Self {
        Self::new(Direction::Rx, packet, None)
    }

    pub fn transmitted(packet: &CecPacket, outcome: TxOutcome) -> Self {
        Self::new(Direction::Tx, packet, Some(outcome))
    }

    /// Single-line JSON form
    pub fn to_json(&self) -> String {
        // Only strings and integers: serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl fmt::Display for BusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.direction {
            Direction::Rx => "<<",
            Direction::Tx => ">>",
        };
        write!(
            f,
            "{} {} {:X} -> {:X}  {}",
            self.timestamp, arrow, self.source, self.destination, self.bytes
        )?;
        if let Some(outcome) = &self.outcome {
            write!(f, "  ({})", outcome)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_received_record_fields() {
        let packet = CecPacket::from_bytes(&[0xF4, 0x82, 0x10, 0x00]).unwrap();
        let record = BusRecord::received(&packet);

        assert_eq!(record.direction, Direction::Rx);
        assert_eq!(record.source, 0x4);
        assert_eq!(record.destination, 0xF);
        assert_eq!(record.opcode, Some(0x82));
        assert_eq!(record.outcome, None);
        assert_eq!(record.timestamp.len(), "12:34:56.789".len());
    }

    #[test]
    fn test_transmitted_record_display() {
        let packet = CecPacket::from_bytes(&[0x00]).unwrap();
        let record = BusRecord::transmitted(&packet, TxOutcome::NotAcknowledged);
        let line = record.to_string();

        assert!(line.contains(">> 0 -> 0"));
        assert!(line.ends_with("(sent but not acknowledged)"));
    }

    #[test]
    fn test_json_line_roundtrip() {
        let packet = CecPacket::from_bytes(&[0x0F, 0x36]).unwrap();
        let record = BusRecord::transmitted(&packet, TxOutcome::Acknowledged);
        let json = record.to_json();

        assert!(!json.contains('\n'));
        assert!(json.contains("\"direction\":\"tx\""));
        let parsed: BusRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_json_omits_missing_outcome() {
        let packet = CecPacket::from_bytes(&[0xF4, 0x36]).unwrap();
        let json = BusRecord::received(&packet).to_json();
        assert!(!json.contains("outcome"));
    }
}
