//! Command-line interface definition using clap
//!
//! Provides structured argument parsing with automatic help generation.

use clap::{Parser, Subcommand};
use hdmi_cec_driver::LogicalAddress;
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// Watch and drive an HDMI-CEC bus
#[derive(Parser, Debug)]
#[command(name = "cec-monitor")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: cec.toml in the working directory)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Serial port of the transceiver (overrides config)
    #[arg(long, value_name = "PORT", conflicts_with = "virtual_bus")]
    pub port: Option<String>,

    /// Use an in-process simulated bus instead of a transceiver
    #[arg(long = "virtual")]
    pub virtual_bus: bool,

    /// Enable verbose debug output
    #[arg(short, long)]
    pub verbose: bool,

    /// Print one JSON object per line instead of text
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Print packets seen on the bus until Ctrl-C
    Monitor {
        /// Claim logical address 0 (TV) first
        #[arg(long)]
        claim: bool,

        /// Show packets for every destination
        #[arg(long)]
        promiscuous: bool,
    },

    /// Transmit one packet, e.g. `send 0f:36`
    Send {
        /// Packet bytes in hex, header first (`[dest:4][src:4]`)
        hex: String,

        /// Queue the packet and wait for the outcome callback
        #[arg(long = "async")]
        asynchronous: bool,
    },

    /// Probe whether a logical address is held by some device
    Poll {
        /// Logical address, hex nibble (0-e)
        #[arg(value_parser = parse_logical_address)]
        address: LogicalAddress,
    },

    /// Print the physical and logical addresses of this host
    Info,
}

/// Parse `4`, `e` or `0x4` into a logical address
pub fn parse_logical_address(text: &str) -> Result<LogicalAddress, String> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    let value = u8::from_str_radix(digits, 16).map_err(|e| format!("{}: {}", text, e))?;
    LogicalAddress::new(value).map_err(|e| e.to_string())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_monitor_defaults() {
        let cli = Cli::parse_from(["cec-monitor", "monitor"]);
        assert!(!cli.verbose);
        assert!(!cli.json);
        assert!(!cli.virtual_bus);
        assert_eq!(
            cli.command,
            Command::Monitor {
                claim: false,
                promiscuous: false
            }
        );
    }

    #[test]
    fn test_cli_parse_global_flags() {
        let cli = Cli::parse_from(["cec-monitor", "-v", "--json", "--virtual", "info"]);
        assert!(cli.verbose);
        assert!(cli.json);
        assert!(cli.virtual_bus);
        assert_eq!(cli.command, Command::Info);
    }

    #[test]
    fn test_cli_parse_port() {
        let cli = Cli::parse_from(["cec-monitor", "--port", "/dev/ttyACM0", "info"]);
        assert_eq!(cli.port, Some("/dev/ttyACM0".to_string()));
    }

    #[test]
    fn test_cli_port_conflicts_with_virtual() {
        assert!(Cli::try_parse_from(["cec-monitor", "--port", "COM3", "--virtual", "info"]).is_err());
    }

    #[test]
    fn test_cli_parse_send_async() {
        let cli = Cli::parse_from(["cec-monitor", "send", "0f:36", "--async"]);
        assert_eq!(
            cli.command,
            Command::Send {
                hex: "0f:36".to_string(),
                asynchronous: true
            }
        );
    }

    #[test]
    fn test_cli_parse_poll() {
        let cli = Cli::parse_from(["cec-monitor", "poll", "0x4"]);
        assert_eq!(
            cli.command,
            Command::Poll {
                address: LogicalAddress::new(4).unwrap()
            }
        );
        assert!(Cli::try_parse_from(["cec-monitor", "poll", "zz"]).is_err());
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["cec-monitor"]).is_err());
    }

    #[test]
    fn test_parse_logical_address_range() {
        assert_eq!(parse_logical_address("e").unwrap().value(), 0xE);
        assert!(parse_logical_address("10").is_err());
    }
}
