//! cec-monitor - watch and drive an HDMI-CEC bus
//!
//! Usage:
//!   cec-monitor monitor [--claim] [--promiscuous]   Print packets until Ctrl-C
//!   cec-monitor send 0f:36 [--async]                Transmit one packet
//!   cec-monitor poll 4                              Probe a logical address
//!   cec-monitor info                                Print host addresses
//!
//! Global: --config FILE, --port PORT, --virtual, --verbose, --json

mod cli;

use clap::Parser;
use cli::{Cli, Command};
use hdmi_cec_driver::config::{self, AdapterKind, Config};
use hdmi_cec_driver::logging::{init_tracing, BusRecord};
use hdmi_cec_driver::{
    BusAdapter, CecError, CecPacket, DeviceRole, DeviceType, LogicalAddress, Result,
    SerialAdapter, Session, SessionConfig, TxOutcome, VirtualBus,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Playback device simulated on `--virtual` buses
const VIRTUAL_PLAYBACK: u8 = 0x4;

/// Address a `--virtual` bus reports as discovered for source hosts
const VIRTUAL_HOST_SOURCE: u8 = 0x8;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(config::default_path);
    let loaded = match config::read(&path) {
        Ok(loaded) => loaded,
        Err(e) => {
            init_tracing(cli.verbose);
            eprintln!("Error: {}", e);
            return ExitCode::from(e.status().code() as u8);
        }
    };

    // The file may turn on verbose logging
    let verbose = cli.verbose || loaded.as_ref().is_some_and(|c| c.logging.verbose);
    init_tracing(verbose);
    let config = loaded.unwrap_or_else(|| {
        warn!("Config {:?} not found, using defaults", path);
        Config::default()
    });

    let result = tokio::runtime::Runtime::new()
        .map_err(|e| CecError::Runtime { source: e })
        .and_then(|rt| rt.block_on(run(cli, config)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.status().code() as u8)
        }
    }
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let (adapter, bus) = open_adapter(&cli, &config)?;
    let json = cli.json;

    match cli.command {
        Command::Monitor { claim, promiscuous } => {
            let session_config = SessionConfig {
                promiscuous: promiscuous || config.session.promiscuous,
                ..config.session
            };
            let session = Session::open(adapter, session_config)?;
            run_monitor(&session, bus.as_ref(), claim, json).await
        }
        Command::Send { hex, asynchronous } => {
            let packet = CecPacket::from_hex(&hex)?;
            let session = Session::open(adapter, config.session)?;
            let outcome = if asynchronous {
                send_async(&session, &packet).await?
            } else {
                session.transmit(&packet)?
            };
            print_record(&BusRecord::transmitted(&packet, outcome), json);
            Ok(())
        }
        Command::Poll { address } => {
            let session = Session::open(adapter, config.session)?;
            // Probe as an unregistered device: no address needs to be held
            let probe = CecPacket::new(address, LogicalAddress::UNREGISTERED, None, &[])?;
            let outcome = session.transmit(&probe)?;
            let state = match outcome {
                TxOutcome::Acknowledged => "taken",
                TxOutcome::NotAcknowledged => "free",
                TxOutcome::Failed => "unknown (send failed)",
            };
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "address": address.value(), "state": state })
                );
            } else {
                println!("Logical address {}: {}", address, state);
            }
            Ok(())
        }
        Command::Info => {
            let session = Session::open(adapter, config.session)?;
            let device_type = match config.session.role {
                DeviceRole::Sink => DeviceType::Tv,
                DeviceRole::Source => DeviceType::PlaybackDevice,
            };
            let physical = session.physical_address()?;
            let logical = session.logical_address(device_type)?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "physical_address": physical.to_string(),
                        "logical_address": logical.value(),
                    })
                );
            } else {
                println!("Physical address: {}", physical);
                println!("Logical address:  {}", logical);
            }
            Ok(())
        }
    }
}

/// Build the adapter the command line and config ask for
///
/// Returns the bus too when it is virtual, so the monitor can feed it.
fn open_adapter(cli: &Cli, config: &Config) -> Result<(Arc<dyn BusAdapter>, Option<VirtualBus>)> {
    let kind = if cli.virtual_bus {
        AdapterKind::Virtual
    } else if cli.port.is_some() {
        AdapterKind::Serial
    } else {
        config.adapter.kind
    };

    match kind {
        AdapterKind::Virtual => {
            let bus = VirtualBus::new();
            bus.add_remote_device(LogicalAddress::from_nibble(VIRTUAL_PLAYBACK));
            bus.set_source_address(Some(LogicalAddress::from_nibble(VIRTUAL_HOST_SOURCE)));
            let adapter: Arc<dyn BusAdapter> = Arc::new(bus.tap());
            Ok((adapter, Some(bus)))
        }
        AdapterKind::Serial => {
            let port = match &cli.port {
                Some(port) => port.clone(),
                None => config.adapter.resolve_serial_port()?,
            };
            let adapter = SerialAdapter::open(
                &port,
                config.adapter.baud_rate,
                config.adapter.reply_timeout(),
            )?;
            let adapter: Arc<dyn BusAdapter> = Arc::new(adapter);
            Ok((adapter, None))
        }
    }
}

async fn run_monitor(
    session: &Session,
    bus: Option<&VirtualBus>,
    claim: bool,
    json: bool,
) -> Result<()> {
    session.set_rx_callback(move |_, packet| print_record(&BusRecord::received(packet), json))?;

    if claim {
        match session.add_logical_address(LogicalAddress::TV) {
            Ok(()) => info!("Claimed logical address {}", LogicalAddress::TV),
            Err(e) => eprintln!("Could not claim {}: {}", LogicalAddress::TV, e),
        }
    }

    if let Some(bus) = bus {
        // Report Physical Address from the simulated player
        let hello = CecPacket::new(
            LogicalAddress::BROADCAST,
            LogicalAddress::from_nibble(VIRTUAL_PLAYBACK),
            Some(0x84),
            &[0x10, 0x00, 0x04],
        )?;
        bus.inject_packet(&hello);
    }

    eprintln!("Monitoring, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CecError::Runtime { source: e })?;

    let stats = session.stats();
    session.close();
    eprintln!(
        "Received {} (delivered {}, filtered {}, malformed {}), sent {} acked / {} not acked / {} failed",
        stats.rx_frames,
        stats.rx_delivered,
        stats.rx_filtered,
        stats.rx_malformed,
        stats.tx_acked,
        stats.tx_not_acked,
        stats.tx_failed
    );
    Ok(())
}

async fn send_async(session: &Session, packet: &CecPacket) -> Result<TxOutcome> {
    let (tx, mut rx) = mpsc::channel(1);
    session.set_tx_callback(move |_, outcome| {
        let _ = tx.try_send(outcome);
    })?;
    session.transmit_async(packet)?;

    // Worst case the adapter gives up on its own reply timeout first
    match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
        Ok(Some(outcome)) => Ok(outcome),
        Ok(None) => Err(CecError::InvalidState {
            reason: "session closed before the outcome arrived",
        }),
        Err(_) => Err(CecError::AdapterTimeout { waited_ms: 10_000 }),
    }
}

fn print_record(record: &BusRecord, json: bool) {
    if json {
        println!("{}", record.to_json());
    } else {
        println!("{}", record);
    }
}
