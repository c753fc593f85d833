//! Serial adapter for USB CEC transceivers
//!
//! Uses blocking threads, like any low-latency serial link:
//! - Reader thread: reads the port, splits COBS frames, parses events
//! - Dispatch thread: hands inbound frames to the attached sink
//!
//! Replies (`TX_RESULT`, `INFO`) are handed from the reader to the waiting
//! caller through a reply slot. Inbound frames take a separate thread so a
//! receive callback can transmit without blocking the reader that must
//! deliver its reply. The reader never waits on the frame queue: when the
//! dispatch side falls behind, inbound frames are dropped and counted.
//!
//! The reader stops when:
//! - the adapter is dropped
//! - the port disconnects (detected via consecutive empty reads)
//! - a read error occurs

use super::protocol::{Event, Request};
use super::{BusAdapter, BusInfo, BusResult, FrameSink};
use crate::address::AddressSet;
use crate::codec::cobs::{self, CobsStream};
use crate::codec::RawBlock;
use crate::constants::{
    CHANNEL_CAPACITY, DEFAULT_BAUD_RATE, DEFAULT_REPLY_TIMEOUT_MS, SERIAL_BUFFER_SIZE,
    SERIAL_DISCONNECT_THRESHOLD, SERIAL_READ_TIMEOUT_MS,
};
use crate::error::{CecError, Result};
use parking_lot::{Condvar, Mutex};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

// =============================================================================
// Reply slot
// =============================================================================

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

/// One-shot handoff of a reply from the reader thread to a waiting caller
struct ReplySlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> ReplySlot<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Forget a stale reply before issuing a new request
    fn clear(&self) {
        self.state.lock().value = None;
    }

    fn put(&self, value: T) {
        self.state.lock().value = Some(value);
        self.ready.notify_all();
    }

    /// Wake every waiter with `AdapterDisconnected`
    fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    fn wait(&self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.value.take() {
                return Ok(value);
            }
            if state.closed {
                return Err(CecError::AdapterDisconnected);
            }
            if self.ready.wait_until(&mut state, deadline).timed_out() {
                return state.value.take().ok_or(CecError::AdapterTimeout {
                    waited_ms: timeout.as_millis() as u64,
                });
            }
        }
    }
}

// =============================================================================
// Shared link state
// =============================================================================

/// State shared between the adapter and its reader thread
struct Link {
    tx_result: ReplySlot<BusResult>,
    info: ReplySlot<BusInfo>,
    sink: Mutex<Option<Arc<dyn FrameSink>>>,
    /// Inbound frames lost to a full dispatch queue
    dropped_frames: AtomicU64,
}

impl Link {
    fn new() -> Self {
        Self {
            tx_result: ReplySlot::new(),
            info: ReplySlot::new(),
            sink: Mutex::new(None),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Route one parsed event; inbound frames go to `inbound`
    ///
    /// Returns false once the dispatch side is gone.
    fn route(&self, event: Event, inbound: &mpsc::Sender<Event>) -> bool {
        match event {
            Event::TxResult(result) => {
                self.tx_result.put(result);
                true
            }
            Event::Info(info) => {
                self.info.put(info);
                true
            }
            frame @ (Event::RxFrame(_) | Event::RxAbort) => match inbound.try_send(frame) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!("Receive queue full, dropped inbound frame ({} so far)", dropped);
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            },
        }
    }

    fn disconnect(&self) {
        self.tx_result.close();
        self.info.close();
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Serial CEC transceiver
///
/// # Example
///
/// ```ignore
/// // Auto-detect a transceiver by USB IDs
/// let port = SerialAdapter::detect(0x2341, &[0x8036])?;
/// let adapter = SerialAdapter::open(&port, DEFAULT_BAUD_RATE, Duration::from_secs(2))?;
/// let session = Session::open(Arc::new(adapter), SessionConfig::default())?;
/// ```
pub struct SerialAdapter {
    port_name: String,
    reply_timeout: Duration,
    writer: Mutex<Box<dyn SerialPort>>,
    /// Serializes request/reply exchanges
    exchange: Mutex<()>,
    link: Arc<Link>,
    attached: AtomicBool,
    shutdown: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SerialAdapter {
    /// Detect a transceiver by USB vendor and product IDs
    ///
    /// # Errors
    ///
    /// - `NoDeviceFound` - No matching device found
    /// - `MultipleDevicesFound` - More than one matching device found
    pub fn detect(vid: u16, pid_list: &[u16]) -> Result<String> {
        let ports = serialport::available_ports().unwrap_or_default();

        let matching: Vec<_> = ports
            .iter()
            .filter(|p| usb_ids(p).is_some_and(|ids| matches_ids(ids, vid, pid_list)))
            .collect();

        match matching.len() {
            0 => Err(CecError::NoDeviceFound),
            1 => Ok(matching[0].port_name.clone()),
            n => Err(CecError::MultipleDevicesFound { count: n }),
        }
    }

    /// Open the port and start the reader and dispatch threads
    pub fn open(port_name: &str, baud_rate: u32, reply_timeout: Duration) -> Result<Self> {
        let map_err = |e: serialport::Error| CecError::SerialOpen {
            port: port_name.to_string(),
            source: std::io::Error::other(e.to_string()),
        };

        let writer = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(SERIAL_READ_TIMEOUT_MS))
            .open()
            .map_err(map_err)?;
        let reader = writer.try_clone().map_err(map_err)?;

        let link = Arc::new(Link::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let (inbound_tx, inbound_rx) = mpsc::channel::<Event>(CHANNEL_CAPACITY);

        let reader_thread = {
            let link = link.clone();
            let shutdown = shutdown.clone();
            let name = port_name.to_string();
            thread::Builder::new()
                .name("cec-serial-rx".into())
                .spawn(move || run_reader(reader, &name, &link, &inbound_tx, &shutdown))
                .map_err(|e| CecError::Runtime { source: e })?
        };
        let dispatch_thread = {
            let link = link.clone();
            thread::Builder::new()
                .name("cec-serial-dispatch".into())
                .spawn(move || run_dispatch(inbound_rx, &link))
                .map_err(|e| CecError::Runtime { source: e })?
        };

        info!("Opened CEC transceiver on {}", port_name);
        Ok(Self {
            port_name: port_name.to_string(),
            reply_timeout,
            writer: Mutex::new(writer),
            exchange: Mutex::new(()),
            link,
            attached: AtomicBool::new(false),
            shutdown,
            threads: Mutex::new(vec![reader_thread, dispatch_thread]),
        })
    }

    /// Open with the default baud rate and reply timeout
    pub fn open_default(port_name: &str) -> Result<Self> {
        Self::open(
            port_name,
            DEFAULT_BAUD_RATE,
            Duration::from_millis(DEFAULT_REPLY_TIMEOUT_MS),
        )
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn write(&self, request: Request<'_>) -> Result<()> {
        let mut payload = Vec::new();
        request.write_to(&mut payload);
        let mut frame = Vec::new();
        cobs::encode_into(&payload, &mut frame).map_err(|e| CecError::AdapterProtocol {
            message: e.to_string(),
        })?;

        let mut port = self.writer.lock();
        port.write_all(&frame)
            .and_then(|_| port.flush())
            .map_err(|e| CecError::SerialIo { source: e })
    }
}

impl BusAdapter for SerialAdapter {
    fn attach(&self, sink: Arc<dyn FrameSink>) -> Result<BusInfo> {
        if self
            .attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CecError::InvalidState {
                reason: "adapter already attached",
            });
        }

        let info = {
            let _exchange = self.exchange.lock();
            self.link.info.clear();
            self.write(Request::QueryInfo)
                .and_then(|_| self.link.info.wait(self.reply_timeout))
        };
        match info {
            Ok(info) => {
                *self.link.sink.lock() = Some(sink);
                debug!(
                    "Transceiver on {} reports {} / {:?}",
                    self.port_name, info.physical_address, info.logical_address
                );
                Ok(info)
            }
            Err(e) => {
                self.attached.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn detach(&self) {
        *self.link.sink.lock() = None;
        if let Err(e) = self.write(Request::SetAckMask(AddressSet::EMPTY)) {
            warn!("Failed to clear ack mask on detach: {}", e);
        }
        self.attached.store(false, Ordering::Release);
    }

    fn send(&self, blocks: &[RawBlock]) -> Result<BusResult> {
        let _exchange = self.exchange.lock();
        self.link.tx_result.clear();
        self.write(Request::Transmit(blocks))?;
        self.link.tx_result.wait(self.reply_timeout)
    }

    fn set_ack_mask(&self, mask: AddressSet) -> Result<()> {
        trace!("Ack mask {:?}", mask);
        self.write(Request::SetAckMask(mask))
    }
}

impl Drop for SerialAdapter {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let current = thread::current().id();
        for handle in self.threads.lock().drain(..) {
            // Dropped from a receive callback: the dispatch thread ends on its own
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("Serial thread panicked");
            }
        }
    }
}

fn usb_ids(port: &SerialPortInfo) -> Option<(u16, u16)> {
    match &port.port_type {
        SerialPortType::UsbPort(usb) => Some((usb.vid, usb.pid)),
        _ => None,
    }
}

fn matches_ids((vid, pid): (u16, u16), want_vid: u16, pid_list: &[u16]) -> bool {
    vid == want_vid && (pid_list.is_empty() || pid_list.contains(&pid))
}

fn run_reader(
    mut port: Box<dyn SerialPort>,
    port_name: &str,
    link: &Link,
    inbound: &mpsc::Sender<Event>,
    shutdown: &AtomicBool,
) {
    let mut buf = [0u8; SERIAL_BUFFER_SIZE];
    let mut stream = CobsStream::new();
    let mut consecutive_errors = 0u32;

    'read: while !shutdown.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(n) if n > 0 => {
                consecutive_errors = 0;
                let mut open = true;
                stream.feed(&buf[..n], |message| {
                    let parsed = message
                        .map_err(|e| e.to_string())
                        .and_then(|m| Event::parse(&m).map_err(|e| e.to_string()));
                    match parsed {
                        Ok(event) => open &= link.route(event, inbound),
                        Err(e) => warn!("Dropped transceiver message: {}", e),
                    }
                });
                if !open {
                    break 'read;
                }
            }
            Ok(_) => {
                // Zero bytes read - could be normal or port gone
                consecutive_errors += 1;
                if consecutive_errors > SERIAL_DISCONNECT_THRESHOLD {
                    break;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                consecutive_errors = 0;
            }
            Err(e) => {
                warn!("Serial read on {} failed: {}", port_name, e);
                break;
            }
        }
    }

    link.disconnect();
    if !shutdown.load(Ordering::Relaxed) {
        warn!("CEC transceiver on {} disconnected", port_name);
    }
    // Dispatch ends when `inbound` is dropped with this thread
}

fn run_dispatch(mut inbound: mpsc::Receiver<Event>, link: &Link) {
    while let Some(event) = inbound.blocking_recv() {
        let Some(sink) = link.sink.lock().clone() else {
            continue;
        };
        match event {
            Event::RxFrame(blocks) => sink.on_raw_frame(&blocks),
            Event::RxAbort => sink.on_frame_aborted(),
            _ => {}
        }
    }
}
