//! Transmit engine
//!
//! Serializes outgoing packets onto the bus. Per request:
//! `Idle -> Arbitrating -> {Acknowledged | NotAcknowledged | Failed} -> Idle`.
//! Arbitration and retransmission happen in the transceiver; the engine
//! sequences requests and classifies results.
//!
//! Only one request may be in flight per session. A second request issued
//! before the first's outcome is known is rejected with `InvalidState`.
//!
//! Asynchronous requests run on a dedicated worker thread:
//! - Caller: validates, takes the in-flight slot, queues the job
//! - Worker: sends, frees the slot, then reports to the transmit callback

use crate::adapter::{BusAdapter, BusResult};
use crate::callback::{CallbackSlot, TxCallback};
use crate::codec;
use crate::error::{CecError, Result, Status};
use crate::packet::CecPacket;
use crate::session::SessionHandle;
use crate::stats::Stats;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outcome of one transmit attempt; never retried by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxOutcome {
    Acknowledged,
    NotAcknowledged,
    Failed,
}

impl TxOutcome {
    pub fn status(self) -> Status {
        match self {
            Self::Acknowledged => Status::SentAndAcked,
            Self::NotAcknowledged => Status::SentButNotAcked,
            Self::Failed => Status::SentFailed,
        }
    }
}

impl From<BusResult> for TxOutcome {
    fn from(result: BusResult) -> Self {
        match result {
            BusResult::Acked => Self::Acknowledged,
            BusResult::NotAcked => Self::NotAcknowledged,
            BusResult::Failed => Self::Failed,
        }
    }
}

/// Holds the single in-flight slot; frees it on drop
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CecError::InvalidState {
                reason: "a transmit is already in flight",
            })?;
        Ok(Self(flag.clone()))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Encode, send and classify; shared by caller and worker threads
#[derive(Clone)]
struct BusLink {
    adapter: Arc<dyn BusAdapter>,
    stats: Arc<Stats>,
}

impl BusLink {
    fn send(&self, packet: &CecPacket) -> Result<TxOutcome> {
        let mut blocks = Vec::with_capacity(packet.len());
        codec::encode(packet, &mut blocks);

        let outcome = TxOutcome::from(self.adapter.send(&blocks)?);
        self.stats.add_tx(outcome);
        debug!("TX {} -> {:?}", packet, outcome);
        Ok(outcome)
    }
}

struct Job {
    packet: CecPacket,
    slot: InFlight,
}

struct Worker {
    jobs: mpsc::Sender<Job>,
    thread: JoinHandle<()>,
}

pub(crate) struct TransmitEngine {
    link: BusLink,
    in_flight: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
}

impl TransmitEngine {
    /// Create the engine and start its worker thread
    pub fn start(
        handle: SessionHandle,
        adapter: Arc<dyn BusAdapter>,
        stats: Arc<Stats>,
        tx_callback: Arc<CallbackSlot<TxCallback>>,
    ) -> Result<Self> {
        let link = BusLink { adapter, stats };
        // One job at a time, the in-flight slot guarantees the rest
        let (jobs, mut job_rx) = mpsc::channel::<Job>(1);

        let worker_link = link.clone();
        let thread = thread::Builder::new()
            .name(format!("cec-tx-{}", handle))
            .spawn(move || {
                while let Some(job) = job_rx.blocking_recv() {
                    let outcome = match worker_link.send(&job.packet) {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!("Async transmit of {} failed: {}", job.packet, e);
                            worker_link.stats.add_tx(TxOutcome::Failed);
                            TxOutcome::Failed
                        }
                    };
                    // Free the slot first so the callback may transmit again
                    drop(job.slot);
                    if !tx_callback.invoke(|cb| cb(handle, outcome)) {
                        debug!("No transmit callback, dropping outcome {:?}", outcome);
                    }
                }
            })
            .map_err(|e| CecError::Runtime { source: e })?;

        Ok(Self {
            link,
            in_flight: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(Some(Worker { jobs, thread })),
        })
    }

    /// Send and block until the line result is known
    pub fn transmit(&self, packet: &CecPacket) -> Result<TxOutcome> {
        let _slot = InFlight::acquire(&self.in_flight)?;
        self.link.send(packet)
    }

    /// Queue the send and return; the outcome goes to the transmit callback
    pub fn transmit_async(&self, packet: &CecPacket) -> Result<()> {
        let slot = InFlight::acquire(&self.in_flight)?;
        let worker = self.worker.lock();
        let Some(worker) = worker.as_ref() else {
            return Err(CecError::InvalidState {
                reason: "transmit engine stopped",
            });
        };
        worker
            .jobs
            .try_send(Job {
                packet: packet.clone(),
                slot,
            })
            .map_err(|_| CecError::InvalidState {
                reason: "transmit engine stopped",
            })
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Stop the worker after it finishes a queued job
    ///
    /// Joins the worker unless called from the worker itself (a transmit
    /// callback closing its own session).
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        drop(worker.jobs);
        if worker.thread.thread().id() == thread::current().id() {
            return;
        }
        if worker.thread.join().is_err() {
            warn!("Transmit worker panicked");
        }
    }
}

impl Drop for TransmitEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
