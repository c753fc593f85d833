//! Single-subscriber callback slots
//!
//! A slot holds at most one handler. Invocation runs under the slot lock, so
//! replacing the handler waits for a running invocation to return and no
//! invocation of the old handler can start after the swap.

use crate::error::{CecError, Result};
use crate::packet::CecPacket;
use crate::session::SessionHandle;
use crate::transmit::TxOutcome;
use parking_lot::Mutex;
use std::thread::{self, ThreadId};

/// Receive handler: called once per complete packet
pub type RxCallback = dyn FnMut(SessionHandle, &CecPacket) + Send;

/// Transmit handler: called once per asynchronous transmit
pub type TxCallback = dyn FnMut(SessionHandle, TxOutcome) + Send;

pub(crate) struct CallbackSlot<F: ?Sized> {
    handler: Mutex<Option<Box<F>>>,
    /// Thread currently running the handler, if any
    running_on: Mutex<Option<ThreadId>>,
}

impl<F: ?Sized> CallbackSlot<F> {
    pub fn new() -> Self {
        Self {
            handler: Mutex::new(None),
            running_on: Mutex::new(None),
        }
    }

    /// Swap in a new handler (or none), waiting out a running invocation
    ///
    /// Fails with `InvalidState` when called from inside the handler itself,
    /// which would otherwise deadlock.
    pub fn replace(&self, handler: Option<Box<F>>) -> Result<()> {
        if *self.running_on.lock() == Some(thread::current().id()) {
            return Err(CecError::InvalidState {
                reason: "callback replaced from inside its own invocation",
            });
        }
        let previous = std::mem::replace(&mut *self.handler.lock(), handler);
        drop(previous);
        Ok(())
    }

    /// Run `call` against the handler; returns false if none is registered
    pub fn invoke(&self, call: impl FnOnce(&mut F)) -> bool {
        let mut guard = self.handler.lock();
        let Some(handler) = guard.as_mut() else {
            return false;
        };
        *self.running_on.lock() = Some(thread::current().id());
        call(handler);
        *self.running_on.lock() = None;
        true
    }

    pub fn is_set(&self) -> bool {
        self.handler.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    type Counter = dyn FnMut(usize) + Send;

    #[test]
    fn test_invoke_without_handler() {
        let slot: CallbackSlot<Counter> = CallbackSlot::new();
        assert!(!slot.invoke(|h| h(1)));
        assert!(!slot.is_set());
    }

    #[test]
    fn test_replace_switches_handler() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let slot: CallbackSlot<Counter> = CallbackSlot::new();

        let f = first.clone();
        slot.replace(Some(Box::new(move |n| {
            f.fetch_add(n, Ordering::SeqCst);
        })))
        .unwrap();
        slot.invoke(|h| h(1));

        let s = second.clone();
        slot.replace(Some(Box::new(move |n| {
            s.fetch_add(n, Ordering::SeqCst);
        })))
        .unwrap();
        slot.invoke(|h| h(5));

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 5);

        slot.replace(None).unwrap();
        assert!(!slot.invoke(|h| h(1)));
    }

    #[test]
    fn test_replace_waits_for_running_invocation() {
        let slot: Arc<CallbackSlot<Counter>> = Arc::new(CallbackSlot::new());
        let finished = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = mpsc::channel();

        let done = finished.clone();
        slot.replace(Some(Box::new(move |_| {
            started_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(50));
            done.store(1, Ordering::SeqCst);
        })))
        .unwrap();

        let invoker = {
            let slot = slot.clone();
            std::thread::spawn(move || {
                slot.invoke(|h| h(0));
            })
        };

        started_rx.recv().unwrap();
        slot.replace(None).unwrap();
        // The old handler had to finish before replace returned
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        invoker.join().unwrap();
    }

    #[test]
    fn test_replace_from_inside_handler_is_rejected() {
        let slot: Arc<CallbackSlot<Counter>> = Arc::new(CallbackSlot::new());
        let rejected = Arc::new(AtomicUsize::new(0));

        let inner = slot.clone();
        let flag = rejected.clone();
        slot.replace(Some(Box::new(move |_| {
            if inner.replace(None).is_err() {
                flag.store(1, Ordering::SeqCst);
            }
        })))
        .unwrap();

        slot.invoke(|h| h(0));
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        assert!(slot.is_set());
    }
}
