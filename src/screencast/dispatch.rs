//! Deferred encode dispatch
//!
//! A staged video frame is encoded later, when the platform signals that the
//! GPU work queued before it has completed. The registry holds the single
//! pending dispatch and serialises dispatch execution against teardown.

use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Identifies one deferred encode dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchToken(NonZeroU64);

impl DispatchToken {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

type DeferredCall = Box<dyn FnOnce() + Send>;

struct Slot {
    last_id: u64,
    pending: Option<(DispatchToken, DeferredCall)>,
}

/// Holds at most one pending dispatch
pub struct DeferredCallRegistry {
    /// Held while a dispatch runs and for the whole of a guarded section
    dispatch: Mutex<()>,
    slot: Mutex<Slot>,
}

impl Default for DeferredCallRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredCallRegistry {
    pub fn new() -> Self {
        Self {
            dispatch: Mutex::new(()),
            slot: Mutex::new(Slot {
                last_id: 0,
                pending: None,
            }),
        }
    }

    /// Register `call` as the pending dispatch and return its token
    ///
    /// A dispatch still pending is dropped without running. Tokens are never
    /// reused, so a late signal for a replaced token is a no-op.
    pub fn register(&self, call: impl FnOnce() + Send + 'static) -> DispatchToken {
        let mut slot = self.slot.lock();
        slot.last_id += 1;
        let token = DispatchToken(NonZeroU64::MIN.saturating_add(slot.last_id - 1));
        if let Some((previous, _)) = slot.pending.replace((token, Box::new(call))) {
            log::debug!("Dispatch {} replaced before it ran", previous.get());
        }
        token
    }

    /// Drop the dispatch for `token` if it has not run yet
    pub fn erase(&self, token: DispatchToken) -> bool {
        let mut slot = self.slot.lock();
        match &slot.pending {
            Some((pending, _)) if *pending == token => {
                slot.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Drop whichever dispatch is pending
    pub fn erase_pending(&self) -> Option<DispatchToken> {
        self.slot.lock().pending.take().map(|(token, _)| token)
    }

    pub fn is_pending(&self, token: DispatchToken) -> bool {
        matches!(&self.slot.lock().pending, Some((pending, _)) if *pending == token)
    }

    /// Run the dispatch for `token`, called from the asynchronous signal
    ///
    /// Returns false when the token was erased, replaced or already consumed.
    pub fn invoke(&self, token: DispatchToken) -> bool {
        let _running = self.dispatch.lock();
        let call = {
            let mut slot = self.slot.lock();
            match slot.pending.take() {
                Some((pending, call)) if pending == token => Some(call),
                other => {
                    slot.pending = other;
                    None
                }
            }
        };

        match call {
            Some(call) => {
                call();
                true
            }
            None => {
                log::debug!("Ignoring stale dispatch {}", token.get());
                false
            }
        }
    }

    /// Run `f` with no dispatch executing and none able to start
    pub fn guard<R>(&self, f: impl FnOnce(&GuardedRegistry<'_>) -> R) -> R {
        let _running = self.dispatch.lock();
        f(&GuardedRegistry { registry: self })
    }
}

/// Registry access from inside [`DeferredCallRegistry::guard`]
pub struct GuardedRegistry<'a> {
    registry: &'a DeferredCallRegistry,
}

impl GuardedRegistry<'_> {
    pub fn erase(&self, token: DispatchToken) -> bool {
        self.registry.erase(token)
    }

    pub fn erase_pending(&self) -> Option<DispatchToken> {
        self.registry.erase_pending()
    }
}

/// Platform mechanism that fires a dispatch once queued GPU work completes
pub trait SignalSource: Send + Sync {
    /// Schedule `registry.invoke(token)` for when prior work is complete
    fn issue(&self, token: DispatchToken, registry: &Arc<DeferredCallRegistry>);
}

/// Fires dispatches in issue order on a background thread
pub struct WorkerSignal {
    tx: Option<Sender<(DispatchToken, Arc<DeferredCallRegistry>)>>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerSignal {
    pub fn spawn() -> anyhow::Result<Self> {
        let (tx, rx) = unbounded::<(DispatchToken, Arc<DeferredCallRegistry>)>();
        let handle = std::thread::Builder::new()
            .name("framerec-dispatch".to_string())
            .spawn(move || {
                for (token, registry) in rx {
                    registry.invoke(token);
                }
                log::debug!("Dispatch worker exiting");
            })?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }
}

impl SignalSource for WorkerSignal {
    fn issue(&self, token: DispatchToken, registry: &Arc<DeferredCallRegistry>) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send((token, registry.clone())).is_err() {
            log::warn!("Dispatch worker is gone, dispatch {} will not run", token.get());
        }
    }
}

impl Drop for WorkerSignal {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Dispatch worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_call(counter: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_invoke_runs_once() {
        let registry = DeferredCallRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let token = registry.register(counting_call(&counter));
        assert!(registry.is_pending(token));
        assert!(registry.invoke(token));
        assert!(!registry.invoke(token));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!registry.is_pending(token));
    }

    #[test]
    fn test_register_replaces_pending() {
        let registry = DeferredCallRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let first = registry.register(counting_call(&counter));
        let second = registry.register(counting_call(&counter));
        assert_ne!(first, second);
        assert!(!registry.is_pending(first));

        // The replaced token no longer fires, and does not consume the new one
        assert!(!registry.invoke(first));
        assert!(registry.is_pending(second));
        assert!(registry.invoke(second));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_erase_makes_signal_noop() {
        let registry = DeferredCallRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let token = registry.register(counting_call(&counter));
        assert!(registry.erase(token));
        assert!(!registry.erase(token));
        assert!(!registry.invoke(token));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_guard_erase() {
        let registry = DeferredCallRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let token = registry.register(counting_call(&counter));
        let erased = registry.guard(|guarded| guarded.erase_pending());
        assert_eq!(erased, Some(token));
        assert!(!registry.invoke(token));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_guard_excludes_running_dispatch() {
        let registry = Arc::new(DeferredCallRegistry::new());
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        let finished = Arc::new(AtomicUsize::new(0));

        let token = {
            let finished = finished.clone();
            registry.register(move || {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                finished.store(1, Ordering::SeqCst);
            })
        };

        let worker = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.invoke(token))
        };
        started_rx.recv().unwrap();
        release_tx.send(()).unwrap();

        // The guard can only enter once the running dispatch has returned
        let seen = registry.guard(|_| finished.load(Ordering::SeqCst));
        assert_eq!(seen, 1);
        assert!(worker.join().unwrap());
    }

    #[test]
    fn test_worker_signal_invokes() {
        let registry = Arc::new(DeferredCallRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let signal = WorkerSignal::spawn().unwrap();

        let token = registry.register(counting_call(&counter));
        signal.issue(token, &registry);
        // Dropping joins the worker after it drains the queue
        drop(signal);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!registry.is_pending(token));
    }
}
