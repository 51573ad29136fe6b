use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::config::CancelToken;
use crate::context::Context;
use crate::error::GssAuthError;

/// Poll interval used while a cancellation-aware wait checks its token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Key identifying at most one in-flight upcall per pipe (the
/// de-duplication invariant of the coordinator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpcallKey {
    pub uid: u32,
    pub service: crate::mechanism::Service,
}

#[derive(Debug, Default)]
struct UpcallSlot {
    result: Option<Result<Arc<Context>, GssAuthError>>,
}

/// A single pending upcall: a request awaiting a downcall reply, shared by
/// every RPC task that asked for the same (uid, service) concurrently.
#[derive(Debug)]
pub struct Upcall {
    pub key: UpcallKey,
    slot: Mutex<UpcallSlot>,
    ready: Condvar,
}

impl Upcall {
    fn new(key: UpcallKey) -> Self {
        Self {
            key,
            slot: Mutex::new(UpcallSlot::default()),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, result: Result<Arc<Context>, GssAuthError>) {
        let mut slot = match self.slot.lock() {
            Ok(s) => s,
            Err(e) => e.into_inner(),
        };
        if slot.result.is_none() {
            slot.result = Some(result);
        }
        drop(slot);
        self.ready.notify_all();
    }

    /// Block until a downcall has populated this upcall's result, or
    /// `cancel` is set, in which case this returns `Interrupted` without
    /// waiting for the daemon.
    pub fn wait(&self, cancel: Option<&CancelToken>) -> Result<Arc<Context>, GssAuthError> {
        let mut slot = self.slot.lock()?;
        loop {
            if let Some(result) = slot.result.clone() {
                return result;
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(GssAuthError::Interrupted);
            }
            let (next_slot, _timeout) = self.ready.wait_timeout(slot, CANCEL_POLL_INTERVAL)?;
            slot = next_slot;
        }
    }
}

/// One named message pipe to the credential daemon. `version` is committed
/// by whichever side opens first (see [`crate::config::NetworkScope`]).
pub struct Pipe {
    pub version: u32,
    pending: Mutex<Vec<Arc<Upcall>>>,
    outbound_tx: Sender<Vec<u8>>,
    outbound_rx: Receiver<Vec<u8>>,
    pub opened_at: Instant,
}

impl std::fmt::Debug for Pipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe").field("version", &self.version).finish()
    }
}

impl Pipe {
    #[must_use]
    pub fn new(version: u32) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            version,
            pending: Mutex::new(Vec::new()),
            outbound_tx: tx,
            outbound_rx: rx,
            opened_at: Instant::now(),
        }
    }

    /// The receiving end a simulated daemon thread reads upcall bodies from.
    #[must_use]
    pub fn outbound_receiver(&self) -> Receiver<Vec<u8>> {
        self.outbound_rx.clone()
    }

    /// Insert `upcall` if none with the same key is already pending;
    /// otherwise return the existing one. This is the de-duplication
    /// invariant: at most one upcall per (pipe, uid, service).
    pub fn enqueue_or_join(
        &self,
        key: UpcallKey,
        encode: impl FnOnce() -> Vec<u8>,
    ) -> Result<Arc<Upcall>, GssAuthError> {
        let mut pending = self.pending.lock()?;
        if let Some(existing) = pending.iter().find(|u| u.key == key) {
            return Ok(existing.clone());
        }
        let upcall = Arc::new(Upcall::new(key));
        pending.push(upcall.clone());
        drop(pending);
        let body = encode();
        self.outbound_tx
            .send(body)
            .map_err(|_| GssAuthError::DaemonAbsent)?;
        Ok(upcall)
    }

    /// Deliver a downcall result to the pending upcall matching `key`,
    /// removing it from the pending list and waking its waiters.
    pub fn deliver(&self, key: UpcallKey, result: Result<Arc<Context>, GssAuthError>) {
        let mut pending = match self.pending.lock() {
            Ok(p) => p,
            Err(e) => e.into_inner(),
        };
        if let Some(pos) = pending.iter().position(|u| u.key == key) {
            let upcall = pending.remove(pos);
            drop(pending);
            upcall.complete(result);
        }
    }

    /// Mark every pending upcall as failed because the channel closed, and
    /// wake their waiters.
    pub fn fail_all_pending(&self, make_err: impl Fn() -> GssAuthError) {
        let mut pending = match self.pending.lock() {
            Ok(p) => p,
            Err(e) => e.into_inner(),
        };
        for upcall in pending.drain(..) {
            upcall.complete(Err(make_err()));
        }
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}
