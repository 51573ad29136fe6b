use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Tunables for the credential/context lifecycle engine.
///
/// Defaults mirror the historical module parameters of the subsystem this
/// crate replaces: a 5 second negative-credential cooldown, a 240 second
/// early-expiry look-ahead, and a 15 second wait for a daemon to open the
/// upcall pipe before giving up.
#[derive(Debug, Clone)]
pub struct GssConfig {
    pub expired_cred_retry_delay: Duration,
    pub key_expire_timeo: Duration,
    pub daemon_probe_timeout: Duration,
}

impl Default for GssConfig {
    fn default() -> Self {
        Self {
            expired_cred_retry_delay: Duration::from_secs(5),
            key_expire_timeo: Duration::from_secs(240),
            daemon_probe_timeout: Duration::from_secs(15),
        }
    }
}

/// A cooperative cancellation flag a caller blocked in `refresh` can set
/// from another thread in place of the original kernel's fatal-signal
/// delivery. Once set, the waiting thread returns `GssAuthError::Interrupted`
/// instead of waiting for the daemon.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Poll interval used while a cancellation-aware wait checks its token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Per-namespace pipe version state, held explicitly rather than behind an
/// ambient global so tests can construct isolated scopes.
#[derive(Debug)]
pub struct NetworkScope {
    pub config: GssConfig,
    version: Mutex<PipeVersionState>,
    version_changed: Condvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PipeVersionState {
    version: Option<u32>,
    open_count: u32,
}

impl NetworkScope {
    #[must_use]
    pub fn new(config: GssConfig) -> Self {
        Self {
            config,
            version: Mutex::new(PipeVersionState {
                version: None,
                open_count: 0,
            }),
            version_changed: Condvar::new(),
        }
    }

    /// Commit `requested` as the process-wide pipe version for this scope if
    /// none is set yet, or confirm it matches the already-committed one.
    pub fn open(&self, requested: u32) -> Result<(), crate::error::GssAuthError> {
        let mut state = self.version.lock()?;
        match state.version {
            None => {
                state.version = Some(requested);
                state.open_count += 1;
                drop(state);
                self.version_changed.notify_all();
                Ok(())
            }
            Some(existing) if existing == requested => {
                state.open_count += 1;
                Ok(())
            }
            Some(existing) => Err(crate::error::GssAuthError::PipeConflict {
                existing,
                requested,
            }),
        }
    }

    pub fn release(&self) -> Result<(), crate::error::GssAuthError> {
        let mut state = self.version.lock()?;
        if state.open_count > 0 {
            state.open_count -= 1;
        }
        if state.open_count == 0 {
            state.version = None;
        }
        Ok(())
    }

    #[must_use]
    pub fn current_version(&self) -> Option<u32> {
        self.version.lock().ok().and_then(|state| state.version)
    }

    /// Block up to `config.daemon_probe_timeout` waiting for a daemon to
    /// open a pipe, returning the committed version if one appears in time.
    /// Returns `Interrupted` early if `cancel` is set.
    pub fn wait_for_version(
        &self,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<u32>, crate::error::GssAuthError> {
        let deadline = Instant::now() + self.config.daemon_probe_timeout;
        let mut state = self.version.lock()?;
        loop {
            if let Some(v) = state.version {
                return Ok(Some(v));
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(crate::error::GssAuthError::Interrupted);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let (next_state, _timeout) = self
                .version_changed
                .wait_timeout(state, remaining.min(CANCEL_POLL_INTERVAL))?;
            state = next_state;
        }
    }
}

impl Default for NetworkScope {
    fn default() -> Self {
        Self::new(GssConfig::default())
    }
}
