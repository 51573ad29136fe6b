use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::error::GssAuthError;
use crate::mechanism::MechanismSecContext;

/// RPC_GSS processing code carried in the credential header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingCode {
    Data,
    Init,
    ContinueInit,
    Destroy,
}

impl ProcessingCode {
    #[must_use]
    pub fn wire_code(self) -> u32 {
        match self {
            Self::Data => 0,
            Self::Init => 1,
            Self::ContinueInit => 2,
            Self::Destroy => 3,
        }
    }
}

/// A security context established by the daemon: an opaque wire context
/// exchanged unchanged with the server, an imported mechanism handle, an
/// expiry time, and a strictly monotonic sequence counter.
///
/// Immutable after construction except for the sequence counter, which is
/// the only field mutated once the Context is published into a Credential.
#[derive(Debug)]
pub struct Context {
    pub wire_context: Vec<u8>,
    pub mech_context: Arc<dyn MechanismSecContext>,
    pub expiry: Instant,
    pub window_size: u32,
    pub acceptor_name: Option<String>,
    pub processing_code: ProcessingCode,
    seq: AtomicU64,
}

impl Context {
    #[must_use]
    pub fn new(
        wire_context: Vec<u8>,
        mech_context: Arc<dyn MechanismSecContext>,
        expiry: Instant,
        window_size: u32,
        acceptor_name: Option<String>,
    ) -> Self {
        Self {
            wire_context,
            mech_context,
            expiry,
            window_size,
            acceptor_name,
            processing_code: ProcessingCode::Data,
            // Sequence numbers start at 1, not 0, for compatibility with
            // servers that reject an initial sequence of zero.
            seq: AtomicU64::new(1),
        }
    }

    /// Atomically acquire and return the next sequence number.
    pub fn next_seq(&self) -> u32 {
        let v = self.seq.fetch_add(1, Ordering::SeqCst);
        v as u32
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expiry
    }

    #[must_use]
    pub fn expires_within(&self, window: Duration) -> bool {
        self.expiry.saturating_duration_since(Instant::now()) <= window
    }

    pub fn get_mic(&self, buf: &[u8]) -> Result<Vec<u8>, GssAuthError> {
        self.mech_context.get_mic(buf)
    }

    pub fn verify_mic(&self, buf: &[u8], mic: &[u8]) -> Result<(), GssAuthError> {
        self.mech_context.verify_mic(buf, mic)
    }

    pub fn wrap(&self, buf: &[u8]) -> Result<Vec<u8>, GssAuthError> {
        self.mech_context.wrap(buf)
    }

    pub fn unwrap(&self, buf: &[u8]) -> Result<Vec<u8>, GssAuthError> {
        self.mech_context.unwrap(buf)
    }

    /// Release the mechanism-held state backing this context.
    pub fn delete(&self) -> Result<(), GssAuthError> {
        self.mech_context.delete_context()
    }
}

/// Atomic-swap-with-snapshot slot for publishing a [`Context`] into a
/// [`crate::credential::Credential`].
///
/// `load_snapshot` clones the `Arc`, so a reader's snapshot remains valid
/// for its own lifetime even if `store` installs a replacement concurrently.
#[derive(Debug)]
pub struct ContextSlot {
    inner: RwLock<Option<Arc<Context>>>,
}

impl ContextSlot {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub fn store(&self, ctx: Arc<Context>) -> Result<(), GssAuthError> {
        let mut slot = self.inner.write()?;
        *slot = Some(ctx);
        Ok(())
    }

    pub fn clear(&self) -> Result<(), GssAuthError> {
        let mut slot = self.inner.write()?;
        *slot = None;
        Ok(())
    }

    pub fn load_snapshot(&self) -> Result<Option<Arc<Context>>, GssAuthError> {
        Ok(self.inner.read()?.clone())
    }
}

impl Default for ContextSlot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanism::identity::IdentityMechanism;
    use crate::mechanism::GssMechanism;

    fn test_context() -> Arc<Context> {
        let mech = IdentityMechanism::default();
        let sec = mech.import_sec_context(b"k").unwrap();
        Arc::new(Context::new(
            b"wirectx".to_vec(),
            sec,
            Instant::now() + Duration::from_secs(3600),
            128,
            Some("host@example".to_string()),
        ))
    }

    #[test]
    fn sequence_starts_at_one_and_is_monotonic() {
        let ctx = test_context();
        assert_eq!(ctx.next_seq(), 1);
        assert_eq!(ctx.next_seq(), 2);
        assert_eq!(ctx.next_seq(), 3);
    }

    #[test]
    fn slot_snapshot_survives_replacement() {
        let slot = ContextSlot::empty();
        let first = test_context();
        slot.store(first.clone()).unwrap();
        let snapshot = slot.load_snapshot().unwrap().unwrap();
        let second = test_context();
        slot.store(second).unwrap();
        assert!(Arc::ptr_eq(&snapshot, &first));
    }
}
