use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, instrument};

use crate::context::{Context, ContextSlot};
use crate::error::GssAuthError;
use crate::mechanism::Service;
use crate::wrap;

/// A hook invoked when a [`Credential`] is evicted, so the embedding RPC
/// layer can attempt a best-effort DESTROY call. This crate does not own
/// the network call itself — the RPC transport is an external collaborator.
/// `destroy_header` is the fully marshaled AUTH_GSS credential header and
/// verifier built by [`wrap::marshal_destroy`], ready to transmit as-is.
pub trait DestroyNotifier: Send + Sync {
    fn notify_destroy(&self, uid: u32, destroy_header: &[u8]);
}

/// Per-(user, principal) credential: a possibly-null current [`Context`]
/// plus the NEW/UPTODATE/NEGATIVE state of §4.4.
#[derive(Debug)]
pub struct Credential {
    pub uid: u32,
    pub principal: Option<String>,
    pub service: Service,
    ctx: ContextSlot,
    flags: Mutex<CredFlagsInner>,
    last_upcall: Mutex<Option<Instant>>,
    seq_for_verify: AtomicU32,
}

#[derive(Debug, Clone, Copy)]
struct CredFlagsInner {
    new: bool,
    uptodate: bool,
    negative: bool,
}

impl Default for CredFlagsInner {
    fn default() -> Self {
        Self {
            new: true,
            uptodate: false,
            negative: false,
        }
    }
}

impl Credential {
    #[must_use]
    pub fn new(uid: u32, principal: Option<String>, service: Service) -> Self {
        Self {
            uid,
            principal,
            service,
            ctx: ContextSlot::empty(),
            flags: Mutex::new(CredFlagsInner::default()),
            last_upcall: Mutex::new(None),
            seq_for_verify: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.flags.lock().map(|f| f.new).unwrap_or(false)
    }

    #[must_use]
    pub fn is_uptodate(&self) -> bool {
        self.flags.lock().map(|f| f.uptodate).unwrap_or(false)
    }

    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.flags.lock().map(|f| f.negative).unwrap_or(false)
    }

    /// Publish a freshly-imported context, transitioning NEW -> UPTODATE.
    /// A no-op if the credential was concurrently renewed away from NEW.
    #[instrument(skip(self, ctx))]
    pub fn set_ctx(&self, ctx: Arc<Context>) -> Result<(), GssAuthError> {
        let mut flags = self.flags.lock()?;
        if !flags.new {
            debug!("discarding stale refresh: credential already advanced past NEW");
            return Ok(());
        }
        self.ctx.store(ctx)?;
        flags.new = false;
        flags.uptodate = true;
        flags.negative = false;
        drop(flags);
        *self.last_upcall.lock()? = Some(Instant::now());
        debug!("credential transitioned to UPTODATE");
        Ok(())
    }

    /// Record an upcall failure. `EKEYEXPIRED` marks the credential
    /// NEGATIVE with a cooldown; other failures leave it NEW for retry.
    pub fn mark_failed(&self, err: &GssAuthError) -> Result<(), GssAuthError> {
        let mut flags = self.flags.lock()?;
        *self.last_upcall.lock()? = Some(Instant::now());
        if matches!(err, GssAuthError::KeyExpired) {
            flags.negative = true;
            flags.new = false;
            flags.uptodate = false;
        }
        Ok(())
    }

    /// Whether a NEGATIVE credential's cooldown has elapsed and it may be
    /// retried.
    pub fn negative_cooldown_elapsed(&self, delay: Duration) -> Result<bool, GssAuthError> {
        if !self.is_negative() {
            return Ok(true);
        }
        let last = *self.last_upcall.lock()?;
        Ok(last.map_or(true, |t| t.elapsed() >= delay))
    }

    /// Clear NEGATIVE and mark NEW again, e.g. once the cooldown elapses.
    pub fn renew(&self) -> Result<(), GssAuthError> {
        let mut flags = self.flags.lock()?;
        flags.negative = false;
        flags.new = true;
        flags.uptodate = false;
        self.ctx.clear()?;
        Ok(())
    }

    /// The CONTEXT_EXPIRED path: clear UPTODATE so the next use triggers a
    /// renewal, without discarding the NEW/NEGATIVE state.
    pub fn expire_context(&self) -> Result<(), GssAuthError> {
        let mut flags = self.flags.lock()?;
        flags.uptodate = false;
        if !flags.negative {
            flags.new = true;
        }
        Ok(())
    }

    pub fn current_context(&self) -> Result<Option<Arc<Context>>, GssAuthError> {
        self.ctx.load_snapshot()
    }

    /// Whether the current context is near expiry, per the configured
    /// look-ahead window.
    pub fn key_timeout(&self, window: Duration) -> Result<bool, GssAuthError> {
        match self.current_context()? {
            Some(ctx) => Ok(ctx.expires_within(window)),
            None => Ok(true),
        }
    }

    /// Does this credential satisfy a lookup for `uid`/`principal`, given
    /// its current context is not expired?
    #[must_use]
    pub fn matches(&self, uid: u32, principal: Option<&str>) -> bool {
        if self.uid != uid {
            return false;
        }
        match (principal, self.principal.as_deref()) {
            (Some(want), Some(have)) => want == have,
            (None, None) => true,
            _ => false,
        }
    }

    /// Build the AUTH_GSS credential header and verifier for an outgoing
    /// call, per §4.4/§6. Returns the encoded bytes and the sequence number
    /// used, which the caller must retain to validate the reply.
    #[instrument(skip(self, xid_and_body))]
    pub fn marshal(&self, xid_and_body: &[u8]) -> Result<(Vec<u8>, u32), GssAuthError> {
        let ctx = self
            .current_context()?
            .ok_or(GssAuthError::ContextExpired)?;
        let (header, seqno) = wrap::marshal_credential(&ctx, self.service, xid_and_body)?;
        self.seq_for_verify.store(seqno, Ordering::SeqCst);
        Ok((header, seqno))
    }

    /// Verify the reply verifier's MIC covers the sequence number used in
    /// the matching request.
    pub fn validate(&self, seqno: u32, verifier_mic: &[u8]) -> Result<(), GssAuthError> {
        let ctx = self
            .current_context()?
            .ok_or(GssAuthError::ContextExpired)?;
        wrap::validate_verifier(&ctx, seqno, verifier_mic)
    }

    pub fn wrap_request(&self, body: &[u8]) -> Result<Vec<u8>, GssAuthError> {
        let ctx = self
            .current_context()?
            .ok_or(GssAuthError::ContextExpired)?;
        let seqno = self.seq_for_verify.load(Ordering::SeqCst);
        wrap::wrap_request(&ctx, self.service, seqno, body)
    }

    pub fn unwrap_response(&self, reply: &[u8], expect_seqno: u32) -> Result<Vec<u8>, GssAuthError> {
        let ctx = self
            .current_context()?
            .ok_or(GssAuthError::ContextExpired)?;
        wrap::unwrap_response(&ctx, self.service, expect_seqno, reply)
    }

    /// Begin best-effort destruction: marshal a DESTROY-processing-code
    /// credential header, hand it to `notifier` (which performs the actual
    /// RPC, if any), release the mechanism context, and drop this
    /// credential's context. A no-op if the credential has already been
    /// destroyed (no context remains to destroy).
    pub fn begin_destroy(&self, notifier: &dyn DestroyNotifier) -> Result<(), GssAuthError> {
        if let Some(ctx) = self.current_context()? {
            let (header, _seqno) = wrap::marshal_destroy(&ctx, &[])?;
            notifier.notify_destroy(self.uid, &header);
            ctx.delete()?;
        }
        self.ctx.clear()
    }
}
