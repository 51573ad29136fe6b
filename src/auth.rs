use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::{info, instrument};

use crate::cache::CredentialCache;
use crate::config::{GssConfig, NetworkScope};
use crate::context::Context;
use crate::credential::Credential;
use crate::error::GssAuthError;
use crate::mechanism::{GssMechanism, Service};
use crate::rpc_client::root_transport_id;
use crate::upcall::coordinator;
use crate::upcall::Pipe;

/// Process-wide key identifying a shared [`Auth`]: the root RPC transport,
/// the pseudoflavor in use, and an optional target server name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthKey {
    pub root_transport_id: u64,
    pub pseudoflavor: u32,
    pub target_name: Option<String>,
}

/// Shared authentication handle for one (transport, pseudoflavor, target)
/// tuple: owns the upcall pipes and the credential cache for every user
/// multiplexed over that transport.
#[derive(Debug)]
pub struct Auth {
    pub key: AuthKey,
    pub service: Service,
    mechanism: Arc<dyn GssMechanism>,
    scope: NetworkScope,
    pipe_v0: Pipe,
    pipe_v1: Pipe,
    cache: CredentialCache,
}

impl Auth {
    #[must_use]
    pub fn new(
        key: AuthKey,
        service: Service,
        mechanism: Arc<dyn GssMechanism>,
        config: GssConfig,
    ) -> Self {
        Self {
            key,
            service,
            mechanism,
            scope: NetworkScope::new(config),
            pipe_v0: Pipe::new(0),
            pipe_v1: Pipe::new(1),
            cache: CredentialCache::new(),
        }
    }

    #[must_use]
    pub fn credential_cache(&self) -> &CredentialCache {
        &self.cache
    }

    #[must_use]
    pub fn scope(&self) -> &NetworkScope {
        &self.scope
    }

    #[must_use]
    pub fn pipe(&self, version: u32) -> &Pipe {
        if version == 0 {
            &self.pipe_v0
        } else {
            &self.pipe_v1
        }
    }

    /// Mark a pipe opened by a daemon, committing the process-wide version
    /// for this Auth's namespace.
    pub fn open_pipe(&self, version: u32) -> Result<(), GssAuthError> {
        self.scope.open(version)
    }

    /// Release a daemon's hold on the pipe for this Auth's namespace,
    /// failing any upcalls still pending on it so blocked waiters observe
    /// `DaemonAbsent` instead of hanging forever.
    pub fn release_pipe(&self, version: u32) -> Result<(), GssAuthError> {
        self.pipe(version).fail_all_pending(|| GssAuthError::DaemonAbsent);
        self.scope.release()
    }

    /// Parse and apply a downcall received on whichever pipe is active.
    pub fn deliver_downcall(&self, bytes: &[u8]) -> Result<(), GssAuthError> {
        let version = self.scope.current_version().unwrap_or(1);
        let pipe = self.pipe(version);
        coordinator::deliver_downcall(pipe, self.mechanism.as_ref(), self.service, bytes)
    }

    /// Refresh `credential`, driving an upcall if it is not already
    /// UPTODATE, and publish the resulting context. `cancel`, if set before
    /// or during the wait, aborts the refresh with `Interrupted`.
    #[instrument(skip(self, credential, cancel), fields(uid = credential.uid))]
    pub fn refresh_credential(
        &self,
        credential: &Arc<Credential>,
        cancel: Option<&crate::config::CancelToken>,
    ) -> Result<Arc<Context>, GssAuthError> {
        if let Some(ctx) = credential.current_context()? {
            if credential.is_uptodate() && !ctx.is_expired() {
                return Ok(ctx);
            }
        }

        if credential.is_negative()
            && !credential.negative_cooldown_elapsed(self.scope.config.expired_cred_retry_delay)?
        {
            return Err(GssAuthError::KeyExpired);
        }
        if credential.is_negative() {
            credential.renew()?;
        }

        let version = self.scope.current_version().unwrap_or(1);
        let pipe = self.pipe(version);
        let target = self.key.target_name.as_deref();

        let result = coordinator::refresh(
            &self.scope,
            pipe,
            self.mechanism.as_ref(),
            credential.uid,
            target,
            self.service,
            cancel,
        );

        match &result {
            Ok(ctx) => credential.set_ctx(ctx.clone())?,
            Err(e) => credential.mark_failed(e)?,
        }
        result
    }
}

/// Process-wide registry of shared [`Auth`] handles, weakly referenced so
/// that the last strong owner's drop tears the Auth down without the
/// registry needing an explicit unregister call.
#[derive(Debug, Default)]
pub struct AuthRegistry {
    table: Mutex<HashMap<AuthKey, Weak<Auth>>>,
}

impl AuthRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Find or create the shared [`Auth`] for `(client, pseudoflavor, target)`,
    /// walking `client`'s parent chain to the registry key the way the
    /// original implementation walks `cl_parent`.
    #[instrument(skip(self, client, mechanism, make_config))]
    pub fn lookup_or_create(
        &self,
        client: &dyn crate::rpc_client::RpcClientHandle,
        pseudoflavor: u32,
        target_name: Option<String>,
        service: Service,
        mechanism: Arc<dyn GssMechanism>,
        make_config: impl FnOnce() -> GssConfig,
    ) -> Result<Arc<Auth>, GssAuthError> {
        let key = AuthKey {
            root_transport_id: root_transport_id(client),
            pseudoflavor,
            target_name,
        };

        let mut table = self.table.lock()?;
        if let Some(weak) = table.get(&key) {
            if let Some(auth) = weak.upgrade() {
                return Ok(auth);
            }
        }

        let auth = Arc::new(Auth::new(key.clone(), service, mechanism, make_config()));
        table.insert(key, Arc::downgrade(&auth));
        info!("created new shared auth handle");
        Ok(auth)
    }

    /// Drop registry entries whose Auth has no remaining strong owners.
    pub fn sweep_dead(&self) -> Result<usize, GssAuthError> {
        let mut table = self.table.lock()?;
        let before = table.len();
        table.retain(|_, weak| weak.strong_count() > 0);
        Ok(before - table.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanism::identity::IdentityMechanism;

    #[derive(Debug)]
    struct FakeClient {
        id: u64,
    }

    impl crate::rpc_client::RpcClientHandle for FakeClient {
        fn transport_id(&self) -> u64 {
            self.id
        }
        fn parent(&self) -> Option<&dyn crate::rpc_client::RpcClientHandle> {
            None
        }
    }

    #[test]
    fn lookup_or_create_shares_auth_for_same_key() {
        let registry = AuthRegistry::new();
        let client = FakeClient { id: 7 };
        let mech: Arc<dyn GssMechanism> = Arc::new(IdentityMechanism::default());
        let flavor = mech.pseudoflavor(Service::Integrity).unwrap();

        let a = registry
            .lookup_or_create(&client, flavor, None, Service::Integrity, mech.clone(), GssConfig::default)
            .unwrap();
        let b = registry
            .lookup_or_create(&client, flavor, None, Service::Integrity, mech, GssConfig::default)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropping_last_strong_ref_allows_sweep() {
        let registry = AuthRegistry::new();
        let client = FakeClient { id: 9 };
        let mech: Arc<dyn GssMechanism> = Arc::new(IdentityMechanism::default());
        let flavor = mech.pseudoflavor(Service::Integrity).unwrap();

        let auth = registry
            .lookup_or_create(&client, flavor, None, Service::Integrity, mech, GssConfig::default)
            .unwrap();
        drop(auth);
        let swept = registry.sweep_dead().unwrap();
        assert_eq!(swept, 1);
        assert!(registry.is_empty());
    }
}
