pub mod identity;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::GssAuthError;

/// RPC service mode a pseudoflavor maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    None,
    Integrity,
    Privacy,
}

impl Service {
    #[must_use]
    pub fn wire_code(self) -> u32 {
        match self {
            Self::None => 1,
            Self::Integrity => 2,
            Self::Privacy => 3,
        }
    }

    pub fn from_wire_code(code: u32) -> Result<Self, GssAuthError> {
        match code {
            1 => Ok(Self::None),
            2 => Ok(Self::Integrity),
            3 => Ok(Self::Privacy),
            other => Err(GssAuthError::Protocol(format!(
                "unknown rpc_gss service code {other}"
            ))),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Integrity => "integrity",
            Self::Privacy => "privacy",
        }
    }
}

/// An imported, mechanism-internal security context handle. Opaque to
/// everything but the mechanism that produced it.
pub trait MechanismSecContext: Send + Sync + std::fmt::Debug {
    fn get_mic(&self, buf: &[u8]) -> Result<Vec<u8>, GssAuthError>;
    fn verify_mic(&self, buf: &[u8], mic: &[u8]) -> Result<(), GssAuthError>;
    fn wrap(&self, buf: &[u8]) -> Result<Vec<u8>, GssAuthError>;
    fn unwrap(&self, buf: &[u8]) -> Result<Vec<u8>, GssAuthError>;

    /// Release any mechanism-held state backing this context. Called once,
    /// best-effort, when the owning `Credential` is destroyed.
    fn delete_context(&self) -> Result<(), GssAuthError>;
}

/// Polymorphic capability set over a GSS-equivalent mechanism.
///
/// A process may register more than one mechanism at once; each produces
/// its own opaque [`MechanismSecContext`] handles, so this is expressed as
/// a trait object rather than a generic parameter.
pub trait GssMechanism: Send + Sync + std::fmt::Debug {
    /// Stable name used in upcall bodies, e.g. `"krb5"`.
    fn name(&self) -> &str;

    /// Comma-separated enctypes this mechanism advertises to the daemon.
    fn enctypes(&self) -> &str;

    /// Pseudoflavor for a given service mode, if this mechanism supports it.
    fn pseudoflavor(&self, service: Service) -> Option<u32>;

    /// Import a mechanism-opaque security context received in a downcall.
    fn import_sec_context(
        &self,
        sec_context: &[u8],
    ) -> Result<Arc<dyn MechanismSecContext>, GssAuthError>;
}

impl std::fmt::Debug for dyn GssMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GssMechanism").field("name", &self.name()).finish()
    }
}

impl std::fmt::Debug for dyn MechanismSecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MechanismSecContext { .. }")
    }
}

/// Process-wide table mapping mechanism names to registered mechanisms,
/// mirroring the original's pseudoflavor-keyed mechanism table.
#[derive(Debug, Default)]
pub struct MechanismRegistry {
    mechanisms: Mutex<HashMap<String, Arc<dyn GssMechanism>>>,
}

impl MechanismRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, mech: Arc<dyn GssMechanism>) {
        let mut table = self
            .mechanisms
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        table.insert(mech.name().to_string(), mech);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn GssMechanism>> {
        self.mechanisms
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}
