use std::io;

/// Errors surfaced by the credential/context lifecycle engine.
///
/// Every public entry point returns this type; callers distinguish between
/// transient conditions (`Retryable`, `DaemonAbsent`), caller-visible policy
/// outcomes (`KeyExpired`, `AccessDenied`, `ContextExpired`), and defects in
/// the upcall protocol (`Protocol`, `Internal`).
#[derive(Debug, thiserror::Error)]
pub enum GssAuthError {
    #[error("upcall failed transiently, retry")]
    Retryable,

    #[error("no daemon has opened the upcall pipe")]
    DaemonAbsent,

    #[error("credential key has expired")]
    KeyExpired,

    #[error("access denied by credential daemon")]
    AccessDenied,

    #[error("security context has expired")]
    ContextExpired,

    #[error("operation interrupted")]
    Interrupted,

    #[error("malformed upcall/downcall message: {0}")]
    Protocol(String),

    #[error("pipe already opened at version {existing}, cannot reopen at {requested}")]
    PipeConflict { existing: u32, requested: u32 },

    #[error("mechanism returned an unexpected status: {0}")]
    Internal(String),

    #[error("lock poisoned: {0}")]
    Poisoned(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl<T> From<std::sync::PoisonError<T>> for GssAuthError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Poisoned(err.to_string())
    }
}

impl Clone for GssAuthError {
    fn clone(&self) -> Self {
        match self {
            Self::Retryable => Self::Retryable,
            Self::DaemonAbsent => Self::DaemonAbsent,
            Self::KeyExpired => Self::KeyExpired,
            Self::AccessDenied => Self::AccessDenied,
            Self::ContextExpired => Self::ContextExpired,
            Self::Interrupted => Self::Interrupted,
            Self::Protocol(s) => Self::Protocol(s.clone()),
            Self::PipeConflict {
                existing,
                requested,
            } => Self::PipeConflict {
                existing: *existing,
                requested: *requested,
            },
            Self::Internal(s) => Self::Internal(s.clone()),
            Self::Poisoned(s) => Self::Poisoned(s.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}
