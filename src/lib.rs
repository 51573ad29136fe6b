//! Client-side RPCSEC_GSS credential and security-context lifecycle engine.
//!
//! This crate implements the credential/context state machine and upcall
//! coordination protocol that mediate between an RPC transport and an
//! external credential daemon: a shared [`auth::Auth`] per (transport,
//! pseudoflavor, target), a [`cache::CredentialCache`] of
//! [`credential::Credential`]s per `Auth`, and a [`context::Context`]
//! published into a credential once an upcall completes.
//!
//! The GSS mechanism itself (Kerberos 5 or otherwise) is represented only
//! through the [`mechanism::GssMechanism`] trait object; no mechanism
//! implementation ships here beyond [`mechanism::identity::IdentityMechanism`],
//! a non-cryptographic stand-in used by tests.

pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod credential;
pub mod error;
pub mod mechanism;
pub mod rpc_client;
pub mod upcall;
pub mod wrap;
pub mod xdr;

pub use config::{CancelToken, GssConfig, NetworkScope};
pub use error::GssAuthError;
