use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use crate::config::NetworkScope;
use crate::context::Context;
use crate::error::GssAuthError;
use crate::mechanism::{GssMechanism, Service};
use crate::xdr;

use super::pipe::{Pipe, UpcallKey};

/// Maximum size of an encoded upcall body (§6).
pub const UPCALL_BUF_LEN: usize = 128;
/// Maximum size of a downcall message (§6).
pub const MSG_BUF_MAXSIZE: usize = 1024;
/// Default context timeout when the daemon reports zero (§6).
const GSSD_MIN_TIMEOUT_SECS: u64 = 3600;

/// POSIX errno the daemon reports when the user's ticket/key has expired.
const EKEYEXPIRED: i32 = -127;

/// Encode a v0 (legacy binary) upcall body: the native-endian uid only.
#[must_use]
pub fn encode_v0(uid: u32) -> Vec<u8> {
    uid.to_ne_bytes().to_vec()
}

/// Encode a v1 (text key=value) upcall body.
pub fn encode_v1(
    mech_name: &str,
    uid: u32,
    target: Option<&str>,
    service: Service,
    enctypes: &str,
) -> Result<Vec<u8>, GssAuthError> {
    let mut line = format!("mech={mech_name} uid={uid}");
    if let Some(t) = target {
        line.push_str(&format!(" target={t}"));
    }
    line.push_str(&format!(" service={}", service.as_str()));
    line.push_str(&format!(" enctypes={enctypes}"));
    line.push('\n');
    if line.len() > UPCALL_BUF_LEN {
        return Err(GssAuthError::Internal(format!(
            "encoded upcall body {} bytes exceeds {UPCALL_BUF_LEN}",
            line.len()
        )));
    }
    Ok(line.into_bytes())
}

struct ParsedDowncall {
    uid: u32,
    timeout: Duration,
    window_size: u32,
    wire_context: Vec<u8>,
    sec_context: Vec<u8>,
    acceptor_name: Option<String>,
    error_code: Option<i32>,
}

/// Read just the leading `uid` field, enough to address the pending upcall
/// a malformed downcall should still be routed to.
fn read_uid(bytes: &[u8]) -> Result<u32, GssAuthError> {
    if bytes.len() > MSG_BUF_MAXSIZE {
        return Err(GssAuthError::Protocol(format!(
            "downcall of {} bytes exceeds {MSG_BUF_MAXSIZE}",
            bytes.len()
        )));
    }
    let mut cursor = Cursor::new(bytes);
    xdr::read_u32(&mut cursor)
}

fn parse_downcall(bytes: &[u8]) -> Result<ParsedDowncall, GssAuthError> {
    if bytes.len() > MSG_BUF_MAXSIZE {
        return Err(GssAuthError::Protocol(format!(
            "downcall of {} bytes exceeds {MSG_BUF_MAXSIZE}",
            bytes.len()
        )));
    }
    let mut cursor = Cursor::new(bytes);
    let uid = xdr::read_u32(&mut cursor)?;
    let timeout_secs = xdr::read_u32(&mut cursor)?;
    let window_size = xdr::read_u32(&mut cursor)?;

    if window_size == 0 {
        let error_code = xdr::read_i32(&mut cursor)?;
        return Ok(ParsedDowncall {
            uid,
            timeout: Duration::from_secs(0),
            window_size: 0,
            wire_context: Vec::new(),
            sec_context: Vec::new(),
            acceptor_name: None,
            error_code: Some(error_code),
        });
    }

    let wire_context = xdr::read_netobj(&mut cursor)?;
    let sec_len = xdr::read_u32(&mut cursor)? as usize;
    let mut sec_context = vec![0u8; sec_len];
    std::io::Read::read_exact(&mut cursor, &mut sec_context)
        .map_err(|_| GssAuthError::Protocol("truncated sec_context".to_string()))?;

    let remaining = bytes.len() - cursor.position() as usize;
    let acceptor_name = if remaining > 0 {
        Some(
            String::from_utf8(xdr::read_netobj(&mut cursor)?)
                .map_err(|_| GssAuthError::Protocol("acceptor name not utf8".to_string()))?,
        )
    } else {
        None
    };

    let timeout = if timeout_secs == 0 {
        Duration::from_secs(GSSD_MIN_TIMEOUT_SECS)
    } else {
        Duration::from_secs(u64::from(timeout_secs))
    };

    Ok(ParsedDowncall {
        uid,
        timeout,
        window_size,
        wire_context,
        sec_context,
        acceptor_name,
        error_code: None,
    })
}

/// Categorize a downcall error code per §4.3.
fn categorize_downcall_error(code: i32) -> GssAuthError {
    if code == EKEYEXPIRED {
        GssAuthError::KeyExpired
    } else {
        GssAuthError::AccessDenied
    }
}

/// Drive one refresh: dedup-enqueue an upcall on `pipe`, wait for its
/// downcall, import the resulting context through `mechanism`. `cancel`, if
/// set before or during the wait, aborts with `Interrupted`.
#[instrument(skip(scope, pipe, mechanism, cancel), fields(uid))]
pub fn refresh(
    scope: &NetworkScope,
    pipe: &Pipe,
    mechanism: &dyn GssMechanism,
    uid: u32,
    target: Option<&str>,
    service: Service,
    cancel: Option<&crate::config::CancelToken>,
) -> Result<Arc<Context>, GssAuthError> {
    if scope.wait_for_version(cancel)?.is_none() {
        warn!("no daemon ever opened the upcall pipe");
        return Err(GssAuthError::DaemonAbsent);
    }

    let key = UpcallKey { uid, service };
    let mech_name = mechanism.name().to_string();
    let enctypes = mechanism.enctypes().to_string();
    let version = pipe.version;

    let upcall = pipe.enqueue_or_join(key, move || {
        if version == 0 {
            encode_v0(uid)
        } else {
            encode_v1(&mech_name, uid, target, service, &enctypes)
                .unwrap_or_else(|_| encode_v0(uid))
        }
    })?;

    debug!(pending = pipe.pending_len(), "upcall enqueued or joined");
    upcall.wait(cancel)
}

/// Parse and apply a raw downcall message, completing the matching pending
/// upcall on `pipe`. A structural parse failure past the `uid` field is
/// still routed to that upcall's waiters as `Retryable`, rather than
/// propagated out of this function where nothing could ever observe it.
#[instrument(skip(pipe, mechanism, bytes))]
pub fn deliver_downcall(
    pipe: &Pipe,
    mechanism: &dyn GssMechanism,
    service: Service,
    bytes: &[u8],
) -> Result<(), GssAuthError> {
    let uid = read_uid(bytes)?;
    let key = UpcallKey { uid, service };

    let result = match parse_downcall(bytes) {
        Err(_) => Err(GssAuthError::Retryable),
        Ok(parsed) => {
            if let Some(code) = parsed.error_code {
                Err(categorize_downcall_error(code))
            } else {
                mechanism
                    .import_sec_context(&parsed.sec_context)
                    .map(|mech_ctx| {
                        Arc::new(Context::new(
                            parsed.wire_context,
                            mech_ctx,
                            Instant::now() + parsed.timeout,
                            parsed.window_size,
                            parsed.acceptor_name,
                        ))
                    })
            }
        }
    };

    pipe.deliver(key, result);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_body_has_expected_fields() {
        let body = encode_v1("krb5", 1000, None, Service::Integrity, "aes256-cts").unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("mech=krb5 uid=1000"));
        assert!(text.contains("service=integrity"));
        assert!(text.contains("enctypes=aes256-cts"));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn malformed_downcall_past_uid_delivers_retryable_to_pending_upcall() {
        use crate::mechanism::identity::IdentityMechanism;

        let pipe = Pipe::new(1);
        let uid = 555;
        let key = UpcallKey {
            uid,
            service: Service::Integrity,
        };
        let upcall = pipe.enqueue_or_join(key, || encode_v0(uid)).unwrap();

        // Declares a non-zero window but is truncated before wire_context.
        let mut bytes = Vec::new();
        xdr::write_u32(&mut bytes, uid);
        xdr::write_u32(&mut bytes, 3600);
        xdr::write_u32(&mut bytes, 128);

        let mechanism = IdentityMechanism::default();
        deliver_downcall(&pipe, &mechanism, Service::Integrity, &bytes).unwrap();

        let err = upcall.wait(None).unwrap_err();
        assert!(matches!(err, GssAuthError::Retryable));
    }

    #[test]
    fn downcall_with_zero_window_is_error() {
        let mut bytes = Vec::new();
        xdr::write_u32(&mut bytes, 1000);
        xdr::write_u32(&mut bytes, 0);
        xdr::write_u32(&mut bytes, 0);
        xdr::write_i32(&mut bytes, EKEYEXPIRED);
        let parsed = parse_downcall(&bytes).unwrap();
        assert_eq!(parsed.error_code, Some(EKEYEXPIRED));
        assert!(matches!(
            categorize_downcall_error(parsed.error_code.unwrap()),
            GssAuthError::KeyExpired
        ));
    }
}
