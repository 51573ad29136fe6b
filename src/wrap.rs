//! Per-service-mode wire transforms (§4.6): the AUTH_GSS credential header
//! and verifier, and the NONE/INTEGRITY/PRIVACY request/response framings.

use std::io::Cursor;

use crate::context::{Context, ProcessingCode};
use crate::error::GssAuthError;
use crate::mechanism::Service;
use crate::xdr;

/// Build the AUTH_GSS credential header plus verifier for an outgoing call.
/// `xid_and_body` is the portion of the request the verifier's MIC must
/// cover, per the wire format in §6.
pub fn marshal_credential(
    ctx: &Context,
    service: Service,
    xid_and_body: &[u8],
) -> Result<(Vec<u8>, u32), GssAuthError> {
    let seqno = ctx.next_seq();

    let mut cred = Vec::new();
    xdr::write_u32(&mut cred, 1); // RPC_GSS_VERSION
    xdr::write_u32(&mut cred, ProcessingCode::Data.wire_code());
    xdr::write_u32(&mut cred, seqno);
    xdr::write_u32(&mut cred, service.wire_code());
    xdr::write_opaque(&mut cred, &ctx.wire_context);

    let mut header = Vec::new();
    xdr::write_u32(&mut header, 6); // RPC_AUTH_GSS
    xdr::write_opaque(&mut header, &cred);

    let mut mic_input = xid_and_body.to_vec();
    mic_input.extend_from_slice(&cred);
    let mic = ctx.get_mic(&mic_input)?;

    xdr::write_u32(&mut header, 6); // RPC_AUTH_GSS verifier flavor
    xdr::write_opaque(&mut header, &mic);

    Ok((header, seqno))
}

/// Build the AUTH_GSS credential header for a context-destruction call: the
/// processing code is temporarily DESTROY and the body is transmitted
/// unwrapped (service NONE) regardless of the credential's configured
/// service, since a destroy payload carries no mechanism-dependent body.
pub fn marshal_destroy(ctx: &Context, xid_and_body: &[u8]) -> Result<(Vec<u8>, u32), GssAuthError> {
    let seqno = ctx.next_seq();

    let mut cred = Vec::new();
    xdr::write_u32(&mut cred, 1); // RPC_GSS_VERSION
    xdr::write_u32(&mut cred, ProcessingCode::Destroy.wire_code());
    xdr::write_u32(&mut cred, seqno);
    xdr::write_u32(&mut cred, Service::None.wire_code());
    xdr::write_opaque(&mut cred, &ctx.wire_context);

    let mut header = Vec::new();
    xdr::write_u32(&mut header, 6); // RPC_AUTH_GSS
    xdr::write_opaque(&mut header, &cred);

    let mut mic_input = xid_and_body.to_vec();
    mic_input.extend_from_slice(&cred);
    let mic = ctx.get_mic(&mic_input)?;

    xdr::write_u32(&mut header, 6); // RPC_AUTH_GSS verifier flavor
    xdr::write_opaque(&mut header, &mic);

    Ok((header, seqno))
}

/// Verify a reply verifier's MIC covers the sequence number of the
/// matching request.
pub fn validate_verifier(ctx: &Context, seqno: u32, verifier_mic: &[u8]) -> Result<(), GssAuthError> {
    let mut buf = Vec::new();
    xdr::write_u32(&mut buf, seqno);
    ctx.verify_mic(&buf, verifier_mic)
}

/// Apply the service-mode-specific transform to an outgoing request body.
pub fn wrap_request(ctx: &Context, service: Service, seqno: u32, body: &[u8]) -> Result<Vec<u8>, GssAuthError> {
    match service {
        Service::None => Ok(body.to_vec()),
        Service::Integrity => {
            let mut plain = Vec::new();
            xdr::write_u32(&mut plain, seqno);
            plain.extend_from_slice(body);
            let mic = ctx.get_mic(&plain)?;
            let mut out = Vec::new();
            xdr::write_u32(&mut out, plain.len() as u32);
            out.extend_from_slice(&plain);
            xdr::write_opaque(&mut out, &mic);
            Ok(out)
        }
        Service::Privacy => {
            let mut plain = Vec::new();
            xdr::write_u32(&mut plain, seqno);
            plain.extend_from_slice(body);
            let wrapped = ctx.wrap(&plain)?;
            let mut out = Vec::new();
            xdr::write_u32(&mut out, wrapped.len() as u32);
            out.extend_from_slice(&wrapped);
            xdr::pad4(&mut out, wrapped.len());
            Ok(out)
        }
    }
}

/// Invert [`wrap_request`], rejecting a response whose embedded sequence
/// number does not match the request's.
pub fn unwrap_response(
    ctx: &Context,
    service: Service,
    expect_seqno: u32,
    reply: &[u8],
) -> Result<Vec<u8>, GssAuthError> {
    match service {
        Service::None => Ok(reply.to_vec()),
        Service::Integrity => {
            let mut cursor = Cursor::new(reply);
            let integ_len = xdr::read_u32(&mut cursor)? as usize;
            let start = cursor.position() as usize;
            let plain = reply
                .get(start..start + integ_len)
                .ok_or_else(|| GssAuthError::Protocol("short integrity body".to_string()))?;
            let mut mic_cursor = Cursor::new(&reply[start + integ_len..]);
            let mic = xdr::read_opaque(&mut mic_cursor)?;
            ctx.verify_mic(plain, &mic)?;
            let mut seq_cursor = Cursor::new(plain);
            let seqno = xdr::read_u32(&mut seq_cursor)?;
            if seqno != expect_seqno {
                return Err(GssAuthError::Protocol("sequence mismatch".to_string()));
            }
            Ok(plain[4..].to_vec())
        }
        Service::Privacy => {
            let mut cursor = Cursor::new(reply);
            let opaque_len = xdr::read_u32(&mut cursor)? as usize;
            let start = cursor.position() as usize;
            let wrapped = reply
                .get(start..start + opaque_len)
                .ok_or_else(|| GssAuthError::Protocol("short privacy body".to_string()))?;
            let plain = ctx.unwrap(wrapped)?;
            let mut seq_cursor = Cursor::new(plain.as_slice());
            let seqno = xdr::read_u32(&mut seq_cursor)?;
            if seqno != expect_seqno {
                return Err(GssAuthError::Protocol("sequence mismatch".to_string()));
            }
            Ok(plain[4..].to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mechanism::identity::IdentityMechanism;
    use crate::mechanism::GssMechanism;
    use std::time::{Duration, Instant};

    fn ctx() -> Context {
        let mech = IdentityMechanism::default();
        let sec = mech.import_sec_context(b"wrapkey").unwrap();
        Context::new(
            b"wirectx".to_vec(),
            sec,
            Instant::now() + Duration::from_secs(60),
            128,
            None,
        )
    }

    #[test]
    fn privacy_round_trip_with_padding() {
        let c = ctx();
        let seqno = c.next_seq();
        let payload = vec![0x42u8; 8192];
        let wrapped = wrap_request(&c, Service::Privacy, seqno, &payload).unwrap();
        assert_eq!(wrapped.len() % 4, 0);
        let unwrapped = unwrap_response(&c, Service::Privacy, seqno, &wrapped).unwrap();
        assert_eq!(unwrapped, payload);
    }

    #[test]
    fn integrity_round_trip() {
        let c = ctx();
        let seqno = c.next_seq();
        let payload = b"request body".to_vec();
        let wrapped = wrap_request(&c, Service::Integrity, seqno, &payload).unwrap();
        let unwrapped = unwrap_response(&c, Service::Integrity, seqno, &wrapped).unwrap();
        assert_eq!(unwrapped, payload);
    }

    #[test]
    fn mismatched_sequence_is_rejected_for_integrity_and_privacy() {
        let c = ctx();
        for service in [Service::Integrity, Service::Privacy] {
            let seqno = c.next_seq();
            let payload = b"body".to_vec();
            let wrapped = wrap_request(&c, service, seqno, &payload).unwrap();
            assert!(unwrap_response(&c, service, seqno + 1, &wrapped).is_err());
        }
    }

    #[test]
    fn marshal_destroy_uses_destroy_processing_code_and_none_service() {
        let c = ctx();
        let (header, _seqno) = marshal_destroy(&c, b"xid").unwrap();
        let mut cursor = Cursor::new(header.as_slice());
        let flavor = xdr::read_u32(&mut cursor).unwrap();
        assert_eq!(flavor, 6); // RPC_AUTH_GSS
        let cred = xdr::read_opaque(&mut cursor).unwrap();
        let mut cred_cursor = Cursor::new(cred.as_slice());
        assert_eq!(xdr::read_u32(&mut cred_cursor).unwrap(), 1); // RPC_GSS_VERSION
        assert_eq!(xdr::read_u32(&mut cred_cursor).unwrap(), ProcessingCode::Destroy.wire_code());
        let _seqno_field = xdr::read_u32(&mut cred_cursor).unwrap();
        assert_eq!(xdr::read_u32(&mut cred_cursor).unwrap(), Service::None.wire_code());
    }
}
