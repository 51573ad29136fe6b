use std::sync::Arc;

use super::{GssMechanism, MechanismSecContext, Service};
use crate::error::GssAuthError;

/// Non-cryptographic reference mechanism used by tests and by callers
/// exercising the state machine without linking a real GSS mechanism.
///
/// `get_mic`/`verify_mic` use an additive checksum; `wrap`/`unwrap` use a
/// reversible XOR keystream. Neither provides real security.
#[derive(Debug)]
pub struct IdentityMechanism {
    enctypes: String,
}

impl Default for IdentityMechanism {
    fn default() -> Self {
        Self {
            enctypes: "identity-null".to_string(),
        }
    }
}

impl GssMechanism for IdentityMechanism {
    fn name(&self) -> &str {
        "identity"
    }

    fn enctypes(&self) -> &str {
        &self.enctypes
    }

    fn pseudoflavor(&self, service: Service) -> Option<u32> {
        Some(match service {
            Service::None => 390000,
            Service::Integrity => 390001,
            Service::Privacy => 390002,
        })
    }

    fn import_sec_context(
        &self,
        sec_context: &[u8],
    ) -> Result<Arc<dyn MechanismSecContext>, GssAuthError> {
        Ok(Arc::new(IdentitySecContext {
            key: sec_context.to_vec(),
        }))
    }
}

#[derive(Debug)]
struct IdentitySecContext {
    key: Vec<u8>,
}

impl IdentitySecContext {
    fn checksum(&self, buf: &[u8]) -> u32 {
        let mut acc: u32 = 0x4753_5331; // "GSS1"
        for (i, byte) in buf.iter().enumerate() {
            let k = self.key.get(i % self.key.len().max(1)).copied().unwrap_or(0);
            acc = acc.wrapping_add(u32::from(*byte ^ k)).rotate_left(7);
        }
        acc
    }

    fn xor(&self, buf: &[u8]) -> Vec<u8> {
        if self.key.is_empty() {
            return buf.to_vec();
        }
        buf.iter()
            .enumerate()
            .map(|(i, b)| b ^ self.key[i % self.key.len()])
            .collect()
    }
}

impl MechanismSecContext for IdentitySecContext {
    fn get_mic(&self, buf: &[u8]) -> Result<Vec<u8>, GssAuthError> {
        Ok(self.checksum(buf).to_be_bytes().to_vec())
    }

    fn verify_mic(&self, buf: &[u8], mic: &[u8]) -> Result<(), GssAuthError> {
        if mic.len() != 4 {
            return Err(GssAuthError::Protocol("mic must be 4 bytes".to_string()));
        }
        let expected = self.checksum(buf).to_be_bytes();
        if expected == mic {
            Ok(())
        } else {
            Err(GssAuthError::Protocol("mic mismatch".to_string()))
        }
    }

    fn wrap(&self, buf: &[u8]) -> Result<Vec<u8>, GssAuthError> {
        Ok(self.xor(buf))
    }

    fn unwrap(&self, buf: &[u8]) -> Result<Vec<u8>, GssAuthError> {
        Ok(self.xor(buf))
    }

    fn delete_context(&self) -> Result<(), GssAuthError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mic_round_trips() {
        let mech = IdentityMechanism::default();
        let ctx = mech.import_sec_context(b"secretkey").unwrap();
        let mic = ctx.get_mic(b"hello world").unwrap();
        ctx.verify_mic(b"hello world", &mic).unwrap();
        assert!(ctx.verify_mic(b"tampered", &mic).is_err());
    }

    #[test]
    fn wrap_unwrap_round_trips() {
        let mech = IdentityMechanism::default();
        let ctx = mech.import_sec_context(b"k").unwrap();
        let wrapped = ctx.wrap(b"payload bytes").unwrap();
        assert_ne!(wrapped, b"payload bytes");
        let unwrapped = ctx.unwrap(&wrapped).unwrap();
        assert_eq!(unwrapped, b"payload bytes");
    }
}
