//! HMAC-SHA256 tags over canonical command text.

use core::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::canon::{KeyValue, SignedRequest, TAG_KEY, canonicalize};
use crate::error::{AuthError, AuthResult};

type HmacSha256 = Hmac<Sha256>;

const TAG_BYTES: usize = 32;

/// Signs and verifies with one shared secret.
#[derive(Clone)]
pub struct Authenticator {
    secret: Vec<u8>,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Authenticator {
    pub fn new(secret: impl Into<Vec<u8>>) -> AuthResult<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(AuthError::EmptySecret);
        }
        Ok(Self { secret })
    }

    fn mac(&self, message: &str) -> AuthResult<HmacSha256> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| AuthError::InvalidKey)?;
        mac.update(message.as_bytes());
        Ok(mac)
    }

    /// Lowercase hex tag of `message`.
    pub fn sign_hex(&self, message: &str) -> AuthResult<String> {
        Ok(format!("{:x}", self.mac(message)?.finalize().into_bytes()))
    }

    /// Check `tag_hex` (either case) against `message` in constant time.
    pub fn verify(&self, message: &str, tag_hex: &str) -> AuthResult<()> {
        let tag = decode_tag(tag_hex.trim())?;
        self.mac(message)?
            .verify_slice(&tag)
            .map_err(|_| AuthError::Mismatch)
    }

    pub fn verify_request(&self, request: &SignedRequest) -> AuthResult<()> {
        let tag = request.tag.as_deref().ok_or(AuthError::MissingTag)?;
        let canonical = request.canonical();
        debug!(%canonical, "verifying command signature");
        self.verify(&canonical, tag)
    }

    /// Canonical query string of `pairs` with its tag appended.
    pub fn sign_query(&self, pairs: &[KeyValue]) -> AuthResult<String> {
        let canonical = canonicalize(pairs);
        let tag = self.sign_hex(&canonical)?;
        Ok(if canonical.is_empty() {
            format!("{TAG_KEY}={tag}")
        } else {
            format!("{canonical}&{TAG_KEY}={tag}")
        })
    }
}

fn decode_tag(hex: &str) -> AuthResult<[u8; TAG_BYTES]> {
    let bad = AuthError::BadTagEncoding {
        expected: TAG_BYTES * 2,
    };
    let digits = hex.as_bytes();
    if digits.len() != TAG_BYTES * 2 {
        return Err(bad);
    }
    let mut out = [0u8; TAG_BYTES];
    for (byte, pair) in out.iter_mut().zip(digits.chunks_exact(2)) {
        let hi = (pair[0] as char).to_digit(16);
        let lo = (pair[1] as char).to_digit(16);
        match (hi, lo) {
            (Some(hi), Some(lo)) => *byte = ((hi << 4) | lo) as u8,
            _ => return Err(bad),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231 test case 2.
    const RFC_KEY: &str = "Jefe";
    const RFC_DATA: &str = "what do ya want for nothing?";
    const RFC_TAG: &str = "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843";

    #[test]
    fn matches_rfc_4231() {
        let auth = Authenticator::new(RFC_KEY).unwrap();
        assert_eq!(auth.sign_hex(RFC_DATA).unwrap(), RFC_TAG);
        assert!(auth.verify(RFC_DATA, RFC_TAG).is_ok());
    }

    #[test]
    fn uppercase_tag_accepted() {
        let auth = Authenticator::new(RFC_KEY).unwrap();
        assert!(auth.verify(RFC_DATA, &RFC_TAG.to_ascii_uppercase()).is_ok());
    }

    #[test]
    fn wrong_tag_rejected() {
        let auth = Authenticator::new(RFC_KEY).unwrap();
        let mut tag = RFC_TAG.to_string();
        tag.replace_range(0..1, "6");
        assert_eq!(auth.verify(RFC_DATA, &tag), Err(AuthError::Mismatch));
        assert_eq!(
            auth.verify(RFC_DATA, "abc"),
            Err(AuthError::BadTagEncoding { expected: 64 })
        );
        assert!(auth.verify(RFC_DATA, &"zz".repeat(32)).is_err());
    }

    #[test]
    fn empty_secret_refused() {
        assert_eq!(Authenticator::new("").unwrap_err(), AuthError::EmptySecret);
    }

    #[test]
    fn debug_hides_secret() {
        let auth = Authenticator::new("hunter2").unwrap();
        assert!(!format!("{auth:?}").contains("hunter2"));
    }
}
