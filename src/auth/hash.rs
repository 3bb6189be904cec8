use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Keyed hash used to derive device credential ids.
pub trait HashProvider: Send + Sync {
    /// Hex-encoded MAC of `message` keyed by `key`.
    fn hmac(&self, message: &str, key: &str) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HmacSha256Provider;

impl HashProvider for HmacSha256Provider {
    fn hmac(&self, message: &str, key: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(key.as_bytes())
            .expect("HMAC-SHA-256 accepts keys of any size");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// SHA-256 of an opaque token, hex encoded, for storing tokens at rest.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
