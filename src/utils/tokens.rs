//! Random token generation and keyed hashing helpers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Create a new opaque token of 32 random bytes, base64url encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a token so raw values never touch the store.
pub fn sha256_hex(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// HMAC-SHA256 of `payload` under `secret`, hex encoded.
pub fn hmac_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex HMAC-SHA256 signature in constant time.
pub fn hmac_verify(secret: &[u8], payload: &[u8], signature_hex: &str) -> bool {
    let signature = match hex::decode(signature_hex) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(m) => m,
        Err(_) => return false,
    };

    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

/// Compare two secrets without leaking the position of the first mismatch.
///
/// Both values are MACed under `key` and the digests are compared with
/// `verify_slice`, so neither length nor content affects timing.
pub fn secrets_match(key: &[u8], expected: &str, presented: &str) -> bool {
    let expected_mac = hmac_hex(key, expected.as_bytes());
    hmac_verify(key, presented.as_bytes(), &expected_mac)
}
