//! Caller-side password digests for the CLI.
//!
//! The store compares opaque bytes and never sees a password. Callers pick
//! the scheme; this one is HMAC-SHA256 keyed by the deployment's
//! `digest_key`, over `username || 0x00 || password`. It is deterministic, so
//! the same password always yields the same bytes to compare.

use crate::types::PasswordHash;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

pub fn password_digest(key: &[u8], username: &str, password: &str) -> PasswordHash {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(username.as_bytes());
    mac.update(&[0]);
    mac.update(password.as_bytes());
    let bytes = Zeroizing::new(mac.finalize().into_bytes().to_vec());
    PasswordHash::from(bytes.as_slice())
}
