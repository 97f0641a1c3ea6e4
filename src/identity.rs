//! Requester identity helpers.
//!
//! A requester is identified by the SHA-256 hex digest of key material the
//! client never sends in raw form. Rows written by the previous asset
//! generation may still carry a raw xpub instead of a digest; those are
//! normalized before they are used as migration-cache keys.

use sha2::{Digest, Sha256};

pub const WALLET_ID_HEX_LEN: usize = 64;

/// Return whether the given value is a well-formed requester identity
/// (a 64 character hex digest).
pub fn is_wallet_id_valid(wallet_id: &str) -> bool {
    wallet_id.len() == WALLET_ID_HEX_LEN
        && wallet_id.chars().all(|c| c.is_ascii_hexdigit())
}

/// SHA-256 hex digest of an arbitrary string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable digest form of a stored requester identity. Identities that are
/// already digests pass through (lowercased); longer legacy identifiers are
/// hashed.
pub fn normalize_requester_id(stored: &str) -> String {
    if is_wallet_id_valid(stored) {
        stored.to_ascii_lowercase()
    } else {
        sha256_hex(stored)
    }
}
