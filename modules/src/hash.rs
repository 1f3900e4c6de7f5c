//! The `HashRequest` interface
//!
//! Providers publish [`HASH_INTERFACE`] and answer two requests:
//!
//! - [`REQ_DIGEST`] with a [`HashInput`] payload, replying with the digest bytes
//! - [`REQ_HASHER`] with a `()` payload, replying with a [`Hasher`] the caller may keep
//!   for as long as it holds a use of the interface

use std::sync::Arc;

pub const HASH_INTERFACE: &str = "HashRequest";

pub const REQ_DIGEST: &str = "DIGEST";
pub const REQ_HASHER: &str = "HASHER";

/// Data to hash
#[derive(Debug, Clone)]
pub struct HashInput(pub Vec<u8>);

/// A hash function handed out by a provider
pub type Hasher = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Lowercase hex rendering of a digest
pub fn to_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
