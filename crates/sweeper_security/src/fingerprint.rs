//! # Request Fingerprinting
//!
//! A fingerprint is a short, stable grouping key derived from request
//! metadata. It feeds the per-fingerprint rate limit and nothing else: it is
//! NOT an identity proof, and two clients behind the same proxy with the
//! same browser legitimately share one.
//!
//! ## Hash Providers
//!
//! | Provider | Strength            | Use                                   |
//! |----------|---------------------|---------------------------------------|
//! | SHA-256  | Cryptographic       | Default                               |
//! | FNV-1a   | NOT cryptographic   | Hosts without a working SHA-256 only  |
//!
//! The provider is picked once at startup. The FNV-1a fallback is trivially
//! collidable, which only lets an attacker share someone else's rate-limit
//! bucket.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};
use sweeper_core::HashChoice;

/// Hex characters kept from a fingerprint digest.
pub const FINGERPRINT_LEN: usize = 12;

/// Hex characters kept from an entity-tag digest.
pub const ETAG_LEN: usize = 16;

/// Field separator inside the fingerprint pre-image.
const SEPARATOR: char = ':';

/// One-way hash backing fingerprints and entity tags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HashProvider {
    /// SHA-256.
    #[default]
    Sha256,
    /// 64-bit FNV-1a. Availability fallback, weak against collisions.
    Fnv1a,
}

impl HashProvider {
    /// Provider named in configuration.
    #[must_use]
    pub const fn from_choice(choice: HashChoice) -> Self {
        match choice {
            HashChoice::Sha256 => Self::Sha256,
            HashChoice::Fnv1a => Self::Fnv1a,
        }
    }

    /// True if collisions are computationally hard to find.
    #[must_use]
    pub const fn is_cryptographic(self) -> bool {
        matches!(self, Self::Sha256)
    }

    /// Lowercase hex digest of `input`.
    ///
    /// SHA-256 yields 64 characters, FNV-1a yields 16.
    #[must_use]
    pub fn hex_digest(self, input: &[u8]) -> String {
        match self {
            Self::Sha256 => to_hex(&Sha256::digest(input)),
            Self::Fnv1a => format!("{:016x}", fnv1a(input)),
        }
    }
}

/// 64-bit FNV-1a.
///
/// **NOT CRYPTOGRAPHICALLY SECURE**
#[inline]
fn fnv1a(input: &[u8]) -> u64 {
    const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;

    let mut hash = FNV_OFFSET;
    for &byte in input {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing to a String cannot fail.
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Request metadata that goes into a fingerprint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientMeta {
    /// Client address as seen by the edge.
    pub ip: String,
    /// `User-Agent`.
    pub user_agent: String,
    /// `Accept-Language`.
    pub accept_language: String,
    /// `Accept-Encoding`.
    pub accept_encoding: String,
}

/// Derives fingerprints and entity tags with one fixed provider.
#[derive(Clone, Copy, Debug, Default)]
pub struct Fingerprinter {
    provider: HashProvider,
}

impl Fingerprinter {
    /// Creates a fingerprinter.
    #[must_use]
    pub const fn new(provider: HashProvider) -> Self {
        Self { provider }
    }

    /// The configured provider.
    #[must_use]
    pub const fn provider(&self) -> HashProvider {
        self.provider
    }

    /// 12-hex-character grouping key for a client.
    #[must_use]
    pub fn fingerprint(&self, meta: &ClientMeta) -> String {
        let mut preimage = String::with_capacity(
            meta.ip.len() + meta.user_agent.len() + meta.accept_language.len() + meta.accept_encoding.len() + 3,
        );
        for (i, part) in [&meta.ip, &meta.user_agent, &meta.accept_language, &meta.accept_encoding]
            .into_iter()
            .enumerate()
        {
            if i > 0 {
                preimage.push(SEPARATOR);
            }
            preimage.push_str(part);
        }
        truncated(self.provider.hex_digest(preimage.as_bytes()), FINGERPRINT_LEN)
    }

    /// 16-hex-character entity tag of a serialized payload.
    #[must_use]
    pub fn entity_tag(&self, payload: &[u8]) -> String {
        truncated(self.provider.hex_digest(payload), ETAG_LEN)
    }
}

fn truncated(mut hex: String, len: usize) -> String {
    hex.truncate(len);
    hex
}

/// Compares two strings in time independent of where they first differ.
///
/// Length mismatch returns early; lengths are not secret here.
#[must_use]
pub fn secure_compare(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
