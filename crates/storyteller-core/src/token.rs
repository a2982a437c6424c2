//! Lock capability tokens.
//!
//! A token is a bearer capability, not an identity: whoever presents it may
//! act on the lock it was issued for. Only its digest is ever persisted.

use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::{Digest, Sha256};

/// Length of issued tokens in characters.
pub const TOKEN_LENGTH: usize = 32;

/// Source of fresh capability tokens. In tests a scripted source is injected.
pub trait TokenSource: Send + Sync {
    /// Issues a new, unpredictable token.
    fn issue(&self) -> String;
}

/// Production token source backed by the thread-local CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenSource;

impl TokenSource for RandomTokenSource {
    fn issue(&self) -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect()
    }
}

/// Returns the lowercase hex SHA-256 digest under which a token is stored.
#[must_use]
pub fn digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}
