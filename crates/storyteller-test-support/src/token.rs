//! Test token source — scripted `TokenSource` implementation for tests.

use std::sync::Mutex;

use storyteller_core::token::TokenSource;

/// A token source that hands out `token-1`, `token-2`, ... in order, so tests
/// can predict which capability each lock acquisition returns.
#[derive(Debug, Default)]
pub struct SequenceTokenSource {
    issued: Mutex<u32>,
}

impl SequenceTokenSource {
    /// Creates a source whose first token is `token-1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenSource for SequenceTokenSource {
    fn issue(&self) -> String {
        let mut issued = self.issued.lock().unwrap();
        *issued += 1;
        format!("token-{}", *issued)
    }
}
