//! Story configuration supplied once at startup.

use chrono::TimeDelta;

use crate::error::DomainError;

/// Tunables for pagination, edit locks, and vote quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoryConfig {
    page_size: u32,
    lock_duration: TimeDelta,
    votes_required: usize,
}

impl StoryConfig {
    /// Default number of paragraphs per page.
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
    /// Default lock lifetime in seconds.
    pub const DEFAULT_LOCK_SECONDS: i64 = 120;
    /// Longest lock lifetime accepted, in seconds (one day).
    pub const MAX_LOCK_SECONDS: i64 = 86_400;
    /// Default number of matching votes that settles a proposal.
    pub const DEFAULT_VOTES_REQUIRED: usize = 3;

    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if any value is zero or negative, or
    /// if `lock_duration` exceeds [`Self::MAX_LOCK_SECONDS`].
    pub fn new(
        page_size: u32,
        lock_duration: TimeDelta,
        votes_required: usize,
    ) -> Result<Self, DomainError> {
        if page_size == 0 {
            return Err(DomainError::Validation(
                "page size must be at least 1".to_owned(),
            ));
        }
        if lock_duration <= TimeDelta::zero() {
            return Err(DomainError::Validation(
                "lock duration must be positive".to_owned(),
            ));
        }
        if lock_duration > TimeDelta::seconds(Self::MAX_LOCK_SECONDS) {
            return Err(DomainError::Validation(format!(
                "lock duration must not exceed {} seconds",
                Self::MAX_LOCK_SECONDS
            )));
        }
        if votes_required == 0 {
            return Err(DomainError::Validation(
                "votes required must be at least 1".to_owned(),
            ));
        }
        Ok(Self {
            page_size,
            lock_duration,
            votes_required,
        })
    }

    /// Paragraphs per page for range pagination.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// How long an edit lock is held.
    #[must_use]
    pub fn lock_duration(&self) -> TimeDelta {
        self.lock_duration
    }

    /// Matching votes needed to accept or reject a pending paragraph.
    #[must_use]
    pub fn votes_required(&self) -> usize {
        self.votes_required
    }
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            page_size: Self::DEFAULT_PAGE_SIZE,
            lock_duration: TimeDelta::seconds(Self::DEFAULT_LOCK_SECONDS),
            votes_required: Self::DEFAULT_VOTES_REQUIRED,
        }
    }
}
