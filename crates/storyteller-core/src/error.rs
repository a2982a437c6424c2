//! Domain error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::keys::{ParagraphKey, TimelineId};

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A reference was malformed or named a record of the wrong kind.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// User-correctable input that violates a domain bound.
    #[error("validation error: {0}")]
    Validation(String),

    /// The timeline does not exist.
    #[error("story not found: {0}")]
    TimelineNotFound(TimelineId),

    /// The paragraph does not exist in the addressed record group.
    #[error("paragraph not found: {0}")]
    ParagraphNotFound(ParagraphKey),

    /// Another party holds an unexpired lock on the timeline.
    #[error("story {timeline_id} is locked until {until}")]
    StoryLocked {
        /// The locked timeline.
        timeline_id: TimelineId,
        /// When the current lock expires.
        until: DateTime<Utc>,
    },

    /// The timeline has a paragraph awaiting votes.
    #[error("story {0} has a pending paragraph")]
    StoryPending(TimelineId),

    /// A vote was cast while no paragraph is pending.
    #[error("story {0} has no pending paragraph to vote on")]
    VotesNotPossible(TimelineId),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` for both timeline and paragraph lookups that failed.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TimelineNotFound(_) | Self::ParagraphNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_covers_timelines_and_paragraphs() {
        let timeline = TimelineId(7);
        assert!(DomainError::TimelineNotFound(timeline).is_not_found());
        assert!(DomainError::ParagraphNotFound(ParagraphKey::new(timeline, 3)).is_not_found());
        assert!(!DomainError::StoryPending(timeline).is_not_found());
    }

    #[test]
    fn test_paragraph_not_found_message_names_group_and_position() {
        let err = DomainError::ParagraphNotFound(ParagraphKey::new(TimelineId(4), 12));
        assert_eq!(err.to_string(), "paragraph not found: 4/12");
    }
}
