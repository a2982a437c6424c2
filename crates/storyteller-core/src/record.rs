//! Persisted record shapes shared by the story context and storage engines.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::{ParagraphKey, TimelineId};

/// A paragraph awaiting vote quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingParagraph {
    /// The proposed, already normalised text.
    pub text: String,
    /// Voters in favour of keeping the paragraph.
    pub yes: BTreeSet<String>,
    /// Voters against keeping the paragraph.
    pub no: BTreeSet<String>,
}

/// Stored representation of one timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineRecord {
    /// Timeline identifier, assigned by the storage engine.
    pub id: TimelineId,
    /// Divergence points, root first. Never rewritten after creation.
    pub ancestor_points: Vec<ParagraphKey>,
    /// Number of filled positions, inherited positions included.
    pub length: u32,
    /// SHA-256 digest of the current capability token.
    pub auth_token_digest: Option<String>,
    /// The timeline is reserved until this instant.
    pub lock_expiry: Option<DateTime<Utc>>,
    /// Paragraph awaiting vote quorum.
    pub pending: Option<PendingParagraph>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last committed change.
    pub updated_at: DateTime<Utc>,
}

impl TimelineRecord {
    /// Position of the last inherited paragraph, or 0 for a root timeline.
    #[must_use]
    pub fn branch_position(&self) -> u32 {
        self.ancestor_points.last().map_or(0, |p| p.position)
    }

    /// Returns `true` if `position` falls in this timeline's own range.
    #[must_use]
    pub fn owns_position(&self, position: u32) -> bool {
        position > self.branch_position() && position <= self.length
    }

    /// Number of paragraphs stored in this timeline's own record group.
    #[must_use]
    pub fn own_paragraph_count(&self) -> u32 {
        self.length.saturating_sub(self.branch_position())
    }
}

/// Stored representation of one paragraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParagraphRecord {
    /// Owning record group.
    pub timeline_id: TimelineId,
    /// 1-based position.
    pub position: u32,
    /// Normalised text.
    pub text: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Number of timelines continued or forked from this paragraph. Advisory.
    pub branch_count: u32,
}

impl ParagraphRecord {
    /// Returns the primary key of this paragraph.
    #[must_use]
    pub fn key(&self) -> ParagraphKey {
        ParagraphKey::new(self.timeline_id, self.position)
    }
}

/// Everything needed to create a timeline; the engine assigns the id.
#[derive(Debug, Clone)]
pub struct TimelineDraft {
    /// Divergence points of the new timeline.
    pub ancestor_points: Vec<ParagraphKey>,
    /// Initial length.
    pub length: u32,
    /// Text of the first own paragraph, stored at position `length`.
    pub first_paragraph: Option<String>,
    /// Creation timestamp for the timeline and its first paragraph.
    pub created_at: DateTime<Utc>,
}
