//! Story repository abstraction.
//!
//! The repository is the persistence engine the story context calls into.
//! Each timeline's own record group is its unit of atomicity: all mutations
//! of one timeline go through [`StoryRepository::transact`], which the engine
//! serializes and retries as it sees fit. The story context never loops on
//! contention itself.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::keys::{ParagraphKey, TimelineId};
use crate::record::{ParagraphRecord, TimelineDraft, TimelineRecord};

/// Staged read-modify-write of one timeline's record group.
///
/// The engine hands a fresh snapshot to the work closure, which mutates
/// `timeline` and stages paragraphs and counter bumps. Nothing is written
/// unless the closure returns `Ok`; a closure that leaves the transaction
/// untouched commits no writes at all.
#[derive(Debug, Clone)]
pub struct TimelineTxn {
    /// The timeline snapshot, mutated in place by the work closure.
    pub timeline: TimelineRecord,
    /// Paragraphs to create in this timeline's own group.
    pub new_paragraphs: Vec<ParagraphRecord>,
    /// Own positions whose `branch_count` is incremented.
    pub branch_increments: Vec<u32>,
    original: TimelineRecord,
}

impl TimelineTxn {
    /// Starts a transaction over a snapshot of `timeline`.
    #[must_use]
    pub fn begin(timeline: TimelineRecord) -> Self {
        Self {
            original: timeline.clone(),
            timeline,
            new_paragraphs: Vec::new(),
            branch_increments: Vec::new(),
        }
    }

    /// Returns `true` if committing would write anything.
    #[must_use]
    pub fn has_writes(&self) -> bool {
        self.timeline != self.original
            || !self.new_paragraphs.is_empty()
            || !self.branch_increments.is_empty()
    }

    /// Checks that the staged writes keep the record group contiguous.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the identity changed, the
    /// length shrank, or staged paragraphs do not exactly fill the positions
    /// between the old and new length.
    pub fn validate(&self) -> Result<(), DomainError> {
        let before = &self.original;
        let after = &self.timeline;
        if after.id != before.id || after.ancestor_points != before.ancestor_points {
            return Err(DomainError::Infrastructure(format!(
                "transaction on story {} rewrote its identity",
                before.id
            )));
        }
        if after.length < before.length {
            return Err(DomainError::Infrastructure(format!(
                "transaction on story {} shrank its length",
                before.id
            )));
        }
        let expected = before.length + 1..=after.length;
        let staged = self.new_paragraphs.iter().map(|p| p.position);
        if !staged.eq(expected)
            || self
                .new_paragraphs
                .iter()
                .any(|p| p.timeline_id != before.id)
        {
            return Err(DomainError::Infrastructure(format!(
                "transaction on story {} staged non-contiguous paragraphs",
                before.id
            )));
        }
        if let Some(position) = self
            .branch_increments
            .iter()
            .find(|position| !before.owns_position(**position))
        {
            return Err(DomainError::Infrastructure(format!(
                "transaction on story {} bumped foreign position {position}",
                before.id
            )));
        }
        Ok(())
    }
}

/// Work run inside a timeline transaction. May be invoked more than once.
pub type TxnWork<'a> = dyn Fn(&mut TimelineTxn) -> Result<(), DomainError> + Send + Sync + 'a;

/// Repository trait for timelines and their paragraphs.
#[async_trait]
pub trait StoryRepository: Send + Sync {
    /// Creates a timeline, and its first paragraph if the draft carries one,
    /// as one atomic unit. Returns the stored records.
    async fn insert_timeline(
        &self,
        draft: TimelineDraft,
    ) -> Result<(TimelineRecord, Option<ParagraphRecord>), DomainError>;

    /// Loads a timeline, or `None` if it does not exist.
    async fn load_timeline(&self, id: TimelineId) -> Result<Option<TimelineRecord>, DomainError>;

    /// Loads the oldest timeline, or `None` if the store is empty.
    async fn first_timeline(&self) -> Result<Option<TimelineRecord>, DomainError>;

    /// Loads paragraphs by key, preserving order; missing keys yield `None`.
    /// A snapshot read with no transactional guarantees.
    async fn load_paragraphs(
        &self,
        keys: &[ParagraphKey],
    ) -> Result<Vec<Option<ParagraphRecord>>, DomainError>;

    /// Lists timelines whose last ancestor point is `key`, oldest first.
    async fn forks_at(&self, key: ParagraphKey) -> Result<Vec<TimelineRecord>, DomainError>;

    /// Runs `work` as one atomic read-modify-write of timeline `id` and
    /// returns the committed transaction.
    ///
    /// Returns `DomainError::TimelineNotFound` if the timeline is absent, and
    /// any error `work` returns, with nothing written.
    async fn transact(&self, id: TimelineId, work: &TxnWork<'_>)
    -> Result<TimelineTxn, DomainError>;

    /// Increments a paragraph's advisory `branch_count` outside any
    /// transaction.
    async fn increment_branch_count(&self, key: ParagraphKey) -> Result<(), DomainError>;
}
