//! Test repositories — `StoryRepository` implementations for error paths.

use async_trait::async_trait;
use storyteller_core::error::DomainError;
use storyteller_core::keys::{ParagraphKey, TimelineId};
use storyteller_core::record::{ParagraphRecord, TimelineDraft, TimelineRecord};
use storyteller_core::repository::{StoryRepository, TimelineTxn, TxnWork};

fn connection_refused() -> DomainError {
    DomainError::Infrastructure("connection refused".into())
}

/// A story repository that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingStoryRepository;

#[async_trait]
impl StoryRepository for FailingStoryRepository {
    async fn insert_timeline(
        &self,
        _draft: TimelineDraft,
    ) -> Result<(TimelineRecord, Option<ParagraphRecord>), DomainError> {
        Err(connection_refused())
    }

    async fn load_timeline(&self, _id: TimelineId) -> Result<Option<TimelineRecord>, DomainError> {
        Err(connection_refused())
    }

    async fn first_timeline(&self) -> Result<Option<TimelineRecord>, DomainError> {
        Err(connection_refused())
    }

    async fn load_paragraphs(
        &self,
        _keys: &[ParagraphKey],
    ) -> Result<Vec<Option<ParagraphRecord>>, DomainError> {
        Err(connection_refused())
    }

    async fn forks_at(&self, _key: ParagraphKey) -> Result<Vec<TimelineRecord>, DomainError> {
        Err(connection_refused())
    }

    async fn transact(
        &self,
        _id: TimelineId,
        _work: &TxnWork<'_>,
    ) -> Result<TimelineTxn, DomainError> {
        Err(connection_refused())
    }

    async fn increment_branch_count(&self, _key: ParagraphKey) -> Result<(), DomainError> {
        Err(connection_refused())
    }
}

/// Wraps a working repository but fails every out-of-transaction
/// `branch_count` increment, to exercise the best-effort counter path.
#[derive(Debug)]
pub struct BranchCountFailingRepository<R> {
    inner: R,
}

impl<R> BranchCountFailingRepository<R> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Returns the wrapped repository.
    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: StoryRepository> StoryRepository for BranchCountFailingRepository<R> {
    async fn insert_timeline(
        &self,
        draft: TimelineDraft,
    ) -> Result<(TimelineRecord, Option<ParagraphRecord>), DomainError> {
        self.inner.insert_timeline(draft).await
    }

    async fn load_timeline(&self, id: TimelineId) -> Result<Option<TimelineRecord>, DomainError> {
        self.inner.load_timeline(id).await
    }

    async fn first_timeline(&self) -> Result<Option<TimelineRecord>, DomainError> {
        self.inner.first_timeline().await
    }

    async fn load_paragraphs(
        &self,
        keys: &[ParagraphKey],
    ) -> Result<Vec<Option<ParagraphRecord>>, DomainError> {
        self.inner.load_paragraphs(keys).await
    }

    async fn forks_at(&self, key: ParagraphKey) -> Result<Vec<TimelineRecord>, DomainError> {
        self.inner.forks_at(key).await
    }

    async fn transact(
        &self,
        id: TimelineId,
        work: &TxnWork<'_>,
    ) -> Result<TimelineTxn, DomainError> {
        self.inner.transact(id, work).await
    }

    async fn increment_branch_count(&self, key: ParagraphKey) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure(format!(
            "branch count write for {key} timed out"
        )))
    }
}
