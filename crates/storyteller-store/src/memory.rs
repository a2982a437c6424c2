//! In-memory implementation of the `StoryRepository` trait.
//!
//! A single mutex guards the whole store, so every transaction is trivially
//! serialized. Used by the server when no database is configured and by
//! tests throughout the workspace.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use storyteller_core::error::DomainError;
use storyteller_core::keys::{ParagraphKey, TimelineId};
use storyteller_core::record::{ParagraphRecord, TimelineDraft, TimelineRecord};
use storyteller_core::repository::{StoryRepository, TimelineTxn, TxnWork};

#[derive(Debug, Default)]
struct MemoryState {
    last_id: i64,
    timelines: BTreeMap<TimelineId, TimelineRecord>,
    paragraphs: HashMap<ParagraphKey, ParagraphRecord>,
}

/// Process-local story repository.
#[derive(Debug, Default)]
pub struct MemoryStoryRepository {
    state: Mutex<MemoryState>,
}

impl MemoryStoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, DomainError> {
        self.state
            .lock()
            .map_err(|_| DomainError::Infrastructure("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl StoryRepository for MemoryStoryRepository {
    async fn insert_timeline(
        &self,
        draft: TimelineDraft,
    ) -> Result<(TimelineRecord, Option<ParagraphRecord>), DomainError> {
        let mut state = self.state()?;
        state.last_id += 1;
        let timeline = TimelineRecord {
            id: TimelineId(state.last_id),
            ancestor_points: draft.ancestor_points,
            length: draft.length,
            auth_token_digest: None,
            lock_expiry: None,
            pending: None,
            created_at: draft.created_at,
            updated_at: draft.created_at,
        };
        let paragraph = draft.first_paragraph.map(|text| ParagraphRecord {
            timeline_id: timeline.id,
            position: timeline.length,
            text,
            created_at: draft.created_at,
            branch_count: 0,
        });
        if let Some(paragraph) = &paragraph {
            state.paragraphs.insert(paragraph.key(), paragraph.clone());
        }
        state.timelines.insert(timeline.id, timeline.clone());
        Ok((timeline, paragraph))
    }

    async fn load_timeline(&self, id: TimelineId) -> Result<Option<TimelineRecord>, DomainError> {
        Ok(self.state()?.timelines.get(&id).cloned())
    }

    async fn first_timeline(&self) -> Result<Option<TimelineRecord>, DomainError> {
        Ok(self.state()?.timelines.values().next().cloned())
    }

    async fn load_paragraphs(
        &self,
        keys: &[ParagraphKey],
    ) -> Result<Vec<Option<ParagraphRecord>>, DomainError> {
        let state = self.state()?;
        Ok(keys
            .iter()
            .map(|key| state.paragraphs.get(key).cloned())
            .collect())
    }

    async fn forks_at(&self, key: ParagraphKey) -> Result<Vec<TimelineRecord>, DomainError> {
        Ok(self
            .state()?
            .timelines
            .values()
            .filter(|timeline| timeline.ancestor_points.last() == Some(&key))
            .cloned()
            .collect())
    }

    async fn transact(
        &self,
        id: TimelineId,
        work: &TxnWork<'_>,
    ) -> Result<TimelineTxn, DomainError> {
        let mut state = self.state()?;
        let snapshot = state
            .timelines
            .get(&id)
            .cloned()
            .ok_or(DomainError::TimelineNotFound(id))?;

        let mut txn = TimelineTxn::begin(snapshot);
        work(&mut txn)?;
        if !txn.has_writes() {
            return Ok(txn);
        }
        txn.validate()?;

        for paragraph in &txn.new_paragraphs {
            if state.paragraphs.contains_key(&paragraph.key()) {
                return Err(DomainError::Infrastructure(format!(
                    "paragraph {} already exists",
                    paragraph.key()
                )));
            }
        }
        for position in &txn.branch_increments {
            if let Some(paragraph) = state.paragraphs.get_mut(&ParagraphKey::new(id, *position)) {
                paragraph.branch_count += 1;
            }
        }
        for paragraph in &txn.new_paragraphs {
            state.paragraphs.insert(paragraph.key(), paragraph.clone());
        }
        state.timelines.insert(id, txn.timeline.clone());
        Ok(txn)
    }

    async fn increment_branch_count(&self, key: ParagraphKey) -> Result<(), DomainError> {
        let mut state = self.state()?;
        let paragraph = state
            .paragraphs
            .get_mut(&key)
            .ok_or(DomainError::ParagraphNotFound(key))?;
        paragraph.branch_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn root_draft() -> TimelineDraft {
        TimelineDraft {
            ancestor_points: Vec::new(),
            length: 0,
            first_paragraph: None,
            created_at: fixed_now(),
        }
    }

    fn append_work(text: &'static str) -> impl Fn(&mut TimelineTxn) -> Result<(), DomainError> {
        move |txn: &mut TimelineTxn| {
            txn.timeline.length += 1;
            txn.new_paragraphs.push(ParagraphRecord {
                timeline_id: txn.timeline.id,
                position: txn.timeline.length,
                text: text.to_owned(),
                created_at: fixed_now(),
                branch_count: 0,
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let repo = MemoryStoryRepository::new();

        let (first, _) = repo.insert_timeline(root_draft()).await.unwrap();
        let (second, _) = repo.insert_timeline(root_draft()).await.unwrap();

        assert_eq!(first.id, TimelineId(1));
        assert_eq!(second.id, TimelineId(2));
        assert_eq!(repo.first_timeline().await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_insert_with_first_paragraph_stores_it_at_length() {
        let repo = MemoryStoryRepository::new();
        let draft = TimelineDraft {
            ancestor_points: vec![ParagraphKey::new(TimelineId(9), 3)],
            length: 4,
            first_paragraph: Some("A fork begins".to_owned()),
            created_at: fixed_now(),
        };

        let (timeline, paragraph) = repo.insert_timeline(draft).await.unwrap();

        let paragraph = paragraph.unwrap();
        assert_eq!(paragraph.key(), ParagraphKey::new(timeline.id, 4));
        let loaded = repo
            .load_paragraphs(&[paragraph.key(), ParagraphKey::new(timeline.id, 5)])
            .await
            .unwrap();
        assert_eq!(loaded[0].as_ref(), Some(&paragraph));
        assert!(loaded[1].is_none());
    }

    #[tokio::test]
    async fn test_transact_commits_length_and_paragraph_together() {
        let repo = MemoryStoryRepository::new();
        let (timeline, _) = repo.insert_timeline(root_draft()).await.unwrap();

        let txn = repo
            .transact(timeline.id, &append_work("First words"))
            .await
            .unwrap();

        assert_eq!(txn.timeline.length, 1);
        let stored = repo.load_timeline(timeline.id).await.unwrap().unwrap();
        assert_eq!(stored.length, 1);
        let loaded = repo
            .load_paragraphs(&[ParagraphKey::new(timeline.id, 1)])
            .await
            .unwrap();
        assert_eq!(loaded[0].as_ref().unwrap().text, "First words");
    }

    #[tokio::test]
    async fn test_transact_error_writes_nothing() {
        let repo = MemoryStoryRepository::new();
        let (timeline, _) = repo.insert_timeline(root_draft()).await.unwrap();

        let result = repo
            .transact(timeline.id, &|txn: &mut TimelineTxn| {
                txn.timeline.length += 1;
                Err(DomainError::StoryPending(txn.timeline.id))
            })
            .await;

        assert!(matches!(result, Err(DomainError::StoryPending(_))));
        let stored = repo.load_timeline(timeline.id).await.unwrap().unwrap();
        assert_eq!(stored.length, 0);
    }

    #[tokio::test]
    async fn test_transact_unknown_timeline_is_not_found() {
        let repo = MemoryStoryRepository::new();

        let result = repo
            .transact(TimelineId(42), &|_: &mut TimelineTxn| Ok(()))
            .await;

        match result {
            Err(DomainError::TimelineNotFound(id)) => assert_eq!(id, TimelineId(42)),
            other => panic!("expected TimelineNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transact_applies_branch_increments() {
        let repo = MemoryStoryRepository::new();
        let (timeline, _) = repo.insert_timeline(root_draft()).await.unwrap();
        repo.transact(timeline.id, &append_work("First words"))
            .await
            .unwrap();

        repo.transact(timeline.id, &|txn: &mut TimelineTxn| {
            txn.branch_increments.push(1);
            Ok(())
        })
        .await
        .unwrap();

        let loaded = repo
            .load_paragraphs(&[ParagraphKey::new(timeline.id, 1)])
            .await
            .unwrap();
        assert_eq!(loaded[0].as_ref().unwrap().branch_count, 1);
    }

    #[tokio::test]
    async fn test_forks_at_matches_last_ancestor_point_only() {
        let repo = MemoryStoryRepository::new();
        let point = ParagraphKey::new(TimelineId(1), 2);
        repo.insert_timeline(root_draft()).await.unwrap();
        let (fork, _) = repo
            .insert_timeline(TimelineDraft {
                ancestor_points: vec![point],
                length: 3,
                first_paragraph: Some("Elsewhere, rain".to_owned()),
                created_at: fixed_now(),
            })
            .await
            .unwrap();
        repo.insert_timeline(TimelineDraft {
            ancestor_points: vec![point, ParagraphKey::new(fork.id, 3)],
            length: 4,
            first_paragraph: Some("Deeper still".to_owned()),
            created_at: fixed_now(),
        })
        .await
        .unwrap();

        let forks = repo.forks_at(point).await.unwrap();

        assert_eq!(forks.len(), 1);
        assert_eq!(forks[0].id, fork.id);
    }

    #[tokio::test]
    async fn test_increment_branch_count_missing_paragraph_is_not_found() {
        let repo = MemoryStoryRepository::new();

        let result = repo
            .increment_branch_count(ParagraphKey::new(TimelineId(1), 1))
            .await;

        assert!(matches!(result, Err(DomainError::ParagraphNotFound(_))));
    }
}
