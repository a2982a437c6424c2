//! Query handlers for the story context.
//!
//! These resolve caller references, read a snapshot of the store, and return
//! read-only view DTOs. None of them take a transaction.

use chrono::{DateTime, Utc};
use serde::Serialize;
use storyteller_core::clock::Clock;
use storyteller_core::config::StoryConfig;
use storyteller_core::error::DomainError;
use storyteller_core::keys::{
    ParagraphKey, Reference, TimelineId, resolve_paragraph, resolve_timeline,
};
use storyteller_core::record::{ParagraphRecord, TimelineDraft, TimelineRecord};
use storyteller_core::repository::StoryRepository;
use tracing::info;

use crate::application::command_handlers::load_timeline;
use crate::application::range::resolve_range;
use crate::domain::timeline::{TimelineState, state_of};

/// Read-only view of a paragraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParagraphView {
    /// The record group the paragraph is stored in.
    pub story_id: TimelineId,
    /// 1-based position.
    pub position: u32,
    /// The paragraph text.
    pub text: String,
    /// When the paragraph was written.
    pub created_at: DateTime<Utc>,
    /// How many times the story was continued or forked here. Advisory.
    pub branch_count: u32,
}

impl From<ParagraphRecord> for ParagraphView {
    fn from(record: ParagraphRecord) -> Self {
        Self {
            story_id: record.timeline_id,
            position: record.position,
            text: record.text,
            created_at: record.created_at,
            branch_count: record.branch_count,
        }
    }
}

/// Tallies of an open vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingView {
    /// The proposed text.
    pub text: String,
    /// Votes to keep it.
    pub yes: usize,
    /// Votes to discard it.
    pub no: usize,
}

/// Read-only view of a story with its first page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoryView {
    /// The story identifier.
    pub id: TimelineId,
    /// Filled positions, inherited ones included.
    pub length: u32,
    /// Where this story diverged from its ancestors, root first.
    pub ancestor_points: Vec<ParagraphKey>,
    /// `open`, `locked` or `pending`.
    pub state: &'static str,
    /// Lock expiry while locked.
    pub locked_until: Option<DateTime<Utc>>,
    /// The open vote, if any.
    pub pending: Option<PendingView>,
    /// The first page of paragraphs.
    pub paragraphs: Vec<ParagraphView>,
}

/// One page of a story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageView {
    /// The story identifier.
    pub story_id: TimelineId,
    /// 1-based page number.
    pub page: u32,
    /// Paragraphs on this page. Shorter than a full page at the tip, or when
    /// a concurrent write was only partly visible.
    pub paragraphs: Vec<ParagraphView>,
}

/// A paragraph and every paragraph written directly after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParagraphDetailView {
    /// The paragraph itself.
    #[serde(flatten)]
    pub paragraph: ParagraphView,
    /// Continuations in this story and first paragraphs of stories forked here.
    pub branches: Vec<ParagraphView>,
}

fn story_view(
    timeline: TimelineRecord,
    paragraphs: Vec<ParagraphRecord>,
    now: DateTime<Utc>,
) -> StoryView {
    let state = state_of(&timeline, now);
    let locked_until = match state {
        TimelineState::Locked { until } => Some(until),
        TimelineState::Open | TimelineState::Pending => None,
    };
    StoryView {
        id: timeline.id,
        length: timeline.length,
        state: state.as_str(),
        locked_until,
        pending: timeline.pending.map(|pending| PendingView {
            yes: pending.yes.len(),
            no: pending.no.len(),
            text: pending.text,
        }),
        ancestor_points: timeline.ancestor_points,
        paragraphs: paragraphs.into_iter().map(ParagraphView::from).collect(),
    }
}

/// Positions covered by 1-based `page`. Pages below 1 read as page 1.
fn page_bounds(page: i64, page_size: u32) -> (u32, u32, u32) {
    let page = u32::try_from(page.max(1)).unwrap_or(u32::MAX);
    let start = (page - 1).saturating_mul(page_size).saturating_add(1);
    let end = page.saturating_mul(page_size);
    (page, start, end)
}

/// Retrieves a story and its first page. Without a reference the oldest
/// story is returned, and an empty root story is created if there is none.
///
/// # Errors
///
/// Returns `DomainError::InvalidInput` for a malformed reference,
/// `DomainError::TimelineNotFound` if the story does not exist, and
/// `DomainError::Infrastructure` if storage fails.
pub async fn get_story(
    reference: Option<&Reference>,
    config: &StoryConfig,
    clock: &dyn Clock,
    repo: &dyn StoryRepository,
) -> Result<StoryView, DomainError> {
    let timeline = match reference {
        Some(reference) => load_timeline(repo, resolve_timeline(reference)?).await?,
        None => match repo.first_timeline().await? {
            Some(timeline) => timeline,
            None => {
                let (timeline, _) = repo
                    .insert_timeline(TimelineDraft {
                        ancestor_points: Vec::new(),
                        length: 0,
                        first_paragraph: None,
                        created_at: clock.now(),
                    })
                    .await?;
                info!(story_id = %timeline.id, "created root story");
                timeline
            }
        },
    };

    let (_, start, end) = page_bounds(1, config.page_size());
    let paragraphs = resolve_range(repo, &timeline, start, Some(end)).await?;
    Ok(story_view(timeline, paragraphs, clock.now()))
}

/// Retrieves one page of a story.
///
/// # Errors
///
/// Returns `DomainError::InvalidInput` for a malformed reference,
/// `DomainError::TimelineNotFound` if the story does not exist, and
/// `DomainError::Infrastructure` if storage fails.
pub async fn get_page(
    reference: &Reference,
    page: i64,
    config: &StoryConfig,
    repo: &dyn StoryRepository,
) -> Result<PageView, DomainError> {
    let timeline = load_timeline(repo, resolve_timeline(reference)?).await?;
    let (page, start, end) = page_bounds(page, config.page_size());
    let paragraphs = resolve_range(repo, &timeline, start, Some(end)).await?;
    Ok(PageView {
        story_id: timeline.id,
        page,
        paragraphs: paragraphs.into_iter().map(ParagraphView::from).collect(),
    })
}

/// Retrieves a paragraph stored in the story's own record group, with the
/// paragraphs that continue it here and in forks.
///
/// # Errors
///
/// Returns `DomainError::InvalidInput` for malformed references,
/// `DomainError::ParagraphNotFound` if the story's own group has no such
/// paragraph, and `DomainError::Infrastructure` if storage fails.
pub async fn get_paragraph(
    story: &Reference,
    paragraph: &Reference,
    repo: &dyn StoryRepository,
) -> Result<ParagraphDetailView, DomainError> {
    let story_id = resolve_timeline(story)?;
    let key = resolve_paragraph(paragraph, story_id)?;
    let record = repo
        .load_paragraphs(&[key])
        .await?
        .into_iter()
        .next()
        .flatten()
        .ok_or(DomainError::ParagraphNotFound(key))?;

    let next = key.position + 1;
    let mut follow_keys = vec![ParagraphKey::new(story_id, next)];
    follow_keys.extend(
        repo.forks_at(key)
            .await?
            .into_iter()
            .map(|fork| ParagraphKey::new(fork.id, next)),
    );
    let branches = repo
        .load_paragraphs(&follow_keys)
        .await?
        .into_iter()
        .flatten()
        .map(ParagraphView::from)
        .collect();

    Ok(ParagraphDetailView {
        paragraph: record.into(),
        branches,
    })
}
