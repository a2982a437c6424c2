//! Command handlers for the story context.
//!
//! Each handler runs its timeline mutation as one engine transaction via
//! [`StoryRepository::transact`]: the aggregate is rebuilt from the snapshot
//! the engine hands in, the command is applied, and the staged writes are
//! committed together. Handlers never retry on contention themselves.

use chrono::{DateTime, Utc};
use storyteller_core::clock::Clock;
use storyteller_core::config::StoryConfig;
use storyteller_core::error::DomainError;
use storyteller_core::keys::{ParagraphKey, TimelineId};
use storyteller_core::record::{ParagraphRecord, TimelineDraft, TimelineRecord};
use storyteller_core::repository::{StoryRepository, TimelineTxn};
use storyteller_core::token::TokenSource;
use tracing::{info, instrument, warn};

use crate::domain::commands::{
    AcquireLock, AppendParagraph, CastVote, ForkTimeline, ProposeParagraph,
};
use crate::domain::text::ParagraphText;
use crate::domain::timeline::{Anchor, Timeline, anchor_at, fork_points};

/// Result of an append: where the paragraph landed and whether a fork was
/// needed to put it there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    /// The position that was continued.
    pub base_position: u32,
    /// The paragraph that was continued, if `base_position` is not the story start.
    pub base: Option<ParagraphKey>,
    /// The timeline now holding the paragraph: the original, or a new fork.
    pub timeline: TimelineRecord,
    /// The created paragraph.
    pub paragraph: ParagraphRecord,
    /// `true` if the tip had moved and a new timeline was created.
    pub forked: bool,
}

/// A freshly issued lock capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGrant {
    /// The bearer token. Only its digest is stored, so this is the one
    /// chance to read it.
    pub auth_token: String,
    /// When the lock lapses.
    pub expires_at: DateTime<Utc>,
}

/// Result of a vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    /// The accepted paragraph, if this vote reached the quorum in favour.
    pub finalized: Option<ParagraphRecord>,
}

fn voter_id(raw: &str) -> Result<&str, DomainError> {
    let voter = raw.trim();
    if voter.is_empty() {
        return Err(DomainError::InvalidInput(
            "voter id must not be empty".to_owned(),
        ));
    }
    Ok(voter)
}

/// Increments a paragraph's counter outside any transaction. Failures are
/// logged and swallowed; the counter is advisory.
async fn bump_branch_count(repo: &dyn StoryRepository, key: ParagraphKey) {
    if let Err(error) = repo.increment_branch_count(key).await {
        warn!(paragraph = %key, %error, "failed to increment branch count");
    }
}

/// Loads a timeline that must exist.
///
/// # Errors
///
/// Returns `DomainError::TimelineNotFound` if the timeline is absent, or
/// `DomainError::Infrastructure` if storage fails.
pub async fn load_timeline(
    repo: &dyn StoryRepository,
    id: TimelineId,
) -> Result<TimelineRecord, DomainError> {
    repo.load_timeline(id)
        .await?
        .ok_or(DomainError::TimelineNotFound(id))
}

/// Handles the `AppendParagraph` command.
///
/// Continues the timeline in one transaction if `after_position` is still
/// its tip. Otherwise, with nothing written to the original, creates a new
/// timeline sharing the prefix up to `after_position` whose first own
/// paragraph is the text. Counter updates that cross record groups are
/// best-effort.
///
/// # Errors
///
/// Returns `DomainError::Validation` for text outside 5..=140 characters,
/// `DomainError::TimelineNotFound` or `DomainError::ParagraphNotFound` for
/// unknown targets, `DomainError::StoryLocked` or `DomainError::StoryPending`
/// when a tip continuation is not authorized, and
/// `DomainError::Infrastructure` if storage fails.
#[instrument(skip_all, fields(
    correlation_id = %command.correlation_id,
    timeline_id = %command.timeline_id,
    after_position = command.after_position,
))]
pub async fn handle_append_paragraph(
    command: &AppendParagraph,
    clock: &dyn Clock,
    repo: &dyn StoryRepository,
) -> Result<AppendOutcome, DomainError> {
    let text = ParagraphText::parse(&command.text)?;
    let now = clock.now();
    let after = command.after_position;
    let presented = command.auth_token.as_deref();

    let txn = repo
        .transact(command.timeline_id, &|txn: &mut TimelineTxn| {
            let mut timeline = Timeline::from_record(txn.timeline.clone());
            if timeline.continue_tip(after, &text, presented, now)?.is_some() {
                timeline.stage(txn);
            }
            Ok(())
        })
        .await?;

    let anchor = anchor_at(&txn.timeline, after)?;
    if let Some(paragraph) = txn.new_paragraphs.into_iter().next() {
        if let Anchor::Inherited(key) = anchor {
            bump_branch_count(repo, key).await;
        }
        return Ok(AppendOutcome {
            base_position: after,
            base: anchor.key(),
            timeline: txn.timeline,
            paragraph,
            forked: false,
        });
    }

    let (timeline, paragraph) = repo
        .insert_timeline(TimelineDraft {
            ancestor_points: fork_points(&txn.timeline, anchor),
            length: after + 1,
            first_paragraph: Some(text.as_str().to_owned()),
            created_at: now,
        })
        .await?;
    let paragraph = paragraph.ok_or_else(|| {
        DomainError::Infrastructure(format!(
            "story {} was created without its paragraph",
            timeline.id
        ))
    })?;
    if let Some(key) = anchor.key() {
        bump_branch_count(repo, key).await;
    }
    info!(fork_id = %timeline.id, "tip had moved, forked a new story");

    Ok(AppendOutcome {
        base_position: after,
        base: anchor.key(),
        timeline,
        paragraph,
        forked: true,
    })
}

/// Handles the `ForkTimeline` command: creates a timeline that shares the
/// given one's text up to the fork position and has no own paragraphs yet.
///
/// An explicit position must lie in the timeline's own range. Without one
/// the current tip is used: a timeline with no own paragraphs is forked at
/// its inherited tip, reusing its ancestor points, and an empty root yields
/// a new root.
///
/// # Errors
///
/// Returns `DomainError::TimelineNotFound` or `DomainError::ParagraphNotFound`
/// for unknown targets, and `DomainError::Infrastructure` if storage fails.
#[instrument(skip_all, fields(
    correlation_id = %command.correlation_id,
    timeline_id = %command.timeline_id,
))]
pub async fn handle_fork_timeline(
    command: &ForkTimeline,
    clock: &dyn Clock,
    repo: &dyn StoryRepository,
) -> Result<TimelineRecord, DomainError> {
    let source = load_timeline(repo, command.timeline_id).await?;
    let (position, anchor) = match command.at_position {
        Some(position) => match anchor_at(&source, position)? {
            anchor @ Anchor::Own(_) => (position, anchor),
            Anchor::StoryStart | Anchor::Inherited(_) => {
                return Err(DomainError::ParagraphNotFound(ParagraphKey::new(
                    source.id, position,
                )));
            }
        },
        None => (source.length, anchor_at(&source, source.length)?),
    };

    let (timeline, _) = repo
        .insert_timeline(TimelineDraft {
            ancestor_points: fork_points(&source, anchor),
            length: position,
            first_paragraph: None,
            created_at: clock.now(),
        })
        .await?;
    if let Some(key) = anchor.key() {
        bump_branch_count(repo, key).await;
    }
    info!(fork_id = %timeline.id, position, "forked story");

    Ok(timeline)
}

/// Handles the `AcquireLock` command: issues a fresh token and reserves the
/// timeline for the configured duration.
///
/// # Errors
///
/// Returns `DomainError::StoryLocked` if another party holds an unexpired
/// lock, `DomainError::StoryPending` while a vote is open,
/// `DomainError::TimelineNotFound` for unknown timelines, and
/// `DomainError::Infrastructure` if storage fails.
#[instrument(skip_all, fields(
    correlation_id = %command.correlation_id,
    timeline_id = %command.timeline_id,
))]
pub async fn handle_acquire_lock(
    command: &AcquireLock,
    config: &StoryConfig,
    clock: &dyn Clock,
    tokens: &dyn TokenSource,
    repo: &dyn StoryRepository,
) -> Result<LockGrant, DomainError> {
    let now = clock.now();
    let auth_token = tokens.issue();
    let presented = command.auth_token.as_deref();
    let duration = config.lock_duration();

    let txn = repo
        .transact(command.timeline_id, &|txn: &mut TimelineTxn| {
            let mut timeline = Timeline::from_record(txn.timeline.clone());
            timeline.acquire_lock(presented, &auth_token, duration, now)?;
            timeline.stage(txn);
            Ok(())
        })
        .await?;

    let expires_at = txn.timeline.lock_expiry.ok_or_else(|| {
        DomainError::Infrastructure(format!("lock on story {} was not recorded", txn.timeline.id))
    })?;
    info!(%expires_at, "lock acquired");

    Ok(LockGrant {
        auth_token,
        expires_at,
    })
}

/// Handles the `ProposeParagraph` command: opens a vote on the text with the
/// proposer counted in favour. Returns the paragraph if that single vote
/// already meets the quorum.
///
/// # Errors
///
/// Returns `DomainError::Validation` for text outside 5..=140 characters,
/// `DomainError::InvalidInput` for an empty voter id, the authorization
/// errors of a locked or pending timeline, `DomainError::TimelineNotFound`
/// for unknown timelines, and `DomainError::Infrastructure` if storage fails.
#[instrument(skip_all, fields(
    correlation_id = %command.correlation_id,
    timeline_id = %command.timeline_id,
))]
pub async fn handle_propose_paragraph(
    command: &ProposeParagraph,
    config: &StoryConfig,
    clock: &dyn Clock,
    repo: &dyn StoryRepository,
) -> Result<Option<ParagraphRecord>, DomainError> {
    let text = ParagraphText::parse(&command.text)?;
    let voter = voter_id(&command.voter_id)?;
    let now = clock.now();
    let presented = command.auth_token.as_deref();
    let quorum = config.votes_required();

    let txn = repo
        .transact(command.timeline_id, &|txn: &mut TimelineTxn| {
            let mut timeline = Timeline::from_record(txn.timeline.clone());
            timeline.propose(&text, voter, presented, quorum, now)?;
            timeline.stage(txn);
            Ok(())
        })
        .await?;

    let finalized = txn.new_paragraphs.into_iter().next();
    match &finalized {
        Some(paragraph) => info!(position = paragraph.position, "proposal accepted outright"),
        None => info!("proposal opened for votes"),
    }
    Ok(finalized)
}

/// Handles the `CastVote` command.
///
/// # Errors
///
/// Returns `DomainError::VotesNotPossible` if nothing is pending,
/// `DomainError::InvalidInput` for an empty voter id,
/// `DomainError::TimelineNotFound` for unknown timelines, and
/// `DomainError::Infrastructure` if storage fails.
#[instrument(skip_all, fields(
    correlation_id = %command.correlation_id,
    timeline_id = %command.timeline_id,
    keep = command.keep,
))]
pub async fn handle_cast_vote(
    command: &CastVote,
    config: &StoryConfig,
    clock: &dyn Clock,
    repo: &dyn StoryRepository,
) -> Result<VoteOutcome, DomainError> {
    let voter = voter_id(&command.voter_id)?;
    let now = clock.now();
    let quorum = config.votes_required();
    let keep = command.keep;

    let txn = repo
        .transact(command.timeline_id, &|txn: &mut TimelineTxn| {
            let mut timeline = Timeline::from_record(txn.timeline.clone());
            timeline.vote(voter, keep, quorum, now)?;
            timeline.stage(txn);
            Ok(())
        })
        .await?;

    let finalized = txn.new_paragraphs.into_iter().next();
    if let Some(paragraph) = &finalized {
        info!(position = paragraph.position, "proposal accepted");
    } else if txn.timeline.pending.is_none() {
        info!("proposal rejected");
    }
    Ok(VoteOutcome { finalized })
}
