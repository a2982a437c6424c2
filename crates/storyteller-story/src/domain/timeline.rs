//! The timeline aggregate: tip continuation and the lock/vote state machine.
//!
//! A timeline is OPEN, LOCKED (a capability token reserves it until
//! `lock_expiry`) or PENDING (a proposed paragraph awaits votes). Structural
//! edits follow one authorization rule: PENDING always rejects, LOCKED
//! rejects everyone but the token holder, OPEN admits anyone.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use storyteller_core::error::DomainError;
use storyteller_core::keys::{ParagraphKey, TimelineId};
use storyteller_core::record::{ParagraphRecord, PendingParagraph, TimelineRecord};
use storyteller_core::repository::TimelineTxn;
use storyteller_core::token;

use super::text::ParagraphText;

/// Observable workflow state of a timeline at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineState {
    /// Anyone may lock, propose or continue.
    Open,
    /// Reserved by a token holder.
    Locked {
        /// When the reservation lapses.
        until: DateTime<Utc>,
    },
    /// A proposed paragraph is collecting votes.
    Pending,
}

impl TimelineState {
    /// Lowercase state name for views and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Locked { .. } => "locked",
            Self::Pending => "pending",
        }
    }
}

/// The paragraph a continuation or fork hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// Position 0 of a root timeline: the story start, no paragraph.
    StoryStart,
    /// A paragraph in the timeline's own record group.
    Own(ParagraphKey),
    /// The timeline's last ancestor point, in another record group.
    Inherited(ParagraphKey),
}

impl Anchor {
    /// Returns the anchor paragraph's key, if there is one.
    #[must_use]
    pub fn key(&self) -> Option<ParagraphKey> {
        match self {
            Self::StoryStart => None,
            Self::Own(key) | Self::Inherited(key) => Some(*key),
        }
    }
}

/// Returns `record`'s state at `now`.
#[must_use]
pub fn state_of(record: &TimelineRecord, now: DateTime<Utc>) -> TimelineState {
    if record.pending.is_some() {
        return TimelineState::Pending;
    }
    match record.lock_expiry {
        Some(until) if until > now => TimelineState::Locked { until },
        _ => TimelineState::Open,
    }
}

/// Locates the paragraph at `position` among those a caller may continue
/// from: the timeline's own range, its inherited tip, or the start of a root.
///
/// # Errors
///
/// Returns `DomainError::ParagraphNotFound` for any other position.
pub fn anchor_at(record: &TimelineRecord, position: u32) -> Result<Anchor, DomainError> {
    if position == 0 && record.ancestor_points.is_empty() {
        return Ok(Anchor::StoryStart);
    }
    if record.owns_position(position) {
        return Ok(Anchor::Own(ParagraphKey::new(record.id, position)));
    }
    match record.ancestor_points.last() {
        Some(point) if point.position == position => Ok(Anchor::Inherited(*point)),
        _ => Err(DomainError::ParagraphNotFound(ParagraphKey::new(
            record.id, position,
        ))),
    }
}

/// Ancestor points of a timeline forked from `record` at `anchor`.
///
/// An inherited anchor already is the last point, so the points are reused
/// rather than extended with a duplicate.
#[must_use]
pub fn fork_points(record: &TimelineRecord, anchor: Anchor) -> Vec<ParagraphKey> {
    match anchor {
        Anchor::StoryStart => Vec::new(),
        Anchor::Inherited(_) => record.ancestor_points.clone(),
        Anchor::Own(key) => {
            let mut points = record.ancestor_points.clone();
            points.push(key);
            points
        }
    }
}

/// The aggregate root for one timeline inside a transaction.
///
/// Mutations change the wrapped record and stage paragraphs; [`Timeline::stage`]
/// hands both back to the transaction for the engine to commit.
#[derive(Debug)]
pub struct Timeline {
    record: TimelineRecord,
    uncommitted_paragraphs: Vec<ParagraphRecord>,
    branch_increments: Vec<u32>,
}

impl Timeline {
    /// Wraps a timeline snapshot.
    #[must_use]
    pub fn from_record(record: TimelineRecord) -> Self {
        Self {
            record,
            uncommitted_paragraphs: Vec::new(),
            branch_increments: Vec::new(),
        }
    }

    /// Returns the timeline identifier.
    #[must_use]
    pub fn id(&self) -> TimelineId {
        self.record.id
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn record(&self) -> &TimelineRecord {
        &self.record
    }

    /// Paragraphs created by this aggregate and not yet committed.
    #[must_use]
    pub fn uncommitted_paragraphs(&self) -> &[ParagraphRecord] {
        &self.uncommitted_paragraphs
    }

    /// Returns the state at `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> TimelineState {
        state_of(&self.record, now)
    }

    /// Moves the mutated record and staged writes into `txn`.
    pub fn stage(self, txn: &mut TimelineTxn) {
        txn.timeline = self.record;
        txn.new_paragraphs.extend(self.uncommitted_paragraphs);
        txn.branch_increments.extend(self.branch_increments);
    }

    fn holds(&self, presented: Option<&str>) -> bool {
        match (presented, &self.record.auth_token_digest) {
            (Some(token), Some(stored)) => token::digest(token) == *stored,
            _ => false,
        }
    }

    fn authorize(&self, presented: Option<&str>, now: DateTime<Utc>) -> Result<(), DomainError> {
        match self.state(now) {
            TimelineState::Open => Ok(()),
            TimelineState::Pending => Err(DomainError::StoryPending(self.id())),
            TimelineState::Locked { until } => {
                if self.holds(presented) {
                    Ok(())
                } else {
                    Err(DomainError::StoryLocked {
                        timeline_id: self.id(),
                        until,
                    })
                }
            }
        }
    }

    fn push_paragraph(&mut self, text: String, now: DateTime<Utc>) -> ParagraphRecord {
        self.record.length += 1;
        let paragraph = ParagraphRecord {
            timeline_id: self.record.id,
            position: self.record.length,
            text,
            created_at: now,
            branch_count: 0,
        };
        self.uncommitted_paragraphs.push(paragraph.clone());
        paragraph
    }

    fn reset_workflow(&mut self, now: DateTime<Utc>) {
        self.record.auth_token_digest = None;
        self.record.lock_expiry = None;
        self.record.pending = None;
        self.record.updated_at = now;
    }

    /// Continues the timeline after `after_position` if that still is the tip.
    ///
    /// Returns `None`, changing nothing, when the tip has moved on and the
    /// caller must fork instead. A lock held by the caller is released by a
    /// successful continuation.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ParagraphNotFound` if `after_position` names no
    /// continuable paragraph, or the authorization errors of a locked or
    /// pending timeline.
    pub fn continue_tip(
        &mut self,
        after_position: u32,
        text: &ParagraphText,
        presented: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<ParagraphRecord>, DomainError> {
        let anchor = anchor_at(&self.record, after_position)?;
        if self.record.length != after_position {
            return Ok(None);
        }
        self.authorize(presented, now)?;

        if let Anchor::Own(key) = anchor {
            self.branch_increments.push(key.position);
        }
        self.reset_workflow(now);
        Ok(Some(self.push_paragraph(text.as_str().to_owned(), now)))
    }

    /// Reserves the timeline for `duration` under `new_token`, returning the
    /// expiry. A caller holding the current token may renew it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StoryPending` or `DomainError::StoryLocked` per
    /// the authorization rule, and `DomainError::Validation` if the expiry
    /// cannot be represented.
    pub fn acquire_lock(
        &mut self,
        presented: Option<&str>,
        new_token: &str,
        duration: TimeDelta,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, DomainError> {
        self.authorize(presented, now)?;
        let expires_at = now.checked_add_signed(duration).ok_or_else(|| {
            DomainError::Validation(format!("lock duration {duration} is out of range"))
        })?;
        self.record.auth_token_digest = Some(token::digest(new_token));
        self.record.lock_expiry = Some(expires_at);
        self.record.updated_at = now;
        Ok(expires_at)
    }

    /// Puts `text` up for a vote with the proposer's approval already
    /// counted. Settles immediately if that single vote meets the quorum.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StoryPending` or `DomainError::StoryLocked` per
    /// the authorization rule.
    pub fn propose(
        &mut self,
        text: &ParagraphText,
        voter_id: &str,
        presented: Option<&str>,
        votes_required: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<ParagraphRecord>, DomainError> {
        self.authorize(presented, now)?;
        self.record.lock_expiry = None;
        self.record.pending = Some(PendingParagraph {
            text: text.as_str().to_owned(),
            yes: [voter_id.to_owned()].into_iter().collect(),
            no: BTreeSet::new(),
        });
        self.record.updated_at = now;
        Ok(self.settle(votes_required, now))
    }

    /// Records `voter_id`'s vote on the pending paragraph and settles it once
    /// either side reaches `votes_required`. Returns the paragraph if it was
    /// accepted.
    ///
    /// Repeating a vote is a no-op; switching sides moves the voter, so the
    /// two sets stay disjoint.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::VotesNotPossible` if nothing is pending.
    pub fn vote(
        &mut self,
        voter_id: &str,
        keep: bool,
        votes_required: usize,
        now: DateTime<Utc>,
    ) -> Result<Option<ParagraphRecord>, DomainError> {
        let id = self.id();
        let Some(pending) = self.record.pending.as_mut() else {
            return Err(DomainError::VotesNotPossible(id));
        };
        let (matching, opposing) = if keep {
            (&mut pending.yes, &mut pending.no)
        } else {
            (&mut pending.no, &mut pending.yes)
        };
        if matching.contains(voter_id) {
            return Ok(None);
        }
        opposing.remove(voter_id);
        matching.insert(voter_id.to_owned());
        self.record.updated_at = now;
        Ok(self.settle(votes_required, now))
    }

    fn settle(&mut self, votes_required: usize, now: DateTime<Utc>) -> Option<ParagraphRecord> {
        let pending = self.record.pending.as_ref()?;
        if pending.yes.len() >= votes_required {
            let text = pending.text.clone();
            self.reset_workflow(now);
            Some(self.push_paragraph(text, now))
        } else {
            if pending.no.len() >= votes_required {
                self.reset_workflow(now);
            }
            None
        }
    }
}
