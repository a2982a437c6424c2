//! Commands for the story context.

use storyteller_core::command::Command;
use storyteller_core::keys::TimelineId;
use uuid::Uuid;

/// Command to continue a timeline after a given position, forking it when
/// the tip has already moved past that position.
#[derive(Debug, Clone)]
pub struct AppendParagraph {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The timeline being continued.
    pub timeline_id: TimelineId,
    /// The position the caller believes is the tip.
    pub after_position: u32,
    /// Raw paragraph text, normalised by the handler.
    pub text: String,
    /// Lock token, when the caller holds one.
    pub auth_token: Option<String>,
}

impl Command for AppendParagraph {
    fn command_type(&self) -> &'static str {
        "story.append_paragraph"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn timeline_id(&self) -> TimelineId {
        self.timeline_id
    }
}

/// Command to fork a timeline at an existing paragraph.
#[derive(Debug, Clone)]
pub struct ForkTimeline {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The timeline to fork.
    pub timeline_id: TimelineId,
    /// Fork position; the current tip when omitted.
    pub at_position: Option<u32>,
}

impl Command for ForkTimeline {
    fn command_type(&self) -> &'static str {
        "story.fork_timeline"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn timeline_id(&self) -> TimelineId {
        self.timeline_id
    }
}

/// Command to reserve a timeline for exclusive editing.
#[derive(Debug, Clone)]
pub struct AcquireLock {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The timeline to lock.
    pub timeline_id: TimelineId,
    /// The current token, when renewing a held lock.
    pub auth_token: Option<String>,
}

impl Command for AcquireLock {
    fn command_type(&self) -> &'static str {
        "story.acquire_lock"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn timeline_id(&self) -> TimelineId {
        self.timeline_id
    }
}

/// Command to put a paragraph up for a vote.
#[derive(Debug, Clone)]
pub struct ProposeParagraph {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The timeline the paragraph would extend.
    pub timeline_id: TimelineId,
    /// Raw paragraph text, normalised by the handler.
    pub text: String,
    /// The proposer, counted as the first vote in favour.
    pub voter_id: String,
    /// Lock token, when the caller holds one.
    pub auth_token: Option<String>,
}

impl Command for ProposeParagraph {
    fn command_type(&self) -> &'static str {
        "story.propose_paragraph"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn timeline_id(&self) -> TimelineId {
        self.timeline_id
    }
}

/// Command to vote on a pending paragraph.
#[derive(Debug, Clone)]
pub struct CastVote {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The timeline holding the pending paragraph.
    pub timeline_id: TimelineId,
    /// The voter.
    pub voter_id: String,
    /// `true` to keep the paragraph, `false` to discard it.
    pub keep: bool,
}

impl Command for CastVote {
    fn command_type(&self) -> &'static str {
        "story.cast_vote"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn timeline_id(&self) -> TimelineId {
        self.timeline_id
    }
}
