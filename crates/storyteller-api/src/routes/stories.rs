//! Routes for the story context.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storyteller_core::command::Command;
use storyteller_core::keys::{ParagraphKey, Reference, TimelineId, resolve_timeline};
use storyteller_story::application::command_handlers;
use storyteller_story::application::query_handlers::{
    self, PageView, ParagraphDetailView, ParagraphView, StoryView,
};
use storyteller_story::domain::commands;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /{story}/paragraphs.
#[derive(Debug, Deserialize)]
pub struct AppendRequest {
    /// The position the caller believes is the tip.
    pub after_position: u32,
    /// Paragraph text.
    pub text: String,
    /// Lock token, when the caller holds one.
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Response body for POST /{story}/paragraphs.
#[derive(Debug, Serialize)]
pub struct AppendResponse {
    /// The story now holding the paragraph.
    pub story_id: TimelineId,
    /// The position that was continued.
    pub base_position: u32,
    /// `true` if a new story was forked off.
    pub forked: bool,
    /// The created paragraph.
    pub paragraph: ParagraphView,
}

/// Request body for POST /{story}/fork.
#[derive(Debug, Default, Deserialize)]
pub struct ForkRequest {
    /// Fork position; the tip when omitted.
    #[serde(default)]
    pub at_position: Option<u32>,
}

/// Response body for POST /{story}/fork.
#[derive(Debug, Serialize)]
pub struct ForkResponse {
    /// The new story.
    pub story_id: TimelineId,
    /// Its length, all of it inherited.
    pub length: u32,
    /// Its divergence points, root first.
    pub ancestor_points: Vec<ParagraphKey>,
}

/// Request body for POST /{story}/lock.
#[derive(Debug, Default, Deserialize)]
pub struct LockRequest {
    /// The current token, when renewing.
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Response body for POST /{story}/lock.
#[derive(Debug, Serialize)]
pub struct LockResponse {
    /// Bearer token for the lock.
    pub auth_token: String,
    /// When the lock lapses.
    pub expires_at: DateTime<Utc>,
}

/// Request body for POST /{story}/proposal.
#[derive(Debug, Deserialize)]
pub struct ProposalRequest {
    /// Proposed paragraph text.
    pub text: String,
    /// The proposer.
    pub voter_id: String,
    /// Lock token, when the caller holds one.
    #[serde(default)]
    pub auth_token: Option<String>,
}

/// Request body for POST /{story}/votes.
#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    /// The voter.
    pub voter_id: String,
    /// `true` to keep the pending paragraph.
    pub keep: bool,
}

/// Response body for proposals and votes.
#[derive(Debug, Serialize)]
pub struct FinalizedResponse {
    /// The paragraph that became permanent, if the vote settled in favour.
    pub finalized: Option<ParagraphView>,
}

fn reference(raw: &str) -> Reference {
    let Ok(reference) = raw.parse::<Reference>();
    reference
}

fn story_id(raw: &str) -> Result<TimelineId, ApiError> {
    Ok(resolve_timeline(&reference(raw))?)
}

/// GET /
#[instrument(skip(state))]
async fn get_root_story(State(state): State<AppState>) -> Result<Json<StoryView>, ApiError> {
    let view = query_handlers::get_story(
        None,
        &state.config,
        state.clock.as_ref(),
        &*state.story_repository,
    )
    .await?;
    Ok(Json(view))
}

/// GET /{story}
#[instrument(skip(state))]
async fn get_story(
    State(state): State<AppState>,
    Path(story): Path<String>,
) -> Result<Json<StoryView>, ApiError> {
    let view = query_handlers::get_story(
        Some(&reference(&story)),
        &state.config,
        state.clock.as_ref(),
        &*state.story_repository,
    )
    .await?;
    Ok(Json(view))
}

/// GET /{story}/pages/{page}
#[instrument(skip(state))]
async fn get_page(
    State(state): State<AppState>,
    Path((story, page)): Path<(String, i64)>,
) -> Result<Json<PageView>, ApiError> {
    let view = query_handlers::get_page(
        &reference(&story),
        page,
        &state.config,
        &*state.story_repository,
    )
    .await?;
    Ok(Json(view))
}

/// GET /{story}/paragraphs/{position}
#[instrument(skip(state))]
async fn get_paragraph(
    State(state): State<AppState>,
    Path((story, position)): Path<(String, String)>,
) -> Result<Json<ParagraphDetailView>, ApiError> {
    let view = query_handlers::get_paragraph(
        &reference(&story),
        &reference(&position),
        &*state.story_repository,
    )
    .await?;
    Ok(Json(view))
}

/// POST /{story}/paragraphs
#[instrument(skip(state, request), fields(after_position = request.after_position))]
async fn append_paragraph(
    State(state): State<AppState>,
    Path(story): Path<String>,
    Json(request): Json<AppendRequest>,
) -> Result<Json<AppendResponse>, ApiError> {
    let command = commands::AppendParagraph {
        correlation_id: Uuid::new_v4(),
        timeline_id: story_id(&story)?,
        after_position: request.after_position,
        text: request.text,
        auth_token: request.auth_token,
    };

    info!(
        correlation_id = %command.correlation_id(),
        command_type = command.command_type(),
        story_id = %command.timeline_id(),
        "handling command"
    );

    let outcome = command_handlers::handle_append_paragraph(
        &command,
        state.clock.as_ref(),
        &*state.story_repository,
    )
    .await?;

    Ok(Json(AppendResponse {
        story_id: outcome.timeline.id,
        base_position: outcome.base_position,
        forked: outcome.forked,
        paragraph: outcome.paragraph.into(),
    }))
}

/// POST /{story}/fork
#[instrument(skip(state, request))]
async fn fork_story(
    State(state): State<AppState>,
    Path(story): Path<String>,
    Json(request): Json<ForkRequest>,
) -> Result<Json<ForkResponse>, ApiError> {
    let command = commands::ForkTimeline {
        correlation_id: Uuid::new_v4(),
        timeline_id: story_id(&story)?,
        at_position: request.at_position,
    };

    info!(
        correlation_id = %command.correlation_id(),
        command_type = command.command_type(),
        story_id = %command.timeline_id(),
        "handling command"
    );

    let fork = command_handlers::handle_fork_timeline(
        &command,
        state.clock.as_ref(),
        &*state.story_repository,
    )
    .await?;

    Ok(Json(ForkResponse {
        story_id: fork.id,
        length: fork.length,
        ancestor_points: fork.ancestor_points,
    }))
}

/// POST /{story}/lock
#[instrument(skip(state, request))]
async fn acquire_lock(
    State(state): State<AppState>,
    Path(story): Path<String>,
    Json(request): Json<LockRequest>,
) -> Result<Json<LockResponse>, ApiError> {
    let command = commands::AcquireLock {
        correlation_id: Uuid::new_v4(),
        timeline_id: story_id(&story)?,
        auth_token: request.auth_token,
    };

    info!(
        correlation_id = %command.correlation_id(),
        command_type = command.command_type(),
        story_id = %command.timeline_id(),
        "handling command"
    );

    let grant = command_handlers::handle_acquire_lock(
        &command,
        &state.config,
        state.clock.as_ref(),
        state.tokens.as_ref(),
        &*state.story_repository,
    )
    .await?;

    Ok(Json(LockResponse {
        auth_token: grant.auth_token,
        expires_at: grant.expires_at,
    }))
}

/// POST /{story}/proposal
#[instrument(skip(state, request), fields(voter_id = %request.voter_id))]
async fn propose_paragraph(
    State(state): State<AppState>,
    Path(story): Path<String>,
    Json(request): Json<ProposalRequest>,
) -> Result<Json<FinalizedResponse>, ApiError> {
    let command = commands::ProposeParagraph {
        correlation_id: Uuid::new_v4(),
        timeline_id: story_id(&story)?,
        text: request.text,
        voter_id: request.voter_id,
        auth_token: request.auth_token,
    };

    info!(
        correlation_id = %command.correlation_id(),
        command_type = command.command_type(),
        story_id = %command.timeline_id(),
        "handling command"
    );

    let finalized = command_handlers::handle_propose_paragraph(
        &command,
        &state.config,
        state.clock.as_ref(),
        &*state.story_repository,
    )
    .await?;

    Ok(Json(FinalizedResponse {
        finalized: finalized.map(ParagraphView::from),
    }))
}

/// POST /{story}/votes
#[instrument(skip(state, request), fields(voter_id = %request.voter_id, keep = request.keep))]
async fn cast_vote(
    State(state): State<AppState>,
    Path(story): Path<String>,
    Json(request): Json<VoteRequest>,
) -> Result<Json<FinalizedResponse>, ApiError> {
    let command = commands::CastVote {
        correlation_id: Uuid::new_v4(),
        timeline_id: story_id(&story)?,
        voter_id: request.voter_id,
        keep: request.keep,
    };

    info!(
        correlation_id = %command.correlation_id(),
        command_type = command.command_type(),
        story_id = %command.timeline_id(),
        "handling command"
    );

    let outcome = command_handlers::handle_cast_vote(
        &command,
        &state.config,
        state.clock.as_ref(),
        &*state.story_repository,
    )
    .await?;

    Ok(Json(FinalizedResponse {
        finalized: outcome.finalized.map(ParagraphView::from),
    }))
}

/// Returns the router for the story context.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_root_story))
        .route("/{story}", get(get_story))
        .route("/{story}/pages/{page}", get(get_page))
        .route("/{story}/paragraphs", post(append_paragraph))
        .route("/{story}/paragraphs/{position}", get(get_paragraph))
        .route("/{story}/fork", post(fork_story))
        .route("/{story}/lock", post(acquire_lock))
        .route("/{story}/proposal", post(propose_paragraph))
        .route("/{story}/votes", post(cast_vote))
}
