//! Shared application state.

use std::sync::Arc;

use storyteller_core::clock::Clock;
use storyteller_core::config::StoryConfig;
use storyteller_core::repository::StoryRepository;
use storyteller_core::token::TokenSource;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Page size, lock duration and vote quorum.
    pub config: StoryConfig,
    /// Clock for timestamps and lock expiry.
    pub clock: Arc<dyn Clock>,
    /// Issues lock capability tokens.
    pub tokens: Arc<dyn TokenSource>,
    /// Storage engine for timelines and paragraphs.
    pub story_repository: Arc<dyn StoryRepository>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        config: StoryConfig,
        clock: Arc<dyn Clock>,
        tokens: Arc<dyn TokenSource>,
        story_repository: Arc<dyn StoryRepository>,
    ) -> Self {
        Self {
            config,
            clock,
            tokens,
            story_repository,
        }
    }
}
