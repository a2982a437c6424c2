//! Shared test mocks and utilities for the Storyteller engine.

mod clock;
mod repository;
mod token;

pub use clock::{FixedClock, ManualClock};
pub use repository::{BranchCountFailingRepository, FailingStoryRepository};
pub use token::SequenceTokenSource;
