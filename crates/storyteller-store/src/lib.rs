//! Storage engines implementing `StoryRepository`.

pub mod memory;
pub mod pg_story_repository;
pub mod schema;

pub use memory::MemoryStoryRepository;
pub use pg_story_repository::PgStoryRepository;
