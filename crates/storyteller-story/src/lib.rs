//! Storyteller — the story bounded context.
//!
//! Responsible for continuing and forking story timelines, reconstructing a
//! timeline's text across its ancestors, and the lock/vote workflow that
//! gates which paragraphs become permanent.

pub mod application;
pub mod domain;
