//! Domain layer for the story context.

pub mod commands;
pub mod text;
pub mod timeline;
