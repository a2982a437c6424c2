//! Storyteller Core — shared story abstractions.
//!
//! This crate defines the identifiers, persisted record shapes, and
//! persistence primitive that the story context and the storage engines
//! agree on. It contains no infrastructure code.

pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod keys;
pub mod record;
pub mod repository;
pub mod token;
