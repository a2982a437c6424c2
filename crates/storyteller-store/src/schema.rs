//! Story database schema.

use sqlx::migrate::Migrator;

/// Migrations creating the `timelines` and `paragraphs` tables.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
