//! Command abstractions.

use uuid::Uuid;

use crate::keys::TimelineId;

/// Trait that all story commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Correlation ID to trace this command through the system.
    fn correlation_id(&self) -> Uuid;

    /// The timeline whose record group the command targets.
    fn timeline_id(&self) -> TimelineId;
}
