//! Record identifiers and the reference resolver.
//!
//! Callers may name a record by numeric id, by string name, or by a typed
//! key. Every lookup in the story context goes through [`resolve_timeline`]
//! or [`resolve_paragraph`] so that all three forms normalise to one
//! canonical key before touching storage.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a timeline and of the record group holding its own paragraphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimelineId(pub i64);

impl fmt::Display for TimelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Primary key of a paragraph: its owning record group and 1-based position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParagraphKey {
    /// The timeline whose own range contains the paragraph.
    pub timeline_id: TimelineId,
    /// Position within the story, counting inherited positions.
    pub position: u32,
}

impl ParagraphKey {
    /// Creates a paragraph key.
    #[must_use]
    pub fn new(timeline_id: TimelineId, position: u32) -> Self {
        Self {
            timeline_id,
            position,
        }
    }
}

impl fmt::Display for ParagraphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.timeline_id, self.position)
    }
}

/// The two persisted record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A story timeline.
    Timeline,
    /// A paragraph inside a timeline's record group.
    Paragraph,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeline => f.write_str("timeline"),
            Self::Paragraph => f.write_str("paragraph"),
        }
    }
}

/// A fully typed key for either record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKey {
    /// Key of a timeline.
    Timeline(TimelineId),
    /// Key of a paragraph.
    Paragraph(ParagraphKey),
}

impl RecordKey {
    /// Returns the kind of record this key addresses.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Timeline(_) => RecordKind::Timeline,
            Self::Paragraph(_) => RecordKind::Paragraph,
        }
    }
}

/// A caller-supplied reference to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Numeric id (timelines) or position (paragraphs).
    Id(i64),
    /// String name; paragraph key names are their positions.
    Name(String),
    /// A typed key.
    Key(RecordKey),
}

impl FromStr for Reference {
    type Err = Infallible;

    /// Integers become [`Reference::Id`]; anything else is kept as a name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.trim()
            .parse::<i64>()
            .map_or_else(|_| Self::Name(s.to_owned()), Self::Id))
    }
}

impl From<i64> for Reference {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<TimelineId> for Reference {
    fn from(id: TimelineId) -> Self {
        Self::Key(RecordKey::Timeline(id))
    }
}

impl From<ParagraphKey> for Reference {
    fn from(key: ParagraphKey) -> Self {
        Self::Key(RecordKey::Paragraph(key))
    }
}

fn wrong_kind(expected: RecordKind, actual: RecordKind) -> DomainError {
    DomainError::InvalidInput(format!("expected a {expected} key, got a {actual} key"))
}

fn parse_name<T: FromStr>(name: &str, kind: RecordKind) -> Result<T, DomainError> {
    name.trim()
        .parse::<T>()
        .map_err(|_| DomainError::InvalidInput(format!("invalid {kind} name: {name:?}")))
}

/// Normalises a reference into a timeline id.
///
/// # Errors
///
/// Returns `DomainError::InvalidInput` if the reference is not a positive
/// integer id, or is a key of the paragraph kind.
pub fn resolve_timeline(reference: &Reference) -> Result<TimelineId, DomainError> {
    let id = match reference {
        Reference::Id(id) => *id,
        Reference::Name(name) => parse_name::<i64>(name, RecordKind::Timeline)?,
        Reference::Key(RecordKey::Timeline(id)) => return Ok(*id),
        Reference::Key(key) => return Err(wrong_kind(RecordKind::Timeline, key.kind())),
    };
    if id < 1 {
        return Err(DomainError::InvalidInput(format!(
            "timeline ids are positive, got {id}"
        )));
    }
    Ok(TimelineId(id))
}

/// Normalises a reference into the key of a paragraph owned by `parent`.
///
/// # Errors
///
/// Returns `DomainError::InvalidInput` if the position is not a positive
/// integer, if the reference is a timeline key, or if a paragraph key belongs
/// to a different record group than `parent`.
pub fn resolve_paragraph(
    reference: &Reference,
    parent: TimelineId,
) -> Result<ParagraphKey, DomainError> {
    let position = match reference {
        Reference::Id(id) => u32::try_from(*id).map_err(|_| {
            DomainError::InvalidInput(format!("paragraph position out of range: {id}"))
        })?,
        Reference::Name(name) => parse_name::<u32>(name, RecordKind::Paragraph)?,
        Reference::Key(RecordKey::Paragraph(key)) => {
            if key.timeline_id != parent {
                return Err(DomainError::InvalidInput(format!(
                    "paragraph {key} does not belong to story {parent}"
                )));
            }
            key.position
        }
        Reference::Key(key) => return Err(wrong_kind(RecordKind::Paragraph, key.kind())),
    };
    if position == 0 {
        return Err(DomainError::InvalidInput(
            "paragraph positions start at 1".to_owned(),
        ));
    }
    Ok(ParagraphKey::new(parent, position))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_segment_yields_id() {
        let reference: Reference = " 42 ".parse().unwrap();
        assert_eq!(reference, Reference::Id(42));
    }

    #[test]
    fn test_parse_non_numeric_segment_yields_name() {
        let reference: Reference = "root".parse().unwrap();
        assert_eq!(reference, Reference::Name("root".to_owned()));
    }

    #[test]
    fn test_resolve_timeline_accepts_all_three_forms() {
        assert_eq!(resolve_timeline(&Reference::Id(5)).unwrap(), TimelineId(5));
        assert_eq!(
            resolve_timeline(&Reference::Name("5".to_owned())).unwrap(),
            TimelineId(5)
        );
        assert_eq!(
            resolve_timeline(&TimelineId(5).into()).unwrap(),
            TimelineId(5)
        );
    }

    #[test]
    fn test_resolve_timeline_rejects_paragraph_key() {
        let reference: Reference = ParagraphKey::new(TimelineId(1), 2).into();

        match resolve_timeline(&reference) {
            Err(DomainError::InvalidInput(msg)) => assert!(msg.contains("timeline")),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_timeline_rejects_non_positive_and_garbage() {
        assert!(matches!(
            resolve_timeline(&Reference::Id(0)),
            Err(DomainError::InvalidInput(_))
        ));
        assert!(matches!(
            resolve_timeline(&Reference::Name("first".to_owned())),
            Err(DomainError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_resolve_paragraph_uses_parent_group() {
        let parent = TimelineId(9);

        assert_eq!(
            resolve_paragraph(&Reference::Id(3), parent).unwrap(),
            ParagraphKey::new(parent, 3)
        );
        assert_eq!(
            resolve_paragraph(&Reference::Name("3".to_owned()), parent).unwrap(),
            ParagraphKey::new(parent, 3)
        );
    }

    #[test]
    fn test_resolve_paragraph_rejects_foreign_parent() {
        let reference: Reference = ParagraphKey::new(TimelineId(1), 3).into();

        let result = resolve_paragraph(&reference, TimelineId(2));

        assert!(matches!(result, Err(DomainError::InvalidInput(_))));
    }

    #[test]
    fn test_resolve_paragraph_rejects_zero_and_negative_positions() {
        let parent = TimelineId(1);
        assert!(resolve_paragraph(&Reference::Id(0), parent).is_err());
        assert!(resolve_paragraph(&Reference::Id(-4), parent).is_err());
        assert!(resolve_paragraph(&TimelineId(1).into(), parent).is_err());
    }
}
