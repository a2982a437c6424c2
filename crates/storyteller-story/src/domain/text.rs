//! Paragraph text validation.

use std::fmt;

use storyteller_core::error::DomainError;

/// Shortest accepted paragraph, in characters, after normalisation.
pub const MIN_PARAGRAPH_CHARS: usize = 5;
/// Longest accepted paragraph, in characters, after normalisation.
pub const MAX_PARAGRAPH_CHARS: usize = 140;

/// Paragraph text with whitespace runs collapsed and its length checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParagraphText(String);

impl ParagraphText {
    /// Collapses every whitespace run (spaces, tabs, newlines) to a single
    /// space, trims the ends, and checks the length bounds.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` naming the violated bound if the
    /// normalised text is shorter than 5 or longer than 140 characters.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let chars = text.chars().count();
        if chars < MIN_PARAGRAPH_CHARS {
            return Err(DomainError::Validation(format!(
                "paragraph is too short: {chars} characters, minimum is {MIN_PARAGRAPH_CHARS}"
            )));
        }
        if chars > MAX_PARAGRAPH_CHARS {
            return Err(DomainError::Validation(format!(
                "paragraph is too long: {chars} characters, maximum is {MAX_PARAGRAPH_CHARS}"
            )));
        }
        Ok(Self(text))
    }

    /// Returns the normalised text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParagraphText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
