//! In-memory working copy addressed by character offsets.

use crate::error::{EngineError, EngineResult};

use super::types::{EditOp, RealTimeChange};

/// The shared text a session edits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkingCopy {
    text: String,
    chars: usize,
}

impl WorkingCopy {
    /// Start from `text`.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let chars = text.chars().count();
        Self { text, chars }
    }

    /// Current text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    #[must_use]
    pub const fn len_chars(&self) -> usize {
        self.chars
    }

    /// Byte index of character `offset`, `None` past the end.
    fn byte_at(&self, offset: usize) -> Option<usize> {
        if offset == self.chars {
            return Some(self.text.len());
        }
        self.text.char_indices().nth(offset).map(|(i, _)| i)
    }

    /// Apply one change in place.
    ///
    /// # Errors
    /// [`EngineError::ValidationFailure`] if the offset or the removed span
    /// falls outside the text. The text is unchanged on error.
    pub fn apply(&mut self, change: &RealTimeChange) -> EngineResult<()> {
        let (remove, insert) = match &change.op {
            EditOp::Insert { text } => (0, text.as_str()),
            EditOp::Delete { len } => (*len, ""),
            EditOp::Replace { len, text } => (*len, text.as_str()),
        };
        let end = change
            .offset
            .checked_add(remove)
            .filter(|end| *end <= self.chars)
            .ok_or_else(|| {
                EngineError::validation(format!(
                    "edit at {}..{} is outside the {}-character working copy",
                    change.offset,
                    change.offset.saturating_add(remove),
                    self.chars
                ))
            })?;
        let (Some(from), Some(to)) = (self.byte_at(change.offset), self.byte_at(end)) else {
            return Err(EngineError::validation(format!(
                "offset {} is outside the working copy",
                change.offset
            )));
        };
        self.text.replace_range(from..to, insert);
        self.chars = self.chars - remove + insert.chars().count();
        Ok(())
    }

    /// Replace the whole text (after a checkpoint rebase).
    pub fn reset(&mut self, text: impl Into<String>) {
        *self = Self::new(text);
    }
}
