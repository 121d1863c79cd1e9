use serde::{Deserialize, Serialize};
use thiserror::Error;

use formfill_index::SearchResult;

use crate::document::Coordinate;
use crate::format::FormatSnapshot;

/// Where a field stands in the decision rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "text", rename_all = "snake_case")]
pub enum FieldState {
    #[default]
    Unresolved,
    Described,
    Fill(String),
    Restore(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("field {0} is already marked for restore")]
    RestoreWins(u32),
    #[error("field {0} has no description yet")]
    NotDescribed(u32),
    #[error("field {0} already has a decision")]
    AlreadyDecided(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub index: u32,
    pub coordinate: Coordinate,
    /// Text of the cell before tagging, without any tag.
    pub original_text: String,
    pub format: FormatSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_type: Option<String>,
    /// Declared field type used to pick retrieval keywords.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<SearchResult>,
    #[serde(default)]
    pub state: FieldState,
}

impl Field {
    pub fn new(
        index: u32,
        coordinate: Coordinate,
        original_text: impl Into<String>,
        format: FormatSnapshot,
    ) -> Self {
        Self {
            index,
            coordinate,
            original_text: original_text.into(),
            format,
            description: None,
            suggested_type: None,
            field_type: None,
            evidence: Vec::new(),
            state: FieldState::Unresolved,
        }
    }

    pub fn describe(
        &mut self,
        description: impl Into<String>,
        suggested_type: Option<String>,
        field_type: Option<String>,
    ) -> Result<(), TransitionError> {
        match self.state {
            FieldState::Unresolved => {
                self.description = Some(description.into());
                self.suggested_type = suggested_type;
                self.field_type = field_type;
                self.state = FieldState::Described;
                Ok(())
            }
            FieldState::Restore(_) => Err(TransitionError::RestoreWins(self.index)),
            FieldState::Described | FieldState::Fill(_) => {
                Err(TransitionError::AlreadyDecided(self.index))
            }
        }
    }

    /// Second-round description update. Keeps the first-round text when
    /// the model sends nothing new.
    pub fn redescribe(&mut self, description: Option<String>, suggested_type: Option<String>) {
        if let Some(description) = description.filter(|d| !d.trim().is_empty()) {
            self.description = Some(description);
        }
        if let Some(kind) = suggested_type.filter(|t| !t.trim().is_empty()) {
            self.suggested_type = Some(kind);
        }
    }

    pub fn fill(&mut self, content: impl Into<String>) -> Result<(), TransitionError> {
        match self.state {
            FieldState::Described => {
                self.state = FieldState::Fill(content.into());
                Ok(())
            }
            FieldState::Unresolved => Err(TransitionError::NotDescribed(self.index)),
            FieldState::Restore(_) => Err(TransitionError::RestoreWins(self.index)),
            FieldState::Fill(_) => Err(TransitionError::AlreadyDecided(self.index)),
        }
    }

    /// Restore overrides any earlier fill decision.
    pub fn restore(&mut self, text: impl Into<String>) -> Result<(), TransitionError> {
        match self.state {
            FieldState::Restore(_) => Err(TransitionError::AlreadyDecided(self.index)),
            _ => {
                self.state = FieldState::Restore(text.into());
                Ok(())
            }
        }
    }

    pub fn is_described(&self) -> bool {
        matches!(self.state, FieldState::Described)
    }

    pub fn is_decided(&self) -> bool {
        matches!(self.state, FieldState::Fill(_) | FieldState::Restore(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> Field {
        Field::new(2, Coordinate::new(0, 0, 1), "", FormatSnapshot::default())
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let mut f = field();
        assert_eq!(f.fill("x"), Err(TransitionError::NotDescribed(2)));
        f.describe("Employee name", Some("text".into()), Some("name".into()))
            .unwrap();
        assert!(f.is_described());
        assert_eq!(
            f.describe("again", None, None),
            Err(TransitionError::AlreadyDecided(2))
        );
        f.fill("Alice").unwrap();
        assert_eq!(f.state, FieldState::Fill("Alice".into()));
        assert_eq!(f.fill("Bob"), Err(TransitionError::AlreadyDecided(2)));
    }

    #[test]
    fn restore_wins_over_fill() {
        let mut f = field();
        f.describe("d", None, None).unwrap();
        f.fill("Alice").unwrap();
        f.restore("").unwrap();
        assert_eq!(f.state, FieldState::Restore(String::new()));
        assert_eq!(f.fill("Bob"), Err(TransitionError::RestoreWins(2)));
        assert_eq!(
            f.describe("d", None, None),
            Err(TransitionError::RestoreWins(2))
        );
    }

    #[test]
    fn redescribe_ignores_blank_updates() {
        let mut f = field();
        f.describe("Employee name", None, None).unwrap();
        f.redescribe(Some("  ".into()), Some("person name".into()));
        assert_eq!(f.description.as_deref(), Some("Employee name"));
        assert_eq!(f.suggested_type.as_deref(), Some("person name"));
    }
}
