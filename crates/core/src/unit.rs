//! Units of work: one bounded-size piece of a document.

use serde::{Deserialize, Serialize};

/// One chunk of a document, addressed by its 0-based position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub index: usize,
    pub content: String,
}

impl Unit {
    pub fn new(index: usize, content: impl Into<String>) -> Self {
        Self {
            index,
            content: content.into(),
        }
    }

    /// Number chunks in order.
    pub fn enumerate(chunks: impl IntoIterator<Item = String>) -> Vec<Unit> {
        chunks
            .into_iter()
            .enumerate()
            .map(|(index, content)| Unit { index, content })
            .collect()
    }
}

/// Persisted state of a unit. Failure is never stored: a failed unit stays
/// `Pending` and is picked up again by the next round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Completed(String),
}

impl UnitState {
    pub fn is_completed(&self) -> bool {
        matches!(self, UnitState::Completed(_))
    }

    pub fn from_stored(result: Option<String>) -> Self {
        match result {
            Some(result) => UnitState::Completed(result),
            None => UnitState::Pending,
        }
    }
}
