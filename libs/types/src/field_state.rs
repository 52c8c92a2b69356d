//! Per-field change tracking
//!
//! Every observable attribute of an entry, a level, or a listener carries a
//! tri-state tag so consumers can tell "never set" from "unchanged since the
//! previous event" from "changed by the most recent event".

use serde::{Deserialize, Serialize};

/// Tri-state change tag for a single field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldState {
    /// Never set
    #[default]
    NotInitialised,
    /// Set by an earlier event, unchanged by the most recent one
    NotModified,
    /// Changed by the most recent event
    Modified,
}

/// A value paired with its [`FieldState`].
///
/// Equality compares values only; two books built from different event
/// histories compare equal when their contents match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tracked<T> {
    value: T,
    state: FieldState,
}

impl<T> Tracked<T> {
    /// A placeholder value that has never been set.
    pub fn unset(value: T) -> Self {
        Self {
            value,
            state: FieldState::NotInitialised,
        }
    }

    /// A value set by the current event.
    pub fn modified(value: T) -> Self {
        Self {
            value,
            state: FieldState::Modified,
        }
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
        self.state = FieldState::Modified;
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn state(&self) -> FieldState {
        self.state
    }

    pub fn is_modified(&self) -> bool {
        self.state == FieldState::Modified
    }

    /// Start of a new event: `Modified` becomes `NotModified`.
    pub fn age(&mut self) {
        if self.state == FieldState::Modified {
            self.state = FieldState::NotModified;
        }
    }
}

impl<T: Copy> Tracked<T> {
    pub fn value(&self) -> T {
        self.value
    }
}

impl<T: PartialEq> Tracked<T> {
    /// Set only when the value differs, leaving the tag alone otherwise.
    pub fn set_if_changed(&mut self, value: T) {
        if self.state == FieldState::NotInitialised || self.value != value {
            self.set(value);
        }
    }
}

impl<T: PartialEq> PartialEq for Tracked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Eq> Eq for Tracked<T> {}
