//! Identifier types for book entities
//!
//! Identifiers are opaque strings assigned by the upstream feed. None of
//! them is generated locally, so they carry no embedded ordering.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument symbol a book is built for (e.g. "ORCL", "BTC/USDT").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new Symbol from a string
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// Try to create a Symbol, returning None if the string is empty
    pub fn try_new(symbol: impl Into<String>) -> Option<Self> {
        let s = symbol.into();
        if s.trim().is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    /// Get the symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Participant (exchange) identifier. Empty for consolidated books.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartId(String);

impl PartId {
    pub fn new(part_id: impl Into<String>) -> Self {
        Self(part_id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identifies the consolidated (participant-less) book
    pub fn is_consolidated(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of an individual order (entry) resting at a price level.
///
/// Unique within its level; the same id may appear at different prices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntryId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EntryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_creation() {
        let symbol = Symbol::new("ORCL");
        assert_eq!(symbol.as_str(), "ORCL");
        assert_eq!(symbol.to_string(), "ORCL");
    }

    #[test]
    fn test_symbol_try_new() {
        assert!(Symbol::try_new("BTC/USDT").is_some());
        assert!(Symbol::try_new("").is_none());
        assert!(Symbol::try_new("   ").is_none());
    }

    #[test]
    fn test_part_id_consolidated() {
        assert!(PartId::default().is_consolidated());
        assert!(!PartId::new("N").is_consolidated());
    }

    #[test]
    fn test_entry_id_serialization() {
        let id = EntryId::from("E1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"E1\"");

        let deserialized: EntryId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }
}
