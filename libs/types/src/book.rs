//! Side, action and order-type tags for book levels and entries

use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of the book a level belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy interest, best (highest) price first
    Bid,
    /// Sell interest, best (lowest) price first
    Ask,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// Single-character wire code ('B' / 'A').
    pub fn code(&self) -> char {
        match self {
            Side::Bid => 'B',
            Side::Ask => 'A',
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Bid => write!(f, "BID"),
            Side::Ask => write!(f, "ASK"),
        }
    }
}

/// What happened to a price level in the most recent mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LevelAction {
    Add,
    Update,
    Delete,
}

impl LevelAction {
    pub fn code(&self) -> char {
        match self {
            LevelAction::Add => 'A',
            LevelAction::Update => 'U',
            LevelAction::Delete => 'D',
        }
    }
}

impl fmt::Display for LevelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// What happened to an entry in the most recent mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryAction {
    Add,
    Update,
    Delete,
}

impl EntryAction {
    pub fn code(&self) -> char {
        match self {
            EntryAction::Add => 'A',
            EntryAction::Update => 'U',
            EntryAction::Delete => 'D',
        }
    }
}

impl fmt::Display for EntryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Kind of interest resting at a level.
///
/// Market orders carry no price and rest on a per-side level kept apart
/// from the priced ladder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    #[default]
    Limit,
    Market,
}
