//! Book and listener configuration
//!
//! Every setting has a default. `ListenerConfig::from_env` overrides the
//! defaults from environment variables:
//! - `BOOK_GENERATE_DELTAS`: `true`/`false`, record deltas for publishing
//! - `BOOK_EMPTY_LEVEL_POLICY`: `remove` or `retain`
//! - `BOOK_ZERO_SIZE_POLICY`: `explicit` or `delete_on_zero`
//! - `BOOK_RECAP_POLICY`: `discard` or `hold`
//! - `BOOK_HOLD_CAPACITY`: maximum deltas held while recapping
//! - `BOOK_PROCESS_ENTRIES`: `false` to build level-only books
//!
//! Empty values are treated as unset.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors raised while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} (expected {expected})")]
    InvalidValue {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// What happens to a level once its last entry is removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyLevelPolicy {
    /// Drop the level from the ladder
    #[default]
    Remove,
    /// Keep a zero-size placeholder until an explicit level delete
    RetainPlaceholder,
}

/// Whether an entry updated to size zero is treated as deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroSizeEntryPolicy {
    /// Keep zero-size entries until an explicit delete
    #[default]
    Explicit,
    /// Remove an entry as soon as its size reaches zero
    DeleteOnZero,
}

/// What the listener does with deltas that arrive while a recap is pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecapPolicy {
    #[default]
    Discard,
    /// Buffer them and apply the ones newer than the recap once it arrives
    Hold,
}

/// Per-book settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookConfig {
    /// Record mutations for `populate_delta`.
    pub generate_delta_msgs: bool,
    pub empty_level_policy: EmptyLevelPolicy,
    pub zero_size_policy: ZeroSizeEntryPolicy,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            generate_delta_msgs: true,
            empty_level_policy: EmptyLevelPolicy::Remove,
            zero_size_policy: ZeroSizeEntryPolicy::Explicit,
        }
    }
}

/// Settings for a [`BookListener`](crate::listener::BookListener).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub book: BookConfig,
    pub recap_policy: RecapPolicy,
    /// Maximum number of deltas held while recapping.
    pub hold_capacity: usize,
    /// Apply entry records; `false` builds a level-only book.
    pub process_entries: bool,
    /// Clear the book when its quality turns stale.
    pub clear_stale_book: bool,
    /// Keep applying deltas to a stale book.
    pub update_stale_book: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            book: BookConfig::default(),
            recap_policy: RecapPolicy::Discard,
            hold_capacity: 10_000,
            process_entries: true,
            clear_stale_book: true,
            update_stale_book: false,
        }
    }
}

impl ListenerConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a variable is set to a
    /// value that cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(non_empty_var)
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("BOOK_GENERATE_DELTAS") {
            config.book.generate_delta_msgs = parse_bool("BOOK_GENERATE_DELTAS", &v)?;
        }
        if let Some(v) = lookup("BOOK_EMPTY_LEVEL_POLICY") {
            config.book.empty_level_policy = parse_var("BOOK_EMPTY_LEVEL_POLICY", &v)?;
        }
        if let Some(v) = lookup("BOOK_ZERO_SIZE_POLICY") {
            config.book.zero_size_policy = parse_var("BOOK_ZERO_SIZE_POLICY", &v)?;
        }
        if let Some(v) = lookup("BOOK_RECAP_POLICY") {
            config.recap_policy = parse_var("BOOK_RECAP_POLICY", &v)?;
        }
        if let Some(v) = lookup("BOOK_HOLD_CAPACITY") {
            config.hold_capacity = v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: "BOOK_HOLD_CAPACITY",
                value: v.clone(),
                expected: "a non-negative integer",
            })?;
        }
        if let Some(v) = lookup("BOOK_PROCESS_ENTRIES") {
            config.process_entries = parse_bool("BOOK_PROCESS_ENTRIES", &v)?;
        }

        Ok(config)
    }
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            expected: "true or false",
        }),
    }
}

/// A config enum parsed from a lowercase keyword.
trait Keyword: Sized {
    const EXPECTED: &'static str;
    fn from_keyword(s: &str) -> Option<Self>;
}

fn parse_var<T: Keyword>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    T::from_keyword(value.trim().to_ascii_lowercase().as_str()).ok_or_else(|| {
        ConfigError::InvalidValue {
            var,
            value: value.to_string(),
            expected: T::EXPECTED,
        }
    })
}

impl Keyword for EmptyLevelPolicy {
    const EXPECTED: &'static str = "remove or retain";

    fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "remove" => Some(Self::Remove),
            "retain" | "retain_placeholder" => Some(Self::RetainPlaceholder),
            _ => None,
        }
    }
}

impl Keyword for ZeroSizeEntryPolicy {
    const EXPECTED: &'static str = "explicit or delete_on_zero";

    fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "explicit" => Some(Self::Explicit),
            "delete_on_zero" => Some(Self::DeleteOnZero),
            _ => None,
        }
    }
}

impl Keyword for RecapPolicy {
    const EXPECTED: &'static str = "discard or hold";

    fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "discard" => Some(Self::Discard),
            "hold" => Some(Self::Hold),
            _ => None,
        }
    }
}

impl FromStr for RecapPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_var("recap_policy", s)
    }
}

impl fmt::Display for RecapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecapPolicy::Discard => write!(f, "discard"),
            RecapPolicy::Hold => write!(f, "hold"),
        }
    }
}
