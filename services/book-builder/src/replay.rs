//! Replay engine for the book builder
//!
//! Rebuilds books from an event journal by feeding every event through a
//! per-symbol [`BookListener`], so replay follows exactly the same rules
//! as live processing.
//!
//! - Deterministic replay (same inputs → same books)
//! - Strict mode: per-symbol sequences must be contiguous and every event
//!   must apply cleanly
//! - Optional state checksum validation post-replay

use std::collections::BTreeMap;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{error, info};
use types::ids::Symbol;

use crate::config::ListenerConfig;
use crate::events::BookEvent;
use crate::listener::{BookListener, ListenerOutcome};
use crate::order_book::OrderBook;
use crate::snapshot::book_checksum;

/// Metrics collected during replay.
#[derive(Debug, Clone)]
pub struct ReplayMetrics {
    /// Total events replayed.
    pub events_replayed: u64,
    /// Events that did not change a book (duplicates, trades, rejects).
    pub events_skipped: u64,
    /// Duration of replay in milliseconds.
    pub duration_ms: u128,
    /// Events per second during replay.
    pub events_per_second: f64,
    /// State checksum after replay.
    pub state_checksum: String,
}

/// Result of a replay operation.
#[derive(Debug)]
pub struct ReplayResult {
    /// Rebuilt order books by symbol.
    pub books: BTreeMap<Symbol, OrderBook>,
    /// Last sequence number applied per symbol.
    pub last_sequences: BTreeMap<Symbol, u64>,
    pub metrics: ReplayMetrics,
}

/// Errors during replay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("journal corruption detected at sequence {sequence}: {reason}")]
    JournalCorruption { sequence: u64, reason: String },

    #[error("state checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("sequence gap detected: expected {expected}, got {actual}")]
    SequenceGap { expected: u64, actual: u64 },
}

/// Replays events from a journal to rebuild books.
pub struct ReplayEngine {
    /// Expected state checksum for validation (if known).
    expected_checksum: Option<String>,
    /// Whether to enforce strict sequence ordering.
    strict_ordering: bool,
    config: ListenerConfig,
}

impl ReplayEngine {
    pub fn new() -> Self {
        Self {
            expected_checksum: None,
            strict_ordering: true,
            config: ListenerConfig::default(),
        }
    }

    /// Set the expected state checksum for post-replay validation.
    pub fn with_expected_checksum(mut self, checksum: String) -> Self {
        self.expected_checksum = Some(checksum);
        self
    }

    /// Let the listeners' gap handling deal with holes in the journal.
    pub fn with_relaxed_ordering(mut self) -> Self {
        self.strict_ordering = false;
        self
    }

    pub fn with_config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replay a journal and rebuild every book it mentions.
    pub fn replay(&self, events: &[BookEvent]) -> Result<ReplayResult, ReplayError> {
        let start = Instant::now();

        info!(
            event_count = events.len(),
            strict = self.strict_ordering,
            "Starting event replay"
        );

        let mut listeners: BTreeMap<Symbol, BookListener> = BTreeMap::new();
        let mut events_replayed: u64 = 0;
        let mut events_skipped: u64 = 0;

        for event in events {
            let listener = listeners
                .entry(event.symbol.clone())
                .or_insert_with(|| BookListener::new(event.symbol.clone(), self.config.clone()));

            if self.strict_ordering {
                check_strict_order(listener, event)?;
            }

            let outcome = listener.on_event(event.clone());
            if self.strict_ordering {
                if let ListenerOutcome::Rejected(err) = &outcome {
                    return Err(ReplayError::JournalCorruption {
                        sequence: event.sequence,
                        reason: err.to_string(),
                    });
                }
            }
            if !outcome.mutated() {
                events_skipped += 1;
            }
            events_replayed += 1;
        }

        let duration_ms = start.elapsed().as_millis();
        let events_per_second = if duration_ms > 0 {
            (events_replayed as f64 / duration_ms as f64) * 1000.0
        } else {
            events_replayed as f64
        };

        let last_sequences: BTreeMap<Symbol, u64> = listeners
            .iter()
            .map(|(symbol, l)| (symbol.clone(), l.last_sequence()))
            .collect();
        let books: BTreeMap<Symbol, OrderBook> = listeners
            .into_iter()
            .map(|(symbol, l)| (symbol, l.book().clone()))
            .collect();
        let state_checksum = compute_state_checksum(&books, &last_sequences);

        if let Some(ref expected) = self.expected_checksum {
            if &state_checksum != expected {
                error!(
                    expected = %expected,
                    actual = %state_checksum,
                    "State checksum mismatch after replay"
                );
                return Err(ReplayError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual: state_checksum,
                });
            }
        }

        let metrics = ReplayMetrics {
            events_replayed,
            events_skipped,
            duration_ms,
            events_per_second,
            state_checksum,
        };

        info!(
            events_replayed = metrics.events_replayed,
            books = books.len(),
            duration_ms = metrics.duration_ms,
            eps = %format!("{:.0}", metrics.events_per_second),
            "Replay completed successfully"
        );

        Ok(ReplayResult {
            books,
            last_sequences,
            metrics,
        })
    }
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn check_strict_order(listener: &BookListener, event: &BookEvent) -> Result<(), ReplayError> {
    // Unsequenced events and full images are never out of order.
    if event.sequence == 0 || event.is_full_image() || listener.last_sequence() == 0 {
        return Ok(());
    }
    let last = listener.last_sequence();
    if event.sequence <= last {
        return Err(ReplayError::JournalCorruption {
            sequence: event.sequence,
            reason: format!("Non-monotonic sequence: {} after {}", event.sequence, last),
        });
    }
    if event.sequence > last + 1 {
        return Err(ReplayError::SequenceGap {
            expected: last + 1,
            actual: event.sequence,
        });
    }
    Ok(())
}

/// Checksum over every book, in symbol order.
pub fn compute_state_checksum(
    books: &BTreeMap<Symbol, OrderBook>,
    last_sequences: &BTreeMap<Symbol, u64>,
) -> String {
    let mut hasher = Sha256::new();
    for (symbol, book) in books {
        let seq = last_sequences.get(symbol).copied().unwrap_or(0);
        hasher.update(symbol.as_str().as_bytes());
        hasher.update(b"=");
        hasher.update(book_checksum(book, seq).as_bytes());
        hasher.update(b";");
    }
    format!("{:x}", hasher.finalize())
}
