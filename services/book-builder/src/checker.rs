//! Consistency checks between a real-time book and a snapshot
//!
//! A snapshot taken at sequence `n` is only comparable with a real-time
//! book that has also processed exactly up to `n`. Anything else is
//! inconclusive rather than a failure.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::listener::{BookListener, BookState};
use crate::order_book::OrderBook;

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckOutcome {
    Success,
    /// The books could not be compared; carries the reason.
    Inconclusive(String),
    /// The books differ; carries the first difference.
    Failure(String),
}

/// Compares real-time books against snapshots and keeps a tally.
#[derive(Debug, Clone, Default)]
pub struct BookChecker {
    success_count: u64,
    inconclusive_count: u64,
    failure_count: u64,
}

impl BookChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `realtime`'s book with `snapshot`, taken at `snapshot_seq`.
    pub fn check(
        &mut self,
        realtime: &BookListener,
        snapshot: &OrderBook,
        snapshot_seq: u64,
    ) -> CheckOutcome {
        let outcome = if realtime.state() == BookState::Recapping {
            CheckOutcome::Inconclusive("real-time book is recapping".to_string())
        } else if realtime.last_sequence() != snapshot_seq {
            CheckOutcome::Inconclusive(format!(
                "sequence mismatch: real-time {} vs snapshot {snapshot_seq}",
                realtime.last_sequence()
            ))
        } else {
            match realtime.book().first_difference(snapshot) {
                None => CheckOutcome::Success,
                Some(diff) => CheckOutcome::Failure(diff),
            }
        };

        let symbol = realtime.symbol();
        match &outcome {
            CheckOutcome::Success => {
                self.success_count += 1;
                info!(symbol = %symbol, sequence = snapshot_seq, "Book check passed");
            }
            CheckOutcome::Inconclusive(reason) => {
                self.inconclusive_count += 1;
                info!(symbol = %symbol, reason = %reason, "Book check inconclusive");
            }
            CheckOutcome::Failure(diff) => {
                self.failure_count += 1;
                warn!(
                    symbol = %symbol,
                    sequence = snapshot_seq,
                    difference = %diff,
                    "Book check failed"
                );
            }
        }
        outcome
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn inconclusive_count(&self) -> u64 {
        self.inconclusive_count
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }
}
