//! Inbound event definitions for the book builder
//!
//! A `BookEvent` wraps one feed message for one instrument: a full image,
//! an incremental change-set, a clear, or an informational trade.
//!
//! Uses `Ord` on sequence for deterministic ordering when replaying.

use serde::{Deserialize, Serialize};
use types::book::Side;
use types::ids::{PartId, Symbol};
use types::numeric::{Price, Quantity};
use uuid::Uuid;

use crate::message::BookMessage;

/// One inbound feed event.
///
/// Carries a per-symbol sequence number (0 when unsequenced) and a
/// timestamp in Unix nanoseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookEvent {
    /// Unique event identifier (UUID v7)
    pub event_id: Uuid,
    /// Instrument the event belongs to
    pub symbol: Symbol,
    /// Feed sequence number; 0 means unsequenced
    pub sequence: u64,
    /// Unix nanoseconds timestamp from the feed
    pub timestamp: i64,
    /// Name of the feed that emitted this event
    pub source: String,
    /// Event-specific payload
    pub payload: BookEventPayload,
}

/// Event-specific payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum BookEventPayload {
    /// First full image after subscription
    Initial { message: BookMessage },
    /// Full image sent to resynchronise
    Recap { message: BookMessage },
    /// Incremental change-set
    Delta { message: BookMessage },
    /// Both sides emptied
    Clear,
    /// A trade printed against the book
    Trade { report: TradeReport },
}

/// Informational trade report. Never mutates the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeReport {
    pub price: Price,
    pub size: Quantity,
    /// Aggressor side, when the feed reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
    pub time: i64,
}

impl BookEvent {
    /// Create an event stamped with a fresh v7 id.
    pub fn new(symbol: Symbol, sequence: u64, timestamp: i64, payload: BookEventPayload) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            symbol,
            sequence,
            timestamp,
            source: String::new(),
            payload,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// The book message carried by image and delta events.
    pub fn message(&self) -> Option<&BookMessage> {
        match &self.payload {
            BookEventPayload::Initial { message }
            | BookEventPayload::Recap { message }
            | BookEventPayload::Delta { message } => Some(message),
            BookEventPayload::Clear | BookEventPayload::Trade { .. } => None,
        }
    }

    /// Whether the event carries a full book image.
    pub fn is_full_image(&self) -> bool {
        matches!(
            self.payload,
            BookEventPayload::Initial { .. } | BookEventPayload::Recap { .. }
        )
    }

    /// Get the event type as a string label for logging.
    pub fn event_type_label(&self) -> &'static str {
        match &self.payload {
            BookEventPayload::Initial { .. } => "Initial",
            BookEventPayload::Recap { .. } => "Recap",
            BookEventPayload::Delta { .. } => "Delta",
            BookEventPayload::Clear => "Clear",
            BookEventPayload::Trade { .. } => "Trade",
        }
    }
}

/// Order by sequence number, then event id, for deterministic processing
impl Ord for BookEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then_with(|| self.event_id.cmp(&other.event_id))
    }
}

impl PartialOrd for BookEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A run of missing sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapInfo {
    /// First missing sequence number (inclusive)
    pub begin: u64,
    /// Last missing sequence number (inclusive)
    pub end: u64,
    /// Timestamp of the event that revealed the gap
    pub detected_at: i64,
}

impl GapInfo {
    /// Number of events missing in this gap.
    pub fn gap_size(&self) -> u64 {
        self.end - self.begin + 1
    }
}

/// Why a recap is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecapReason {
    SequenceGap,
    Stale,
}

/// Request for a fresh full image of one book.
///
/// Emitted when the listener can no longer trust its book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecapRequest {
    pub symbol: Symbol,
    pub part_id: PartId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap: Option<GapInfo>,
    pub reason: RecapReason,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::BookMsgType;

    fn make_event(seq: u64) -> BookEvent {
        BookEvent::new(
            Symbol::new("AAPL"),
            seq,
            1708123456789000000 + (seq as i64 * 1000),
            BookEventPayload::Delta {
                message: BookMessage::new(BookMsgType::Update, Symbol::new("AAPL")),
            },
        )
        .with_source("feed-a")
    }

    #[test]
    fn test_event_ordering_by_sequence() {
        let e1 = make_event(1);
        let e2 = make_event(2);
        let e3 = make_event(3);

        let mut events = vec![e3, e1, e2];
        events.sort();

        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[1].sequence, 2);
        assert_eq!(events[2].sequence, 3);
    }

    #[test]
    fn test_event_type_label() {
        assert_eq!(make_event(1).event_type_label(), "Delta");
        let clear = BookEvent::new(Symbol::new("AAPL"), 2, 0, BookEventPayload::Clear);
        assert_eq!(clear.event_type_label(), "Clear");
        assert!(clear.message().is_none());
        assert!(!clear.is_full_image());
    }

    #[test]
    fn test_event_serialization_roundtrip() {
        let e = make_event(42);
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"event_type\":\"Delta\""));
        let deserialized: BookEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(e, deserialized);
    }

    #[test]
    fn test_trade_roundtrip() {
        let e = BookEvent::new(
            Symbol::new("AAPL"),
            7,
            0,
            BookEventPayload::Trade {
                report: TradeReport {
                    price: "101.25".parse().unwrap(),
                    size: Quantity::from_u64(300),
                    side: Some(Side::Ask),
                    trade_id: None,
                    time: 5,
                },
            },
        );
        let json = serde_json::to_string(&e).unwrap();
        let back: BookEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(e, back);
    }

    #[test]
    fn test_gap_size() {
        let gap = GapInfo {
            begin: 10,
            end: 15,
            detected_at: 1708123456789000000,
        };
        assert_eq!(gap.gap_size(), 6);
    }
}
