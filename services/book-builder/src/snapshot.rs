//! Versioned, checksummed book snapshots
//!
//! A snapshot captures every level and entry of a book together with the
//! last sequence number it reflects. Snapshots restore into a fresh
//! [`OrderBook`] through the recap path, and feed [`crate::checker`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use types::book::{EntryAction, LevelAction, Side};
use types::errors::BookError;
use types::ids::{EntryId, PartId, Symbol};
use types::numeric::{Price, Quantity};

use crate::apply::ApplyOptions;
use crate::config::BookConfig;
use crate::message::{BookMessage, BookMsgType, EntryRecord, LevelRecord};
use crate::order_book::OrderBook;
use crate::price_level::PriceLevel;

/// One entry as captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub id: EntryId,
    pub size: Quantity,
    pub status: u16,
    pub time: i64,
    #[serde(default = "visible_default")]
    pub visible: bool,
}

fn visible_default() -> bool {
    true
}

/// One level as captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub price: Price,
    pub size: Quantity,
    pub num_entries: u32,
    pub time: i64,
    pub entries: Vec<EntrySummary>,
}

impl LevelSummary {
    fn from_level(level: &PriceLevel) -> Self {
        Self {
            price: level.price(),
            size: level.size(),
            num_entries: level.num_entries(),
            time: level.time(),
            entries: level
                .entries()
                .map(|e| EntrySummary {
                    id: e.id().clone(),
                    size: e.size(),
                    status: e.status(),
                    time: e.time(),
                    visible: e.is_visible(),
                })
                .collect(),
        }
    }

    fn to_record(&self, side: Side) -> LevelRecord {
        let mut record = LevelRecord::new(self.price, side, LevelAction::Add);
        self.fill_record(&mut record);
        record
    }

    fn to_market_record(&self, side: Side) -> LevelRecord {
        let mut record = LevelRecord::market(side, LevelAction::Add);
        self.fill_record(&mut record);
        record
    }

    fn fill_record(&self, record: &mut LevelRecord) {
        record.time = Some(self.time);
        if self.entries.is_empty() {
            record.size = Some(self.size);
            record.num_entries = Some(self.num_entries);
            return;
        }
        for entry in &self.entries {
            let mut e = EntryRecord::new(entry.id.clone(), EntryAction::Add, entry.size);
            e.status = Some(entry.status);
            e.time = Some(entry.time);
            e.visible = (!entry.visible).then_some(false);
            record.entries.push(e);
        }
    }
}

/// A versioned, checksummed snapshot of one book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSnapshot {
    /// Monotonic snapshot version.
    pub version: u64,
    pub symbol: Symbol,
    #[serde(default)]
    pub part_id: PartId,
    /// Bid levels, best first.
    pub bids: Vec<LevelSummary>,
    /// Ask levels, best first.
    pub asks: Vec<LevelSummary>,
    /// Market orders per side, when any rest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_market: Option<LevelSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_market: Option<LevelSummary>,
    /// Last event sequence number included in this snapshot.
    pub last_sequence: u64,
    /// Unix nanoseconds timestamp when the snapshot was taken.
    pub timestamp: i64,
    /// SHA-256 checksum of the snapshot content.
    pub checksum: String,
}

impl BookSnapshot {
    /// The snapshot as a recap message.
    pub fn to_message(&self) -> BookMessage {
        let mut msg = BookMessage::new(BookMsgType::Recap, self.symbol.clone());
        msg.part_id = self.part_id.clone();
        msg.seq_num = self.last_sequence;
        msg.event_time = Some(self.timestamp);
        msg.levels = self
            .bids
            .iter()
            .map(|l| l.to_record(Side::Bid))
            .chain(self.asks.iter().map(|l| l.to_record(Side::Ask)))
            .chain(self.bid_market.iter().map(|l| l.to_market_record(Side::Bid)))
            .chain(self.ask_market.iter().map(|l| l.to_market_record(Side::Ask)))
            .collect();
        msg
    }

    /// Rebuild a book from this snapshot.
    pub fn restore(&self, config: BookConfig) -> Result<OrderBook, BookError> {
        let mut book = OrderBook::with_config(self.symbol.clone(), self.part_id.clone(), config);
        book.apply_recap(&self.to_message(), &ApplyOptions::default())?;
        Ok(book)
    }
}

/// Builds versioned snapshots of books.
pub struct SnapshotBuilder {
    /// Current snapshot version counter.
    version_counter: u64,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self { version_counter: 0 }
    }

    /// Capture the current state of `book`.
    pub fn build(&mut self, book: &OrderBook, last_sequence: u64, timestamp: i64) -> BookSnapshot {
        self.version_counter += 1;

        let content = SnapshotContent::of(book);
        let checksum = content.checksum(last_sequence);

        BookSnapshot {
            version: self.version_counter,
            symbol: book.symbol().clone(),
            part_id: book.part_id().clone(),
            bids: content.bids,
            asks: content.asks,
            bid_market: content.bid_market,
            ask_market: content.ask_market,
            last_sequence,
            timestamp,
            checksum,
        }
    }

    /// Current snapshot version.
    pub fn current_version(&self) -> u64 {
        self.version_counter
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 checksum over every level and entry of a book.
pub fn book_checksum(book: &OrderBook, last_sequence: u64) -> String {
    SnapshotContent::of(book).checksum(last_sequence)
}

/// Levels captured from a book, in iteration order.
struct SnapshotContent {
    bids: Vec<LevelSummary>,
    asks: Vec<LevelSummary>,
    bid_market: Option<LevelSummary>,
    ask_market: Option<LevelSummary>,
}

impl SnapshotContent {
    fn of(book: &OrderBook) -> Self {
        Self {
            bids: book.bid_levels().map(LevelSummary::from_level).collect(),
            asks: book.ask_levels().map(LevelSummary::from_level).collect(),
            bid_market: book.bid_market_orders().map(LevelSummary::from_level),
            ask_market: book.ask_market_orders().map(LevelSummary::from_level),
        }
    }

    fn checksum(&self, sequence: u64) -> String {
        compute_checksum(
            &self.bids,
            &self.asks,
            [self.bid_market.as_ref(), self.ask_market.as_ref()],
            sequence,
        )
    }
}

/// Hash levels in iteration order, so equal books always hash equally.
fn compute_checksum(
    bids: &[LevelSummary],
    asks: &[LevelSummary],
    markets: [Option<&LevelSummary>; 2],
    sequence: u64,
) -> String {
    let mut hasher = Sha256::new();

    for side in [bids, asks] {
        for level in side {
            hash_level(&mut hasher, level);
        }
        hasher.update(b"---");
    }
    for market in markets {
        if let Some(level) = market {
            hasher.update(b"MKT");
            hash_level(&mut hasher, level);
        }
        hasher.update(b"---");
    }

    hasher.update(sequence.to_le_bytes());

    format!("{:x}", hasher.finalize())
}

fn hash_level(hasher: &mut Sha256, level: &LevelSummary) {
    hasher.update(level.price.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(level.size.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(level.num_entries.to_le_bytes());
    for entry in &level.entries {
        hasher.update(b"[");
        hasher.update(entry.id.as_str().as_bytes());
        hasher.update(b"=");
        hasher.update(entry.size.to_string().as_bytes());
        if !entry.visible {
            hasher.update(b"~");
        }
        hasher.update(b"]");
    }
    hasher.update(b"|");
}

/// Verify that a snapshot's checksum matches its content.
pub fn verify_snapshot_integrity(snapshot: &BookSnapshot) -> bool {
    let expected = compute_checksum(
        &snapshot.bids,
        &snapshot.asks,
        [snapshot.bid_market.as_ref(), snapshot.ask_market.as_ref()],
        snapshot.last_sequence,
    );
    snapshot.checksum == expected
}

/// Whether deltas starting at `first_delta_sequence` continue from `snapshot`.
pub fn validate_snapshot_delta_sync(snapshot: &BookSnapshot, first_delta_sequence: u64) -> bool {
    snapshot.last_sequence < first_delta_sequence
}
