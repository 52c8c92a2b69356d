//! Delta recording for incremental book updates
//!
//! Every book mutation produces a [`LevelDelta`]: a snapshot of the level
//! (and entry, if any) immediately after the change, together with the level
//! and entry actions. The [`DeltaRecorder`] accumulates these until they are
//! published; a single pending mutation publishes as a simple delta, more
//! than one as a complex delta.
//!
//! [`diff_books`] derives the mutations that turn one book into another,
//! for consumers that need a change-set without having observed the events.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::book::{EntryAction, LevelAction, OrderType, Side};
use types::ids::EntryId;
use types::numeric::{Price, Quantity};

use crate::entry::BookEntry;
use crate::order_book::OrderBook;
use crate::price_level::PriceLevel;

/// Entry state carried by a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDelta {
    pub id: EntryId,
    pub size: Quantity,
    pub action: EntryAction,
    pub status: u16,
    pub time: i64,
    #[serde(default = "visible_default")]
    pub visible: bool,
}

fn visible_default() -> bool {
    true
}

impl EntryDelta {
    pub fn from_entry(entry: &BookEntry) -> Self {
        Self {
            id: entry.id().clone(),
            size: entry.size(),
            action: entry.action(),
            status: entry.status(),
            time: entry.time(),
            visible: entry.is_visible(),
        }
    }

    fn with_action(mut self, action: EntryAction) -> Self {
        self.action = action;
        self
    }
}

/// A single change to a price level, optionally caused by one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDelta {
    pub side: Side,
    pub price: Price,
    pub action: LevelAction,
    /// Level size after the change.
    pub size: Quantity,
    /// Net size change caused by this mutation.
    pub size_change: Decimal,
    pub num_entries: u32,
    pub time: i64,
    /// `Market` for the per-side market-order level.
    #[serde(default)]
    pub order_type: OrderType,
    pub entry: Option<EntryDelta>,
}

impl LevelDelta {
    /// Capture a level's state after a mutation.
    pub fn capture(
        level: &PriceLevel,
        size_change: Decimal,
        action: LevelAction,
        entry: Option<EntryDelta>,
    ) -> Self {
        Self {
            side: level.side(),
            price: level.price(),
            action,
            size: level.size(),
            size_change,
            num_entries: level.num_entries(),
            time: level.time(),
            order_type: level.order_type(),
            entry,
        }
    }

    /// Whether this delta represents the level being removed.
    pub fn is_removal(&self) -> bool {
        self.action == LevelAction::Delete
    }

    /// Whether this delta represents a new level being created.
    pub fn is_new_level(&self) -> bool {
        self.action == LevelAction::Add
    }

    /// Whether this delta touches a market-order level.
    pub fn is_market(&self) -> bool {
        self.order_type == OrderType::Market
    }
}

/// One pending mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaRecord {
    Level(LevelDelta),
    /// Both ladders were emptied.
    Clear,
}

impl DeltaRecord {
    pub fn as_level(&self) -> Option<&LevelDelta> {
        match self {
            DeltaRecord::Level(delta) => Some(delta),
            DeltaRecord::Clear => None,
        }
    }
}

/// A published change-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookDelta {
    /// Exactly one mutation.
    Simple(DeltaRecord),
    /// Two or more mutations, in the order they were applied.
    Complex(Vec<DeltaRecord>),
}

impl BookDelta {
    /// Build a delta from pending records; `None` when there are none.
    pub fn from_records(mut records: Vec<DeltaRecord>) -> Option<Self> {
        match records.len() {
            0 => None,
            1 => records.pop().map(BookDelta::Simple),
            _ => Some(BookDelta::Complex(records)),
        }
    }

    pub fn records(&self) -> &[DeltaRecord] {
        match self {
            BookDelta::Simple(record) => std::slice::from_ref(record),
            BookDelta::Complex(records) => records,
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, BookDelta::Complex(_))
    }
}

/// Accumulates mutations between publishes.
#[derive(Debug, Clone, Default)]
pub struct DeltaRecorder {
    records: Vec<DeltaRecord>,
}

impl DeltaRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, delta: LevelDelta) {
        self.records.push(DeltaRecord::Level(delta));
    }

    /// A clear supersedes everything pending before it.
    pub fn record_clear(&mut self) {
        self.records.clear();
        self.records.push(DeltaRecord::Clear);
    }

    /// Drain the pending mutations as a simple or complex delta.
    pub fn take(&mut self) -> Option<BookDelta> {
        BookDelta::from_records(std::mem::take(&mut self.records))
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn records(&self) -> &[DeltaRecord] {
        &self.records
    }

    /// Number of mutations currently pending.
    pub fn pending_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Deltas that rebuild a whole level from nothing.
///
/// One `Add` per entry, or a single level-only `Add` when the level carries
/// no entries.
pub fn level_add_deltas(level: &PriceLevel) -> Vec<LevelDelta> {
    if level.is_empty() {
        return vec![LevelDelta::capture(
            level,
            level.size().as_decimal(),
            LevelAction::Add,
            None,
        )];
    }
    level
        .entries()
        .enumerate()
        .map(|(i, entry)| {
            let action = if i == 0 {
                LevelAction::Add
            } else {
                LevelAction::Update
            };
            LevelDelta::capture(
                level,
                entry.visible_size().as_decimal(),
                action,
                Some(EntryDelta::from_entry(entry).with_action(EntryAction::Add)),
            )
        })
        .collect()
}

/// Mutations that turn `before` into `after`.
///
/// Output is ordered bids then asks, each side best price first, followed
/// by the market-order levels; within a level, removals precede changes and
/// additions.
pub fn diff_books(before: &OrderBook, after: &OrderBook) -> Vec<DeltaRecord> {
    let mut records = Vec::new();
    for side in [Side::Bid, Side::Ask] {
        let mut prices: BTreeSet<Price> = before.levels(side).map(|l| l.price()).collect();
        prices.extend(after.levels(side).map(|l| l.price()));

        let ordered: Vec<Price> = match side {
            Side::Bid => prices.into_iter().rev().collect(),
            Side::Ask => prices.into_iter().collect(),
        };

        for price in ordered {
            let deltas = match (before.find_level(price, side), after.find_level(price, side)) {
                (Some(old), None) => vec![removed_level_delta(old)],
                (None, Some(new)) => level_add_deltas(new),
                (Some(old), Some(new)) => diff_levels(old, new),
                (None, None) => Vec::new(),
            };
            records.extend(deltas.into_iter().map(DeltaRecord::Level));
        }
    }
    for side in [Side::Bid, Side::Ask] {
        let deltas = match (before.market_orders(side), after.market_orders(side)) {
            (Some(old), None) => vec![removed_level_delta(old)],
            (None, Some(new)) => level_add_deltas(new),
            (Some(old), Some(new)) => diff_levels(old, new),
            (None, None) => Vec::new(),
        };
        records.extend(deltas.into_iter().map(DeltaRecord::Level));
    }
    records
}

fn removed_level_delta(level: &PriceLevel) -> LevelDelta {
    LevelDelta {
        side: level.side(),
        price: level.price(),
        action: LevelAction::Delete,
        size: Quantity::zero(),
        size_change: -level.size().as_decimal(),
        num_entries: 0,
        time: level.time(),
        order_type: level.order_type(),
        entry: None,
    }
}

fn diff_levels(old: &PriceLevel, new: &PriceLevel) -> Vec<LevelDelta> {
    if old == new {
        return Vec::new();
    }

    if old.is_empty() && new.is_empty() {
        return vec![LevelDelta::capture(
            new,
            new.size().diff(old.size()),
            LevelAction::Update,
            None,
        )];
    }

    let mut deltas = Vec::new();
    for entry in old.entries() {
        if !new.contains_entry(entry.id()) {
            let mut removed = EntryDelta::from_entry(entry).with_action(EntryAction::Delete);
            removed.time = new.time();
            deltas.push(LevelDelta::capture(
                new,
                -entry.visible_size().as_decimal(),
                LevelAction::Update,
                Some(removed),
            ));
        }
    }
    for entry in new.entries() {
        match old.find_entry(entry.id()) {
            Some(prev) if prev == entry => {}
            Some(prev) => deltas.push(LevelDelta::capture(
                new,
                entry.visible_size().diff(prev.visible_size()),
                LevelAction::Update,
                Some(EntryDelta::from_entry(entry).with_action(EntryAction::Update)),
            )),
            None => deltas.push(LevelDelta::capture(
                new,
                entry.visible_size().as_decimal(),
                LevelAction::Update,
                Some(EntryDelta::from_entry(entry).with_action(EntryAction::Add)),
            )),
        }
    }
    if deltas.is_empty() {
        // Same entries, different aggregate details.
        deltas.push(LevelDelta::capture(
            new,
            new.size().diff(old.size()),
            LevelAction::Update,
            None,
        ));
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{PartId, Symbol};

    fn make_book() -> OrderBook {
        OrderBook::new(Symbol::new("ORCL"), PartId::default())
    }

    fn add(book: &mut OrderBook, id: &str, side: Side, price: u64, size: u64) {
        book.add_entry(
            BookEntry::new(id, Quantity::from_u64(size), EntryAction::Add, 1),
            Price::from_u64(price),
            side,
            1,
        )
        .unwrap();
    }

    #[test]
    fn test_single_record_is_simple() {
        let mut recorder = DeltaRecorder::new();
        let level = PriceLevel::new(Price::from_u64(10), Side::Bid);
        recorder.record(LevelDelta::capture(&level, Decimal::ZERO, LevelAction::Add, None));

        let delta = recorder.take().unwrap();
        assert!(!delta.is_complex());
        assert_eq!(delta.len(), 1);
        assert!(recorder.take().is_none());
    }

    #[test]
    fn test_second_record_promotes_to_complex() {
        let mut recorder = DeltaRecorder::new();
        let level = PriceLevel::new(Price::from_u64(10), Side::Bid);
        recorder.record(LevelDelta::capture(&level, Decimal::ZERO, LevelAction::Add, None));
        recorder.record(LevelDelta::capture(&level, Decimal::ONE, LevelAction::Update, None));
        recorder.record(LevelDelta::capture(&level, Decimal::ONE, LevelAction::Update, None));

        let delta = recorder.take().unwrap();
        assert!(delta.is_complex());
        assert_eq!(delta.len(), 3);
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_clear_supersedes_pending() {
        let mut recorder = DeltaRecorder::new();
        let level = PriceLevel::new(Price::from_u64(10), Side::Bid);
        recorder.record(LevelDelta::capture(&level, Decimal::ZERO, LevelAction::Add, None));
        recorder.record_clear();

        assert_eq!(recorder.take(), Some(BookDelta::Simple(DeltaRecord::Clear)));
    }

    #[test]
    fn test_diff_identical_books_is_empty() {
        let mut a = make_book();
        add(&mut a, "E1", Side::Bid, 100, 10);
        let b = a.clone();
        assert!(diff_books(&a, &b).is_empty());
    }

    #[test]
    fn test_diff_reports_added_removed_and_changed() {
        let mut before = make_book();
        add(&mut before, "E1", Side::Bid, 100, 10);
        add(&mut before, "E2", Side::Bid, 99, 5);

        let mut after = make_book();
        add(&mut after, "E1", Side::Bid, 100, 20);
        add(&mut after, "E3", Side::Ask, 101, 7);

        let records = diff_books(&before, &after);
        let levels: Vec<&LevelDelta> = records.iter().filter_map(DeltaRecord::as_level).collect();
        assert_eq!(levels.len(), 3);

        assert_eq!(levels[0].price, Price::from_u64(100));
        assert_eq!(levels[0].entry.as_ref().unwrap().action, EntryAction::Update);
        assert_eq!(levels[0].size_change, Decimal::from(10));

        assert_eq!(levels[1].price, Price::from_u64(99));
        assert!(levels[1].is_removal());

        assert_eq!(levels[2].side, Side::Ask);
        assert!(levels[2].is_new_level());
    }

    #[test]
    fn test_diff_reports_visibility_change() {
        let mut before = make_book();
        add(&mut before, "E1", Side::Bid, 100, 10);
        add(&mut before, "E2", Side::Bid, 100, 5);
        let mut after = before.clone();
        after.update_entry_visibility(&EntryId::from("E2"), Price::from_u64(100), Side::Bid, false, 2);

        let records = diff_books(&before, &after);
        assert_eq!(records.len(), 1);
        let delta = records[0].as_level().unwrap();
        assert_eq!(delta.size_change, Decimal::from(-5));
        assert!(!delta.entry.as_ref().unwrap().visible);
    }

    #[test]
    fn test_diff_covers_market_orders() {
        let before = make_book();
        let mut after = make_book();
        after
            .add_market_entry(
                BookEntry::new("M1", Quantity::from_u64(3), EntryAction::Add, 1),
                Side::Ask,
                1,
            )
            .unwrap();

        let records = diff_books(&before, &after);
        assert_eq!(records.len(), 1);
        let delta = records[0].as_level().unwrap();
        assert!(delta.is_market());
        assert_eq!(delta.entry.as_ref().unwrap().id.as_str(), "M1");

        assert!(diff_books(&after, &after.clone()).is_empty());
        let back = diff_books(&after, &before);
        assert!(back[0].as_level().unwrap().is_removal());
    }
}
