//! Applying inbound book messages to an [`OrderBook`]
//!
//! Both entry points validate the whole message before touching the book,
//! so a rejected message leaves it unchanged.
//!
//! - Recap: both ladders and the market-order levels are rebuilt off to
//!   the side and swapped in.
//! - Update: each level record becomes entry or level operations, which
//!   record their own deltas.

use std::collections::HashSet;

use tracing::{debug, warn};
use types::book::{EntryAction, LevelAction, Side};
use types::errors::{BookError, ValidationError};
use types::ids::EntryId;
use types::numeric::{Price, Quantity};

use crate::delta::LevelDelta;
use crate::entry::BookEntry;
use crate::message::{BookMessage, EntryRecord, LevelRecord};
use crate::order_book::{BookImage, EntryAttrs, LevelKey, OrderBook};
use crate::price_level::PriceLevel;

/// How a message is applied.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// When `false`, entry records are ignored and only level totals kept.
    pub process_entries: bool,
    /// Entry ids never placed in the book.
    pub ignored_entries: HashSet<EntryId>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            process_entries: true,
            ignored_entries: HashSet::new(),
        }
    }
}

impl ApplyOptions {
    fn skips(&self, record: &EntryRecord) -> bool {
        match &record.id {
            None => true,
            Some(id) => id.is_empty() || self.ignored_entries.contains(id),
        }
    }
}

fn check_symbol(book: &OrderBook, msg: &BookMessage) -> Result<(), BookError> {
    if &msg.symbol != book.symbol() {
        return Err(ValidationError::SymbolMismatch {
            expected: book.symbol().to_string(),
            actual: msg.symbol.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Where a validated level record lands, and on which side.
fn key(record: &LevelRecord) -> (LevelKey, Side) {
    let side = record.side.unwrap_or(Side::Bid);
    if record.is_market() {
        return (LevelKey::Market, side);
    }
    (LevelKey::Priced(record.price.unwrap_or(Price::ZERO)), side)
}

impl OrderBook {
    /// Replace the whole book with the image carried by `msg`.
    ///
    /// Returns the number of levels loaded. Pending deltas are dropped: the
    /// recap itself is the new baseline.
    pub fn apply_recap(
        &mut self,
        msg: &BookMessage,
        opts: &ApplyOptions,
    ) -> Result<usize, BookError> {
        let fallback = self.book_time();
        self.apply_recap_at(msg, opts, fallback)
    }

    /// [`apply_recap`](Self::apply_recap), timing the image at `fallback_time`
    /// when the message carries no event time of its own.
    pub fn apply_recap_at(
        &mut self,
        msg: &BookMessage,
        opts: &ApplyOptions,
        fallback_time: i64,
    ) -> Result<usize, BookError> {
        msg.validate()?;
        check_symbol(self, msg)?;

        let time = msg.event_time.unwrap_or(fallback_time);
        let mut image = BookImage::default();

        for record in &msg.levels {
            let (key, side) = key(record);
            let level = build_level(record, key, side, time, opts)?;
            if level.is_empty() && opts.process_entries && !record.entries.is_empty() {
                debug!(side = %side, price = %key, "Recap level had only ignored entries");
                continue;
            }
            image.insert(key, level)?;
        }

        let levels = image.num_levels();
        self.replace_levels(image);
        self.set_part_id(msg.part_id.clone());
        self.set_book_time(time);
        self.clear_delta_list();
        debug!(symbol = %self.symbol(), levels, "Recap applied");
        Ok(levels)
    }

    /// Apply an incremental change-set.
    ///
    /// Returns the deltas produced, in application order.
    pub fn apply_update(
        &mut self,
        msg: &BookMessage,
        opts: &ApplyOptions,
    ) -> Result<Vec<LevelDelta>, BookError> {
        let fallback = self.book_time();
        self.apply_update_at(msg, opts, fallback)
    }

    /// [`apply_update`](Self::apply_update), timing the change-set at
    /// `fallback_time` when the message carries no event time of its own.
    pub fn apply_update_at(
        &mut self,
        msg: &BookMessage,
        opts: &ApplyOptions,
        fallback_time: i64,
    ) -> Result<Vec<LevelDelta>, BookError> {
        msg.validate()?;
        check_symbol(self, msg)?;

        self.age();
        let time = msg.event_time.unwrap_or(fallback_time);
        self.set_book_time(time);
        let mut applied = Vec::new();

        for record in &msg.levels {
            let (key, side) = key(record);
            let level_time = record.time.unwrap_or(time);
            let action = record.action.unwrap_or(LevelAction::Update);

            if opts.process_entries && !record.entries.is_empty() {
                for entry in &record.entries {
                    if let Some(delta) = self.apply_entry(entry, key, side, level_time, opts)? {
                        applied.push(delta);
                    }
                }
            } else if action == LevelAction::Delete {
                applied.extend(self.delete_level_at(key, side, level_time));
            } else {
                let existing = self.level_at(key, side);
                let size = record
                    .size
                    .or_else(|| existing.map(PriceLevel::size))
                    .unwrap_or_default();
                let num_entries = record
                    .num_entries
                    .or_else(|| existing.map(PriceLevel::num_entries))
                    .unwrap_or(0);
                applied.push(self.update_level_at(key, side, size, num_entries, level_time));
            }
        }
        Ok(applied)
    }

    fn apply_entry(
        &mut self,
        record: &EntryRecord,
        key: LevelKey,
        side: Side,
        level_time: i64,
        opts: &ApplyOptions,
    ) -> Result<Option<LevelDelta>, BookError> {
        if opts.skips(record) {
            warn!(
                symbol = %self.symbol(),
                side = %side,
                price = %key,
                entry_id = ?record.id,
                "Skipping entry record"
            );
            return Ok(None);
        }
        let Some(id) = record.id.as_ref() else {
            return Ok(None);
        };
        let time = record.time.unwrap_or(level_time);

        match record.action.unwrap_or(EntryAction::Update) {
            EntryAction::Delete => Ok(self.delete_entry_at(id, key, side, time)),
            EntryAction::Add if self.find_entry_at(id, key, side).is_none() => {
                let entry = build_entry(id.clone(), record, time);
                self.add_entry_at(entry, key, side, time).map(Some)
            }
            _ => {
                let size = record
                    .size
                    .or_else(|| self.find_entry_at(id, key, side).map(BookEntry::size))
                    .unwrap_or_else(Quantity::zero);
                let attrs = EntryAttrs {
                    status: record.status,
                    visible: record.visible,
                };
                Ok(self.update_entry_at(id, key, side, size, attrs, time))
            }
        }
    }
}

/// A new entry carrying every attribute present in `record`.
fn build_entry(id: EntryId, record: &EntryRecord, time: i64) -> BookEntry {
    let mut entry = BookEntry::new(id, record.size.unwrap_or_default(), EntryAction::Add, time);
    if let Some(status) = record.status {
        entry.set_status(status);
    }
    entry.set_visible(record.visible.unwrap_or(true));
    entry
}

/// Build one level of a recap image.
fn build_level(
    record: &LevelRecord,
    key: LevelKey,
    side: Side,
    time: i64,
    opts: &ApplyOptions,
) -> Result<PriceLevel, BookError> {
    let level_time = record.time.unwrap_or(time);
    let mut level = match key {
        LevelKey::Priced(price) => PriceLevel::new(price, side),
        LevelKey::Market => PriceLevel::market(side),
    };
    level.set_time(level_time);
    if let Some(order_type) = record.order_type {
        level.set_order_type(order_type);
    }

    if opts.process_entries && !record.entries.is_empty() {
        for entry in record.entries.iter().filter(|e| !opts.skips(e)) {
            let Some(id) = entry.id.clone() else {
                continue;
            };
            level.add_entry(build_entry(id, entry, entry.time.unwrap_or(level_time)))?;
        }
    } else {
        level.set_level_details(
            record.size.unwrap_or_default(),
            record.num_entries.unwrap_or(0),
            level_time,
        );
    }
    level.set_action(LevelAction::Add);
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::BookMsgType;
    use types::ids::{PartId, Symbol};

    fn make_book() -> OrderBook {
        OrderBook::new(Symbol::new("IBM"), PartId::default())
    }

    fn qty(v: u64) -> Quantity {
        Quantity::from_u64(v)
    }

    fn recap() -> BookMessage {
        BookMessage::new(BookMsgType::Recap, Symbol::new("IBM"))
            .with_event_time(10)
            .with_level(
                LevelRecord::new(Price::from_u64(100), Side::Bid, LevelAction::Add)
                    .with_entry(EntryRecord::new("E1", EntryAction::Add, qty(100)))
                    .with_entry(EntryRecord::new("E2", EntryAction::Add, qty(50))),
            )
            .with_level(
                LevelRecord::new(Price::from_u64(101), Side::Ask, LevelAction::Add)
                    .with_entry(EntryRecord::new("E3", EntryAction::Add, qty(20))),
            )
    }

    #[test]
    fn test_apply_recap_loads_book() {
        let mut book = make_book();
        let loaded = book.apply_recap(&recap(), &ApplyOptions::default()).unwrap();

        assert_eq!(loaded, 2);
        assert_eq!(book.best_bid().unwrap().size(), qty(150));
        assert_eq!(book.best_ask().unwrap().num_entries(), 1);
        assert_eq!(book.book_time(), 10);
        assert!(book.pending_deltas().is_empty());
    }

    #[test]
    fn test_apply_recap_replaces_existing_content() {
        let mut book = make_book();
        book.update_level(Price::from_u64(90), Side::Bid, qty(5), 1, 1);
        book.apply_recap(&recap(), &ApplyOptions::default()).unwrap();

        assert!(book.find_level(Price::from_u64(90), Side::Bid).is_none());
        assert_eq!(book.total_num_levels(), 2);
    }

    #[test]
    fn test_invalid_recap_leaves_book_unchanged() {
        let mut book = make_book();
        book.apply_recap(&recap(), &ApplyOptions::default()).unwrap();
        let before = book.clone();

        let mut bad = recap();
        bad.levels.push(LevelRecord {
            side: Some(Side::Ask),
            ..LevelRecord::default()
        });
        let err = book.apply_recap(&bad, &ApplyOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            BookError::Validation(ValidationError::MissingLevelField { field: "price", .. })
        ));
        assert_eq!(book, before);
    }

    #[test]
    fn test_recap_for_other_symbol_rejected() {
        let mut book = make_book();
        let msg = BookMessage::new(BookMsgType::Recap, Symbol::new("MSFT"));
        let err = book.apply_recap(&msg, &ApplyOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            BookError::Validation(ValidationError::SymbolMismatch { .. })
        ));
    }

    #[test]
    fn test_recap_level_only() {
        let mut book = make_book();
        let msg = BookMessage::new(BookMsgType::Initial, Symbol::new("IBM")).with_level(
            LevelRecord::new(Price::from_u64(100), Side::Bid, LevelAction::Add)
                .with_size(qty(700), 7),
        );
        book.apply_recap(&msg, &ApplyOptions::default()).unwrap();

        let level = book.best_bid().unwrap();
        assert_eq!(level.size(), qty(700));
        assert_eq!(level.num_entries(), 7);
        assert!(level.is_empty());
    }

    #[test]
    fn test_recap_skips_ignored_entries() {
        let mut book = make_book();
        let mut opts = ApplyOptions::default();
        opts.ignored_entries.insert(EntryId::from("E3"));
        book.apply_recap(&recap(), &opts).unwrap();

        assert!(book.best_ask().is_none());
        assert_eq!(book.best_bid().unwrap().num_entries(), 2);
    }

    #[test]
    fn test_apply_update_entry_operations() {
        let mut book = make_book();
        book.apply_recap(&recap(), &ApplyOptions::default()).unwrap();

        let msg = BookMessage::new(BookMsgType::Update, Symbol::new("IBM"))
            .with_event_time(11)
            .with_level(
                LevelRecord::new(Price::from_u64(100), Side::Bid, LevelAction::Update)
                    .with_entry(EntryRecord::new("E1", EntryAction::Delete, qty(0)))
                    .with_entry(EntryRecord::new("E2", EntryAction::Update, qty(80))),
            )
            .with_level(
                LevelRecord::new(Price::from_u64(102), Side::Ask, LevelAction::Add)
                    .with_entry(EntryRecord::new("E4", EntryAction::Add, qty(5))),
            );
        let deltas = book.apply_update(&msg, &ApplyOptions::default()).unwrap();

        assert_eq!(deltas.len(), 3);
        assert_eq!(book.best_bid().unwrap().size(), qty(80));
        assert_eq!(book.num_ask_levels(), 2);
        assert_eq!(book.pending_deltas().len(), 3);
        assert_eq!(book.book_time(), 11);
    }

    #[test]
    fn test_apply_update_add_for_existing_entry_updates() {
        let mut book = make_book();
        book.apply_recap(&recap(), &ApplyOptions::default()).unwrap();

        let msg = BookMessage::new(BookMsgType::Update, Symbol::new("IBM")).with_level(
            LevelRecord::new(Price::from_u64(100), Side::Bid, LevelAction::Update)
                .with_entry(EntryRecord::new("E1", EntryAction::Add, qty(10))),
        );
        book.apply_update(&msg, &ApplyOptions::default()).unwrap();

        let level = book.best_bid().unwrap();
        assert_eq!(level.num_entries(), 2);
        assert_eq!(level.size(), qty(60));
    }

    #[test]
    fn test_apply_update_skips_empty_entry_id() {
        let mut book = make_book();
        let msg = BookMessage::new(BookMsgType::Update, Symbol::new("IBM")).with_level(
            LevelRecord::new(Price::from_u64(100), Side::Bid, LevelAction::Add)
                .with_entry(EntryRecord::new("", EntryAction::Add, qty(10))),
        );
        let deltas = book.apply_update(&msg, &ApplyOptions::default()).unwrap();
        assert!(deltas.is_empty());
        assert!(book.is_empty());
    }

    #[test]
    fn test_apply_update_level_delete() {
        let mut book = make_book();
        book.apply_recap(&recap(), &ApplyOptions::default()).unwrap();

        let msg = BookMessage::new(BookMsgType::Update, Symbol::new("IBM")).with_level(
            LevelRecord::new(Price::from_u64(100), Side::Bid, LevelAction::Delete),
        );
        let deltas = book.apply_update(&msg, &ApplyOptions::default()).unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].size_change, rust_decimal::Decimal::from(-150));
        assert_eq!(book.num_bid_levels(), 0);
    }

    #[test]
    fn test_apply_update_without_action_rejected() {
        let mut book = make_book();
        let msg = BookMessage::new(BookMsgType::Update, Symbol::new("IBM")).with_level(
            LevelRecord {
                price: Some(Price::from_u64(100)),
                side: Some(Side::Bid),
                ..LevelRecord::default()
            },
        );
        assert!(book.apply_update(&msg, &ApplyOptions::default()).is_err());
        assert!(book.is_empty());
    }

    #[test]
    fn test_level_only_processing() {
        let mut book = make_book();
        let opts = ApplyOptions {
            process_entries: false,
            ..ApplyOptions::default()
        };
        let msg = BookMessage::new(BookMsgType::Update, Symbol::new("IBM")).with_level(
            LevelRecord::new(Price::from_u64(100), Side::Bid, LevelAction::Add)
                .with_size(qty(300), 3)
                .with_entry(EntryRecord::new("E1", EntryAction::Add, qty(300))),
        );
        book.apply_update(&msg, &opts).unwrap();

        let level = book.best_bid().unwrap();
        assert_eq!(level.size(), qty(300));
        assert!(level.is_empty());
    }

    #[test]
    fn test_recap_round_trip_keeps_hidden_entries() {
        let mut source = make_book();
        source
            .add_entry(BookEntry::new("E1", qty(10), EntryAction::Add, 1), Price::from_u64(100), Side::Bid, 1)
            .unwrap();
        let mut hidden = BookEntry::new("H1", qty(500), EntryAction::Add, 1);
        hidden.set_visible(false);
        source
            .add_entry(hidden, Price::from_u64(100), Side::Bid, 1)
            .unwrap();

        let mut msg = BookMessage::new(BookMsgType::Recap, Symbol::new("IBM"));
        source.populate_recap(&mut msg);
        let mut replica = make_book();
        replica.apply_recap(&msg, &ApplyOptions::default()).unwrap();

        assert_eq!(replica.first_difference(&source), None);
        let level = replica.best_bid().unwrap();
        assert_eq!(level.size(), qty(10));
        assert_eq!(level.num_entries(), 1);
        assert_eq!(level.num_entries_total(), 2);
    }

    #[test]
    fn test_apply_update_hides_and_adds_hidden_entries() {
        let mut book = make_book();
        book.apply_recap(&recap(), &ApplyOptions::default()).unwrap();

        let msg = BookMessage::new(BookMsgType::Update, Symbol::new("IBM")).with_level(
            LevelRecord::new(Price::from_u64(100), Side::Bid, LevelAction::Update)
                .with_entry(EntryRecord::new("E2", EntryAction::Update, qty(50)).hidden())
                .with_entry(EntryRecord::new("H9", EntryAction::Add, qty(900)).hidden()),
        );
        let deltas = book.apply_update(&msg, &ApplyOptions::default()).unwrap();
        assert_eq!(deltas.len(), 2);
        assert!(!deltas[0].entry.as_ref().unwrap().visible);

        let level = book.best_bid().unwrap();
        assert_eq!(level.size(), qty(100));
        assert_eq!(level.num_entries(), 1);
        assert_eq!(level.num_entries_total(), 3);
    }

    #[test]
    fn test_level_only_update_on_level_with_entries() {
        let mut book = make_book();
        let msg = BookMessage::new(BookMsgType::Update, Symbol::new("IBM")).with_level(
            LevelRecord::new(Price::from_u64(100), Side::Bid, LevelAction::Add)
                .with_entry(EntryRecord::new("E1", EntryAction::Add, qty(10))),
        );
        book.apply_update(&msg, &ApplyOptions::default()).unwrap();

        let msg = BookMessage::new(BookMsgType::Update, Symbol::new("IBM")).with_level(
            LevelRecord::new(Price::from_u64(100), Side::Bid, LevelAction::Update)
                .with_size(qty(999), 7),
        );
        book.apply_update(&msg, &ApplyOptions::default()).unwrap();

        let level = book.best_bid().unwrap();
        let sum: Quantity = level.entries().map(BookEntry::visible_size).sum();
        assert_eq!(level.size(), qty(10));
        assert_eq!(level.size(), sum);
        assert_eq!(level.num_entries(), 1);
    }

    #[test]
    fn test_market_records_routed_off_the_ladder() {
        let mut book = make_book();
        let image = recap().with_level(
            LevelRecord::market(Side::Bid, LevelAction::Add)
                .with_entry(EntryRecord::new("M1", EntryAction::Add, qty(40))),
        );
        let loaded = book.apply_recap(&image, &ApplyOptions::default()).unwrap();
        assert_eq!(loaded, 3);
        assert_eq!(book.total_num_levels(), 2);
        assert_eq!(book.bid_market_orders().unwrap().size(), qty(40));
        assert_eq!(book.best_bid().unwrap().price(), Price::from_u64(100));

        let msg = BookMessage::new(BookMsgType::Update, Symbol::new("IBM")).with_level(
            LevelRecord::market(Side::Bid, LevelAction::Update)
                .with_entry(EntryRecord::new("M2", EntryAction::Add, qty(5))),
        );
        let deltas = book.apply_update(&msg, &ApplyOptions::default()).unwrap();
        assert!(deltas[0].is_market());
        assert_eq!(book.bid_market_orders().unwrap().size(), qty(45));
        assert_eq!(book.best_bid().unwrap().size(), qty(150));

        let msg = BookMessage::new(BookMsgType::Update, Symbol::new("IBM"))
            .with_level(LevelRecord::market(Side::Bid, LevelAction::Delete));
        book.apply_update(&msg, &ApplyOptions::default()).unwrap();
        assert!(book.bid_market_orders().is_none());

        let mut twice = recap();
        twice.levels.push(LevelRecord::market(Side::Ask, LevelAction::Add).with_size(qty(1), 1));
        twice.levels.push(LevelRecord::market(Side::Ask, LevelAction::Add).with_size(qty(2), 1));
        let err = book.apply_recap(&twice, &ApplyOptions::default()).unwrap_err();
        assert!(matches!(err, BookError::DuplicateLevel { .. }));
    }

    #[test]
    fn test_fallback_time_only_without_event_time() {
        let mut book = make_book();
        let msg = BookMessage::new(BookMsgType::Update, Symbol::new("IBM")).with_level(
            LevelRecord::new(Price::from_u64(100), Side::Bid, LevelAction::Add)
                .with_entry(EntryRecord::new("E1", EntryAction::Add, qty(1))),
        );
        book.apply_update_at(&msg, &ApplyOptions::default(), 42).unwrap();
        assert_eq!(book.book_time(), 42);
        assert_eq!(book.best_bid().unwrap().time(), 42);

        let timed = msg.clone().with_event_time(50);
        book.apply_update_at(&timed, &ApplyOptions::default(), 99).unwrap();
        assert_eq!(book.book_time(), 50);

        let mut bad = msg;
        bad.levels[0].side = None;
        assert!(book.apply_update_at(&bad, &ApplyOptions::default(), 77).is_err());
        assert_eq!(book.book_time(), 50);
    }
}
