//! In-memory order book for a single instrument
//!
//! Maintains both ladders of price levels and their entries, and records
//! every mutation for later publication as a delta.
//! Uses `BTreeMap` for deterministic sorted iteration; bids are walked in
//! reverse so both sides yield best price first.
//!
//! The book processes:
//! - entry add / update / delete → level size, counts and actions
//! - level-only update / delete → for books that carry no entries
//! - clear → both ladders emptied, a single clear mutation pending
//!
//! Market orders have no price and rest on one extra level per side,
//! outside the ladders; they take part in recaps, deltas and equality.
//!
//! Emptied levels are removed or retained according to [`EmptyLevelPolicy`].

use std::collections::{btree_map, BTreeMap};
use std::fmt;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use types::book::{LevelAction, Side};
use types::errors::BookError;
use types::field_state::{FieldState, Tracked};
use types::ids::{EntryId, PartId, Symbol};
use types::numeric::{Price, Quantity};

use crate::config::{BookConfig, EmptyLevelPolicy, ZeroSizeEntryPolicy};
use crate::delta::{level_add_deltas, BookDelta, DeltaRecord, DeltaRecorder, EntryDelta, LevelDelta};
use crate::entry::BookEntry;
use crate::message::BookMessage;
use crate::price_level::PriceLevel;

/// Iterator over one side of the book, best price first.
///
/// Obtained from [`OrderBook::bid_levels`] / [`OrderBook::ask_levels`];
/// asking again restarts from the best level.
#[derive(Debug, Clone)]
pub struct LevelIter<'a> {
    inner: btree_map::Values<'a, Price, PriceLevel>,
    descending: bool,
}

impl<'a> Iterator for LevelIter<'a> {
    type Item = &'a PriceLevel;

    fn next(&mut self) -> Option<Self::Item> {
        if self.descending {
            self.inner.next_back()
        } else {
            self.inner.next()
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for LevelIter<'_> {}

/// Where a level lives: on a priced ladder or in a side's market-order slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LevelKey {
    Priced(Price),
    Market,
}

impl LevelKey {
    pub(crate) fn of(level: &PriceLevel) -> Self {
        if level.is_market() {
            LevelKey::Market
        } else {
            LevelKey::Priced(level.price())
        }
    }
}

impl fmt::Display for LevelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelKey::Priced(price) => f.pad(&price.to_string()),
            LevelKey::Market => f.pad("MKT"),
        }
    }
}

/// Book contents staged off to the side while loading a recap.
#[derive(Debug, Default)]
pub(crate) struct BookImage {
    pub bids: BTreeMap<Price, PriceLevel>,
    pub asks: BTreeMap<Price, PriceLevel>,
    pub bid_market: Option<PriceLevel>,
    pub ask_market: Option<PriceLevel>,
}

impl BookImage {
    fn contains(&self, key: LevelKey, side: Side) -> bool {
        match (key, side) {
            (LevelKey::Priced(price), Side::Bid) => self.bids.contains_key(&price),
            (LevelKey::Priced(price), Side::Ask) => self.asks.contains_key(&price),
            (LevelKey::Market, Side::Bid) => self.bid_market.is_some(),
            (LevelKey::Market, Side::Ask) => self.ask_market.is_some(),
        }
    }

    /// Stage a level, rejecting a second level at the same place.
    pub(crate) fn insert(&mut self, key: LevelKey, level: PriceLevel) -> Result<(), BookError> {
        let side = level.side();
        if self.contains(key, side) {
            return Err(BookError::DuplicateLevel {
                side: side.to_string(),
                price: key.to_string(),
            });
        }
        match (key, side) {
            (LevelKey::Priced(price), Side::Bid) => {
                self.bids.insert(price, level);
            }
            (LevelKey::Priced(price), Side::Ask) => {
                self.asks.insert(price, level);
            }
            (LevelKey::Market, Side::Bid) => self.bid_market = Some(level),
            (LevelKey::Market, Side::Ask) => self.ask_market = Some(level),
        }
        Ok(())
    }

    pub(crate) fn num_levels(&self) -> usize {
        self.bids.len()
            + self.asks.len()
            + usize::from(self.bid_market.is_some())
            + usize::from(self.ask_market.is_some())
    }
}

/// Entry attributes carried alongside a size update.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EntryAttrs {
    pub status: Option<u16>,
    pub visible: Option<bool>,
}

/// Order book for one symbol (and optionally one participant).
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: Symbol,
    part_id: PartId,
    book_time: Tracked<i64>,
    /// Bid levels: price → level (BTreeMap sorts ascending, we reverse for best-bid-first).
    bids: BTreeMap<Price, PriceLevel>,
    /// Ask levels: price → level (ascending = best ask first).
    asks: BTreeMap<Price, PriceLevel>,
    /// Market orders, kept outside the priced ladders.
    bid_market: Option<PriceLevel>,
    ask_market: Option<PriceLevel>,
    config: BookConfig,
    /// Mutations awaiting `populate_delta`.
    deltas: DeltaRecorder,
}

impl OrderBook {
    /// Create an empty book with default configuration.
    pub fn new(symbol: Symbol, part_id: PartId) -> Self {
        Self::with_config(symbol, part_id, BookConfig::default())
    }

    pub fn with_config(symbol: Symbol, part_id: PartId, config: BookConfig) -> Self {
        Self {
            symbol,
            part_id,
            book_time: Tracked::unset(0),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            bid_market: None,
            ask_market: None,
            config,
            deltas: DeltaRecorder::new(),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn part_id(&self) -> &PartId {
        &self.part_id
    }

    pub fn set_part_id(&mut self, part_id: PartId) {
        self.part_id = part_id;
    }

    pub fn config(&self) -> &BookConfig {
        &self.config
    }

    /// Time of the most recent mutation (Unix nanos).
    pub fn book_time(&self) -> i64 {
        self.book_time.value()
    }

    pub fn book_time_state(&self) -> FieldState {
        self.book_time.state()
    }

    pub fn set_book_time(&mut self, time: i64) {
        self.book_time.set(time);
    }

    pub fn generate_delta_msgs(&self) -> bool {
        self.config.generate_delta_msgs
    }

    /// Turn mutation recording on or off. Turning it off drops anything pending.
    pub fn set_generate_delta_msgs(&mut self, generate: bool) {
        self.config.generate_delta_msgs = generate;
        if !generate {
            self.deltas.clear();
        }
    }

    fn ladder(&self, side: Side) -> &BTreeMap<Price, PriceLevel> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    fn ladder_mut(&mut self, side: Side) -> &mut BTreeMap<Price, PriceLevel> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    fn market_slot(&mut self, side: Side) -> &mut Option<PriceLevel> {
        match side {
            Side::Bid => &mut self.bid_market,
            Side::Ask => &mut self.ask_market,
        }
    }

    pub(crate) fn level_at(&self, key: LevelKey, side: Side) -> Option<&PriceLevel> {
        match key {
            LevelKey::Priced(price) => self.ladder(side).get(&price),
            LevelKey::Market => self.market_orders(side),
        }
    }

    fn level_at_mut(&mut self, key: LevelKey, side: Side) -> Option<&mut PriceLevel> {
        match key {
            LevelKey::Priced(price) => self.ladder_mut(side).get_mut(&price),
            LevelKey::Market => self.market_slot(side).as_mut(),
        }
    }

    /// The level at `key`, inserted empty when absent. Records nothing.
    fn level_or_insert(&mut self, key: LevelKey, side: Side) -> &mut PriceLevel {
        match key {
            LevelKey::Priced(price) => self
                .ladder_mut(side)
                .entry(price)
                .or_insert_with(|| PriceLevel::new(price, side)),
            LevelKey::Market => self
                .market_slot(side)
                .get_or_insert_with(|| PriceLevel::market(side)),
        }
    }

    fn remove_level(&mut self, key: LevelKey, side: Side) -> Option<PriceLevel> {
        match key {
            LevelKey::Priced(price) => self.ladder_mut(side).remove(&price),
            LevelKey::Market => self.market_slot(side).take(),
        }
    }

    fn record(&mut self, delta: &LevelDelta) {
        if self.config.generate_delta_msgs {
            self.deltas.record(delta.clone());
        }
    }

    // ── Lookup ──────────────────────────────────────────────────────

    pub fn find_level(&self, price: Price, side: Side) -> Option<&PriceLevel> {
        self.ladder(side).get(&price)
    }

    pub fn find_entry(&self, id: &EntryId, price: Price, side: Side) -> Option<&BookEntry> {
        self.find_level(price, side)?.find_entry(id)
    }

    pub(crate) fn find_entry_at(&self, id: &EntryId, key: LevelKey, side: Side) -> Option<&BookEntry> {
        self.level_at(key, side)?.find_entry(id)
    }

    /// Look up a level, creating an empty one when absent.
    ///
    /// Creation records a level `Add` mutation.
    pub fn find_or_create_level(&mut self, price: Price, side: Side) -> &mut PriceLevel {
        self.find_or_create_at(LevelKey::Priced(price), side)
    }

    fn find_or_create_at(&mut self, key: LevelKey, side: Side) -> &mut PriceLevel {
        if self.level_at(key, side).is_none() {
            let time = self.book_time();
            let level = self.level_or_insert(key, side);
            level.set_time(time);
            let delta = LevelDelta::capture(level, Decimal::ZERO, LevelAction::Add, None);
            self.record(&delta);
        }
        self.level_or_insert(key, side)
    }

    // ── Market orders ───────────────────────────────────────────────

    /// Market orders resting on `side`, outside the priced ladder.
    pub fn market_orders(&self, side: Side) -> Option<&PriceLevel> {
        match side {
            Side::Bid => self.bid_market.as_ref(),
            Side::Ask => self.ask_market.as_ref(),
        }
    }

    pub fn bid_market_orders(&self) -> Option<&PriceLevel> {
        self.bid_market.as_ref()
    }

    pub fn ask_market_orders(&self) -> Option<&PriceLevel> {
        self.ask_market.as_ref()
    }

    /// The market-order level for `side`, created empty when absent.
    ///
    /// Creation records a level `Add` mutation.
    pub fn get_or_create_market_orders(&mut self, side: Side) -> &mut PriceLevel {
        self.find_or_create_at(LevelKey::Market, side)
    }

    /// Add a market order on `side`.
    pub fn add_market_entry(
        &mut self,
        entry: BookEntry,
        side: Side,
        time: i64,
    ) -> Result<LevelDelta, BookError> {
        self.add_entry_at(entry, LevelKey::Market, side, time)
    }

    /// Set a market order's size, creating it when absent.
    pub fn update_market_entry(
        &mut self,
        id: &EntryId,
        side: Side,
        size: Quantity,
        time: i64,
    ) -> Option<LevelDelta> {
        self.update_entry_at(id, LevelKey::Market, side, size, EntryAttrs::default(), time)
    }

    pub fn delete_market_entry(&mut self, id: &EntryId, side: Side, time: i64) -> Option<LevelDelta> {
        self.delete_entry_at(id, LevelKey::Market, side, time)
    }

    /// Set the aggregate market-order size and count on `side`.
    pub fn update_market_level(
        &mut self,
        side: Side,
        size: Quantity,
        num_entries: u32,
        time: i64,
    ) -> LevelDelta {
        self.update_level_at(LevelKey::Market, side, size, num_entries, time)
    }

    /// Drop every market order on `side`.
    pub fn delete_market_orders(&mut self, side: Side, time: i64) -> Option<LevelDelta> {
        self.delete_level_at(LevelKey::Market, side, time)
    }

    // ── Mutation ────────────────────────────────────────────────────

    /// Insert a fully built level, e.g. while loading a recap.
    pub fn add_level(&mut self, level: PriceLevel) -> Result<(), BookError> {
        let side = level.side();
        let key = LevelKey::of(&level);
        if self.level_at(key, side).is_some() {
            return Err(BookError::DuplicateLevel {
                side: side.to_string(),
                price: key.to_string(),
            });
        }

        let deltas = level_add_deltas(&level);
        match key {
            LevelKey::Priced(price) => {
                self.ladder_mut(side).insert(price, level);
            }
            LevelKey::Market => *self.market_slot(side) = Some(level),
        }
        for delta in &deltas {
            self.record(delta);
        }
        Ok(())
    }

    /// Add a new entry at `price`, creating the level if needed.
    pub fn add_entry(
        &mut self,
        entry: BookEntry,
        price: Price,
        side: Side,
        time: i64,
    ) -> Result<LevelDelta, BookError> {
        self.add_entry_at(entry, LevelKey::Priced(price), side, time)
    }

    pub(crate) fn add_entry_at(
        &mut self,
        entry: BookEntry,
        key: LevelKey,
        side: Side,
        time: i64,
    ) -> Result<LevelDelta, BookError> {
        let id = entry.id().clone();
        if self
            .level_at(key, side)
            .is_some_and(|level| level.contains_entry(&id))
        {
            return Err(BookError::DuplicateEntry {
                entry_id: id.to_string(),
                price: key.to_string(),
            });
        }

        let level = self.level_or_insert(key, side);
        let before = level.size();
        level.add_entry(entry)?;
        level.set_time(time);

        let delta = LevelDelta::capture(
            level,
            level.size().diff(before),
            level.action(),
            level.find_entry(&id).map(EntryDelta::from_entry),
        );

        self.book_time.set(time);
        self.record(&delta);
        debug!(
            symbol = %self.symbol,
            side = %side,
            price = %key,
            entry_id = %id,
            "Entry added"
        );
        Ok(delta)
    }

    /// Set an entry's size.
    ///
    /// An entry missing from the level is created first, so an update that
    /// arrives before its add still leaves the book consistent. A zero size
    /// for an unknown entry under [`ZeroSizeEntryPolicy::DeleteOnZero`]
    /// changes nothing and returns `None`.
    pub fn update_entry(
        &mut self,
        id: &EntryId,
        price: Price,
        side: Side,
        size: Quantity,
        time: i64,
    ) -> Option<LevelDelta> {
        self.update_entry_at(id, LevelKey::Priced(price), side, size, EntryAttrs::default(), time)
    }

    pub(crate) fn update_entry_at(
        &mut self,
        id: &EntryId,
        key: LevelKey,
        side: Side,
        size: Quantity,
        attrs: EntryAttrs,
        time: i64,
    ) -> Option<LevelDelta> {
        let delete_on_zero =
            size.is_zero() && self.config.zero_size_policy == ZeroSizeEntryPolicy::DeleteOnZero;
        let remove_empty = self.config.empty_level_policy == EmptyLevelPolicy::Remove;

        if delete_on_zero
            && !self
                .level_at(key, side)
                .is_some_and(|level| level.contains_entry(id))
        {
            debug!(
                symbol = %self.symbol,
                side = %side,
                price = %key,
                entry_id = %id,
                "Zero size for unknown entry, ignoring"
            );
            return None;
        }

        let level = self.level_or_insert(key, side);
        let was_empty = level.is_empty();
        let before = level.size();

        let created = level.upsert_entry_size(id, size, time);
        if let Some(visible) = attrs.visible {
            level.set_entry_visible(id, visible);
        }
        if let (Some(status), Some(entry)) = (attrs.status, level.find_entry_mut(id)) {
            entry.set_status(status);
        }
        let mut entry_delta = level.find_entry(id).map(EntryDelta::from_entry);
        if delete_on_zero {
            if let Some(removed) = level.remove_entry_by_id(id) {
                entry_delta = Some(EntryDelta::from_entry(&removed));
            }
        }
        level.set_time(time);

        let action = if level.is_empty() {
            LevelAction::Delete
        } else if was_empty {
            LevelAction::Add
        } else {
            LevelAction::Update
        };
        level.set_action(action);

        let delta = LevelDelta::capture(level, level.size().diff(before), action, entry_delta);
        if level.is_empty() && remove_empty {
            self.remove_level(key, side);
        }

        if created {
            debug!(
                symbol = %self.symbol,
                side = %side,
                price = %key,
                entry_id = %id,
                "Update for unknown entry, created it"
            );
        }
        self.book_time.set(time);
        self.record(&delta);
        Some(delta)
    }

    /// Show or hide a resting entry. Hidden entries count towards the
    /// level's total entry count only.
    ///
    /// This is an update at the entry's current size, so the zero-size
    /// policy applies as usual. Unknown entries are logged and ignored.
    pub fn update_entry_visibility(
        &mut self,
        id: &EntryId,
        price: Price,
        side: Side,
        visible: bool,
        time: i64,
    ) -> Option<LevelDelta> {
        let Some(size) = self.find_entry(id, price, side).map(BookEntry::size) else {
            warn!(
                symbol = %self.symbol,
                side = %side,
                price = %price,
                entry_id = %id,
                "Visibility change for unknown entry, ignoring"
            );
            return None;
        };
        let attrs = EntryAttrs {
            status: None,
            visible: Some(visible),
        };
        self.update_entry_at(id, LevelKey::Priced(price), side, size, attrs, time)
    }

    /// Remove an entry. Unknown entries and levels are logged and ignored.
    pub fn delete_entry(
        &mut self,
        id: &EntryId,
        price: Price,
        side: Side,
        time: i64,
    ) -> Option<LevelDelta> {
        self.delete_entry_at(id, LevelKey::Priced(price), side, time)
    }

    pub(crate) fn delete_entry_at(
        &mut self,
        id: &EntryId,
        key: LevelKey,
        side: Side,
        time: i64,
    ) -> Option<LevelDelta> {
        let remove_empty = self.config.empty_level_policy == EmptyLevelPolicy::Remove;

        match self.level_at(key, side) {
            None => {
                warn!(
                    symbol = %self.symbol,
                    side = %side,
                    price = %key,
                    entry_id = %id,
                    "Delete for entry at unknown level, ignoring"
                );
                return None;
            }
            Some(level) if !level.contains_entry(id) => {
                warn!(
                    symbol = %self.symbol,
                    side = %side,
                    price = %key,
                    entry_id = %id,
                    "Delete for unknown entry, ignoring"
                );
                return None;
            }
            Some(_) => {}
        }

        let level = self.level_at_mut(key, side)?;
        let before = level.size();
        let removed = level.remove_entry_by_id(id)?;
        level.set_time(time);

        let delta = LevelDelta::capture(
            level,
            level.size().diff(before),
            level.action(),
            Some(EntryDelta::from_entry(&removed)),
        );
        if level.is_empty() && remove_empty {
            self.remove_level(key, side);
        }

        self.book_time.set(time);
        self.record(&delta);
        Some(delta)
    }

    /// Set a level's aggregate size and entry count directly.
    ///
    /// A level that holds entries keeps the totals of its entries; only
    /// its time is taken from the update.
    pub fn update_level(
        &mut self,
        price: Price,
        side: Side,
        size: Quantity,
        num_entries: u32,
        time: i64,
    ) -> LevelDelta {
        self.update_level_at(LevelKey::Priced(price), side, size, num_entries, time)
    }

    pub(crate) fn update_level_at(
        &mut self,
        key: LevelKey,
        side: Side,
        size: Quantity,
        num_entries: u32,
        time: i64,
    ) -> LevelDelta {
        let created = self.level_at(key, side).is_none();
        let level = self.level_or_insert(key, side);
        let before = level.size();
        let applied = level.set_level_details(size, num_entries, time);

        let action = if created {
            LevelAction::Add
        } else {
            LevelAction::Update
        };
        level.set_action(action);
        let delta = LevelDelta::capture(level, level.size().diff(before), action, None);

        if !applied {
            debug!(
                symbol = %self.symbol,
                side = %side,
                price = %key,
                size = %size,
                num_entries,
                "Level totals ignored, level holds entries"
            );
        }
        self.book_time.set(time);
        self.record(&delta);
        delta
    }

    /// Remove a whole level with all of its entries.
    pub fn delete_level(&mut self, price: Price, side: Side, time: i64) -> Option<LevelDelta> {
        self.delete_level_at(LevelKey::Priced(price), side, time)
    }

    pub(crate) fn delete_level_at(
        &mut self,
        key: LevelKey,
        side: Side,
        time: i64,
    ) -> Option<LevelDelta> {
        let Some(mut level) = self.remove_level(key, side) else {
            warn!(
                symbol = %self.symbol,
                side = %side,
                price = %key,
                "Delete for unknown level, ignoring"
            );
            return None;
        };

        let before = level.size();
        level.mark_all_deleted();
        level.set_time(time);
        let delta = LevelDelta::capture(&level, -before.as_decimal(), LevelAction::Delete, None);

        self.book_time.set(time);
        self.record(&delta);
        Some(delta)
    }

    /// Move a level to a new price: a delete at the old price, then an add.
    pub fn reprice_level(
        &mut self,
        side: Side,
        old_price: Price,
        new_price: Price,
        time: i64,
    ) -> Result<(), BookError> {
        if self.ladder(side).contains_key(&new_price) {
            return Err(BookError::DuplicateLevel {
                side: side.to_string(),
                price: new_price.to_string(),
            });
        }
        let mut level =
            self.ladder_mut(side)
                .remove(&old_price)
                .ok_or_else(|| BookError::LevelNotFound {
                    side: side.to_string(),
                    price: old_price.to_string(),
                })?;

        let removed = LevelDelta {
            side,
            price: old_price,
            action: LevelAction::Delete,
            size: Quantity::zero(),
            size_change: -level.size().as_decimal(),
            num_entries: 0,
            time,
            order_type: level.order_type(),
            entry: None,
        };
        level.reprice(new_price);
        level.set_time(time);
        let added = level_add_deltas(&level);
        self.ladder_mut(side).insert(new_price, level);

        self.book_time.set(time);
        self.record(&removed);
        for delta in &added {
            self.record(delta);
        }
        Ok(())
    }

    /// Empty both sides. Pending mutations collapse into a single clear.
    pub fn clear(&mut self) {
        let levels = self.total_num_levels();
        self.bids.clear();
        self.asks.clear();
        self.bid_market = None;
        self.ask_market = None;
        if self.config.generate_delta_msgs {
            self.deltas.record_clear();
        }
        info!(symbol = %self.symbol, levels, "Book cleared");
    }

    // ── Publishing ──────────────────────────────────────────────────

    /// Write the full book state into `msg`. Pending mutations are untouched.
    pub fn populate_recap(&self, msg: &mut BookMessage) {
        msg.write_recap(self);
    }

    /// Write pending mutations into `msg` and reset them.
    ///
    /// Returns `false`, leaving `msg` untouched, when nothing is pending or
    /// delta generation is disabled. A clear followed by further mutations
    /// is written as a full recap.
    pub fn populate_delta(&mut self, msg: &mut BookMessage) -> bool {
        if !self.config.generate_delta_msgs {
            warn!(
                symbol = %self.symbol,
                "populate_delta called with delta generation disabled"
            );
            return false;
        }
        let Some(delta) = self.deltas.take() else {
            return false;
        };

        match &delta {
            BookDelta::Simple(DeltaRecord::Clear) => msg.write_clear(self),
            BookDelta::Complex(records) if records.first() == Some(&DeltaRecord::Clear) => {
                msg.write_recap(self)
            }
            _ => msg.write_deltas(&self.symbol, &self.part_id, delta.records()),
        }
        self.reset_size_changes();
        true
    }

    /// Drop all pending mutations.
    pub fn clear_delta_list(&mut self) {
        self.deltas.clear();
        self.reset_size_changes();
    }

    pub fn pending_deltas(&self) -> &[DeltaRecord] {
        self.deltas.records()
    }

    fn all_levels_mut(&mut self) -> impl Iterator<Item = &mut PriceLevel> {
        self.bids
            .values_mut()
            .chain(self.asks.values_mut())
            .chain(self.bid_market.iter_mut())
            .chain(self.ask_market.iter_mut())
    }

    fn reset_size_changes(&mut self) {
        for level in self.all_levels_mut() {
            level.reset_size_change();
        }
    }

    /// Mark every modified field in the book as not modified.
    pub fn age(&mut self) {
        self.book_time.age();
        for level in self.all_levels_mut() {
            level.age();
        }
    }

    /// Replace the whole contents of the book. Used when loading a recap.
    pub(crate) fn replace_levels(&mut self, image: BookImage) {
        self.bids = image.bids;
        self.asks = image.asks;
        self.bid_market = image.bid_market;
        self.ask_market = image.ask_market;
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Bid levels, highest price first.
    pub fn bid_levels(&self) -> LevelIter<'_> {
        self.levels(Side::Bid)
    }

    /// Ask levels, lowest price first.
    pub fn ask_levels(&self) -> LevelIter<'_> {
        self.levels(Side::Ask)
    }

    pub fn levels(&self, side: Side) -> LevelIter<'_> {
        LevelIter {
            inner: self.ladder(side).values(),
            descending: side == Side::Bid,
        }
    }

    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bid_levels().next()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.ask_levels().next()
    }

    /// Get the mid-market price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(
                (bid.price().as_decimal() + ask.price().as_decimal()) / Decimal::from(2),
            ),
            _ => None,
        }
    }

    /// Get the spread between best ask and best bid.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price().as_decimal() - bid.price().as_decimal()),
            _ => None,
        }
    }

    pub fn num_bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn num_ask_levels(&self) -> usize {
        self.asks.len()
    }

    /// Priced levels on both sides. Market-order levels are not counted.
    pub fn total_num_levels(&self) -> usize {
        self.bids.len() + self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty()
            && self.asks.is_empty()
            && self.bid_market.is_none()
            && self.ask_market.is_none()
    }

    /// The level at a zero-based depth, best price being position 0.
    pub fn level_at_position(&self, position: usize, side: Side) -> Option<&PriceLevel> {
        self.levels(side).nth(position)
    }

    /// Entries on one side across all priced levels, in price priority and
    /// then arrival order within each level.
    pub fn entries(&self, side: Side) -> impl Iterator<Item = &BookEntry> + '_ {
        self.levels(side).flat_map(|level| level.entries())
    }

    pub fn bid_entries(&self) -> impl Iterator<Item = &BookEntry> + '_ {
        self.entries(Side::Bid)
    }

    pub fn ask_entries(&self) -> impl Iterator<Item = &BookEntry> + '_ {
        self.entries(Side::Ask)
    }

    /// The entry at a zero-based position counting across levels in price
    /// priority, then arrival order within each level.
    pub fn entry_at_position(&self, position: usize, side: Side) -> Option<&BookEntry> {
        self.entries(side).nth(position)
    }

    /// Describe the first way in which `other` differs from this book.
    pub fn first_difference(&self, other: &OrderBook) -> Option<String> {
        if self.symbol != other.symbol {
            return Some(format!("symbol: {} vs {}", self.symbol, other.symbol));
        }
        if self.part_id != other.part_id {
            return Some(format!("part id: {} vs {}", self.part_id, other.part_id));
        }
        for side in [Side::Bid, Side::Ask] {
            let (lhs, rhs) = (self.levels(side), other.levels(side));
            if lhs.len() != rhs.len() {
                return Some(format!(
                    "{side} level count: {} vs {}",
                    lhs.len(),
                    rhs.len()
                ));
            }
            for (i, (a, b)) in lhs.zip(rhs).enumerate() {
                if let Some(diff) = level_difference(a, b) {
                    return Some(format!("{side} level {i}: {diff}"));
                }
            }
        }
        for side in [Side::Bid, Side::Ask] {
            match (self.market_orders(side), other.market_orders(side)) {
                (None, None) => {}
                (Some(_), None) => return Some(format!("{side} market orders: present vs absent")),
                (None, Some(_)) => return Some(format!("{side} market orders: absent vs present")),
                (Some(a), Some(b)) => {
                    if let Some(diff) = level_difference(a, b) {
                        return Some(format!("{side} market orders: {diff}"));
                    }
                }
            }
        }
        None
    }
}

fn level_difference(a: &PriceLevel, b: &PriceLevel) -> Option<String> {
    if a.price() != b.price() {
        return Some(format!("price {} vs {}", a.price(), b.price()));
    }
    if a.size() != b.size() {
        return Some(format!("size {} vs {} at {}", a.size(), b.size(), a.price()));
    }
    if a.num_entries() != b.num_entries() {
        return Some(format!(
            "entry count {} vs {} at {}",
            a.num_entries(),
            b.num_entries(),
            a.price()
        ));
    }
    for (i, (x, y)) in a.entries().zip(b.entries()).enumerate() {
        if x.id() != y.id() {
            return Some(format!("entry {i} id {} vs {} at {}", x.id(), y.id(), a.price()));
        }
        if x.size() != y.size() {
            return Some(format!(
                "entry {} size {} vs {} at {}",
                x.id(),
                x.size(),
                y.size(),
                a.price()
            ));
        }
    }
    if a != b {
        return Some(format!("entry details differ at {}", a.price()));
    }
    None
}

impl PartialEq for OrderBook {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.part_id == other.part_id
            && self.bids == other.bids
            && self.asks == other.asks
            && self.bid_market == other.bid_market
            && self.ask_market == other.ask_market
    }
}

impl Eq for OrderBook {}

impl fmt::Display for OrderBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Book {} (part {:?}): {} bid / {} ask levels",
            self.symbol,
            self.part_id.as_str(),
            self.num_bid_levels(),
            self.num_ask_levels()
        )?;
        let levels = self
            .bid_levels()
            .chain(self.ask_levels())
            .chain(self.bid_market_orders())
            .chain(self.ask_market_orders());
        for level in levels {
            writeln!(
                f,
                "  {} {:>12} size={} entries={} action={}",
                level.side().code(),
                LevelKey::of(level),
                level.size(),
                level.num_entries(),
                level.action()
            )?;
            for entry in level.entries() {
                writeln!(
                    f,
                    "      {:<16} size={} action={} time={}",
                    entry.id(),
                    entry.size(),
                    entry.action(),
                    entry.time()
                )?;
            }
        }
        Ok(())
    }
}
