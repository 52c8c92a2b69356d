//! A single price level on one side of the book
//!
//! Entries are kept in arrival order in a `Vec`, with an id → position map
//! for O(1) lookup. Level size is the sum of visible entry sizes whenever
//! entries are present; level-only books set it directly.

use std::collections::HashMap;

use rust_decimal::Decimal;
use types::book::{EntryAction, LevelAction, OrderType, Side};
use types::errors::BookError;
use types::field_state::{FieldState, Tracked};
use types::ids::EntryId;
use types::numeric::{Price, Quantity};

use crate::entry::BookEntry;

/// All entries resting at one price on one side.
#[derive(Debug, Clone)]
pub struct PriceLevel {
    price: Price,
    side: Side,
    size: Tracked<Quantity>,
    /// Net size change since the last published delta.
    size_change: Tracked<Decimal>,
    num_entries: Tracked<u32>,
    num_entries_total: Tracked<u32>,
    action: Tracked<LevelAction>,
    time: Tracked<i64>,
    order_type: Tracked<OrderType>,
    entries: Vec<BookEntry>,
    index: HashMap<EntryId, usize>,
}

impl PriceLevel {
    /// Create an empty level. Its action is `Add` until something changes it.
    pub fn new(price: Price, side: Side) -> Self {
        Self {
            price,
            side,
            size: Tracked::unset(Quantity::zero()),
            size_change: Tracked::unset(Decimal::ZERO),
            num_entries: Tracked::unset(0),
            num_entries_total: Tracked::unset(0),
            action: Tracked::modified(LevelAction::Add),
            time: Tracked::unset(0),
            order_type: Tracked::unset(OrderType::Limit),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Create the empty market-order level for one side. It carries no price.
    pub fn market(side: Side) -> Self {
        let mut level = Self::new(Price::ZERO, side);
        level.order_type = Tracked::modified(OrderType::Market);
        level
    }

    pub fn price(&self) -> Price {
        self.price
    }

    pub fn is_market(&self) -> bool {
        self.order_type() == OrderType::Market
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn size(&self) -> Quantity {
        self.size.value()
    }

    pub fn size_change(&self) -> Decimal {
        self.size_change.value()
    }

    /// Number of visible entries.
    pub fn num_entries(&self) -> u32 {
        self.num_entries.value()
    }

    /// Number of entries including hidden ones.
    pub fn num_entries_total(&self) -> u32 {
        self.num_entries_total.value()
    }

    pub fn action(&self) -> LevelAction {
        self.action.value()
    }

    pub fn time(&self) -> i64 {
        self.time.value()
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type.value()
    }

    pub fn size_state(&self) -> FieldState {
        self.size.state()
    }

    pub fn num_entries_state(&self) -> FieldState {
        self.num_entries.state()
    }

    pub fn action_state(&self) -> FieldState {
        self.action.state()
    }

    pub fn time_state(&self) -> FieldState {
        self.time.state()
    }

    pub fn set_action(&mut self, action: LevelAction) {
        self.action.set(action);
    }

    pub fn set_time(&mut self, time: i64) {
        self.time.set(time);
    }

    pub fn set_order_type(&mut self, order_type: OrderType) {
        self.order_type.set(order_type);
    }

    /// Whether no entries rest at this level.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in arrival order. Calling again restarts from the first entry.
    pub fn entries(&self) -> std::slice::Iter<'_, BookEntry> {
        self.entries.iter()
    }

    pub fn find_entry(&self, id: &EntryId) -> Option<&BookEntry> {
        self.index.get(id).map(|&pos| &self.entries[pos])
    }

    pub fn contains_entry(&self, id: &EntryId) -> bool {
        self.index.contains_key(id)
    }

    pub fn entry_at_position(&self, position: usize) -> Option<&BookEntry> {
        self.entries.get(position)
    }

    /// Zero-based arrival position of an entry.
    pub fn entry_position(&self, id: &EntryId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Append an entry at the back of the queue.
    pub fn add_entry(&mut self, entry: BookEntry) -> Result<(), BookError> {
        if self.index.contains_key(entry.id()) {
            return Err(BookError::DuplicateEntry {
                entry_id: entry.id().to_string(),
                price: self.price.to_string(),
            });
        }

        let first = self.entries.is_empty();
        if first {
            self.drop_level_only_details();
        }
        let added = entry.visible_size();

        self.index.insert(entry.id().clone(), self.entries.len());
        if entry.is_visible() {
            self.num_entries.set(self.num_entries() + 1);
        }
        self.entries.push(entry);
        self.num_entries_total.set(self.num_entries_total() + 1);

        self.size.set(self.size() + added);
        self.size_change.set(self.size_change() + added.as_decimal());
        self.action.set(if first {
            LevelAction::Add
        } else {
            LevelAction::Update
        });
        Ok(())
    }

    /// Remove the entry with the same id as `entry`.
    pub fn remove_entry(&mut self, entry: &BookEntry) -> Option<BookEntry> {
        self.remove_entry_by_id(entry.id())
    }

    /// Remove an entry, returning it tagged with `EntryAction::Delete`.
    pub fn remove_entry_by_id(&mut self, id: &EntryId) -> Option<BookEntry> {
        let pos = self.index.remove(id)?;
        let mut entry = self.entries.remove(pos);
        for (i, e) in self.entries.iter().enumerate().skip(pos) {
            self.index.insert(e.id().clone(), i);
        }

        let removed = entry.visible_size();
        if entry.is_visible() {
            self.num_entries.set(self.num_entries().saturating_sub(1));
        }
        self.num_entries_total
            .set(self.num_entries_total().saturating_sub(1));
        self.size.set(self.size().saturating_sub(removed));
        self.size_change
            .set(self.size_change() - removed.as_decimal());
        self.action.set(if self.entries.is_empty() {
            LevelAction::Delete
        } else {
            LevelAction::Update
        });

        entry.set_action(EntryAction::Delete);
        Some(entry)
    }

    /// Replace the details of an existing entry and recompute the level size.
    pub fn update_entry(&mut self, update: &BookEntry) -> Result<(), BookError> {
        let pos = self
            .entry_position(update.id())
            .ok_or_else(|| BookError::EntryNotFound {
                entry_id: update.id().to_string(),
                price: self.price.to_string(),
            })?;

        let was_visible = self.entries[pos].is_visible();
        {
            let entry = &mut self.entries[pos];
            entry.set_size(update.size());
            entry.set_status(update.status());
            entry.set_time(update.time());
            entry.set_visible(update.is_visible());
            entry.set_action(EntryAction::Update);
        }
        match (was_visible, update.is_visible()) {
            (false, true) => self.num_entries.set(self.num_entries() + 1),
            (true, false) => self.num_entries.set(self.num_entries().saturating_sub(1)),
            _ => {}
        }

        self.recompute_size();
        self.action.set(LevelAction::Update);
        Ok(())
    }

    /// Set an entry's size and time, creating the entry when absent.
    ///
    /// The entry is tagged `Add` when created and `Update` otherwise.
    /// Returns whether the entry was created.
    pub fn upsert_entry_size(&mut self, id: &EntryId, size: Quantity, time: i64) -> bool {
        let (entry, created) = self.find_or_create_entry(id, time);
        entry.set_size(size);
        entry.set_time(time);
        entry.set_action(if created {
            EntryAction::Add
        } else {
            EntryAction::Update
        });

        self.recompute_size();
        if !created {
            self.action.set(LevelAction::Update);
        }
        created
    }

    pub(crate) fn find_entry_mut(&mut self, id: &EntryId) -> Option<&mut BookEntry> {
        let pos = *self.index.get(id)?;
        self.entries.get_mut(pos)
    }

    /// Move the level to a new price, keeping its entries.
    pub(crate) fn reprice(&mut self, price: Price) {
        self.price = price;
    }

    /// Look up an entry, inserting a zero-size one when absent.
    ///
    /// Returns the entry and whether it was created.
    pub fn find_or_create_entry(&mut self, id: &EntryId, time: i64) -> (&mut BookEntry, bool) {
        let created = !self.index.contains_key(id);
        if created {
            if self.entries.is_empty() {
                self.drop_level_only_details();
            }
            let pos = self.entries.len();
            self.index.insert(id.clone(), pos);
            self.entries.push(BookEntry::placeholder(id.clone(), time));
            self.num_entries.set(self.num_entries() + 1);
            self.num_entries_total.set(self.num_entries_total() + 1);
            self.action.set(if pos == 0 {
                LevelAction::Add
            } else {
                LevelAction::Update
            });
        }
        let pos = self.index[id];
        (&mut self.entries[pos], created)
    }

    /// Recompute the level size from its visible entries, tracking the change.
    pub fn recompute_size(&mut self) {
        let total: Quantity = self.entries.iter().map(BookEntry::visible_size).sum();
        let change = total.diff(self.size());
        if !change.is_zero() || self.size.state() == FieldState::NotInitialised {
            self.size.set(total);
            self.size_change.set(self.size_change() + change);
        }
    }

    /// Set aggregate details directly, for books that carry no entries.
    ///
    /// A level holding entries keeps the totals derived from them: the
    /// supplied values are ignored and `false` is returned.
    pub fn set_level_details(&mut self, size: Quantity, num_entries: u32, time: i64) -> bool {
        self.time.set(time);
        if !self.entries.is_empty() {
            self.recompute_size();
            return false;
        }
        let change = size.diff(self.size());
        self.size.set(size);
        self.size_change.set(self.size_change() + change);
        self.num_entries.set_if_changed(num_entries);
        self.num_entries_total.set_if_changed(num_entries);
        true
    }

    /// Forget totals set by `set_level_details` before the first entry lands.
    fn drop_level_only_details(&mut self) {
        if self.size().is_zero() && self.num_entries_total() == 0 {
            return;
        }
        self.size_change
            .set(self.size_change() - self.size().as_decimal());
        self.size.set(Quantity::zero());
        self.num_entries.set(0);
        self.num_entries_total.set(0);
    }

    /// Show or hide an entry, keeping the visible count and size in step.
    ///
    /// Returns whether the entry exists.
    pub fn set_entry_visible(&mut self, id: &EntryId, visible: bool) -> bool {
        let Some(&pos) = self.index.get(id) else {
            return false;
        };
        let entry = &mut self.entries[pos];
        if entry.is_visible() == visible {
            return true;
        }
        entry.set_visible(visible);
        if visible {
            self.num_entries.set(self.num_entries() + 1);
        } else {
            self.num_entries.set(self.num_entries().saturating_sub(1));
        }
        self.recompute_size();
        self.action.set(LevelAction::Update);
        true
    }

    /// Zero the level and every entry ahead of removal.
    pub fn mark_all_deleted(&mut self) {
        self.size_change
            .set(self.size_change() - self.size().as_decimal());
        self.size.set(Quantity::zero());
        self.num_entries.set(0);
        self.action.set(LevelAction::Delete);
        for entry in &mut self.entries {
            entry.set_size(Quantity::zero());
            entry.set_action(EntryAction::Delete);
        }
    }

    /// Forget the accumulated size change once it has been published.
    pub fn reset_size_change(&mut self) {
        self.size_change = Tracked::unset(Decimal::ZERO);
    }

    /// Mark every modified field, including entry fields, as not modified.
    pub fn age(&mut self) {
        self.size.age();
        self.size_change.age();
        self.num_entries.age();
        self.num_entries_total.age();
        self.action.age();
        self.time.age();
        self.order_type.age();
        for entry in &mut self.entries {
            entry.age();
        }
    }
}

impl PartialEq for PriceLevel {
    fn eq(&self, other: &Self) -> bool {
        self.price == other.price
            && self.side == other.side
            && self.order_type == other.order_type
            && self.size == other.size
            && self.num_entries == other.num_entries
            && self.num_entries_total == other.num_entries_total
            && self.entries == other.entries
    }
}

impl Eq for PriceLevel {}
