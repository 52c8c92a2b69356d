//! Recap and delta message representation
//!
//! A [`BookMessage`] is what the book writes on `populate_recap` /
//! `populate_delta` and what the listener consumes as the payload of
//! INITIAL, RECAP and UPDATE events. Every level and entry field is
//! optional so sparse feeds can omit unchanged values; the serialization
//! component maps these fields onto its own wire layout.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::book::{EntryAction, LevelAction, OrderType, Side};
use types::errors::ValidationError;
use types::ids::{EntryId, PartId, Symbol};
use types::numeric::{Price, Quantity};

use crate::delta::{DeltaRecord, LevelDelta};
use crate::entry::BookEntry;
use crate::order_book::OrderBook;
use crate::price_level::PriceLevel;

/// Kind of book message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookMsgType {
    /// First full image after subscription
    Initial,
    /// Full image sent to resynchronise
    Recap,
    /// Incremental change-set
    Update,
    /// Both sides emptied
    Clear,
}

impl BookMsgType {
    /// Whether the message carries the full book.
    pub fn is_full_image(&self) -> bool {
        matches!(self, BookMsgType::Initial | BookMsgType::Recap)
    }
}

/// One entry within a level record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<EntryAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    /// `false` for hidden entries; absent means visible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}

impl EntryRecord {
    pub fn new(id: impl Into<EntryId>, action: EntryAction, size: Quantity) -> Self {
        Self {
            id: Some(id.into()),
            action: Some(action),
            size: Some(size),
            status: None,
            time: None,
            visible: None,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = Some(false);
        self
    }

    fn from_entry(entry: &BookEntry, action: EntryAction) -> Self {
        Self {
            id: Some(entry.id().clone()),
            action: Some(action),
            size: Some(entry.size()),
            status: Some(entry.status()),
            time: Some(entry.time()),
            visible: Some(entry.is_visible()),
        }
    }
}

/// One price level within a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<LevelAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_change: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_entries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_type: Option<OrderType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<EntryRecord>,
}

impl LevelRecord {
    pub fn new(price: Price, side: Side, action: LevelAction) -> Self {
        Self {
            price: Some(price),
            side: Some(side),
            action: Some(action),
            ..Self::default()
        }
    }

    pub fn with_entry(mut self, entry: EntryRecord) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn with_size(mut self, size: Quantity, num_entries: u32) -> Self {
        self.size = Some(size);
        self.num_entries = Some(num_entries);
        self
    }

    /// A market-order level record for `side`. It carries no price.
    pub fn market(side: Side, action: LevelAction) -> Self {
        Self {
            side: Some(side),
            action: Some(action),
            order_type: Some(OrderType::Market),
            ..Self::default()
        }
    }

    pub fn is_market(&self) -> bool {
        self.order_type == Some(OrderType::Market)
    }

    fn from_level(level: &PriceLevel) -> Self {
        Self {
            price: (!level.is_market()).then_some(level.price()),
            side: Some(level.side()),
            action: Some(LevelAction::Add),
            size: Some(level.size()),
            size_change: None,
            num_entries: Some(level.num_entries()),
            time: Some(level.time()),
            order_type: Some(level.order_type()),
            entries: level
                .entries()
                .map(|e| EntryRecord::from_entry(e, EntryAction::Add))
                .collect(),
        }
    }

    fn from_delta(delta: &LevelDelta) -> Self {
        Self {
            price: (!delta.is_market()).then_some(delta.price),
            side: Some(delta.side),
            action: Some(delta.action),
            size: Some(delta.size),
            size_change: Some(delta.size_change),
            num_entries: Some(delta.num_entries),
            time: Some(delta.time),
            order_type: delta.is_market().then_some(OrderType::Market),
            entries: delta
                .entry
                .iter()
                .map(|e| EntryRecord {
                    id: Some(e.id.clone()),
                    action: Some(e.action),
                    size: Some(e.size),
                    status: Some(e.status),
                    time: Some(e.time),
                    visible: Some(e.visible),
                })
                .collect(),
        }
    }

    /// Fold a later entry delta at the same level into this record.
    fn merge(&mut self, delta: &LevelDelta) {
        let first_action = self.action;
        let next = Self::from_delta(delta);
        self.size = next.size;
        self.num_entries = next.num_entries;
        self.time = next.time;
        self.size_change = match (self.size_change, next.size_change) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
        // A level created earlier in this message stays an add unless it
        // was emptied again.
        self.action = match (first_action, delta.action) {
            (_, LevelAction::Delete) => Some(LevelAction::Delete),
            (Some(LevelAction::Add), _) => Some(LevelAction::Add),
            _ => Some(delta.action),
        };
        self.entries.extend(next.entries);
    }

    fn same_level(&self, delta: &LevelDelta) -> bool {
        if self.side != Some(delta.side) || self.is_market() != delta.is_market() {
            return false;
        }
        delta.is_market() || self.price == Some(delta.price)
    }
}

/// A recap, delta or clear message for one book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMessage {
    pub msg_type: BookMsgType,
    pub symbol: Symbol,
    #[serde(default)]
    pub part_id: PartId,
    /// Feed sequence number; 0 when unsequenced.
    #[serde(default)]
    pub seq_num: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<i64>,
    #[serde(default)]
    pub levels: Vec<LevelRecord>,
}

impl BookMessage {
    pub fn new(msg_type: BookMsgType, symbol: Symbol) -> Self {
        Self {
            msg_type,
            symbol,
            part_id: PartId::default(),
            seq_num: 0,
            event_time: None,
            levels: Vec::new(),
        }
    }

    pub fn with_level(mut self, level: LevelRecord) -> Self {
        self.levels.push(level);
        self
    }

    pub fn with_event_time(mut self, time: i64) -> Self {
        self.event_time = Some(time);
        self
    }

    /// Overwrite this message with the full state of `book`.
    ///
    /// Bids are written best first, then asks best first, then any
    /// market-order levels.
    pub fn write_recap(&mut self, book: &OrderBook) {
        self.msg_type = BookMsgType::Recap;
        self.symbol = book.symbol().clone();
        self.part_id = book.part_id().clone();
        self.event_time = Some(book.book_time());
        self.levels = book
            .bid_levels()
            .chain(book.ask_levels())
            .chain(book.bid_market_orders())
            .chain(book.ask_market_orders())
            .map(LevelRecord::from_level)
            .collect();
    }

    /// Overwrite this message with a clear of `book`.
    pub fn write_clear(&mut self, book: &OrderBook) {
        self.msg_type = BookMsgType::Clear;
        self.symbol = book.symbol().clone();
        self.part_id = book.part_id().clone();
        self.event_time = Some(book.book_time());
        self.levels.clear();
    }

    /// Overwrite this message with a change-set built from level deltas.
    ///
    /// Consecutive entry deltas at the same level share one level record.
    /// Level-only deltas always get their own record so that applying the
    /// message reproduces the mutations in order.
    pub fn write_deltas(&mut self, symbol: &Symbol, part_id: &PartId, records: &[DeltaRecord]) {
        self.msg_type = BookMsgType::Update;
        self.symbol = symbol.clone();
        self.part_id = part_id.clone();
        self.levels.clear();

        for delta in records.iter().filter_map(DeltaRecord::as_level) {
            self.event_time = Some(delta.time);
            let mergeable = delta.entry.is_some()
                && self
                    .levels
                    .last()
                    .is_some_and(|last| !last.entries.is_empty() && last.same_level(delta));
            if mergeable {
                if let Some(last) = self.levels.last_mut() {
                    last.merge(delta);
                }
            } else {
                self.levels.push(LevelRecord::from_delta(delta));
            }
        }
    }

    /// Check that every level carries the fields needed to apply it.
    ///
    /// Full images may omit level actions; updates may not. Market-order
    /// levels have no price.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let require_action = self.msg_type == BookMsgType::Update;
        for (i, level) in self.levels.iter().enumerate() {
            if level.price.is_none() && !level.is_market() {
                return Err(ValidationError::MissingLevelField {
                    level: i,
                    field: "price",
                });
            }
            if level.side.is_none() {
                return Err(ValidationError::MissingLevelField {
                    level: i,
                    field: "side",
                });
            }
            if require_action && level.action.is_none() {
                return Err(ValidationError::MissingLevelField {
                    level: i,
                    field: "action",
                });
            }
        }
        Ok(())
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Total entry records across all levels.
    pub fn num_entries(&self) -> usize {
        self.levels.iter().map(|l| l.entries.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::EntryDelta;

    fn delta(price: u64, action: LevelAction, entry: Option<(&str, EntryAction)>) -> LevelDelta {
        LevelDelta {
            side: Side::Bid,
            price: Price::from_u64(price),
            action,
            size: Quantity::from_u64(10),
            size_change: Decimal::from(10),
            num_entries: 1,
            time: 7,
            order_type: OrderType::Limit,
            entry: entry.map(|(id, action)| EntryDelta {
                id: EntryId::from(id),
                size: Quantity::from_u64(10),
                action,
                status: 0,
                time: 7,
                visible: true,
            }),
        }
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        let msg = BookMessage::new(BookMsgType::Update, Symbol::new("ORCL"))
            .with_level(LevelRecord::new(Price::from_u64(1), Side::Bid, LevelAction::Add))
            .with_level(LevelRecord {
                price: Some(Price::from_u64(2)),
                side: Some(Side::Ask),
                ..LevelRecord::default()
            });

        assert_eq!(
            msg.validate(),
            Err(ValidationError::MissingLevelField {
                level: 1,
                field: "action"
            })
        );

        let mut recap = msg.clone();
        recap.msg_type = BookMsgType::Recap;
        assert!(recap.validate().is_ok());

        recap.levels[0].side = None;
        assert_eq!(
            recap.validate(),
            Err(ValidationError::MissingLevelField {
                level: 0,
                field: "side"
            })
        );
    }

    #[test]
    fn test_entry_deltas_at_same_level_share_a_record() {
        let records = vec![
            DeltaRecord::Level(delta(100, LevelAction::Add, Some(("E1", EntryAction::Add)))),
            DeltaRecord::Level(delta(100, LevelAction::Update, Some(("E2", EntryAction::Add)))),
            DeltaRecord::Level(delta(101, LevelAction::Add, Some(("E3", EntryAction::Add)))),
        ];

        let mut msg = BookMessage::new(BookMsgType::Update, Symbol::new("ORCL"));
        msg.write_deltas(&Symbol::new("ORCL"), &PartId::default(), &records);

        assert_eq!(msg.num_levels(), 2);
        assert_eq!(msg.levels[0].action, Some(LevelAction::Add));
        assert_eq!(msg.levels[0].entries.len(), 2);
        assert_eq!(msg.levels[0].size_change, Some(Decimal::from(20)));
        assert_eq!(msg.num_entries(), 3);
    }

    #[test]
    fn test_level_only_delta_gets_own_record() {
        let records = vec![
            DeltaRecord::Level(delta(100, LevelAction::Add, Some(("E1", EntryAction::Add)))),
            DeltaRecord::Level(delta(100, LevelAction::Delete, None)),
        ];

        let mut msg = BookMessage::new(BookMsgType::Update, Symbol::new("ORCL"));
        msg.write_deltas(&Symbol::new("ORCL"), &PartId::default(), &records);

        assert_eq!(msg.num_levels(), 2);
        assert_eq!(msg.levels[1].action, Some(LevelAction::Delete));
        assert!(msg.levels[1].entries.is_empty());
    }

    #[test]
    fn test_market_delta_not_merged_with_priced_level() {
        let mut market = delta(0, LevelAction::Update, Some(("M1", EntryAction::Add)));
        market.order_type = OrderType::Market;
        let records = vec![
            DeltaRecord::Level(delta(0, LevelAction::Add, Some(("E1", EntryAction::Add)))),
            DeltaRecord::Level(market),
        ];

        let mut msg = BookMessage::new(BookMsgType::Update, Symbol::new("ORCL"));
        msg.write_deltas(&Symbol::new("ORCL"), &PartId::default(), &records);

        assert_eq!(msg.num_levels(), 2);
        assert!(msg.levels[1].is_market());
        assert_eq!(msg.levels[1].price, None);
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_hidden_entry_written_to_records() {
        let mut hidden = delta(100, LevelAction::Add, Some(("H1", EntryAction::Add)));
        if let Some(entry) = hidden.entry.as_mut() {
            entry.visible = false;
        }
        let mut msg = BookMessage::new(BookMsgType::Update, Symbol::new("ORCL"));
        msg.write_deltas(&Symbol::new("ORCL"), &PartId::default(), &[DeltaRecord::Level(hidden)]);
        assert_eq!(msg.levels[0].entries[0].visible, Some(false));

        let plain = EntryRecord::new("E1", EntryAction::Add, Quantity::zero());
        assert!(!serde_json::to_string(&plain).unwrap().contains("visible"));

        let json = serde_json::to_string(&plain.hidden()).unwrap();
        let back: EntryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.visible, Some(false));
    }

    #[test]
    fn test_sparse_serialization_omits_unset_fields() {
        let msg = BookMessage::new(BookMsgType::Update, Symbol::new("ORCL")).with_level(
            LevelRecord::new(Price::from_u64(100), Side::Bid, LevelAction::Update)
                .with_entry(EntryRecord::new("E1", EntryAction::Delete, Quantity::zero())),
        );
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("size_change"));
        assert!(!json.contains("status"));

        let back: BookMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
