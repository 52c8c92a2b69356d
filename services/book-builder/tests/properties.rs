//! Property tests over random book traffic

use book_builder::apply::ApplyOptions;
use book_builder::config::{BookConfig, EmptyLevelPolicy, ZeroSizeEntryPolicy};
use book_builder::entry::BookEntry;
use book_builder::message::{BookMessage, BookMsgType};
use book_builder::order_book::OrderBook;
use book_builder::price_level::PriceLevel;
use proptest::prelude::*;
use types::book::{EntryAction, Side};
use types::ids::{EntryId, PartId, Symbol};
use types::numeric::{Price, Quantity};

#[derive(Debug, Clone)]
enum Op {
    Add { id: u8, price: u8, bid: bool, size: u16, visible: bool },
    Update { id: u8, price: u8, bid: bool, size: u16 },
    Delete { id: u8, price: u8, bid: bool },
    SetVisible { id: u8, price: u8, bid: bool, visible: bool },
    UpdateLevel { price: u8, bid: bool, size: u16, count: u8 },
    DeleteLevel { price: u8, bid: bool },
    Reprice { from: u8, to: u8, bid: bool },
    MarketAdd { id: u8, bid: bool, size: u16 },
    MarketDelete { id: u8, bid: bool },
    Clear,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0u8..20, 0u8..8, any::<bool>(), 0u16..500, prop::bool::weighted(0.8))
            .prop_map(|(id, price, bid, size, visible)| Op::Add { id, price, bid, size, visible }),
        3 => (0u8..20, 0u8..8, any::<bool>(), 0u16..500)
            .prop_map(|(id, price, bid, size)| Op::Update { id, price, bid, size }),
        3 => (0u8..20, 0u8..8, any::<bool>())
            .prop_map(|(id, price, bid)| Op::Delete { id, price, bid }),
        1 => (0u8..20, 0u8..8, any::<bool>(), any::<bool>())
            .prop_map(|(id, price, bid, visible)| Op::SetVisible { id, price, bid, visible }),
        1 => (0u8..8, any::<bool>(), 0u16..500, 0u8..5)
            .prop_map(|(price, bid, size, count)| Op::UpdateLevel { price, bid, size, count }),
        1 => (0u8..8, any::<bool>())
            .prop_map(|(price, bid)| Op::DeleteLevel { price, bid }),
        1 => (0u8..8, 0u8..8, any::<bool>())
            .prop_map(|(from, to, bid)| Op::Reprice { from, to, bid }),
        1 => (0u8..4, any::<bool>(), 0u16..500)
            .prop_map(|(id, bid, size)| Op::MarketAdd { id, bid, size }),
        1 => (0u8..4, any::<bool>())
            .prop_map(|(id, bid)| Op::MarketDelete { id, bid }),
        1 => Just(Op::Clear),
    ]
}

fn config_strategy() -> impl Strategy<Value = BookConfig> {
    (
        prop_oneof![
            Just(EmptyLevelPolicy::Remove),
            Just(EmptyLevelPolicy::RetainPlaceholder)
        ],
        prop_oneof![
            Just(ZeroSizeEntryPolicy::Explicit),
            Just(ZeroSizeEntryPolicy::DeleteOnZero)
        ],
    )
        .prop_map(|(empty_level_policy, zero_size_policy)| BookConfig {
            empty_level_policy,
            zero_size_policy,
            ..BookConfig::default()
        })
}

fn side(bid: bool) -> Side {
    if bid {
        Side::Bid
    } else {
        Side::Ask
    }
}

fn px(price: u8) -> Price {
    Price::from_u64(100 + price as u64)
}

fn qty(size: u16) -> Quantity {
    Quantity::from_u64(size as u64)
}

fn apply_op(book: &mut OrderBook, op: &Op, time: i64) {
    match *op {
        Op::Add { id, price, bid, size, visible } => {
            let mut entry = BookEntry::new(format!("E{id}"), qty(size), EntryAction::Add, time);
            entry.set_visible(visible);
            // Duplicate ids are rejected and leave the book unchanged.
            let _ = book.add_entry(entry, px(price), side(bid), time);
        }
        Op::Update { id, price, bid, size } => {
            book.update_entry(&EntryId::from(format!("E{id}")), px(price), side(bid), qty(size), time);
        }
        Op::Delete { id, price, bid } => {
            book.delete_entry(&EntryId::from(format!("E{id}")), px(price), side(bid), time);
        }
        Op::SetVisible { id, price, bid, visible } => {
            book.update_entry_visibility(
                &EntryId::from(format!("E{id}")),
                px(price),
                side(bid),
                visible,
                time,
            );
        }
        Op::UpdateLevel { price, bid, size, count } => {
            book.update_level(px(price), side(bid), qty(size), count as u32, time);
        }
        Op::DeleteLevel { price, bid } => {
            book.delete_level(px(price), side(bid), time);
        }
        Op::Reprice { from, to, bid } => {
            // Missing source or occupied target is rejected without change.
            let _ = book.reprice_level(side(bid), px(from), px(to), time);
        }
        Op::MarketAdd { id, bid, size } => {
            let entry = BookEntry::new(format!("M{id}"), qty(size), EntryAction::Add, time);
            let _ = book.add_market_entry(entry, side(bid), time);
        }
        Op::MarketDelete { id, bid } => {
            book.delete_market_entry(&EntryId::from(format!("M{id}")), side(bid), time);
        }
        Op::Clear => book.clear(),
    }
}

fn new_book(config: BookConfig) -> OrderBook {
    OrderBook::with_config(Symbol::new("PROP"), PartId::default(), config)
}

proptest! {
    #[test]
    fn prop_ladders_stay_sorted(
        config in config_strategy(),
        ops in prop::collection::vec(op_strategy(), 0..200),
    ) {
        let mut book = new_book(config);
        for (i, op) in ops.iter().enumerate() {
            apply_op(&mut book, op, i as i64);
        }

        let bids: Vec<Price> = book.bid_levels().map(|l| l.price()).collect();
        let asks: Vec<Price> = book.ask_levels().map(|l| l.price()).collect();
        prop_assert!(bids.windows(2).all(|w| w[0] > w[1]));
        prop_assert!(asks.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn prop_level_size_is_sum_of_entries(
        config in config_strategy(),
        ops in prop::collection::vec(op_strategy(), 0..200),
    ) {
        let mut book = new_book(config);
        for (i, op) in ops.iter().enumerate() {
            apply_op(&mut book, op, i as i64);
        }

        let levels = book
            .bid_levels()
            .chain(book.ask_levels())
            .chain(book.bid_market_orders())
            .chain(book.ask_market_orders());
        for level in levels {
            prop_assert!(level.num_entries() <= level.num_entries_total());
            if level.is_empty() {
                continue;
            }
            let total: Quantity = level.entries().map(BookEntry::visible_size).sum();
            let visible = level.entries().filter(|e| e.is_visible()).count();
            prop_assert_eq!(level.size(), total);
            prop_assert_eq!(level.num_entries() as usize, visible);
            prop_assert_eq!(level.num_entries_total() as usize, level.entries().len());
        }
    }

    #[test]
    fn prop_add_then_remove_restores_level(
        sizes in prop::collection::vec(0u64..1000, 0..10),
        extra in 0u64..1000,
    ) {
        let mut level = PriceLevel::new(Price::from_u64(50), Side::Ask);
        for (i, size) in sizes.iter().enumerate() {
            level
                .add_entry(BookEntry::new(format!("E{i}"), Quantity::from_u64(*size), EntryAction::Add, 0))
                .unwrap();
        }
        let (size_before, count_before) = (level.size(), level.num_entries());

        let added = BookEntry::new("EXTRA", Quantity::from_u64(extra), EntryAction::Add, 1);
        level.add_entry(added.clone()).unwrap();
        let removed = level.remove_entry(&added).unwrap();

        prop_assert_eq!(removed.action(), EntryAction::Delete);
        prop_assert_eq!(level.size(), size_before);
        prop_assert_eq!(level.num_entries(), count_before);
    }

    #[test]
    fn prop_recap_round_trip(
        config in config_strategy(),
        ops in prop::collection::vec(op_strategy(), 0..150),
    ) {
        let mut source = new_book(config.clone());
        for (i, op) in ops.iter().enumerate() {
            apply_op(&mut source, op, i as i64);
        }

        let mut recap = BookMessage::new(BookMsgType::Update, Symbol::new("PROP"));
        source.populate_recap(&mut recap);
        let mut replica = new_book(config);
        replica.apply_recap(&recap, &ApplyOptions::default()).unwrap();

        prop_assert_eq!(replica.first_difference(&source), None);
        prop_assert_eq!(&replica, &source);
    }

    #[test]
    fn prop_second_populate_delta_is_empty(
        config in config_strategy(),
        ops in prop::collection::vec(op_strategy(), 0..50),
    ) {
        let mut book = new_book(config);
        for (i, op) in ops.iter().enumerate() {
            apply_op(&mut book, op, i as i64);
        }

        let mut msg = BookMessage::new(BookMsgType::Update, Symbol::new("PROP"));
        let _ = book.populate_delta(&mut msg);
        prop_assert!(!book.populate_delta(&mut msg));
    }

    #[test]
    fn prop_published_deltas_track_source(
        config in config_strategy(),
        batches in prop::collection::vec(prop::collection::vec(op_strategy(), 1..20), 1..10),
    ) {
        let mut source = new_book(config.clone());
        let mut replica = new_book(config);
        let opts = ApplyOptions::default();
        let mut time = 0i64;

        for batch in &batches {
            for op in batch {
                time += 1;
                apply_op(&mut source, op, time);
            }

            let mut msg = BookMessage::new(BookMsgType::Update, Symbol::new("PROP"));
            if source.populate_delta(&mut msg) {
                match msg.msg_type {
                    BookMsgType::Update => {
                        replica.apply_update(&msg, &opts).unwrap();
                    }
                    BookMsgType::Clear => replica.clear(),
                    BookMsgType::Recap | BookMsgType::Initial => {
                        replica.apply_recap(&msg, &opts).unwrap();
                    }
                }
            }
            prop_assert_eq!(replica.first_difference(&source), None);
        }
    }
}
