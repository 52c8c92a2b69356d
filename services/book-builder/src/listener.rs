//! Binds one order book to one inbound event stream
//!
//! The listener owns the sequence gate and the recap protocol:
//!
//! ```text
//!            first content              last level removed
//!   Empty ─────────────────▶ Populated ──────────────────▶ Empty
//!     │                        │  ▲
//!     │ gap                    │  │ recap applied
//!     ▼                        ▼  │
//!   Recapping ◀────────────── gap ┘
//! ```
//!
//! While recapping, deltas are discarded or held according to
//! [`RecapPolicy`]. Held deltas newer than the recap are replayed once it
//! has been applied. Handlers registered with [`BookListener::add_handler`]
//! are told about every recap, delta, clear, gap, trade and diagnostic.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use types::errors::{BookError, ValidationError};
use types::field_state::{FieldState, Tracked};
use types::ids::{EntryId, PartId, Symbol};

use crate::apply::ApplyOptions;
use crate::config::{ListenerConfig, RecapPolicy};
use crate::delta::{BookDelta, DeltaRecord};
use crate::events::{BookEvent, BookEventPayload, GapInfo, RecapReason, RecapRequest, TradeReport};
use crate::message::BookMessage;
use crate::order_book::OrderBook;
use crate::sequence::{SequenceCheck, SequenceTracker};

/// Lifecycle state of the book behind a listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookState {
    #[default]
    Empty,
    Populated,
    /// Waiting for a full image after losing sync
    Recapping,
}

/// How far the book can be trusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookQuality {
    #[default]
    Ok,
    MaybeStale,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticKind {
    Duplicate,
    Rejected,
    HoldOverflow,
    StaleIgnored,
}

/// Non-fatal problem observed while processing an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub symbol: Symbol,
    pub sequence: u64,
    pub kind: DiagnosticKind,
    pub message: String,
}

/// Callbacks raised by a [`BookListener`]. Every method defaults to a no-op.
pub trait BookHandler: Send {
    fn on_book_recap(&mut self, _book: &OrderBook) {}

    fn on_book_delta(&mut self, _book: &OrderBook, _delta: &BookDelta) {}

    fn on_book_clear(&mut self, _book: &OrderBook) {}

    fn on_book_gap(&mut self, _book: &OrderBook, _gap: &GapInfo) {}

    fn on_book_trade(&mut self, _book: &OrderBook, _trade: &TradeReport) {}

    fn on_book_diagnostic(&mut self, _diagnostic: &Diagnostic) {}
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerOutcome {
    /// A delta was applied, producing `mutations` level deltas.
    Applied { mutations: usize },
    /// A full image replaced the book; `replayed` held deltas were reapplied.
    Recapped { levels: usize, replayed: usize },
    Cleared,
    Trade,
    /// Sequence already seen; dropped.
    Duplicate,
    /// Sequence gap; the book needs a recap.
    GapDetected(RecapRequest),
    /// Buffered until the pending recap arrives.
    Held,
    /// Dropped while recapping.
    Discarded,
    /// Malformed; the book is unchanged.
    Rejected(BookError),
    /// Delta for a stale book, not applied.
    Ignored,
}

impl ListenerOutcome {
    /// Whether the book changed.
    pub fn mutated(&self) -> bool {
        matches!(
            self,
            ListenerOutcome::Applied { .. }
                | ListenerOutcome::Recapped { .. }
                | ListenerOutcome::Cleared
        )
    }
}

/// Listener counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerStats {
    pub events_received: u64,
    pub deltas_applied: u64,
    pub recaps_applied: u64,
    pub clears: u64,
    pub trades: u64,
    pub duplicates: u64,
    pub gaps: u64,
    pub rejected: u64,
    pub held: u64,
    pub discarded: u64,
    pub stale_ignored: u64,
}

/// Listener-level fields with change tracking.
#[derive(Debug, Clone)]
struct ListenerFields {
    part_id: Tracked<PartId>,
    event_seq_num: Tracked<u64>,
    event_time: Tracked<i64>,
}

impl ListenerFields {
    fn age(&mut self) {
        self.part_id.age();
        self.event_seq_num.age();
        self.event_time.age();
    }
}

/// Drives one [`OrderBook`] from a stream of [`BookEvent`]s.
pub struct BookListener {
    book: OrderBook,
    config: ListenerConfig,
    handlers: Vec<Box<dyn BookHandler>>,
    sequence: SequenceTracker,
    state: BookState,
    quality: BookQuality,
    /// Deltas received while recapping, under `RecapPolicy::Hold`.
    held: VecDeque<BookEvent>,
    apply_options: ApplyOptions,
    fields: ListenerFields,
    stats: ListenerStats,
}

impl BookListener {
    pub fn new(symbol: Symbol, config: ListenerConfig) -> Self {
        Self::with_part_id(symbol, PartId::default(), config)
    }

    pub fn with_part_id(symbol: Symbol, part_id: PartId, config: ListenerConfig) -> Self {
        info!(
            symbol = %symbol,
            part_id = %part_id,
            recap_policy = %config.recap_policy,
            hold_capacity = config.hold_capacity,
            "BookListener initialized"
        );
        let apply_options = ApplyOptions {
            process_entries: config.process_entries,
            ..ApplyOptions::default()
        };
        Self {
            book: OrderBook::with_config(symbol, part_id.clone(), config.book.clone()),
            config,
            handlers: Vec::new(),
            sequence: SequenceTracker::new(),
            state: BookState::Empty,
            quality: BookQuality::Ok,
            held: VecDeque::new(),
            apply_options,
            fields: ListenerFields {
                part_id: Tracked::unset(part_id),
                event_seq_num: Tracked::unset(0),
                event_time: Tracked::unset(0),
            },
            stats: ListenerStats::default(),
        }
    }

    pub fn with_defaults(symbol: Symbol) -> Self {
        Self::new(symbol, ListenerConfig::default())
    }

    pub fn add_handler(&mut self, handler: Box<dyn BookHandler>) {
        self.handlers.push(handler);
    }

    /// Never place entries with this id in the book.
    pub fn add_ignored_entry(&mut self, id: EntryId) {
        self.apply_options.ignored_entries.insert(id);
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    /// Mutable access for the publishing side (`populate_delta`).
    pub fn book_mut(&mut self) -> &mut OrderBook {
        &mut self.book
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn symbol(&self) -> &Symbol {
        self.book.symbol()
    }

    pub fn state(&self) -> BookState {
        self.state
    }

    pub fn quality(&self) -> BookQuality {
        self.quality
    }

    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Last accepted sequence number, 0 when none.
    pub fn last_sequence(&self) -> u64 {
        self.sequence.last_sequence().unwrap_or(0)
    }

    /// Whether the book is in sync with the feed.
    pub fn is_consistent(&self) -> bool {
        self.state != BookState::Recapping && self.quality == BookQuality::Ok
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    pub fn part_id(&self) -> (&PartId, FieldState) {
        (self.fields.part_id.get(), self.fields.part_id.state())
    }

    pub fn event_seq_num(&self) -> (u64, FieldState) {
        (
            self.fields.event_seq_num.value(),
            self.fields.event_seq_num.state(),
        )
    }

    pub fn event_time(&self) -> (i64, FieldState) {
        (self.fields.event_time.value(), self.fields.event_time.state())
    }

    /// Process one inbound event.
    pub fn on_event(&mut self, event: BookEvent) -> ListenerOutcome {
        self.stats.events_received += 1;
        self.process(event)
    }

    fn process(&mut self, event: BookEvent) -> ListenerOutcome {
        if &event.symbol != self.book.symbol() {
            let err: BookError = ValidationError::SymbolMismatch {
                expected: self.book.symbol().to_string(),
                actual: event.symbol.to_string(),
            }
            .into();
            self.reject(&event, err.clone());
            return ListenerOutcome::Rejected(err);
        }

        self.fields.age();
        self.fields.event_seq_num.set(event.sequence);
        self.fields.event_time.set(event.timestamp);

        if event.is_full_image() {
            return self.handle_recap(event);
        }
        if self.state == BookState::Recapping {
            return self.hold_or_discard(event);
        }
        if matches!(event.payload, BookEventPayload::Clear) {
            return self.handle_clear(&event);
        }

        match self.sequence.observe(event.sequence, event.timestamp) {
            SequenceCheck::InOrder | SequenceCheck::Unsequenced => self.dispatch(event),
            SequenceCheck::Duplicate { last } => {
                self.stats.duplicates += 1;
                self.diagnose(
                    DiagnosticKind::Duplicate,
                    event.sequence,
                    format!("sequence {} already processed (last {last})", event.sequence),
                );
                ListenerOutcome::Duplicate
            }
            SequenceCheck::Gap(gap) => self.handle_gap(event, gap),
        }
    }

    /// Change the book quality.
    ///
    /// Turning stale clears the book when `clear_stale_book` is set.
    pub fn set_quality(&mut self, quality: BookQuality) {
        if self.quality == quality {
            return;
        }
        info!(
            symbol = %self.book.symbol(),
            from = ?self.quality,
            to = ?quality,
            "Book quality changed"
        );
        self.quality = quality;
        if quality == BookQuality::Stale && self.config.clear_stale_book {
            self.book.clear();
            self.state = BookState::Empty;
            for handler in &mut self.handlers {
                handler.on_book_clear(&self.book);
            }
        }
    }

    /// Ask for a fresh image without a sequence gap, e.g. after going stale.
    pub fn request_recap(&mut self) -> RecapRequest {
        self.state = BookState::Recapping;
        RecapRequest {
            symbol: self.book.symbol().clone(),
            part_id: self.book.part_id().clone(),
            gap: None,
            reason: RecapReason::Stale,
        }
    }

    fn dispatch(&mut self, event: BookEvent) -> ListenerOutcome {
        match &event.payload {
            BookEventPayload::Delta { message } => self.handle_delta(&event, message),
            BookEventPayload::Trade { report } => {
                self.stats.trades += 1;
                for handler in &mut self.handlers {
                    handler.on_book_trade(&self.book, report);
                }
                ListenerOutcome::Trade
            }
            BookEventPayload::Clear => self.handle_clear(&event),
            // Full images are routed before the sequence gate.
            BookEventPayload::Initial { .. } | BookEventPayload::Recap { .. } => {
                ListenerOutcome::Ignored
            }
        }
    }

    fn handle_delta(&mut self, event: &BookEvent, message: &BookMessage) -> ListenerOutcome {
        if self.quality == BookQuality::Stale && !self.config.update_stale_book {
            self.stats.stale_ignored += 1;
            self.diagnose(
                DiagnosticKind::StaleIgnored,
                event.sequence,
                "delta ignored while book is stale".to_string(),
            );
            return ListenerOutcome::Ignored;
        }

        match self
            .book
            .apply_update_at(message, &self.apply_options, event.timestamp)
        {
            Ok(deltas) => {
                self.stats.deltas_applied += 1;
                self.refresh_state();
                let mutations = deltas.len();
                let records = deltas.into_iter().map(DeltaRecord::Level).collect();
                if let Some(delta) = BookDelta::from_records(records) {
                    for handler in &mut self.handlers {
                        handler.on_book_delta(&self.book, &delta);
                    }
                }
                debug!(
                    symbol = %self.book.symbol(),
                    sequence = event.sequence,
                    mutations,
                    "Delta applied"
                );
                ListenerOutcome::Applied { mutations }
            }
            Err(err) => {
                self.reject(event, err.clone());
                ListenerOutcome::Rejected(err)
            }
        }
    }

    fn handle_recap(&mut self, event: BookEvent) -> ListenerOutcome {
        let Some(message) = event.message() else {
            return ListenerOutcome::Ignored;
        };

        let levels = match self
            .book
            .apply_recap_at(message, &self.apply_options, event.timestamp)
        {
            Ok(levels) => levels,
            Err(err) => {
                self.reject(&event, err.clone());
                return ListenerOutcome::Rejected(err);
            }
        };

        self.sequence.reset(event.sequence);
        self.stats.recaps_applied += 1;
        self.quality = BookQuality::Ok;
        self.state = BookState::Empty;
        self.refresh_state();
        self.fields.part_id.set_if_changed(message.part_id.clone());
        for handler in &mut self.handlers {
            handler.on_book_recap(&self.book);
        }
        info!(
            symbol = %self.book.symbol(),
            sequence = event.sequence,
            levels,
            held = self.held.len(),
            "Recap applied"
        );

        let replayed = self.replay_held(event.sequence);
        ListenerOutcome::Recapped { levels, replayed }
    }

    /// Reapply held deltas that are newer than the recap at `recap_seq`.
    fn replay_held(&mut self, recap_seq: u64) -> usize {
        let held = std::mem::take(&mut self.held);
        let mut replayed = 0;
        for event in held {
            if event.sequence != 0 && event.sequence <= recap_seq {
                continue;
            }
            if self.process(event).mutated() {
                replayed += 1;
            }
        }
        replayed
    }

    fn handle_clear(&mut self, event: &BookEvent) -> ListenerOutcome {
        if let SequenceCheck::Duplicate { .. } = self.sequence.check(event.sequence, event.timestamp)
        {
            self.stats.duplicates += 1;
            return ListenerOutcome::Duplicate;
        }
        // A clear leaves nothing a missed event could have touched.
        self.sequence.reset(event.sequence);
        self.sequence.accept(event.sequence);
        self.stats.clears += 1;
        self.book.clear();
        self.state = BookState::Empty;
        for handler in &mut self.handlers {
            handler.on_book_clear(&self.book);
        }
        ListenerOutcome::Cleared
    }

    fn handle_gap(&mut self, event: BookEvent, gap: GapInfo) -> ListenerOutcome {
        self.stats.gaps += 1;
        self.state = BookState::Recapping;
        self.quality = BookQuality::MaybeStale;
        for handler in &mut self.handlers {
            handler.on_book_gap(&self.book, &gap);
        }
        warn!(
            symbol = %self.book.symbol(),
            begin = gap.begin,
            end = gap.end,
            "Book out of sync, requesting recap"
        );

        let request = RecapRequest {
            symbol: self.book.symbol().clone(),
            part_id: self.book.part_id().clone(),
            gap: Some(gap),
            reason: RecapReason::SequenceGap,
        };
        self.hold_or_discard(event);
        ListenerOutcome::GapDetected(request)
    }

    fn hold_or_discard(&mut self, event: BookEvent) -> ListenerOutcome {
        if self.config.recap_policy == RecapPolicy::Discard {
            self.stats.discarded += 1;
            debug!(
                symbol = %self.book.symbol(),
                sequence = event.sequence,
                event_type = event.event_type_label(),
                "Discarding event while recapping"
            );
            return ListenerOutcome::Discarded;
        }

        if self.held.len() >= self.config.hold_capacity {
            self.stats.discarded += 1;
            self.diagnose(
                DiagnosticKind::HoldOverflow,
                event.sequence,
                format!("hold buffer full ({} events)", self.config.hold_capacity),
            );
            return ListenerOutcome::Discarded;
        }
        self.stats.held += 1;
        self.held.push_back(event);
        ListenerOutcome::Held
    }

    fn refresh_state(&mut self) {
        if self.state == BookState::Recapping {
            return;
        }
        self.state = if self.book.is_empty() {
            BookState::Empty
        } else {
            BookState::Populated
        };
    }

    fn reject(&mut self, event: &BookEvent, err: BookError) {
        self.stats.rejected += 1;
        self.diagnose(DiagnosticKind::Rejected, event.sequence, err.to_string());
    }

    fn diagnose(&mut self, kind: DiagnosticKind, sequence: u64, message: String) {
        warn!(
            symbol = %self.book.symbol(),
            sequence,
            kind = ?kind,
            message = %message,
            "Book diagnostic"
        );
        let diagnostic = Diagnostic {
            symbol: self.book.symbol().clone(),
            sequence,
            kind,
            message,
        };
        for handler in &mut self.handlers {
            handler.on_book_diagnostic(&diagnostic);
        }
    }
}
