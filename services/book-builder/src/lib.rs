//! Book Builder
//!
//! Reconstructs full-depth order books from market-data events and produces:
//! - Per-instrument books of price levels and entries, bids best first
//! - Field-level change tracking on every entry, level and listener field
//! - Simple and complex deltas for incremental republishing
//! - Full recaps for initialising downstream replicas
//! - Gap detection with recap requests and optional hold-and-replay
//! - Versioned, checksummed snapshots and book consistency checks
//!
//! # Architecture
//!
//! ```text
//!     Feed Events
//!        │
//!  ┌─────▼──────┐
//!  │ Dispatch   │  ← books pinned to workers, round-robin
//!  └─────┬──────┘
//!        │
//!  ┌─────▼──────┐
//!  │ Listener   │  ← sequence gate, recap protocol, handlers
//!  └─────┬──────┘
//!        │
//!  ┌─────▼──────┐      ┌──────────┐
//!  │ OrderBook  │─────▶│ Deltas   │──▶ populate_delta / populate_recap
//!  └─────┬──────┘      └──────────┘
//!        │
//!  ┌─────▼──────┐
//!  │ Snapshot   │──▶ checker / replay
//!  └────────────┘
//! ```

pub mod apply;
pub mod checker;
pub mod config;
pub mod delta;
pub mod dispatch;
pub mod entry;
pub mod events;
pub mod listener;
pub mod message;
pub mod order_book;
pub mod price_level;
pub mod replay;
pub mod sequence;
pub mod snapshot;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
