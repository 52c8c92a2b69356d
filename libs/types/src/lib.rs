//! Types library for order book reconstruction
//!
//! This library provides the value types shared by every book-building
//! component: identifiers, decimal prices and sizes, side and action tags,
//! per-field change tracking, and the error taxonomy.
//!
//! # Version
//! v1.0.0
//!
//! # Modules
//! - `ids`: Identifiers (Symbol, PartId, EntryId)
//! - `numeric`: Decimal value types (Price, Quantity)
//! - `book`: Side, level/entry action tags, order type
//! - `field_state`: Tri-state change tags (FieldState, Tracked)
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod numeric;
pub mod book;
pub mod field_state;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::book::*;
    pub use crate::field_state::*;
    pub use crate::errors::*;
}
