//! Error types for order book reconstruction
//!
//! Comprehensive error taxonomy using thiserror. Validation errors describe
//! malformed input and cause the offending event to be rejected; book errors
//! describe structural operations that cannot be carried out on the current
//! book state.

use thiserror::Error;

/// Top-level book error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BookError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Duplicate entry {entry_id} at price {price}")]
    DuplicateEntry { entry_id: String, price: String },

    #[error("Entry not found: {entry_id} at price {price}")]
    EntryNotFound { entry_id: String, price: String },

    #[error("Duplicate {side} level at price {price}")]
    DuplicateLevel { side: String, price: String },

    #[error("{side} level not found at price {price}")]
    LevelNotFound { side: String, price: String },
}

/// Malformed input errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Negative quantity: {value}")]
    NegativeQuantity { value: String },

    #[error("Invalid decimal: {value}")]
    InvalidDecimal { value: String },

    #[error("Level record {level} is missing required field `{field}`")]
    MissingLevelField { level: usize, field: &'static str },

    #[error("Entry record {entry} of level {level} has no entry id")]
    MissingEntryId { level: usize, entry: usize },

    #[error("Symbol mismatch: book is {expected}, message is for {actual}")]
    SymbolMismatch { expected: String, actual: String },

    #[error("Unexpected message type {actual}, expected {expected}")]
    UnexpectedMessageType { expected: String, actual: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::MissingLevelField {
            level: 2,
            field: "price",
        };
        assert_eq!(
            err.to_string(),
            "Level record 2 is missing required field `price`"
        );
    }

    #[test]
    fn test_book_error_from_validation() {
        let err: BookError = ValidationError::NegativeQuantity {
            value: "-1".to_string(),
        }
        .into();
        assert!(matches!(err, BookError::Validation(_)));
        assert_eq!(err.to_string(), "Validation error: Negative quantity: -1");
    }
}
