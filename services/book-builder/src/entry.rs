//! Individual order entry resting at a price level

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::book::EntryAction;
use types::errors::ValidationError;
use types::field_state::{FieldState, Tracked};
use types::ids::EntryId;
use types::numeric::Quantity;

/// A single order resting at a [`PriceLevel`](crate::price_level::PriceLevel).
///
/// Every observable attribute is tracked, so consumers of a delta can tell
/// which fields the most recent event changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookEntry {
    id: Tracked<EntryId>,
    size: Tracked<Quantity>,
    action: Tracked<EntryAction>,
    status: Tracked<u16>,
    time: Tracked<i64>,
    /// Hidden entries count towards the level's total entry count only.
    visible: bool,
}

impl BookEntry {
    /// Create a visible entry. All supplied fields are marked modified.
    pub fn new(id: impl Into<EntryId>, size: Quantity, action: EntryAction, time: i64) -> Self {
        Self {
            id: Tracked::modified(id.into()),
            size: Tracked::modified(size),
            action: Tracked::modified(action),
            status: Tracked::unset(0),
            time: Tracked::modified(time),
            visible: true,
        }
    }

    /// Zero-size placeholder used by `find_or_create_entry`.
    pub(crate) fn placeholder(id: EntryId, time: i64) -> Self {
        Self::new(id, Quantity::zero(), EntryAction::Add, time)
    }

    pub fn id(&self) -> &EntryId {
        self.id.get()
    }

    pub fn size(&self) -> Quantity {
        self.size.value()
    }

    pub fn action(&self) -> EntryAction {
        self.action.value()
    }

    pub fn status(&self) -> u16 {
        self.status.value()
    }

    pub fn time(&self) -> i64 {
        self.time.value()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Size contributed to the level total.
    pub fn visible_size(&self) -> Quantity {
        if self.visible {
            self.size()
        } else {
            Quantity::zero()
        }
    }

    pub fn set_id(&mut self, id: impl Into<EntryId>) {
        self.id.set(id.into());
    }

    pub fn set_size(&mut self, size: Quantity) {
        self.size.set(size);
    }

    /// Set the size from a raw decimal, rejecting negative values.
    pub fn try_set_size(&mut self, size: Decimal) -> Result<(), ValidationError> {
        let size = Quantity::try_new(size)?;
        self.size.set(size);
        Ok(())
    }

    pub fn set_action(&mut self, action: EntryAction) {
        self.action.set(action);
    }

    pub fn set_status(&mut self, status: u16) {
        self.status.set(status);
    }

    pub fn set_time(&mut self, time: i64) {
        self.time.set(time);
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn id_state(&self) -> FieldState {
        self.id.state()
    }

    pub fn size_state(&self) -> FieldState {
        self.size.state()
    }

    pub fn action_state(&self) -> FieldState {
        self.action.state()
    }

    pub fn status_state(&self) -> FieldState {
        self.status.state()
    }

    pub fn time_state(&self) -> FieldState {
        self.time.state()
    }

    /// Mark every modified field as not modified ahead of a new event.
    pub fn age(&mut self) {
        self.id.age();
        self.size.age();
        self.action.age();
        self.status.age();
        self.time.age();
    }
}

/// Content equality: the action tag describes the last mutation, not state.
impl PartialEq for BookEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.size == other.size
            && self.status == other.status
            && self.time == other.time
            && self.visible == other.visible
    }
}

impl Eq for BookEntry {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_fields_modified() {
        let entry = BookEntry::new("E1", Quantity::from_u64(100), EntryAction::Add, 10);
        assert_eq!(entry.id().as_str(), "E1");
        assert_eq!(entry.size(), Quantity::from_u64(100));
        assert_eq!(entry.size_state(), FieldState::Modified);
        assert_eq!(entry.status_state(), FieldState::NotInitialised);
    }

    #[test]
    fn test_age_then_set() {
        let mut entry = BookEntry::new("E1", Quantity::from_u64(100), EntryAction::Add, 10);
        entry.age();
        assert_eq!(entry.size_state(), FieldState::NotModified);
        assert_eq!(entry.time_state(), FieldState::NotModified);

        entry.set_size(Quantity::from_u64(50));
        assert_eq!(entry.size_state(), FieldState::Modified);
        assert_eq!(entry.time_state(), FieldState::NotModified);
    }

    #[test]
    fn test_negative_size_rejected() {
        let mut entry = BookEntry::new("E1", Quantity::from_u64(100), EntryAction::Add, 10);
        entry.age();
        let result = entry.try_set_size(Decimal::new(-1, 0));
        assert!(matches!(
            result,
            Err(ValidationError::NegativeQuantity { .. })
        ));
        assert_eq!(entry.size(), Quantity::from_u64(100));
        assert_eq!(entry.size_state(), FieldState::NotModified);
    }

    #[test]
    fn test_hidden_entry_contributes_no_size() {
        let mut entry = BookEntry::new("E1", Quantity::from_u64(100), EntryAction::Add, 10);
        entry.set_visible(false);
        assert_eq!(entry.visible_size(), Quantity::zero());
    }

    #[test]
    fn test_equality_ignores_action() {
        let a = BookEntry::new("E1", Quantity::from_u64(5), EntryAction::Add, 1);
        let mut b = a.clone();
        b.set_action(EntryAction::Update);
        assert_eq!(a, b);
        b.set_size(Quantity::from_u64(6));
        assert_ne!(a, b);
    }
}
