//! Weak slot storage shared by weak pairs and weak vectors.
//!
//! A slot either holds a live value or has been deleted by the collector.
//! A deleted slot reads back as `#f`; the referent itself is never touched
//! again.

use crate::value::Value;

/// A single weakly-held value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakSlot {
    /// Holds a value the collector has not proven dead
    Live(Value),
    /// The referent was collected
    Deleted,
}

impl WeakSlot {
    /// Current value, or `#f` if the referent was collected.
    #[inline]
    pub fn get(self) -> Value {
        match self {
            WeakSlot::Live(value) => value,
            WeakSlot::Deleted => Value::FALSE,
        }
    }

    /// The live value, if any
    #[inline]
    pub fn live(self) -> Option<Value> {
        match self {
            WeakSlot::Live(value) => Some(value),
            WeakSlot::Deleted => None,
        }
    }

    /// Whether the collector deleted this slot
    #[inline]
    pub fn is_deleted(self) -> bool {
        matches!(self, WeakSlot::Deleted)
    }

    /// Delete the slot (called by GC when the referent is collected).
    ///
    /// Returns true if the slot was live before.
    pub fn clear(&mut self) -> bool {
        let was_live = !self.is_deleted();
        *self = WeakSlot::Deleted;
        was_live
    }
}

impl From<Value> for WeakSlot {
    fn from(value: Value) -> Self {
        WeakSlot::Live(value)
    }
}
