//! Weak pairs
//!
//! A weak pair is a cons cell with its car, its cdr, or both held weakly.
//! The pair itself is an ordinary heap object: it lives as long as something
//! strongly references it, and its strong side is traced like any car/cdr.
//! Only the collector writes to a weak pair after construction, and only to
//! delete a weak slot whose referent died.

use crate::heap::Heap;
use crate::object::{GcTraceable, HeapObject};
use crate::registry::WeakRegistry;
use crate::value::Value;
use crate::weak_ref::WeakSlot;

/// Which slots of a weak pair are weak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakPairKind {
    /// Weak car, strong cdr
    CarWeak,
    /// Strong car, weak cdr
    CdrWeak,
    /// Both slots weak
    DoublyWeak,
}

/// Selects one side of a pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSlot {
    /// First slot
    Car,
    /// Second slot
    Cdr,
}

/// Two-slot cell with one or both slots weak
#[derive(Debug, Clone)]
pub struct WeakPair {
    car: WeakSlot,
    cdr: WeakSlot,
    kind: WeakPairKind,
}

impl WeakPair {
    /// Create a pair; nothing is deleted yet.
    pub fn new(car: Value, cdr: Value, kind: WeakPairKind) -> Self {
        Self {
            car: WeakSlot::Live(car),
            cdr: WeakSlot::Live(cdr),
            kind,
        }
    }

    /// Weakness variant chosen at construction
    pub fn kind(&self) -> WeakPairKind {
        self.kind
    }

    /// Whether `slot` is held weakly
    pub fn is_weak(&self, slot: PairSlot) -> bool {
        matches!(
            (self.kind, slot),
            (WeakPairKind::DoublyWeak, _)
                | (WeakPairKind::CarWeak, PairSlot::Car)
                | (WeakPairKind::CdrWeak, PairSlot::Cdr)
        )
    }

    fn slot(&self, slot: PairSlot) -> WeakSlot {
        match slot {
            PairSlot::Car => self.car,
            PairSlot::Cdr => self.cdr,
        }
    }

    /// Read a slot; a deleted slot reads as `#f`.
    pub fn get(&self, slot: PairSlot) -> Value {
        self.slot(slot).get()
    }

    /// First slot
    pub fn car(&self) -> Value {
        self.get(PairSlot::Car)
    }

    /// Second slot
    pub fn cdr(&self) -> Value {
        self.get(PairSlot::Cdr)
    }

    /// Whether the collector deleted `slot`
    pub fn is_deleted(&self, slot: PairSlot) -> bool {
        self.slot(slot).is_deleted()
    }

    /// Whether either slot has been deleted
    pub fn is_deleted_either(&self) -> bool {
        self.car.is_deleted() || self.cdr.is_deleted()
    }

    /// Delete every weak slot whose referent `is_live` rejects.
    ///
    /// Returns how many slots were deleted by this call.
    pub(crate) fn sweep(&mut self, is_live: impl Fn(Value) -> bool) -> usize {
        let mut dropped = 0;
        for side in [PairSlot::Car, PairSlot::Cdr] {
            if !self.is_weak(side) {
                continue;
            }
            let slot = match side {
                PairSlot::Car => &mut self.car,
                PairSlot::Cdr => &mut self.cdr,
            };
            if let WeakSlot::Live(value) = *slot
                && !is_live(value)
                && slot.clear()
            {
                dropped += 1;
            }
        }
        dropped
    }
}

impl GcTraceable for WeakPair {
    const NEEDS_TRACE: bool = true;

    /// Only the strong side is reported.
    fn trace(&self, tracer: &mut dyn FnMut(Value)) {
        for side in [PairSlot::Car, PairSlot::Cdr] {
            if !self.is_weak(side)
                && let Some(value) = self.slot(side).live()
            {
                value.trace(tracer);
            }
        }
    }
}

/// Allocate a weak pair and record it with the registry.
pub fn make_weak_pair(
    heap: &mut Heap,
    registry: &mut WeakRegistry,
    car: Value,
    cdr: Value,
    kind: WeakPairKind,
) -> Value {
    let r = heap.alloc(HeapObject::WeakPair(WeakPair::new(car, cdr, kind)));
    registry.register_pair(r);
    Value::Object(r)
}

/// Borrow the weak pair behind `value`, if it is one.
pub fn as_weak_pair(heap: &Heap, value: Value) -> Option<&WeakPair> {
    match heap.try_get(value.as_object()?)? {
        HeapObject::WeakPair(pair) => Some(pair),
        _ => None,
    }
}
