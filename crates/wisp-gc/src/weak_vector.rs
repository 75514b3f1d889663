//! Weak vectors and weak alist-vectors
//!
//! One container type covers two uses:
//!
//! - **Plain weak vector**: every slot is independently weak. A slot whose
//!   referent dies is deleted and reads back as `#f`.
//! - **Weak alist-vector**: every slot is a bucket, a list of cons cells whose
//!   cars are `(key . value)` entries. Weakness applies to the key, the value
//!   or both. Entries whose weak side dies are unlinked from their bucket.
//!
//! Every container counts the slots/entries the collector dropped in its
//! drop delta. Owners that cache an item count (weak hash tables) consume it
//! with [`take_drop_delta`] once per cycle.

use crate::error::{GcError, GcResult};
use crate::heap::Heap;
use crate::object::{GcTraceable, HeapObject};
use crate::registry::WeakRegistry;
use crate::value::Value;
use crate::weak_ref::WeakSlot;

/// Weakness of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeakKind {
    /// Nothing weak; contents are traced strongly and never swept
    NotWeak,
    /// Keys weak (values survive only while their key does)
    WeakKey,
    /// Values weak (keys survive only while their value does)
    WeakValue,
    /// Both sides weak
    DoublyWeak,
}

impl WeakKind {
    /// Derive the kind from the construction flags
    pub fn from_flags(key_weak: bool, value_weak: bool) -> Self {
        match (key_weak, value_weak) {
            (false, false) => WeakKind::NotWeak,
            (true, false) => WeakKind::WeakKey,
            (false, true) => WeakKind::WeakValue,
            (true, true) => WeakKind::DoublyWeak,
        }
    }

    /// Whether anything in the container is weak
    #[inline]
    pub fn is_weak(self) -> bool {
        self != WeakKind::NotWeak
    }

    /// Whether keys are weak
    pub fn key_weak(self) -> bool {
        matches!(self, WeakKind::WeakKey | WeakKind::DoublyWeak)
    }

    /// Whether values are weak
    pub fn value_weak(self) -> bool {
        matches!(self, WeakKind::WeakValue | WeakKind::DoublyWeak)
    }
}

/// Slot organisation of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeakLayout {
    /// One value per slot
    Plain,
    /// One association-list bucket per slot
    Alist,
}

/// Fixed-length weak container
#[derive(Debug, Clone)]
pub struct WeakVector {
    slots: Vec<WeakSlot>,
    kind: WeakKind,
    layout: WeakLayout,
    /// Slots/entries dropped since the owner last took the delta
    drop_delta: usize,
}

impl WeakVector {
    /// Plain vector with every slot set to `fill`
    pub fn plain(length: usize, fill: Value, kind: WeakKind) -> Self {
        Self {
            slots: vec![WeakSlot::Live(fill); length],
            kind,
            layout: WeakLayout::Plain,
            drop_delta: 0,
        }
    }

    /// Plain vector holding `items`
    pub fn from_values(items: Vec<Value>, kind: WeakKind) -> Self {
        Self {
            slots: items.into_iter().map(WeakSlot::Live).collect(),
            kind,
            layout: WeakLayout::Plain,
            drop_delta: 0,
        }
    }

    /// Alist-vector with every bucket empty
    pub fn alist(length: usize, kind: WeakKind) -> Self {
        Self {
            slots: vec![WeakSlot::Live(Value::Nil); length],
            kind,
            layout: WeakLayout::Alist,
            drop_delta: 0,
        }
    }

    /// Weakness of this container
    pub fn kind(&self) -> WeakKind {
        self.kind
    }

    /// Slot organisation
    pub fn layout(&self) -> WeakLayout {
        self.layout
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the container has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot `index`; a deleted slot reads as `#f`.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.slots.get(index).map(|slot| slot.get())
    }

    /// Whether slot `index` was deleted by the collector
    pub fn is_deleted(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(|slot| slot.is_deleted())
    }

    /// Store into slot `index`. Returns false if out of bounds.
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = WeakSlot::Live(value);
                true
            }
            None => false,
        }
    }

    /// Drops recorded since the last [`take_drop_delta`](Self::take_drop_delta)
    pub fn drop_delta(&self) -> usize {
        self.drop_delta
    }

    /// Read the drop delta and reset it to zero
    pub fn take_drop_delta(&mut self) -> usize {
        std::mem::take(&mut self.drop_delta)
    }

    pub(crate) fn reset_drop_delta(&mut self) {
        self.drop_delta = 0;
    }

    pub(crate) fn record_drops(&mut self, dropped: usize) {
        self.drop_delta += dropped;
    }

    /// Live values of all slots, in order
    pub(crate) fn live_values(&self) -> Vec<Value> {
        self.slots.iter().filter_map(|slot| slot.live()).collect()
    }

    /// Delete every slot whose referent `is_live` rejects (plain layout).
    pub(crate) fn sweep_slots(&mut self, is_live: impl Fn(Value) -> bool) -> usize {
        let mut dropped = 0;
        for slot in &mut self.slots {
            if let WeakSlot::Live(value) = *slot
                && !is_live(value)
                && slot.clear()
            {
                dropped += 1;
            }
        }
        dropped
    }

    /// Replace bucket heads after unlinking (alist layout).
    pub(crate) fn set_buckets(&mut self, heads: Vec<Value>) {
        debug_assert_eq!(heads.len(), self.slots.len());
        self.slots = heads.into_iter().map(WeakSlot::Live).collect();
    }
}

impl GcTraceable for WeakVector {
    const NEEDS_TRACE: bool = true;

    /// Non-weak containers are traced like ordinary vectors. Weak ones report
    /// nothing here; the registry hooks decide what their contents keep alive.
    fn trace(&self, tracer: &mut dyn FnMut(Value)) {
        if self.kind.is_weak() {
            return;
        }
        for slot in &self.slots {
            if let Some(value) = slot.live() {
                value.trace(tracer);
            }
        }
    }
}

/// Longest container the constructors accept
pub const MAX_LENGTH: usize = (1 << 24) - 1;

/// Validate a length argument
fn checked_length(subr: &'static str, length: i64) -> GcResult<usize> {
    usize::try_from(length)
        .ok()
        .filter(|&n| n <= MAX_LENGTH)
        .ok_or_else(|| GcError::invalid_argument(subr, "Invalid vector length", [Value::Int(length)]))
}

fn alloc_container(heap: &mut Heap, registry: &mut WeakRegistry, vector: WeakVector) -> Value {
    let r = heap.alloc(HeapObject::WeakVector(vector));
    registry.register(heap, r);
    Value::Object(r)
}

/// Create a plain weak vector of `length` slots filled with `fill`.
///
/// The kind comes from `(key_weak, value_weak)`; with both false the vector
/// is registered but never swept.
pub fn make_weak_vector(
    heap: &mut Heap,
    registry: &mut WeakRegistry,
    length: i64,
    fill: Value,
    key_weak: bool,
    value_weak: bool,
) -> GcResult<Value> {
    let length = checked_length("make-weak-vector", length)?;
    let kind = WeakKind::from_flags(key_weak, value_weak);
    Ok(alloc_container(heap, registry, WeakVector::plain(length, fill, kind)))
}

/// Create a weak alist-vector with `length` empty buckets.
pub fn make_weak_alist_vector(
    heap: &mut Heap,
    registry: &mut WeakRegistry,
    length: i64,
    key_weak: bool,
    value_weak: bool,
) -> GcResult<Value> {
    let length = checked_length("make-weak-alist-vector", length)?;
    let kind = WeakKind::from_flags(key_weak, value_weak);
    Ok(alloc_container(heap, registry, WeakVector::alist(length, kind)))
}

/// Create a value-weak plain vector holding the elements of a proper list.
pub fn weak_vector_from_list(
    heap: &mut Heap,
    registry: &mut WeakRegistry,
    list: Value,
) -> GcResult<Value> {
    let items = heap
        .list_to_vec(list)
        .ok_or_else(|| GcError::wrong_type_arg("weak-vector", 1, list))?;
    let vector = WeakVector::from_values(items, WeakKind::WeakValue);
    Ok(alloc_container(heap, registry, vector))
}

/// Borrow the container behind `value`, if it is one
pub fn as_weak_vector(heap: &Heap, value: Value) -> Option<&WeakVector> {
    match heap.try_get(value.as_object()?)? {
        HeapObject::WeakVector(vector) => Some(vector),
        _ => None,
    }
}

fn expect_weak_vector<'h>(heap: &'h Heap, subr: &'static str, value: Value) -> GcResult<&'h WeakVector> {
    as_weak_vector(heap, value).ok_or_else(|| GcError::wrong_type_arg(subr, 1, value))
}

fn expect_weak_vector_mut<'h>(
    heap: &'h mut Heap,
    subr: &'static str,
    value: Value,
) -> GcResult<&'h mut WeakVector> {
    let r = value
        .as_object()
        .ok_or_else(|| GcError::wrong_type_arg(subr, 1, value))?;
    match heap.try_get_mut(r) {
        Some(HeapObject::WeakVector(vector)) => Ok(vector),
        _ => Err(GcError::wrong_type_arg(subr, 1, value)),
    }
}

fn checked_index(subr: &'static str, len: usize, index: i64) -> GcResult<usize> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or_else(|| GcError::out_of_range(subr, Value::Int(index)))
}

/// Weakness of `value`; anything that is not a weak container is `NotWeak`.
pub fn type_of(heap: &Heap, value: Value) -> WeakKind {
    as_weak_vector(heap, value).map_or(WeakKind::NotWeak, WeakVector::kind)
}

/// True for plain weak vectors
pub fn is_weak_vector(heap: &Heap, value: Value) -> bool {
    as_weak_vector(heap, value).is_some_and(|v| v.layout() == WeakLayout::Plain)
}

fn is_alist_of_kind(heap: &Heap, value: Value, kind: WeakKind) -> bool {
    as_weak_vector(heap, value).is_some_and(|v| v.layout() == WeakLayout::Alist && v.kind() == kind)
}

/// True for weak-key alist-vectors
pub fn is_weak_key_alist_vector(heap: &Heap, value: Value) -> bool {
    is_alist_of_kind(heap, value, WeakKind::WeakKey)
}

/// True for weak-value alist-vectors
pub fn is_weak_value_alist_vector(heap: &Heap, value: Value) -> bool {
    is_alist_of_kind(heap, value, WeakKind::WeakValue)
}

/// True for doubly-weak alist-vectors
pub fn is_doubly_weak_alist_vector(heap: &Heap, value: Value) -> bool {
    is_alist_of_kind(heap, value, WeakKind::DoublyWeak)
}

/// Number of slots
pub fn vector_length(heap: &Heap, container: Value) -> GcResult<usize> {
    Ok(expect_weak_vector(heap, "vector-length", container)?.len())
}

/// Read slot `index`. Deleted slots read as `#f`; alist slots return the
/// bucket list.
pub fn vector_ref(heap: &Heap, container: Value, index: i64) -> GcResult<Value> {
    let vector = expect_weak_vector(heap, "vector-ref", container)?;
    let i = checked_index("vector-ref", vector.len(), index)?;
    Ok(vector.get(i).unwrap_or(Value::FALSE))
}

/// Store `value` into slot `index`
pub fn vector_set(heap: &mut Heap, container: Value, index: i64, value: Value) -> GcResult<()> {
    let vector = expect_weak_vector_mut(heap, "vector-set!", container)?;
    let i = checked_index("vector-set!", vector.len(), index)?;
    vector.set(i, value);
    Ok(())
}

/// Drops recorded since the delta was last taken
pub fn drop_delta(heap: &Heap, container: Value) -> GcResult<usize> {
    Ok(expect_weak_vector(heap, "weak-vector-drop-delta", container)?.drop_delta())
}

/// Read the drop delta and reset it to zero
pub fn take_drop_delta(heap: &mut Heap, container: Value) -> GcResult<usize> {
    Ok(expect_weak_vector_mut(heap, "weak-vector-take-drop-delta", container)?.take_drop_delta())
}
