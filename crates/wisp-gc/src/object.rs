//! GC object layout

use std::sync::atomic::{AtomicU8, Ordering};

use crate::value::Value;
use crate::weak_pair::WeakPair;
use crate::weak_vector::WeakVector;

/// GC object header
pub struct GcHeader {
    /// Mark bits
    mark: AtomicU8,
    /// Object type tag
    tag: ObjectTag,
}

/// Mark color for tri-color marking
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// Not yet visited
    White = 0,
    /// In worklist
    Gray = 1,
    /// Fully scanned
    Black = 2,
    /// Kept alive for this cycle without tracing its children.
    ///
    /// Used for the bucket spine and entry cells of weak alist-vectors.
    /// A shallow cell that is later reached through a strong path is traced
    /// like any other.
    Shallow = 3,
}

impl GcHeader {
    /// Create new header
    pub const fn new(tag: ObjectTag) -> Self {
        Self {
            mark: AtomicU8::new(MarkColor::White as u8),
            tag,
        }
    }

    /// Get mark color
    pub fn mark(&self) -> MarkColor {
        match self.mark.load(Ordering::Acquire) {
            0 => MarkColor::White,
            1 => MarkColor::Gray,
            2 => MarkColor::Black,
            _ => MarkColor::Shallow,
        }
    }

    /// Set mark color
    pub fn set_mark(&self, color: MarkColor) {
        self.mark.store(color as u8, Ordering::Release);
    }

    /// True once the object is known to survive the current cycle
    #[inline]
    pub fn is_marked(&self) -> bool {
        self.mark() != MarkColor::White
    }

    /// Get object tag
    pub fn tag(&self) -> ObjectTag {
        self.tag
    }
}

/// Object type tags
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectTag {
    /// Cons cell
    Pair = 1,
    /// Ordinary vector
    Vector = 2,
    /// String
    String = 3,
    /// Pair with one or both slots weak
    WeakPair = 4,
    /// Weak vector or weak alist-vector
    WeakVector = 5,
}

/// Payload of a heap cell
#[derive(Debug)]
pub enum HeapObject {
    /// Cons cell
    Pair {
        /// First slot
        car: Value,
        /// Second slot
        cdr: Value,
    },
    /// Ordinary (strong) vector
    Vector(Vec<Value>),
    /// String
    String(String),
    /// Weak pair
    WeakPair(WeakPair),
    /// Weak vector / weak alist-vector
    WeakVector(WeakVector),
}

impl HeapObject {
    /// Tag stored in the header of a cell holding this object
    pub fn tag(&self) -> ObjectTag {
        match self {
            HeapObject::Pair { .. } => ObjectTag::Pair,
            HeapObject::Vector(_) => ObjectTag::Vector,
            HeapObject::String(_) => ObjectTag::String,
            HeapObject::WeakPair(_) => ObjectTag::WeakPair,
            HeapObject::WeakVector(_) => ObjectTag::WeakVector,
        }
    }
}

/// Trait for types that can be traced by the GC
pub trait GcTraceable {
    /// Whether this type contains GC references that need tracing
    const NEEDS_TRACE: bool;

    /// Report every strongly held value to `tracer`
    fn trace(&self, tracer: &mut dyn FnMut(Value));
}

impl GcTraceable for Value {
    const NEEDS_TRACE: bool = true;

    fn trace(&self, tracer: &mut dyn FnMut(Value)) {
        if !self.is_immediate() {
            tracer(*self);
        }
    }
}

impl GcTraceable for Vec<Value> {
    const NEEDS_TRACE: bool = true;

    fn trace(&self, tracer: &mut dyn FnMut(Value)) {
        for value in self {
            value.trace(tracer);
        }
    }
}

impl GcTraceable for String {
    const NEEDS_TRACE: bool = false;
    fn trace(&self, _tracer: &mut dyn FnMut(Value)) {}
}

impl GcTraceable for HeapObject {
    const NEEDS_TRACE: bool = true;

    fn trace(&self, tracer: &mut dyn FnMut(Value)) {
        match self {
            HeapObject::Pair { car, cdr } => {
                car.trace(tracer);
                cdr.trace(tracer);
            }
            HeapObject::Vector(items) => items.trace(tracer),
            HeapObject::String(s) => s.trace(tracer),
            HeapObject::WeakPair(pair) => pair.trace(tracer),
            HeapObject::WeakVector(vector) => vector.trace(tracer),
        }
    }
}
