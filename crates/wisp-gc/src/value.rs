//! Tagged values
//!
//! Every datum the runtime hands around is a [`Value`]: either an immediate
//! (nil, booleans, fixnums, characters) or a reference to a heap cell.
//! Heap references compare by identity.

use std::fmt;

/// Reference to a heap cell.
///
/// The generation is bumped each time a cell is reused, so a reference that
/// outlived its object is detected instead of silently aliasing a new one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GcRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl GcRef {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index of the referenced cell
    pub fn index(self) -> u32 {
        self.index
    }

    /// Generation of the referenced cell
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<obj {}:{}>", self.index, self.generation)
    }
}

/// Uniform tagged value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Value {
    /// The empty list
    #[default]
    Nil,
    /// `#t` / `#f`
    Bool(bool),
    /// Fixnum
    Int(i64),
    /// Character
    Char(char),
    /// Result of operations with no useful value
    Unspecified,
    /// Heap-allocated object
    Object(GcRef),
}

impl Value {
    /// `#f`, also what a deleted weak slot reads back as
    pub const FALSE: Value = Value::Bool(false);
    /// `#t`
    pub const TRUE: Value = Value::Bool(true);

    /// Heap reference carried by this value, if any
    #[inline]
    pub fn as_object(self) -> Option<GcRef> {
        match self {
            Value::Object(r) => Some(r),
            _ => None,
        }
    }

    /// True for values that are not heap references
    #[inline]
    pub fn is_immediate(self) -> bool {
        !matches!(self, Value::Object(_))
    }

    /// True for `'()`
    #[inline]
    pub fn is_nil(self) -> bool {
        matches!(self, Value::Nil)
    }

    /// True only for `#f`
    #[inline]
    pub fn is_false(self) -> bool {
        matches!(self, Value::Bool(false))
    }
}

impl From<GcRef> for Value {
    fn from(r: GcRef) -> Self {
        Value::Object(r)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Char(c)
    }
}
