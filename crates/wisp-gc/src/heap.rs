//! GC Heap management
//!
//! Cells live in a single arena indexed by [`GcRef`]. Freed cells go on a
//! free list and get a new generation when reused, so stale references are
//! caught on access.

use crate::object::{GcHeader, GcTraceable, HeapObject, MarkColor};
use crate::value::{GcRef, Value};

/// GC configuration
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Allocations between collections before `should_gc` fires (default: 8192)
    pub gc_threshold: usize,
    /// Cells reserved up front (default: 256)
    pub initial_capacity: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            gc_threshold: 8192,
            initial_capacity: 256,
        }
    }
}

/// A live heap cell
struct GcBox {
    header: GcHeader,
    object: HeapObject,
}

/// Arena holding every heap object of a runtime
pub struct Heap {
    config: GcConfig,
    cells: Vec<Option<GcBox>>,
    /// Generation per slot; survives while the slot is free
    generations: Vec<u32>,
    free_list: Vec<u32>,
    live: usize,
    /// Allocations since the last sweep
    allocated: usize,
}

impl Heap {
    /// Create new heap with default config
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    /// Create new heap with custom config
    pub fn with_config(config: GcConfig) -> Self {
        Self {
            cells: Vec::with_capacity(config.initial_capacity),
            generations: Vec::with_capacity(config.initial_capacity),
            free_list: Vec::new(),
            live: 0,
            allocated: 0,
            config,
        }
    }

    /// Get config
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Get GC threshold
    pub fn gc_threshold(&self) -> usize {
        self.config.gc_threshold
    }

    /// Set GC threshold. Clamped to 1 so the check can't be disabled by zero.
    pub fn set_gc_threshold(&mut self, threshold: usize) {
        self.config.gc_threshold = threshold.max(1);
    }

    /// Check if GC should be triggered
    pub fn should_gc(&self) -> bool {
        self.allocated >= self.config.gc_threshold
    }

    /// Number of live cells
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Allocations since the last sweep
    pub fn allocated_since_gc(&self) -> usize {
        self.allocated
    }

    /// Allocate a cell holding `object`
    pub fn alloc(&mut self, object: HeapObject) -> GcRef {
        let gc_box = GcBox {
            header: GcHeader::new(object.tag()),
            object,
        };
        self.live += 1;
        self.allocated += 1;

        if let Some(index) = self.free_list.pop() {
            let i = index as usize;
            self.generations[i] = self.generations[i].wrapping_add(1);
            self.cells[i] = Some(gc_box);
            GcRef::new(index, self.generations[i])
        } else {
            let index = u32::try_from(self.cells.len()).expect("heap index space exhausted");
            self.cells.push(Some(gc_box));
            self.generations.push(0);
            GcRef::new(index, 0)
        }
    }

    fn slot(&self, r: GcRef) -> Option<&GcBox> {
        let i = r.index as usize;
        if self.generations.get(i) != Some(&r.generation) {
            return None;
        }
        self.cells.get(i).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, r: GcRef) -> Option<&mut GcBox> {
        let i = r.index as usize;
        if self.generations.get(i) != Some(&r.generation) {
            return None;
        }
        self.cells.get_mut(i).and_then(Option::as_mut)
    }

    /// Whether `r` still names a live cell
    pub fn contains(&self, r: GcRef) -> bool {
        self.slot(r).is_some()
    }

    /// Borrow an object, `None` if `r` refers to a reclaimed cell
    pub fn try_get(&self, r: GcRef) -> Option<&HeapObject> {
        self.slot(r).map(|gc_box| &gc_box.object)
    }

    /// Mutably borrow an object, `None` if `r` refers to a reclaimed cell
    pub fn try_get_mut(&mut self, r: GcRef) -> Option<&mut HeapObject> {
        self.slot_mut(r).map(|gc_box| &mut gc_box.object)
    }

    /// Borrow an object.
    ///
    /// # Panics
    /// Panics if `r` refers to a reclaimed cell.
    pub fn get(&self, r: GcRef) -> &HeapObject {
        match self.slot(r) {
            Some(gc_box) => &gc_box.object,
            None => panic!("stale heap reference {r:?}"),
        }
    }

    /// Mutably borrow an object.
    ///
    /// # Panics
    /// Panics if `r` refers to a reclaimed cell.
    pub fn get_mut(&mut self, r: GcRef) -> &mut HeapObject {
        match self.slot_mut(r) {
            Some(gc_box) => &mut gc_box.object,
            None => panic!("stale heap reference {r:?}"),
        }
    }

    /// Header of a live object.
    ///
    /// # Panics
    /// Panics if `r` refers to a reclaimed cell.
    pub fn header(&self, r: GcRef) -> &GcHeader {
        match self.slot(r) {
            Some(gc_box) => &gc_box.header,
            None => panic!("stale heap reference {r:?}"),
        }
    }

    /// Whether `value` survives the current cycle so far.
    ///
    /// Immediates are always live.
    #[inline]
    pub fn is_marked(&self, value: Value) -> bool {
        match value {
            Value::Object(r) => self.header(r).is_marked(),
            _ => true,
        }
    }

    /// Whether `value` was reached through a strong path (gray or black).
    ///
    /// Shallow-retained cells do not count. Immediates always do.
    #[inline]
    pub fn is_traced(&self, value: Value) -> bool {
        match value {
            Value::Object(r) => matches!(self.header(r).mark(), MarkColor::Gray | MarkColor::Black),
            _ => true,
        }
    }

    /// Number of cells reached through a strong path so far
    pub fn traced_count(&self) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|gc_box| matches!(gc_box.header.mark(), MarkColor::Gray | MarkColor::Black))
            .count()
    }

    // ---------------------------------------------------------------
    // Allocation helpers
    // ---------------------------------------------------------------

    /// Allocate a cons cell
    pub fn cons(&mut self, car: Value, cdr: Value) -> Value {
        Value::Object(self.alloc(HeapObject::Pair { car, cdr }))
    }

    /// Allocate an ordinary vector
    pub fn vector(&mut self, items: Vec<Value>) -> Value {
        Value::Object(self.alloc(HeapObject::Vector(items)))
    }

    /// Allocate a string
    pub fn string(&mut self, s: impl Into<String>) -> Value {
        Value::Object(self.alloc(HeapObject::String(s.into())))
    }

    /// Build a proper list from `items`
    pub fn list(&mut self, items: impl IntoIterator<Item = Value>) -> Value {
        let items: Vec<Value> = items.into_iter().collect();
        items
            .into_iter()
            .rev()
            .fold(Value::Nil, |tail, item| self.cons(item, tail))
    }

    /// `(car . cdr)` of a cons cell, `None` for anything else (including a
    /// reclaimed cell)
    pub fn pair(&self, value: Value) -> Option<(Value, Value)> {
        match self.try_get(value.as_object()?)? {
            HeapObject::Pair { car, cdr } => Some((*car, *cdr)),
            _ => None,
        }
    }

    /// Overwrite the car of a cons cell. Returns false if `value` is not a pair.
    pub fn set_car(&mut self, value: Value, new_car: Value) -> bool {
        match value.as_object().and_then(|r| self.try_get_mut(r)) {
            Some(HeapObject::Pair { car, .. }) => {
                *car = new_car;
                true
            }
            _ => false,
        }
    }

    /// Overwrite the cdr of a cons cell. Returns false if `value` is not a pair.
    pub fn set_cdr(&mut self, value: Value, new_cdr: Value) -> bool {
        match value.as_object().and_then(|r| self.try_get_mut(r)) {
            Some(HeapObject::Pair { cdr, .. }) => {
                *cdr = new_cdr;
                true
            }
            _ => false,
        }
    }

    /// Elements of a proper list, `None` if `list` is improper
    pub fn list_to_vec(&self, list: Value) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor = list;
        while !cursor.is_nil() {
            let (car, cdr) = self.pair(cursor)?;
            items.push(car);
            cursor = cdr;
        }
        Some(items)
    }

    // ---------------------------------------------------------------
    // Collection support
    // ---------------------------------------------------------------

    /// Report the strong references of `r` to `tracer`
    pub fn trace_object(&self, r: GcRef, tracer: &mut dyn FnMut(Value)) {
        self.get(r).trace(tracer);
    }

    /// Free every white cell and reset survivors to white.
    ///
    /// Returns the number of cells reclaimed.
    pub fn sweep(&mut self) -> usize {
        let mut reclaimed = 0;

        for (index, cell) in self.cells.iter_mut().enumerate() {
            let Some(gc_box) = cell else { continue };
            if gc_box.header.mark() == MarkColor::White {
                *cell = None;
                self.free_list.push(index as u32);
                reclaimed += 1;
            } else {
                gc_box.header.set_mark(MarkColor::White);
            }
        }

        self.live -= reclaimed;
        self.allocated = 0;
        reclaimed
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("live", &self.live)
            .field("capacity", &self.cells.len())
            .field("allocated_since_gc", &self.allocated)
            .finish()
    }
}
