//! Mutator-facing runtime
//!
//! [`Runtime`] owns the heap, the collector (and through it the weak
//! registry) and a root table. Every fallible operation reports its error to
//! the installed error handler, if any, before returning it.

use std::sync::Arc;

use crate::collector::{Collector, CycleReport, GcStats};
use crate::critical::CriticalSection;
use crate::error::{GcError, GcResult};
use crate::heap::{GcConfig, Heap};
use crate::registry::WeakRegistry;
use crate::value::Value;
use crate::weak_pair::{self, PairSlot, WeakPair, WeakPairKind};
use crate::weak_vector::{self, WeakKind};

/// Handle to an entry in the root table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(usize);

type ErrorHandler = Box<dyn FnMut(&GcError) + Send>;

/// Heap, collector and roots of one mutator
pub struct Runtime {
    heap: Heap,
    collector: Collector,
    roots: Vec<Option<Value>>,
    free_roots: Vec<usize>,
    error_handler: Option<ErrorHandler>,
}

impl Runtime {
    /// Create a runtime with the default configuration
    pub fn new() -> Self {
        Self::with_config(GcConfig::default())
    }

    /// Create a runtime with a custom configuration
    pub fn with_config(config: GcConfig) -> Self {
        Self {
            heap: Heap::with_config(config),
            collector: Collector::new(),
            roots: Vec::new(),
            free_roots: Vec::new(),
            error_handler: None,
        }
    }

    /// The heap
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The heap, mutably
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// The weak registry
    pub fn registry(&self) -> &WeakRegistry {
        self.collector.registry()
    }

    /// Install a callback that sees every error before it is returned
    pub fn set_error_handler(&mut self, handler: impl FnMut(&GcError) + Send + 'static) {
        self.error_handler = Some(Box::new(handler));
    }

    /// Remove the error callback
    pub fn clear_error_handler(&mut self) {
        self.error_handler = None;
    }

    fn check<T>(&mut self, result: GcResult<T>) -> GcResult<T> {
        if let (Err(err), Some(handler)) = (&result, self.error_handler.as_mut()) {
            handler(err);
        }
        result
    }

    // ---------------------------------------------------------------
    // Roots
    // ---------------------------------------------------------------

    /// Keep `value` alive until [`unroot`](Self::unroot)
    pub fn root(&mut self, value: Value) -> RootId {
        match self.free_roots.pop() {
            Some(index) => {
                self.roots[index] = Some(value);
                RootId(index)
            }
            None => {
                self.roots.push(Some(value));
                RootId(self.roots.len() - 1)
            }
        }
    }

    /// Release a root. Returns the value it held, `None` if already released.
    pub fn unroot(&mut self, id: RootId) -> Option<Value> {
        let value = self.roots.get_mut(id.0)?.take()?;
        self.free_roots.push(id.0);
        Some(value)
    }

    /// Value held by a root
    pub fn root_value(&self, id: RootId) -> Option<Value> {
        self.roots.get(id.0).copied().flatten()
    }

    /// Number of active roots
    pub fn root_count(&self) -> usize {
        self.roots.iter().flatten().count()
    }

    // ---------------------------------------------------------------
    // Ordinary objects
    // ---------------------------------------------------------------

    /// Allocate a cons cell
    pub fn cons(&mut self, car: Value, cdr: Value) -> Value {
        self.heap.cons(car, cdr)
    }

    /// Build a proper list
    pub fn list(&mut self, items: impl IntoIterator<Item = Value>) -> Value {
        self.heap.list(items)
    }

    /// Allocate an ordinary vector
    pub fn vector(&mut self, items: Vec<Value>) -> Value {
        self.heap.vector(items)
    }

    /// Allocate a string
    pub fn string(&mut self, s: impl Into<String>) -> Value {
        self.heap.string(s)
    }

    /// First element of a cons cell
    pub fn car(&mut self, pair: Value) -> GcResult<Value> {
        let result = self
            .heap
            .pair(pair)
            .map(|(car, _)| car)
            .ok_or_else(|| GcError::wrong_type_arg("car", 1, pair));
        self.check(result)
    }

    /// Rest of a cons cell
    pub fn cdr(&mut self, pair: Value) -> GcResult<Value> {
        let result = self
            .heap
            .pair(pair)
            .map(|(_, cdr)| cdr)
            .ok_or_else(|| GcError::wrong_type_arg("cdr", 1, pair));
        self.check(result)
    }

    /// Overwrite the car of a cons cell
    pub fn set_car(&mut self, pair: Value, value: Value) -> GcResult<()> {
        let result = if self.heap.set_car(pair, value) {
            Ok(())
        } else {
            Err(GcError::wrong_type_arg("set-car!", 1, pair))
        };
        self.check(result)
    }

    /// Overwrite the cdr of a cons cell
    pub fn set_cdr(&mut self, pair: Value, value: Value) -> GcResult<()> {
        let result = if self.heap.set_cdr(pair, value) {
            Ok(())
        } else {
            Err(GcError::wrong_type_arg("set-cdr!", 1, pair))
        };
        self.check(result)
    }

    // ---------------------------------------------------------------
    // Weak pairs
    // ---------------------------------------------------------------

    /// Allocate a weak pair of the given kind
    pub fn make_weak_pair(&mut self, car: Value, cdr: Value, kind: WeakPairKind) -> Value {
        weak_pair::make_weak_pair(&mut self.heap, self.collector.registry_mut(), car, cdr, kind)
    }

    /// Pair whose car is weak
    pub fn weak_car_pair(&mut self, car: Value, cdr: Value) -> Value {
        self.make_weak_pair(car, cdr, WeakPairKind::CarWeak)
    }

    /// Pair whose cdr is weak
    pub fn weak_cdr_pair(&mut self, car: Value, cdr: Value) -> Value {
        self.make_weak_pair(car, cdr, WeakPairKind::CdrWeak)
    }

    /// Pair with both slots weak
    pub fn doubly_weak_pair(&mut self, car: Value, cdr: Value) -> Value {
        self.make_weak_pair(car, cdr, WeakPairKind::DoublyWeak)
    }

    fn weak_pair_kind(&self, value: Value) -> Option<WeakPairKind> {
        weak_pair::as_weak_pair(&self.heap, value).map(WeakPair::kind)
    }

    /// True for any weak pair
    pub fn is_weak_pair(&self, value: Value) -> bool {
        self.weak_pair_kind(value).is_some()
    }

    /// True for weak-car pairs
    pub fn is_weak_car_pair(&self, value: Value) -> bool {
        self.weak_pair_kind(value) == Some(WeakPairKind::CarWeak)
    }

    /// True for weak-cdr pairs
    pub fn is_weak_cdr_pair(&self, value: Value) -> bool {
        self.weak_pair_kind(value) == Some(WeakPairKind::CdrWeak)
    }

    /// True for doubly-weak pairs
    pub fn is_doubly_weak_pair(&self, value: Value) -> bool {
        self.weak_pair_kind(value) == Some(WeakPairKind::DoublyWeak)
    }

    fn with_weak_pair<T>(
        &mut self,
        subr: &'static str,
        pair: Value,
        f: impl FnOnce(&WeakPair) -> T,
    ) -> GcResult<T> {
        let result = weak_pair::as_weak_pair(&self.heap, pair)
            .map(f)
            .ok_or_else(|| GcError::wrong_type_arg(subr, 1, pair));
        self.check(result)
    }

    /// Read one slot of a weak pair; a deleted slot reads as `#f`
    pub fn weak_pair_ref(&mut self, pair: Value, slot: PairSlot) -> GcResult<Value> {
        self.with_weak_pair("weak-pair-ref", pair, |p| p.get(slot))
    }

    /// Whether the collector deleted `slot`
    pub fn weak_pair_is_deleted(&mut self, pair: Value, slot: PairSlot) -> GcResult<bool> {
        self.with_weak_pair("weak-pair-deleted?", pair, |p| p.is_deleted(slot))
    }

    /// Whether either slot was deleted
    pub fn weak_pair_is_deleted_either(&mut self, pair: Value) -> GcResult<bool> {
        self.with_weak_pair("weak-pair-deleted?", pair, WeakPair::is_deleted_either)
    }

    // ---------------------------------------------------------------
    // Weak containers
    // ---------------------------------------------------------------

    /// Plain container of `length` slots filled with `fill`
    pub fn make_weak_vector(
        &mut self,
        length: i64,
        fill: Value,
        key_weak: bool,
        value_weak: bool,
    ) -> GcResult<Value> {
        let result = weak_vector::make_weak_vector(
            &mut self.heap,
            self.collector.registry_mut(),
            length,
            fill,
            key_weak,
            value_weak,
        );
        self.check(result)
    }

    /// Alist-vector with `length` empty buckets
    pub fn make_weak_alist_vector(
        &mut self,
        length: i64,
        key_weak: bool,
        value_weak: bool,
    ) -> GcResult<Value> {
        let result = weak_vector::make_weak_alist_vector(
            &mut self.heap,
            self.collector.registry_mut(),
            length,
            key_weak,
            value_weak,
        );
        self.check(result)
    }

    /// Alist-vector with weak keys
    pub fn make_weak_key_alist_vector(&mut self, length: i64) -> GcResult<Value> {
        self.make_weak_alist_vector(length, true, false)
    }

    /// Alist-vector with weak values
    pub fn make_weak_value_alist_vector(&mut self, length: i64) -> GcResult<Value> {
        self.make_weak_alist_vector(length, false, true)
    }

    /// Alist-vector with weak keys and values
    pub fn make_doubly_weak_alist_vector(&mut self, length: i64) -> GcResult<Value> {
        self.make_weak_alist_vector(length, true, true)
    }

    /// Value-weak vector holding the elements of a proper list
    pub fn weak_vector(&mut self, list: Value) -> GcResult<Value> {
        let result =
            weak_vector::weak_vector_from_list(&mut self.heap, self.collector.registry_mut(), list);
        self.check(result)
    }

    /// True for plain weak vectors
    pub fn is_weak_vector(&self, value: Value) -> bool {
        weak_vector::is_weak_vector(&self.heap, value)
    }

    /// True for weak-key alist-vectors
    pub fn is_weak_key_alist_vector(&self, value: Value) -> bool {
        weak_vector::is_weak_key_alist_vector(&self.heap, value)
    }

    /// True for weak-value alist-vectors
    pub fn is_weak_value_alist_vector(&self, value: Value) -> bool {
        weak_vector::is_weak_value_alist_vector(&self.heap, value)
    }

    /// True for doubly-weak alist-vectors
    pub fn is_doubly_weak_alist_vector(&self, value: Value) -> bool {
        weak_vector::is_doubly_weak_alist_vector(&self.heap, value)
    }

    /// Weakness of `value`; `NotWeak` for anything else
    pub fn type_of(&self, value: Value) -> WeakKind {
        weak_vector::type_of(&self.heap, value)
    }

    /// Number of slots in a container
    pub fn vector_length(&mut self, container: Value) -> GcResult<usize> {
        let result = weak_vector::vector_length(&self.heap, container);
        self.check(result)
    }

    /// Read a container slot
    pub fn vector_ref(&mut self, container: Value, index: i64) -> GcResult<Value> {
        let result = weak_vector::vector_ref(&self.heap, container, index);
        self.check(result)
    }

    /// Write a container slot
    pub fn vector_set(&mut self, container: Value, index: i64, value: Value) -> GcResult<()> {
        let result = weak_vector::vector_set(&mut self.heap, container, index, value);
        self.check(result)
    }

    /// Drops recorded since the delta was last taken
    pub fn drop_delta(&mut self, container: Value) -> GcResult<usize> {
        let result = weak_vector::drop_delta(&self.heap, container);
        self.check(result)
    }

    /// Read the drop delta and reset it to zero
    pub fn take_drop_delta(&mut self, container: Value) -> GcResult<usize> {
        let result = weak_vector::take_drop_delta(&mut self.heap, container);
        self.check(result)
    }

    // ---------------------------------------------------------------
    // Collection
    // ---------------------------------------------------------------

    /// Collect with the root table as the only roots
    pub fn gc(&mut self) -> CycleReport {
        self.gc_with_roots(&[])
    }

    /// Collect with `extra` treated as roots for this cycle only
    pub fn gc_with_roots(&mut self, extra: &[Value]) -> CycleReport {
        let roots: Vec<Value> = self
            .roots
            .iter()
            .flatten()
            .chain(extra)
            .copied()
            .collect();
        self.collector.collect(&mut self.heap, &roots)
    }

    /// Collect if enough has been allocated since the last cycle
    pub fn maybe_gc(&mut self) -> Option<CycleReport> {
        self.heap.should_gc().then(|| self.gc())
    }

    /// Collector statistics
    pub fn stats(&self) -> &GcStats {
        self.collector.stats()
    }

    /// Critical section held while a cycle runs
    pub fn world(&self) -> Arc<CriticalSection> {
        Arc::clone(self.collector.world())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("heap", &self.heap)
            .field("collector", &self.collector)
            .field("roots", &self.root_count())
            .finish()
    }
}
