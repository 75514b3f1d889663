//! Weak registry and collector hooks
//!
//! The registry records every weak container and weak pair of a runtime and
//! exposes the three hooks the collector calls once per cycle:
//!
//! 1. **Phase A** ([`WeakRegistry::mark_container`]): called by the ordinary
//!    traversal each time it reaches a container through a strong path. Marks
//!    the container (and, for alist-vectors, keeps the bucket structure alive)
//!    without marking anything held weakly.
//! 2. **Phase B** ([`WeakRegistry::propagate_non_weak_fields`]): marks the
//!    non-weak side of every alist entry whose weak side is already reachable.
//!    Newly marked values may make further keys reachable, so the collector
//!    repeats {drain traversal, Phase B} until Phase B reports no change.
//! 3. **Phase C** ([`WeakRegistry::sweep_weak_slots`]): after the fixed point,
//!    deletes weak slots and unlinks alist entries whose weak side is
//!    unreachable, counting each drop in the container's drop delta, and
//!    forgets containers and pairs that are themselves unreachable.
//!
//! The registry never marks its members, so being registered does not keep
//! anything alive.
//!
//! ## Liveness
//!
//! A weak side counts as alive if its cell survives the cycle: any mark,
//! including the shallow mark Phase A puts on bucket cells. Phase C first
//! settles which alist nodes die, then treats their spine and entry cells
//! as dead for every other weak reference and releases them to the heap
//! sweep.

use rustc_hash::FxHashSet;

use crate::heap::Heap;
use crate::object::{HeapObject, MarkColor};
use crate::value::{GcRef, Value};
use crate::weak_vector::{WeakKind, WeakLayout};

/// Where the registry is within the current cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookState {
    /// Between cycles
    Idle,
    /// Marking may still add reachable objects
    Marking,
    /// Last Phase B pass marked nothing
    Converged,
}

/// Outcome of a Phase C sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Slots deleted and alist entries unlinked in live containers
    pub dropped: usize,
    /// Weak pair slots deleted
    pub pair_slots_deleted: usize,
    /// Unreachable containers removed from the registry
    pub containers_pruned: usize,
    /// Unreachable weak pairs removed from the registry
    pub pairs_pruned: usize,
}

/// Registry of every weak container and weak pair of one runtime
pub struct WeakRegistry {
    /// Registered containers, in registration order
    containers: Vec<GcRef>,
    /// Registered weak pairs
    pairs: Vec<GcRef>,
    /// Membership, for duplicate detection
    members: FxHashSet<GcRef>,
    state: HookState,
}

impl WeakRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            containers: Vec::new(),
            pairs: Vec::new(),
            members: FxHashSet::default(),
            state: HookState::Idle,
        }
    }

    fn insert_member(&mut self, r: GcRef) {
        if !self.members.insert(r) {
            #[cfg(feature = "gc_logging")]
            tracing::error!(target: "wisp::gc", object = ?r, "weak object registered twice");
            panic!("weak object {r:?} registered twice");
        }
    }

    /// Register a freshly allocated container and zero its drop delta.
    ///
    /// # Panics
    /// Panics if `container` is already registered or is not a weak container.
    pub fn register(&mut self, heap: &mut Heap, container: GcRef) {
        match heap.get_mut(container) {
            HeapObject::WeakVector(vector) => vector.reset_drop_delta(),
            other => panic!("cannot register {:?} as a weak container", other.tag()),
        }
        self.insert_member(container);
        self.containers.push(container);
    }

    /// Register a freshly allocated weak pair.
    ///
    /// # Panics
    /// Panics if `pair` is already registered.
    pub fn register_pair(&mut self, pair: GcRef) {
        self.insert_member(pair);
        self.pairs.push(pair);
    }

    /// Whether `r` is registered
    pub fn contains(&self, r: GcRef) -> bool {
        self.members.contains(&r)
    }

    /// Number of registered containers
    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    /// Number of registered weak pairs
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Registered containers, in registration order
    pub fn containers(&self) -> &[GcRef] {
        &self.containers
    }

    // ---------------------------------------------------------------
    // Phase A
    // ---------------------------------------------------------------

    /// Mark a container reached through a strong path.
    ///
    /// `mark` is the traversal's marking callback. It is only used for
    /// contents that are held strongly: everything in a `NotWeak` container,
    /// and malformed alist entries that are not pairs.
    pub fn mark_container(&mut self, heap: &Heap, container: GcRef, mark: &mut dyn FnMut(Value)) {
        heap.header(container).set_mark(MarkColor::Black);
        self.state = HookState::Marking;

        let HeapObject::WeakVector(vector) = heap.get(container) else {
            return;
        };

        if !vector.kind().is_weak() {
            crate::object::GcTraceable::trace(vector, mark);
            return;
        }

        if vector.layout() == WeakLayout::Alist {
            for head in vector.live_values() {
                retain_bucket(heap, head, mark);
            }
        }
    }

    // ---------------------------------------------------------------
    // Phase B
    // ---------------------------------------------------------------

    /// One pass over all reachable weak-key and weak-value alist-vectors.
    ///
    /// For each entry whose weak side is reachable, hands the other side to
    /// `mark` if it is not reachable yet. Returns true if anything was
    /// handed to `mark`; the collector must then drain its traversal and
    /// call this again until it returns false.
    pub fn propagate_non_weak_fields(&mut self, heap: &Heap, mark: &mut dyn FnMut(Value)) -> bool {
        let mut changed = false;

        for &container in &self.containers {
            if !heap.header(container).is_marked() {
                continue;
            }
            let HeapObject::WeakVector(vector) = heap.get(container) else {
                continue;
            };
            let kind = vector.kind();
            if vector.layout() != WeakLayout::Alist
                || !matches!(kind, WeakKind::WeakKey | WeakKind::WeakValue)
            {
                continue;
            }

            for head in vector.live_values() {
                for (key, value) in bucket_entries(heap, head) {
                    let (weak, strong) = match kind {
                        WeakKind::WeakKey => (key, value),
                        _ => (value, key),
                    };
                    if heap.is_marked(weak) && !heap.is_traced(strong) {
                        mark(strong);
                        changed = true;
                    }
                }
            }
        }

        self.state = if changed {
            HookState::Marking
        } else {
            HookState::Converged
        };
        changed
    }

    // ---------------------------------------------------------------
    // Phase C
    // ---------------------------------------------------------------

    /// Delete dead weak references and forget unreachable members.
    ///
    /// # Panics
    /// Panics unless the last Phase B pass reported no change.
    pub fn sweep_weak_slots(&mut self, heap: &mut Heap) -> SweepReport {
        assert_eq!(
            self.state,
            HookState::Converged,
            "weak slots swept before the non-weak fixed point was reached"
        );
        self.state = HookState::Idle;

        let mut report = SweepReport::default();

        let (live_pairs, dead_pairs) = partition_live(heap, std::mem::take(&mut self.pairs));
        let (live, dead) = partition_live(heap, std::mem::take(&mut self.containers));
        report.pairs_pruned = dead_pairs.len();
        report.containers_pruned = dead.len();
        for r in dead_pairs.iter().chain(&dead) {
            self.members.remove(r);
        }

        // Alist nodes are settled first; their cells are dead for every later check.
        let unlinked = unlinked_cells(heap, &live);
        for &container in &live {
            report.dropped += sweep_container(heap, container, &unlinked);
        }
        for &pair in &live_pairs {
            report.pair_slots_deleted += sweep_pair(heap, pair, &unlinked);
        }
        release_cells(heap, &unlinked);

        self.pairs = live_pairs;
        self.containers = live;

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "wisp::gc",
            dropped = report.dropped,
            pair_slots_deleted = report.pair_slots_deleted,
            containers_pruned = report.containers_pruned,
            pairs_pruned = report.pairs_pruned,
            "Swept weak slots"
        );

        report
    }
}

impl Default for WeakRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WeakRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakRegistry")
            .field("containers", &self.containers.len())
            .field("pairs", &self.pairs.len())
            .field("state", &self.state)
            .finish()
    }
}

/// Keep a bucket's spine and entry cells alive without tracing keys/values.
fn retain_bucket(heap: &Heap, head: Value, mark: &mut dyn FnMut(Value)) {
    let mut cursor = head;
    while let Some((entry, next)) = heap.pair(cursor) {
        retain_shallow(heap, cursor);
        if heap.pair(entry).is_some() {
            retain_shallow(heap, entry);
        } else {
            mark(entry);
        }
        cursor = next;
    }
    // improper tail
    if !cursor.is_nil() {
        mark(cursor);
    }
}

fn retain_shallow(heap: &Heap, cell: Value) {
    if let Value::Object(r) = cell {
        let header = heap.header(r);
        if header.mark() == MarkColor::White {
            header.set_mark(MarkColor::Shallow);
        }
    }
}

/// `(key, value)` of every well-formed entry in a bucket
fn bucket_entries(heap: &Heap, head: Value) -> Vec<(Value, Value)> {
    let mut entries = Vec::new();
    let mut cursor = head;
    while let Some((entry, next)) = heap.pair(cursor) {
        if let Some(kv) = heap.pair(entry) {
            entries.push(kv);
        }
        cursor = next;
    }
    entries
}

fn partition_live(heap: &Heap, members: Vec<GcRef>) -> (Vec<GcRef>, Vec<GcRef>) {
    members
        .into_iter()
        .partition(|&r| heap.header(r).is_marked())
}

/// Whether `value` outlives the current cycle
fn survives(heap: &Heap, unlinked: &FxHashSet<Value>, value: Value) -> bool {
    heap.is_marked(value) && !unlinked.contains(&value)
}

fn entry_is_dead(kind: WeakKind, key_alive: bool, value_alive: bool) -> bool {
    match kind {
        WeakKind::WeakKey => !key_alive,
        WeakKind::WeakValue => !value_alive,
        WeakKind::DoublyWeak => !key_alive || !value_alive,
        WeakKind::NotWeak => false,
    }
}

/// Spine and entry cells of every alist node whose weak side dies.
///
/// A node also dies when its key or value is a cell of another dying node,
/// so passes repeat until no new cell is found.
fn unlinked_cells(heap: &Heap, containers: &[GcRef]) -> FxHashSet<Value> {
    let alists: Vec<(WeakKind, Vec<Value>)> = containers
        .iter()
        .filter_map(|&c| match heap.get(c) {
            HeapObject::WeakVector(v) if v.layout() == WeakLayout::Alist && v.kind().is_weak() => {
                Some((v.kind(), v.live_values()))
            }
            _ => None,
        })
        .collect();

    let mut unlinked = FxHashSet::default();
    loop {
        let before = unlinked.len();
        for (kind, heads) in &alists {
            for &head in heads {
                let mut cursor = head;
                while let Some((entry, next)) = heap.pair(cursor) {
                    let dead = !unlinked.contains(&cursor)
                        && (unlinked.contains(&entry)
                            || heap.pair(entry).is_some_and(|(key, value)| {
                                entry_is_dead(
                                    *kind,
                                    survives(heap, &unlinked, key),
                                    survives(heap, &unlinked, value),
                                )
                            }));
                    if dead {
                        unlinked.insert(cursor);
                        unlinked.insert(entry);
                    }
                    cursor = next;
                }
            }
        }
        if unlinked.len() == before {
            return unlinked;
        }
    }
}

/// Hand unlinked bucket cells back to the heap sweep
fn release_cells(heap: &Heap, unlinked: &FxHashSet<Value>) {
    for cell in unlinked {
        if let Value::Object(r) = *cell {
            let header = heap.header(r);
            if header.mark() == MarkColor::Shallow {
                header.set_mark(MarkColor::White);
            }
        }
    }
}

/// Values among `candidates` that do not outlive the cycle
fn dead_values(
    heap: &Heap,
    unlinked: &FxHashSet<Value>,
    candidates: impl IntoIterator<Item = Value>,
) -> FxHashSet<Value> {
    candidates
        .into_iter()
        .filter(|&v| !survives(heap, unlinked, v))
        .collect()
}

fn sweep_pair(heap: &mut Heap, pair: GcRef, unlinked: &FxHashSet<Value>) -> usize {
    let HeapObject::WeakPair(weak_pair) = heap.get(pair) else {
        return 0;
    };
    let dead = dead_values(heap, unlinked, [weak_pair.car(), weak_pair.cdr()]);
    if dead.is_empty() {
        return 0;
    }
    match heap.get_mut(pair) {
        HeapObject::WeakPair(weak_pair) => weak_pair.sweep(|v| !dead.contains(&v)),
        _ => 0,
    }
}

fn sweep_container(heap: &mut Heap, container: GcRef, unlinked: &FxHashSet<Value>) -> usize {
    let HeapObject::WeakVector(vector) = heap.get(container) else {
        return 0;
    };
    if !vector.kind().is_weak() {
        return 0;
    }

    let dropped = match vector.layout() {
        WeakLayout::Plain => {
            let dead = dead_values(heap, unlinked, vector.live_values());
            if dead.is_empty() {
                return 0;
            }
            match heap.get_mut(container) {
                HeapObject::WeakVector(vector) => vector.sweep_slots(|v| !dead.contains(&v)),
                _ => 0,
            }
        }
        WeakLayout::Alist => {
            let heads = vector.live_values();
            let mut new_heads = Vec::with_capacity(heads.len());
            let mut dropped = 0;
            for head in heads {
                let (new_head, n) = sweep_bucket(heap, head, unlinked);
                new_heads.push(new_head);
                dropped += n;
            }
            if let HeapObject::WeakVector(vector) = heap.get_mut(container) {
                vector.set_buckets(new_heads);
            }
            dropped
        }
    };

    if dropped > 0
        && let HeapObject::WeakVector(vector) = heap.get_mut(container)
    {
        vector.record_drops(dropped);
    }
    dropped
}

/// Unlink every spine cell in `unlinked` from a bucket.
///
/// Returns the new bucket head and the number of entries unlinked.
fn sweep_bucket(heap: &mut Heap, head: Value, unlinked: &FxHashSet<Value>) -> (Value, usize) {
    let mut new_head = head;
    let mut prev: Option<Value> = None;
    let mut cursor = head;
    let mut dropped = 0;

    while let Some((_, next)) = heap.pair(cursor) {
        if unlinked.contains(&cursor) {
            dropped += 1;
            match prev {
                None => new_head = next,
                Some(p) => {
                    heap.set_cdr(p, next);
                }
            }
        } else {
            prev = Some(cursor);
        }
        cursor = next;
    }

    (new_head, dropped)
}
