//! Mark/sweep collector
//!
//! One [`Collector::collect`] call runs a full stop-the-world cycle:
//!
//! 1. Mark roots and drain the gray worklist. Weak containers reached on the
//!    way are handed to the registry (Phase A) instead of being traced.
//! 2. Repeat Phase B and drain again until Phase B marks nothing new.
//! 3. Delete dead weak slots (Phase C).
//! 4. Free every cell that is still white and reset the survivors.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::critical::{CriticalSection, GcPhase};
use crate::heap::Heap;
use crate::object::{HeapObject, MarkColor};
use crate::registry::{SweepReport, WeakRegistry};
use crate::value::{GcRef, Value};

/// GC statistics
#[derive(Debug, Default, Clone)]
pub struct GcStats {
    /// Number of collections
    pub collections: u64,
    /// Total time spent in GC (nanoseconds)
    pub total_pause_ns: u64,
    /// Duration of the last collection (nanoseconds)
    pub last_pause_ns: u64,
    /// Objects traced in last collection
    pub last_marked: usize,
    /// Cells reclaimed in last collection
    pub last_reclaimed: usize,
    /// Phase B passes in last collection
    pub last_fixpoint_iterations: usize,
    /// Weak slots and alist entries dropped in last collection
    pub last_dropped: usize,
    /// Registry entries pruned in last collection
    pub last_pruned: usize,
}

/// Outcome of one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Objects traced
    pub marked: usize,
    /// Cells reclaimed by the heap sweep
    pub reclaimed: usize,
    /// Phase B passes, including the final one that marked nothing
    pub fixpoint_iterations: usize,
    /// Phase C outcome
    pub weak: SweepReport,
    /// Wall time of the cycle
    pub pause: Duration,
}

/// Garbage collector
pub struct Collector {
    registry: WeakRegistry,
    /// Gray worklist
    worklist: VecDeque<GcRef>,
    /// Statistics
    stats: GcStats,
    world: Arc<CriticalSection>,
}

impl Collector {
    /// Create new collector
    pub fn new() -> Self {
        Self::with_world(Arc::new(CriticalSection::new()))
    }

    /// Create a collector that locks a shared critical section
    pub fn with_world(world: Arc<CriticalSection>) -> Self {
        Self {
            registry: WeakRegistry::new(),
            worklist: VecDeque::new(),
            stats: GcStats::default(),
            world,
        }
    }

    /// Weak registry
    pub fn registry(&self) -> &WeakRegistry {
        &self.registry
    }

    /// Weak registry, for constructors that register new objects
    pub fn registry_mut(&mut self) -> &mut WeakRegistry {
        &mut self.registry
    }

    /// Get statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Critical section held during cycles
    pub fn world(&self) -> &Arc<CriticalSection> {
        &self.world
    }

    /// Run a full GC cycle
    ///
    /// # Panics
    /// Panics on a stale root, or if the weak fixed point stops making
    /// progress.
    pub fn collect(&mut self, heap: &mut Heap, roots: &[Value]) -> CycleReport {
        let start = Instant::now();
        let world = Arc::clone(&self.world);
        let guard = world.enter();

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "wisp::gc",
            roots = roots.len(),
            objects = heap.live_count(),
            weak_containers = self.registry.container_count(),
            weak_pairs = self.registry.pair_count(),
            "GC cycle starting"
        );

        let registry = &mut self.registry;
        let worklist = &mut self.worklist;

        // Phase 1: mark from roots
        let marking: &Heap = heap;
        for &root in roots {
            shade(marking, worklist, root);
        }
        let mut marked = drain(marking, registry, worklist);

        // Phase 2: weak fixed point
        guard.set_phase(GcPhase::WeakFixpoint);
        let bound = marking.live_count() + 1;
        let mut iterations = 0;
        loop {
            let before = marking.traced_count();
            let changed = registry
                .propagate_non_weak_fields(marking, &mut |v| shade(marking, worklist, v));
            iterations += 1;

            #[cfg(feature = "gc_logging")]
            tracing::debug!(
                target: "wisp::gc",
                iteration = iterations,
                changed,
                "Weak fixpoint iteration"
            );

            if !changed {
                break;
            }
            marked += drain(marking, registry, worklist);

            assert!(
                marking.traced_count() > before,
                "weak fixpoint pass reported progress without marking anything"
            );
            assert!(
                iterations <= bound,
                "weak fixpoint did not converge within {bound} passes"
            );
        }

        // Phase 3: dead weak slots
        guard.set_phase(GcPhase::WeakSweep);
        let weak = registry.sweep_weak_slots(heap);

        // Phase 4: unmarked cells
        guard.set_phase(GcPhase::Sweeping);
        let reclaimed = heap.sweep();
        drop(guard);

        let pause = start.elapsed();
        let pause_ns = pause.as_nanos() as u64;
        self.stats.collections += 1;
        self.stats.total_pause_ns += pause_ns;
        self.stats.last_pause_ns = pause_ns;
        self.stats.last_marked = marked;
        self.stats.last_reclaimed = reclaimed;
        self.stats.last_fixpoint_iterations = iterations;
        self.stats.last_dropped = weak.dropped + weak.pair_slots_deleted;
        self.stats.last_pruned = weak.containers_pruned + weak.pairs_pruned;

        #[cfg(feature = "gc_logging")]
        tracing::info!(
            target: "wisp::gc",
            collection = self.stats.collections,
            marked,
            reclaimed,
            fixpoint_iterations = iterations,
            dropped = self.stats.last_dropped,
            pruned = self.stats.last_pruned,
            pause_us = pause.as_micros() as u64,
            live_objects = heap.live_count(),
            "GC cycle complete"
        );

        CycleReport {
            marked,
            reclaimed,
            fixpoint_iterations: iterations,
            weak,
            pause,
        }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("registry", &self.registry)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Gray a white or shallow-retained object and queue it for scanning
fn shade(heap: &Heap, worklist: &mut VecDeque<GcRef>, value: Value) {
    let Value::Object(r) = value else { return };
    let header = heap.header(r);
    if matches!(header.mark(), MarkColor::White | MarkColor::Shallow) {
        header.set_mark(MarkColor::Gray);
        worklist.push_back(r);
    }
}

/// Scan gray objects until the worklist is empty. Returns how many were scanned.
fn drain(heap: &Heap, registry: &mut WeakRegistry, worklist: &mut VecDeque<GcRef>) -> usize {
    let mut scanned = 0;
    while let Some(r) = worklist.pop_front() {
        if heap.header(r).mark() == MarkColor::Black {
            continue;
        }
        if let HeapObject::WeakVector(_) = heap.get(r) {
            registry.mark_container(heap, r, &mut |v| shade(heap, worklist, v));
        } else {
            heap.trace_object(r, &mut |v| shade(heap, worklist, v));
            heap.header(r).set_mark(MarkColor::Black);
        }
        scanned += 1;
    }
    scanned
}
