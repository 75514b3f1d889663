//! World lock for collection cycles
//!
//! A cycle holds the [`CriticalSection`] from root marking to the end of the
//! heap sweep. Threads that share the heap indirectly (finalizer threads,
//! signal handlers, embedders) call [`CriticalSection::safepoint`] to block
//! until the running cycle is over, and can observe the current phase
//! without taking the lock.

use crossbeam_utils::atomic::AtomicCell;
use parking_lot::{Mutex, MutexGuard};

/// Phase of the running collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    /// No collection in progress
    Idle,
    /// Tracing from roots (Phase A runs here)
    Marking,
    /// Repeating Phase B until nothing new is marked
    WeakFixpoint,
    /// Deleting dead weak slots (Phase C)
    WeakSweep,
    /// Reclaiming unmarked cells
    Sweeping,
}

/// Scoped world lock held for the full duration of a cycle
pub struct CriticalSection {
    lock: Mutex<()>,
    phase: AtomicCell<GcPhase>,
}

impl CriticalSection {
    /// Create an unlocked section
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            phase: AtomicCell::new(GcPhase::Idle),
        }
    }

    /// Acquire the world lock, blocking while another cycle runs.
    ///
    /// The lock is released and the phase reset to `Idle` when the guard
    /// drops, including during unwinding.
    pub fn enter(&self) -> CriticalGuard<'_> {
        let guard = self.lock.lock();
        self.phase.store(GcPhase::Marking);
        CriticalGuard {
            section: self,
            _guard: guard,
        }
    }

    /// Acquire the lock only if no cycle is running
    pub fn try_enter(&self) -> Option<CriticalGuard<'_>> {
        let guard = self.lock.try_lock()?;
        self.phase.store(GcPhase::Marking);
        Some(CriticalGuard {
            section: self,
            _guard: guard,
        })
    }

    /// Current phase
    pub fn phase(&self) -> GcPhase {
        self.phase.load()
    }

    /// Whether a cycle is running
    pub fn is_collecting(&self) -> bool {
        self.phase() != GcPhase::Idle
    }

    /// Block until no cycle is running
    pub fn safepoint(&self) {
        if self.is_collecting() || self.lock.is_locked() {
            drop(self.lock.lock());
        }
    }
}

impl Default for CriticalSection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CriticalSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CriticalSection")
            .field("phase", &self.phase())
            .field("locked", &self.lock.is_locked())
            .finish()
    }
}

/// Held while a cycle runs
pub struct CriticalGuard<'a> {
    section: &'a CriticalSection,
    _guard: MutexGuard<'a, ()>,
}

impl CriticalGuard<'_> {
    /// Advance the published phase
    pub fn set_phase(&self, phase: GcPhase) {
        self.section.phase.store(phase);
    }
}

impl Drop for CriticalGuard<'_> {
    fn drop(&mut self) {
        self.section.phase.store(GcPhase::Idle);
    }
}
