//! # Wisp weak references
//!
//! Weak pairs, weak vectors and weak alist-vectors for a stop-the-world
//! mark/sweep collector.
//!
//! ## Design
//!
//! - **Weak pairs**: cons cells whose car, cdr or both do not keep their
//!   referent alive. Dead slots are deleted and read back as `#f`.
//! - **Weak vectors**: fixed-length containers whose slots are weak, plus an
//!   alist-bucket layout used as the storage of weak hash tables.
//! - **Registry hooks**: the collector marks containers without their weak
//!   contents, iterates the non-weak sides of alist entries to a fixed point,
//!   then deletes whatever the weak sides no longer keep alive.
//! - **Drop delta**: each container counts the entries the collector dropped
//!   so table owners can fix their cached sizes.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod collector;
pub mod critical;
pub mod error;
pub mod heap;
pub mod object;
pub mod registry;
pub mod runtime;
pub mod value;
pub mod weak_pair;
pub mod weak_ref;
pub mod weak_vector;

pub use collector::{Collector, CycleReport, GcStats};
pub use critical::{CriticalGuard, CriticalSection, GcPhase};
pub use error::{ErrorKind, GcError, GcResult};
pub use heap::{GcConfig, Heap};
pub use object::{GcHeader, GcTraceable, HeapObject, MarkColor, ObjectTag};
pub use registry::{SweepReport, WeakRegistry};
pub use runtime::{RootId, Runtime};
pub use value::{GcRef, Value};
pub use weak_pair::{PairSlot, WeakPair, WeakPairKind};
pub use weak_ref::WeakSlot;
pub use weak_vector::{WeakKind, WeakLayout, WeakVector};
