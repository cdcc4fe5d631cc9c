//! # hostgc - Embeddable Tracing Garbage Collector
//!
//! hostgc manages objects owned by a host application on a traced heap. The
//! host describes its types through [`Trace`], allocates them through a
//! [`GarbageCollector`], and holds them through [`Persistent`] roots and
//! [`Member`] slots.
//!
//! ## Overview
//!
//! - **Tri-color marking**: atomic, incremental, or incremental plus
//!   concurrent marker threads, kept sound by write barriers
//! - **Ephemerons**: values retained only while their key is reachable
//! - **Weak references**: [`WeakMember`], [`WeakPersistent`] and custom weak
//!   callbacks through the [`LivenessBroker`]
//! - **Compaction**: evacuation of sparse pages in the compactable space
//! - **Sweeping**: atomic, lazy, or concurrent, with finalizers on the owning thread
//! - **Explicit management**: immediate free and in-place resize
//!
//! ## Quick Start
//!
//! ```rust
//! use hostgc::{GarbageCollected, GarbageCollector, GcConfig, HeapOptions, Member, Persistent, Trace, Visitor};
//!
//! struct Node {
//!     value: u32,
//!     next: Member<Node>,
//! }
//!
//! impl Trace for Node {
//!     fn trace(&self, visitor: &mut dyn Visitor) {
//!         self.next.trace(visitor);
//!     }
//! }
//! impl GarbageCollected for Node {}
//!
//! fn main() -> Result<(), hostgc::GcError> {
//!     let gc = GarbageCollector::new(HeapOptions::default())?;
//!     let head = gc.make_garbage_collected(Node { value: 1, next: Member::null() })?;
//!     let root = Persistent::new(&gc, Some(head));
//!     head.next.set(Some(gc.make_garbage_collected(Node { value: 2, next: Member::null() })?));
//!
//!     // Unrooted garbage.
//!     gc.make_garbage_collected(Node { value: 3, next: Member::null() })?;
//!
//!     gc.collect_garbage(GcConfig::precise_atomic());
//!     assert_eq!(root.get().unwrap().next.get().unwrap().value, 2);
//!     assert_eq!(gc.last_cycle_stats().unwrap().finalized_objects, 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────── mutator (owning thread) ────────────────────┐
//! │ make_garbage_collected   Member::set ──> write barrier          │
//! │ safepoint / tasks ──> incremental steps                         │
//! └──────────────────────────────┬──────────────────────────────────┘
//!                                │
//! ┌──────────────────────────────▼──────────────────────────────────┐
//! │ marking: worklists <── concurrent markers ("gc-worker-N")        │
//! │ atomic pause: roots, stack scan, fixpoint, ephemerons, weakness  │
//! │ compaction: evacuate sparse compactable pages, heal slots        │
//! │ sweeping: workers sweep pages ("hostgc-sweeper-N"), owning       │
//! │           thread finalizes and rebuilds free lists               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Safety
//!
//! 1. **Trace every reference**: a `Member` missing from `trace` is not a root
//! 2. **Stack references**: with `StackState::NoHeapPointers` a `GcPtr` held only
//!    on the stack does not keep its object alive
//! 3. **Finalizers**: `Drop` must not touch other managed objects
//! 4. **Compaction**: objects of `COMPACTABLE` types may move; reach them
//!    through `Member` slots and roots, never through cached raw addresses
//!
//! ## Modules
//!
//! - [`barrier`]: write barrier kinds and the global marking flag
//! - [`config`]: heap options and per-collection configuration
//! - [`error`]: error types and check macros
//! - [`explicit`]: immediate free and resize
//! - [`gc`]: the collector facade
//! - [`heap`]: pages, spaces, heap state and the sweeper
//! - [`logging`]: structured GC events
//! - [`marker`]: marking engine, ephemerons, liveness broker, stack scanning
//! - [`object`]: headers, type table, members, roots and ephemeron pairs
//! - [`relocate`]: compaction and move listeners
//! - [`stats`]: process heap statistics and cycle summaries
//! - [`util`]: concurrency primitives

#[macro_use]
pub mod error;

pub mod barrier;
pub mod config;
pub mod explicit;
pub mod gc;
pub mod heap;
pub mod logging;
pub mod marker;
pub mod object;
pub mod relocate;
pub mod stats;
pub mod util;

pub use barrier::{WriteBarrier, WriteBarrierKind};
pub use config::{ConfigError, GcConfig, HeapOptions, MarkingType, StackState, SweepingType, GB, KB, MB};
pub use error::{GcError, Result};
pub use explicit::{free_unreferenced_object, resize};
pub use gc::{GarbageCollector, IncrementalMarkingTask};
pub use heap::{HeapHandle, HeapPhase, HeapState};
pub use logging::{GcEvent, GcLogger, GcLoggerConfig, LogLevel};
pub use marker::{LivenessBroker, RangeStackScanner, StackScanner, Visitor, WeakCallback};
pub use object::{
    EphemeronPair, GarbageCollected, GcPtr, Member, ObjectHeader, Persistent, RawMember, SentinelPointer, Trace,
    WeakMember, WeakPersistent,
};
pub use relocate::MoveListener;
pub use stats::{CycleStats, ProcessHeapStatistics};
pub use util::{AtomicEntryFlag, IndexGenerator, ParallelWorkItem, SingleThreadedHandle};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
