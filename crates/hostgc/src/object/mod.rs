//! Object Module - Managed object layout and references
//!
//! - `header`: per-object metadata preceding every payload
//! - `gc_info`: type descriptor table and the `Trace`/`GarbageCollected` traits
//! - `member`: `GcPtr`, `Member`, `WeakMember` and the sentinel
//! - `ephemeron`: weak-key pairs
//! - `persistent`: strong and weak roots

pub mod ephemeron;
pub mod gc_info;
pub mod header;
pub mod member;
pub mod persistent;

pub use ephemeron::{EphemeronPair, RawEphemeronPair};
pub use gc_info::{GarbageCollected, GcInfo, GcInfoIndex, GcInfoTable, Trace};
pub use header::{Color, ObjectHeader, ALLOCATION_GRANULARITY, OBJECT_HEADER_SIZE};
pub use member::{GcPtr, Member, RawMember, SentinelPointer, WeakMember};
pub use persistent::{Persistent, PersistentRegion, WeakPersistent};
