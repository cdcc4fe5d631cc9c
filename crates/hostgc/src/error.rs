//! Error Module - hostgc Error Types
//!
//! The marking, weak-processing and compaction core has no recoverable error
//! channel: a collector that cannot keep its invariants cannot continue. Errors
//! in this module therefore only cover the fallible edges of the heap:
//!
//! ## Construction Errors
//! - `Configuration` - Invalid `HeapOptions`
//! - `PageAllocation` - The OS refused to map page memory
//!
//! ## Allocation Errors
//! - `OutOfMemory` - The configured heap limit was exceeded
//! - `InvalidArgument` - Allocation request that can never succeed
//! - `TypeTableExhausted` - Too many traceable types registered
//!
//! Invariant violations use two macros instead:
//! - [`gc_check!`] - fatal check, always enabled (embedder misuse)
//! - [`gc_dcheck!`] - debug-only assertion (internal invariants)

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for fallible hostgc operations
///
/// # Examples
///
/// ```rust
/// use hostgc::GcError;
///
/// fn describe(err: &GcError) -> &'static str {
///     match err {
///         GcError::OutOfMemory { .. } => "heap limit reached",
///         GcError::PageAllocation(_) => "os mapping failed",
///         _ => "other",
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum GcError {
    /// Out of memory - heap limit exceeded
    ///
    /// **When returned:** An allocation would push committed page memory past
    /// `HeapOptions::max_heap_size`
    ///
    /// **Recovery strategy:** Run `collect_garbage` and retry, or fail the request
    #[error("Out of memory: requested {requested} bytes, heap limit {limit} bytes")]
    OutOfMemory { requested: usize, limit: usize },

    /// Page memory could not be mapped
    ///
    /// **When returned:** The anonymous mapping backing a page failed
    ///
    /// **Recovery strategy:** Usually fatal; the process is out of address space
    #[error("Page allocation failed: {0}")]
    PageAllocation(#[from] std::io::Error),

    /// Invalid heap configuration
    ///
    /// **When returned:** `GarbageCollector::new` with options failing validation
    ///
    /// **Recovery strategy:** Fix the options and construct the heap again
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Invalid argument
    ///
    /// **When returned:** An allocation size overflows the address space
    ///
    /// **Recovery strategy:** Caller bug; do not retry with the same arguments
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Type descriptor table is full
    ///
    /// **When returned:** More than `u16::MAX` distinct traceable types registered
    ///
    /// **Recovery strategy:** Cannot recover
    #[error("Type descriptor table exhausted")]
    TypeTableExhausted,
}

impl GcError {
    /// Check if the operation may succeed when retried after a collection
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GcError::OutOfMemory { .. })
    }
}

/// Result type alias for hostgc operations
pub type Result<T> = std::result::Result<T, GcError>;

/// Fatal check for embedder misuse
///
/// Enabled in every build profile. A failed check aborts the current thread
/// with the stringified condition and a context message.
#[macro_export]
macro_rules! gc_check {
    ($cond:expr, $context:expr) => {
        if !$cond {
            panic!("Fatal check failed at {}: {}", stringify!($cond), $context);
        }
    };
    ($cond:expr, $context:expr, $($arg:tt)*) => {
        if !$cond {
            panic!("Fatal check failed at {}: {}", stringify!($cond), format!($context, $($arg)*));
        }
    };
}

/// Debug-only invariant assertion, a no-op in release builds
#[macro_export]
macro_rules! gc_dcheck {
    ($cond:expr) => {
        debug_assert!($cond)
    };
    ($cond:expr, $($arg:tt)*) => {
        debug_assert!($cond, $($arg)*)
    };
}
