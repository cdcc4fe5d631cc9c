//! Configuration Module - Heap Options and Collection Configs
//!
//! Two layers of configuration:
//! - [`HeapOptions`] fixes what a heap supports for its whole lifetime
//!   (worker threads, limits, trigger policy, logging, statistics sink).
//! - [`GcConfig`] describes one collection (stack state, marking and sweeping
//!   type, compaction) and is passed into `collect_garbage` and
//!   `start_incremental_garbage_collection`.

use crate::logging::GcLoggerConfig;
use crate::stats::ProcessHeapStatistics;
use std::sync::Arc;
use thiserror::Error;

/// Kilobyte constant
pub const KB: usize = 1024;
/// Megabyte constant
pub const MB: usize = 1024 * KB;
/// Gigabyte constant
pub const GB: usize = 1024 * MB;

/// Whether the native stack may hold pointers into the heap at the atomic pause
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum StackState {
    /// Stack is scanned conservatively through the registered `StackScanner`.
    /// Compaction is disabled for such collections.
    MayContainHeapPointers,
    /// Embedder guarantees no heap pointers live on the stack.
    NoHeapPointers,
}

/// How marking is scheduled, ordered from least to most concurrent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub enum MarkingType {
    /// Whole marking happens inside the atomic pause.
    Atomic,
    /// Marking advances in mutator-thread steps before the atomic pause.
    Incremental,
    /// Incremental steps plus background marker threads.
    IncrementalAndConcurrent,
}

/// How sweeping is scheduled, ordered from least to most concurrent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub enum SweepingType {
    /// All pages are swept before the collection returns.
    Atomic,
    /// Pages are swept lazily in owning-thread steps.
    Incremental,
    /// Background sweeper threads plus owning-thread steps.
    IncrementalAndConcurrent,
}

/// Per-collection configuration
///
/// # Examples
///
/// ```rust
/// use hostgc::{GcConfig, MarkingType, StackState};
///
/// let config = GcConfig::precise_incremental();
/// assert_eq!(config.marking_type, MarkingType::Incremental);
/// assert_eq!(config.stack_state, StackState::NoHeapPointers);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcConfig {
    /// Stack scanning mode used at the atomic pause
    pub stack_state: StackState,
    /// Marking schedule
    pub marking_type: MarkingType,
    /// Sweeping schedule
    pub sweeping_type: SweepingType,
    /// Relocate movable objects in the compactable space
    ///
    /// Ignored when the stack may contain heap pointers.
    pub compaction: bool,
}

impl GcConfig {
    /// Atomic collection trusting the embedder that the stack holds no heap pointers
    pub const fn precise_atomic() -> Self {
        Self {
            stack_state: StackState::NoHeapPointers,
            marking_type: MarkingType::Atomic,
            sweeping_type: SweepingType::Atomic,
            compaction: false,
        }
    }

    /// Atomic collection that scans the stack conservatively
    pub const fn conservative_atomic() -> Self {
        Self {
            stack_state: StackState::MayContainHeapPointers,
            ..Self::precise_atomic()
        }
    }

    /// Incremental marking on the mutator thread
    pub const fn precise_incremental() -> Self {
        Self {
            marking_type: MarkingType::Incremental,
            ..Self::precise_atomic()
        }
    }

    /// Incremental marking plus concurrent marker threads
    pub const fn precise_incremental_concurrent() -> Self {
        Self {
            marking_type: MarkingType::IncrementalAndConcurrent,
            ..Self::precise_atomic()
        }
    }

    /// Return a copy with compaction requested
    pub const fn with_compaction(mut self) -> Self {
        self.compaction = true;
        self
    }

    /// Return a copy with another sweeping type
    pub const fn with_sweeping(mut self, sweeping_type: SweepingType) -> Self {
        self.sweeping_type = sweeping_type;
        self
    }

    /// Clamp the requested schedules to what the heap supports
    pub(crate) fn limited_to(mut self, options: &HeapOptions) -> Self {
        self.marking_type = self.marking_type.min(options.marking_support);
        self.sweeping_type = self.sweeping_type.min(options.sweeping_support);
        if options.marker_threads == 0 && self.marking_type == MarkingType::IncrementalAndConcurrent {
            self.marking_type = MarkingType::Incremental;
        }
        if options.sweeper_threads == 0 && self.sweeping_type == SweepingType::IncrementalAndConcurrent {
            self.sweeping_type = SweepingType::Incremental;
        }
        self
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self::conservative_atomic()
    }
}

/// Heap-wide options fixed at construction
///
/// # Examples
///
/// ```rust
/// use hostgc::{HeapOptions, MB};
///
/// let options = HeapOptions {
///     max_heap_size: 64 * MB,
///     marker_threads: 2,
///     ..Default::default()
/// };
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct HeapOptions {
    /// Number of concurrent marker threads
    ///
    /// Default: min(4, num_cpus / 2), at least 1
    pub marker_threads: usize,

    /// Number of concurrent sweeper threads
    ///
    /// Default: same as `marker_threads`
    pub sweeper_threads: usize,

    /// Most concurrent marking type this heap accepts
    ///
    /// Default: `IncrementalAndConcurrent`
    pub marking_support: MarkingType,

    /// Most concurrent sweeping type this heap accepts
    ///
    /// Default: `IncrementalAndConcurrent`
    pub sweeping_support: SweepingType,

    /// Reported through `HeapHandle::is_young_generation_enabled`
    ///
    /// No young-generation collector exists; the flag is informational.
    /// Default: false
    pub young_generation: bool,

    /// Hard limit for committed page memory in bytes
    ///
    /// Default: 1GB
    pub max_heap_size: usize,

    /// Start incremental marking automatically when the heap grows
    ///
    /// Default: false (collections are embedder-triggered)
    pub automatic_gc: bool,

    /// Minimum allocated object bytes before an automatic collection
    ///
    /// Default: 4MB
    pub min_gc_trigger_bytes: usize,

    /// Growth factor applied to live bytes to compute the next trigger limit
    ///
    /// Default: 1.5
    pub heap_growing_factor: f64,

    /// Allocated bytes between allocation-driven marking steps
    ///
    /// Default: 1MB
    pub marking_step_allocation_bytes: usize,

    /// Deadline of a single incremental marking step in milliseconds
    ///
    /// Default: 2ms
    pub incremental_step_ms: u64,

    /// Verify the tri-color invariant in every atomic pause
    ///
    /// Default: enabled in debug builds
    pub verify_marking: bool,

    /// Logger configuration
    pub logger: GcLoggerConfig,

    /// Shared byte counters, created per heap when `None`
    pub statistics: Option<Arc<ProcessHeapStatistics>>,
}

impl Default for HeapOptions {
    fn default() -> Self {
        let threads = (num_cpus::get() / 2).clamp(1, 4);
        Self {
            marker_threads: threads,
            sweeper_threads: threads,
            marking_support: MarkingType::IncrementalAndConcurrent,
            sweeping_support: SweepingType::IncrementalAndConcurrent,
            young_generation: false,
            max_heap_size: GB,
            automatic_gc: false,
            min_gc_trigger_bytes: 4 * MB,
            heap_growing_factor: 1.5,
            marking_step_allocation_bytes: MB,
            incremental_step_ms: 2,
            verify_marking: cfg!(debug_assertions),
            logger: GcLoggerConfig::default(),
            statistics: None,
        }
    }
}

impl HeapOptions {
    /// Validate option consistency
    ///
    /// # Returns
    /// `Ok(())` if valid, `Err(ConfigError)` with the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_heap_size < crate::heap::PAGE_SIZE {
            return Err(ConfigError::InvalidValue(format!(
                "max_heap_size must be at least one page ({} bytes)",
                crate::heap::PAGE_SIZE
            )));
        }

        if self.marker_threads > 64 || self.sweeper_threads > 64 {
            return Err(ConfigError::InvalidValue(
                "worker thread counts must be <= 64".to_string(),
            ));
        }

        if self.heap_growing_factor.is_nan() || self.heap_growing_factor < 1.0 {
            return Err(ConfigError::InvalidValue(
                "heap_growing_factor must be >= 1.0".to_string(),
            ));
        }

        if self.marking_step_allocation_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "marking_step_allocation_bytes must be > 0".to_string(),
            ));
        }

        if self.automatic_gc && self.min_gc_trigger_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "min_gc_trigger_bytes must be > 0 with automatic_gc".to_string(),
            ));
        }

        if self.logger.max_events == 0 {
            return Err(ConfigError::InvalidValue(
                "logger.max_events must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Create options from environment variables
    ///
    /// Reads:
    /// - `HOSTGC_MAX_HEAP`: maximum heap size in bytes
    /// - `HOSTGC_MARKER_THREADS`: concurrent marker threads
    /// - `HOSTGC_SWEEPER_THREADS`: concurrent sweeper threads
    /// - `HOSTGC_VERIFY_MARKING`: "1" or "true" to verify marking
    /// - `HOSTGC_VERBOSE`: "1" or "true" for console event output
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(val) = std::env::var("HOSTGC_MAX_HEAP") {
            if let Ok(size) = val.parse::<usize>() {
                options.max_heap_size = size;
            }
        }

        if let Ok(val) = std::env::var("HOSTGC_MARKER_THREADS") {
            if let Ok(threads) = val.parse::<usize>() {
                options.marker_threads = threads;
            }
        }

        if let Ok(val) = std::env::var("HOSTGC_SWEEPER_THREADS") {
            if let Ok(threads) = val.parse::<usize>() {
                options.sweeper_threads = threads;
            }
        }

        if let Ok(val) = std::env::var("HOSTGC_VERIFY_MARKING") {
            options.verify_marking = val == "1" || val.eq_ignore_ascii_case("true");
        }

        if let Ok(val) = std::env::var("HOSTGC_VERBOSE") {
            options.logger.console = val == "1" || val.eq_ignore_ascii_case("true");
        }

        options
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An option is outside its accepted range
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_valid() {
        let options = HeapOptions::default();
        assert!(options.validate().is_ok());
        assert!(options.marker_threads >= 1 && options.marker_threads <= 4);
    }

    #[test]
    fn test_invalid_growing_factor() {
        let options = HeapOptions {
            heap_growing_factor: 0.5,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = HeapOptions {
            heap_growing_factor: f64::NAN,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_heap_smaller_than_page_rejected() {
        let options = HeapOptions {
            max_heap_size: 4 * KB,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_config_limited_to_heap_support() {
        let options = HeapOptions {
            marking_support: MarkingType::Incremental,
            sweeping_support: SweepingType::Atomic,
            ..Default::default()
        };
        let config = GcConfig::precise_incremental_concurrent()
            .with_sweeping(SweepingType::IncrementalAndConcurrent)
            .limited_to(&options);
        assert_eq!(config.marking_type, MarkingType::Incremental);
        assert_eq!(config.sweeping_type, SweepingType::Atomic);
    }

    #[test]
    fn test_no_marker_threads_disables_concurrent_marking() {
        let options = HeapOptions {
            marker_threads: 0,
            ..Default::default()
        };
        let config = GcConfig::precise_incremental_concurrent().limited_to(&options);
        assert_eq!(config.marking_type, MarkingType::Incremental);
    }

    #[test]
    fn test_named_configs() {
        assert_eq!(
            GcConfig::conservative_atomic().stack_state,
            StackState::MayContainHeapPointers
        );
        assert!(GcConfig::precise_atomic().with_compaction().compaction);
        assert!(MarkingType::Atomic < MarkingType::IncrementalAndConcurrent);
    }
}
