//! GC Logging and Tracing
//!
//! Every heap owns a [`GcLogger`]. Events are:
//! - forwarded to the `log` facade under the `hostgc` target,
//! - kept in a bounded in-memory buffer for inspection,
//! - optionally printed to the console, human-readable or as JSON.
//!
//! Log Levels:
//! - ERROR: Fatal conditions about to abort
//! - WARN: Unusual conditions (cancelled tasks, skipped compaction)
//! - INFO: GC cycles
//! - DEBUG: Phases and per-phase statistics
//! - TRACE: Per-object operations (explicit free)

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// `log` target used for every hostgc record
pub const LOG_TARGET: &str = "hostgc";

/// Log level for GC operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// GC event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GcEvent {
    /// A collection started
    CycleStarted {
        epoch: u64,
        marking: String,
        sweeping: String,
        stack_state: String,
    },

    /// A collection phase completed
    PhaseCompleted {
        epoch: u64,
        phase: String,
        duration_us: u64,
    },

    /// Marking reached its fixpoint
    MarkingFinished {
        epoch: u64,
        marked_bytes: usize,
        ephemeron_passes: usize,
    },

    /// Weak callbacks and weak roots processed
    WeakProcessed {
        epoch: u64,
        callbacks: usize,
        weak_roots_cleared: usize,
    },

    /// Movable objects relocated
    CompactionFinished {
        epoch: u64,
        moved_objects: usize,
        moved_bytes: usize,
    },

    /// All pages swept
    SweepFinished {
        epoch: u64,
        swept_bytes: usize,
        finalized_objects: usize,
        freed_pages: usize,
    },

    /// A collection completed
    CycleFinished {
        epoch: u64,
        duration_ms: f64,
        live_bytes: usize,
    },

    /// Object freed through the explicit management API
    ExplicitFree { size: usize },

    /// Background work cancelled before completing
    TaskCancelled { task: String },
}

impl GcEvent {
    /// Level at which the event is reported
    pub fn level(&self) -> LogLevel {
        match self {
            GcEvent::CycleStarted { .. } | GcEvent::CycleFinished { .. } => LogLevel::Info,
            GcEvent::TaskCancelled { .. } => LogLevel::Warn,
            GcEvent::PhaseCompleted { .. }
            | GcEvent::MarkingFinished { .. }
            | GcEvent::WeakProcessed { .. }
            | GcEvent::CompactionFinished { .. }
            | GcEvent::SweepFinished { .. } => LogLevel::Debug,
            GcEvent::ExplicitFree { .. } => LogLevel::Trace,
        }
    }

    fn describe(&self) -> String {
        match self {
            GcEvent::CycleStarted {
                epoch,
                marking,
                sweeping,
                stack_state,
            } => format!(
                "[GC] Cycle {} started (marking: {}, sweeping: {}, stack: {})",
                epoch, marking, sweeping, stack_state
            ),
            GcEvent::PhaseCompleted {
                epoch,
                phase,
                duration_us,
            } => format!("[GC] Cycle {}: {} completed ({} us)", epoch, phase, duration_us),
            GcEvent::MarkingFinished {
                epoch,
                marked_bytes,
                ephemeron_passes,
            } => format!(
                "[GC] Cycle {}: marked {} bytes, {} ephemeron passes",
                epoch, marked_bytes, ephemeron_passes
            ),
            GcEvent::WeakProcessed {
                epoch,
                callbacks,
                weak_roots_cleared,
            } => format!(
                "[GC] Cycle {}: {} weak callbacks, {} weak roots cleared",
                epoch, callbacks, weak_roots_cleared
            ),
            GcEvent::CompactionFinished {
                epoch,
                moved_objects,
                moved_bytes,
            } => format!(
                "[GC] Cycle {}: relocated {} objects ({} bytes moved)",
                epoch, moved_objects, moved_bytes
            ),
            GcEvent::SweepFinished {
                epoch,
                swept_bytes,
                finalized_objects,
                freed_pages,
            } => format!(
                "[GC] Cycle {}: swept {} bytes, {} finalizers, {} pages released",
                epoch, swept_bytes, finalized_objects, freed_pages
            ),
            GcEvent::CycleFinished {
                epoch,
                duration_ms,
                live_bytes,
            } => format!(
                "[GC] Cycle {} completed ({:.2}ms, {} live bytes)",
                epoch, duration_ms, live_bytes
            ),
            GcEvent::ExplicitFree { size } => format!("[GC] Explicitly freed {} bytes", size),
            GcEvent::TaskCancelled { task } => format!("[GC] Task cancelled: {}", task),
        }
    }
}

/// GC Logger configuration
#[derive(Debug, Clone)]
pub struct GcLoggerConfig {
    /// Minimum log level recorded and forwarded
    pub level: LogLevel,

    /// Print events to stdout
    pub console: bool,

    /// Print console events as JSON
    pub json: bool,

    /// Prefix console events with a local timestamp
    pub timestamps: bool,

    /// Capacity of the in-memory event buffer
    pub max_events: usize,
}

impl Default for GcLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Debug,
            console: false,
            json: false,
            timestamps: true,
            max_events: 1024,
        }
    }
}

/// GC Logger - per-heap event sink
pub struct GcLogger {
    config: GcLoggerConfig,
    events: Mutex<VecDeque<(Instant, GcEvent)>>,
    enabled: AtomicBool,
}

impl GcLogger {
    /// Create new GC logger
    pub fn new(config: GcLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Enable logging
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Disable logging
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a GC event
    pub fn log(&self, event: GcEvent) {
        if !self.is_enabled() {
            return;
        }

        let level = event.level();
        if level > self.config.level {
            return;
        }

        let record_level: log::Level = level.into();
        log::log!(target: LOG_TARGET, record_level, "{}", event.describe());

        if self.config.console {
            self.output_console(&event);
        }

        let mut events = self.events.lock();
        if events.len() == self.config.max_events {
            events.pop_front();
        }
        events.push_back((Instant::now(), event));
    }

    /// Snapshot of the recorded events, oldest first
    pub fn events(&self) -> Vec<GcEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Drop all recorded events
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn output_console(&self, event: &GcEvent) {
        let line = if self.config.json {
            match serde_json::to_string(event) {
                Ok(json) => json,
                Err(e) => {
                    log::warn!(target: LOG_TARGET, "failed to serialize GC event: {}", e);
                    return;
                },
            }
        } else {
            event.describe()
        };

        if self.config.timestamps {
            let now = chrono::Local::now();
            println!("[{}] {}", now.format("%Y-%m-%d %H:%M:%S%.3f"), line);
        } else {
            println!("{}", line);
        }
    }
}

impl std::fmt::Debug for GcLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcLogger")
            .field("config", &self.config)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
