//! Runtime tracing infrastructure.
//!
//! Provides a trait-based tracing system with zero-cost abstraction. When using
//! [`NoopTracer`], all trace methods compile away via monomorphization, the same
//! way [`NoLimitTracker`](crate::resource::NoLimitTracker) eliminates resource
//! checking overhead.
//!
//! # Architecture
//!
//! The [`RuntimeTracer`] trait defines hook points at the events of the frame and
//! exception protocol. Concrete implementations collect different kinds of data:
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (default) |
//! | [`StderrTracer`] | Human-readable protocol log to stderr |
//! | [`ProfilingTracer`] | Counters for frames, allocations and exceptions |
//! | [`RecordingTracer`] | Full event recording for post-mortem analysis |
//!
//! # Usage
//!
//! The context is parameterized as `Context<T: ResourceTracker, Tr: RuntimeTracer>`.
//! Callers choose the tracer at construction time:
//!
//! ```
//! use framert::{Context, NoLimitTracker, ProfilingTracer};
//!
//! let mut ctx = Context::with_tracker(NoLimitTracker, ProfilingTracer::new());
//! // ... run ...
//! let report = ctx.tracer().report();
//! assert_eq!(report.frames_entered, 0);
//! ```

use std::fmt;

use serde::Serialize;

use crate::heap::HeapId;

/// How a try region ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TryOutcome {
    /// The body finished without raising.
    Completed,
    /// The clause at `clause` (declaration order) matched and cleared the exception.
    Caught { clause: usize },
    /// No clause matched; the exception is still pending.
    Propagated,
    /// An uncatchable error passed through; neither catch clauses nor finally ran.
    Aborted,
}

/// Trace event recorded by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    FrameEnter {
        name: String,
        /// Frame stack depth after the push.
        depth: usize,
    },
    FrameExit {
        name: String,
        /// Frame stack depth before the pop.
        depth: usize,
        /// Number of owned values the frame released.
        released: usize,
    },
    Allocate {
        id: usize,
        kind: &'static str,
    },
    Release {
        id: usize,
        /// Cells freed by the release, including properties of a freed object.
        freed: usize,
    },
    Raise {
        class: String,
        depth: usize,
    },
    Catch {
        class: String,
        clause: usize,
        depth: usize,
    },
    Clear {
        depth: usize,
    },
    TryEnter {
        depth: usize,
    },
    TryExit {
        outcome: TryOutcome,
        depth: usize,
    },
    Uncaught {
        class: String,
    },
}

/// Trait for runtime tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`] requires
/// zero lines of code and compiles to zero instructions. Implementations only
/// override the hooks they care about.
pub trait RuntimeTracer: fmt::Debug {
    /// Called after a frame is pushed.
    ///
    /// # Arguments
    /// * `name` - Activation name given to `frame_enter`
    /// * `depth` - Frame stack depth after the push
    #[inline(always)]
    fn on_frame_enter(&mut self, _name: &str, _depth: usize) {}

    /// Called after a frame is popped and its values released.
    ///
    /// # Arguments
    /// * `name` - Activation name
    /// * `depth` - Frame stack depth before the pop
    /// * `released` - Number of owned values the frame released
    #[inline(always)]
    fn on_frame_exit(&mut self, _name: &str, _depth: usize, _released: usize) {}

    /// Called after a heap cell is allocated.
    #[inline(always)]
    fn on_allocate(&mut self, _id: HeapId, _kind: &'static str) {}

    /// Called after an owning reference is released.
    ///
    /// # Arguments
    /// * `freed` - Cells freed by the release: 0 if `id` is still referenced,
    ///   otherwise 1 plus any properties that reached zero with it
    #[inline(always)]
    fn on_release(&mut self, _id: HeapId, _freed: usize) {}

    /// Called when an exception is stored in the pending slot.
    #[inline(always)]
    fn on_raise(&mut self, _class: &str, _depth: usize) {}

    /// Called when a catch clause matches the pending exception.
    ///
    /// # Arguments
    /// * `clause` - Index of the matching clause in declaration order
    #[inline(always)]
    fn on_catch(&mut self, _class: &str, _clause: usize, _depth: usize) {}

    /// Called when the pending slot is cleared.
    #[inline(always)]
    fn on_clear(&mut self, _depth: usize) {}

    #[inline(always)]
    fn on_try_enter(&mut self, _depth: usize) {}

    #[inline(always)]
    fn on_try_exit(&mut self, _outcome: TryOutcome, _depth: usize) {}

    /// Called when an exception reaches the host boundary.
    #[inline(always)]
    fn on_uncaught(&mut self, _class: &str) {}
}

// ============================================================================
// NoopTracer
// ============================================================================

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl RuntimeTracer for NoopTracer {}

// ============================================================================
// StderrTracer
// ============================================================================

/// Tracer that prints a human-readable protocol log to stderr.
///
/// Output format:
/// ```text
///   >>> ENTER testTry2          depth=1
///   !!! RAISE RuntimeException  depth=1
///   ~~~ CATCH RuntimeException  clause=0
///   <<< EXIT  testTry2          depth=1  released=3
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Maximum number of lines to print. None = unlimited.
    limit: Option<usize>,
    count: usize,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that stops printing after `limit` lines.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            count: 0,
        }
    }

    fn emit(&mut self, line: fmt::Arguments<'_>) {
        if let Some(limit) = self.limit {
            if self.count > limit {
                return;
            }
            if self.count == limit {
                eprintln!("--- trace limit reached ({limit} lines) ---");
                self.count += 1;
                return;
            }
        }
        eprintln!("{line}");
        self.count += 1;
    }
}

impl RuntimeTracer for StderrTracer {
    fn on_frame_enter(&mut self, name: &str, depth: usize) {
        self.emit(format_args!("  >>> ENTER {name:<20} depth={depth}"));
    }

    fn on_frame_exit(&mut self, name: &str, depth: usize, released: usize) {
        self.emit(format_args!("  <<< EXIT  {name:<20} depth={depth}  released={released}"));
    }

    fn on_raise(&mut self, class: &str, depth: usize) {
        self.emit(format_args!("  !!! RAISE {class:<20} depth={depth}"));
    }

    fn on_catch(&mut self, class: &str, clause: usize, _depth: usize) {
        self.emit(format_args!("  ~~~ CATCH {class:<20} clause={clause}"));
    }

    fn on_try_exit(&mut self, outcome: TryOutcome, depth: usize) {
        self.emit(format_args!("  ... TRY   {outcome:<20?} depth={depth}"));
    }

    fn on_uncaught(&mut self, class: &str) {
        self.emit(format_args!("  *** UNCAUGHT {class}"));
    }
}

// ============================================================================
// ProfilingTracer
// ============================================================================

/// Tracer that collects counters for the frame and exception protocol.
///
/// Retrieve results via [`ProfilingTracer::report`] after execution.
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    report: ProfilingReport,
}

/// Summary report from a profiling trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfilingReport {
    pub frames_entered: u64,
    /// Maximum frame stack depth observed.
    pub max_depth: usize,
    pub allocations: u64,
    /// Cells freed through releases.
    pub frees: u64,
    /// Values released by frame exits.
    pub frame_releases: u64,
    pub raises: u64,
    pub catches: u64,
    pub try_regions: u64,
    pub uncaught: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        self.report.clone()
    }
}

impl RuntimeTracer for ProfilingTracer {
    #[inline]
    fn on_frame_enter(&mut self, _name: &str, depth: usize) {
        self.report.frames_entered += 1;
        self.report.max_depth = self.report.max_depth.max(depth);
    }

    fn on_frame_exit(&mut self, _name: &str, _depth: usize, released: usize) {
        self.report.frame_releases += released as u64;
    }

    #[inline]
    fn on_allocate(&mut self, _id: HeapId, _kind: &'static str) {
        self.report.allocations += 1;
    }

    #[inline]
    fn on_release(&mut self, _id: HeapId, freed: usize) {
        self.report.frees += freed as u64;
    }

    fn on_raise(&mut self, _class: &str, _depth: usize) {
        self.report.raises += 1;
    }

    fn on_catch(&mut self, _class: &str, _clause: usize, _depth: usize) {
        self.report.catches += 1;
    }

    fn on_try_enter(&mut self, _depth: usize) {
        self.report.try_regions += 1;
    }

    fn on_uncaught(&mut self, _class: &str) {
        self.report.uncaught += 1;
    }
}

impl fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Runtime Profiling Report ===")?;
        writeln!(f, "Frames entered:     {}", self.frames_entered)?;
        writeln!(f, "Max frame depth:    {}", self.max_depth)?;
        writeln!(f, "Allocations:        {}", self.allocations)?;
        writeln!(f, "Frees:              {}", self.frees)?;
        writeln!(f, "Frame releases:     {}", self.frame_releases)?;
        writeln!(f, "Try regions:        {}", self.try_regions)?;
        writeln!(f, "Raises:             {}", self.raises)?;
        writeln!(f, "Catches:            {}", self.catches)?;
        write!(f, "Uncaught:           {}", self.uncaught)
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Tracer that records every event in chronological order.
///
/// The most expensive tracer (allocates per event); use it for debugging specific
/// issues or for tests that assert on the exact protocol sequence.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    /// Optional limit on number of events recorded.
    limit: Option<usize>,
    /// Whether allocation and release events are recorded.
    record_heap: bool,
}

impl RecordingTracer {
    /// Creates a tracer recording frame and exception events only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that also records every allocation and release.
    #[must_use]
    pub fn with_heap_events() -> Self {
        Self {
            record_heap: true,
            ..Self::default()
        }
    }

    /// Creates a tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
            record_heap: false,
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Renders the recorded events as JSON lines, one event per line.
    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }

    fn push(&mut self, event: TraceEvent) {
        if self.limit.is_none_or(|l| self.events.len() < l) {
            self.events.push(event);
        }
    }
}

impl RuntimeTracer for RecordingTracer {
    fn on_frame_enter(&mut self, name: &str, depth: usize) {
        self.push(TraceEvent::FrameEnter {
            name: name.to_owned(),
            depth,
        });
    }

    fn on_frame_exit(&mut self, name: &str, depth: usize, released: usize) {
        self.push(TraceEvent::FrameExit {
            name: name.to_owned(),
            depth,
            released,
        });
    }

    fn on_allocate(&mut self, id: HeapId, kind: &'static str) {
        if self.record_heap {
            self.push(TraceEvent::Allocate { id: id.index(), kind });
        }
    }

    fn on_release(&mut self, id: HeapId, freed: usize) {
        if self.record_heap {
            self.push(TraceEvent::Release { id: id.index(), freed });
        }
    }

    fn on_raise(&mut self, class: &str, depth: usize) {
        self.push(TraceEvent::Raise {
            class: class.to_owned(),
            depth,
        });
    }

    fn on_catch(&mut self, class: &str, clause: usize, depth: usize) {
        self.push(TraceEvent::Catch {
            class: class.to_owned(),
            clause,
            depth,
        });
    }

    fn on_clear(&mut self, depth: usize) {
        self.push(TraceEvent::Clear { depth });
    }

    fn on_try_enter(&mut self, depth: usize) {
        self.push(TraceEvent::TryEnter { depth });
    }

    fn on_try_exit(&mut self, outcome: TryOutcome, depth: usize) {
        self.push(TraceEvent::TryExit { outcome, depth });
    }

    fn on_uncaught(&mut self, class: &str) {
        self.push(TraceEvent::Uncaught { class: class.to_owned() });
    }
}
