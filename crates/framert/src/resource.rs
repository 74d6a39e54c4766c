use std::{
    fmt,
    time::{Duration, Instant},
};

/// Recommended maximum frame depth if not otherwise specified.
pub const DEFAULT_MAX_FRAME_DEPTH: usize = 1000;

/// Maximum length of a class's parent chain.
///
/// Bounds subclass checks and method lookups so a malformed registration
/// (a parent cycle) cannot loop forever.
pub const MAX_INHERITANCE_DEPTH: usize = 256;

/// Error returned when a resource limit is exceeded during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Maximum number of allocations exceeded.
    Allocation { limit: usize, count: usize },
    /// Maximum execution time exceeded.
    Time { limit: Duration, elapsed: Duration },
    /// Maximum memory usage exceeded.
    Memory { limit: usize, used: usize },
    /// Maximum frame depth exceeded.
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => {
                write!(f, "allocation limit exceeded: {count} > {limit}")
            }
            Self::Time { limit, elapsed } => {
                write!(f, "time limit exceeded: {elapsed:?} > {limit:?}")
            }
            Self::Memory { limit, used } => {
                write!(f, "memory limit exceeded: {used} bytes > {limit} bytes")
            }
            Self::Recursion { limit, .. } => {
                write!(f, "maximum function nesting level of '{limit}' reached")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

/// Trait for tracking resource usage of one execution context.
///
/// Implementations can enforce limits on allocations, time, memory and frame depth.
pub trait ResourceTracker: fmt::Debug {
    /// Called before each heap allocation.
    ///
    /// Returns `Ok(())` if the allocation should proceed, or `Err(ResourceError)`
    /// if a limit would be exceeded.
    ///
    /// # Arguments
    /// * `get_size` - Lazily computes the approximate size in bytes of the allocation
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError>;

    /// Called when a heap cell is freed.
    ///
    /// # Arguments
    /// * `get_size` - Lazily computes the size in bytes of the freed allocation
    fn on_free(&mut self, get_size: impl FnOnce() -> usize);

    /// Called at call boundaries to check the time limit.
    fn check_time(&mut self) -> Result<(), ResourceError>;

    /// Called before pushing a new frame.
    ///
    /// # Arguments
    /// * `current_depth` - Frame stack depth before the new frame is pushed
    fn check_frame_depth(&self, current_depth: usize) -> Result<(), ResourceError>;

    /// Returns the total number of allocations tracked, if this tracker records them.
    fn allocation_count(&self) -> Option<usize> {
        None
    }

    /// Returns the current approximate memory usage in bytes, if tracked.
    fn current_memory_bytes(&self) -> Option<usize> {
        None
    }
}

/// Tracker with no limits besides the default frame depth.
///
/// All hooks are trivially inlined, so a `Context<NoLimitTracker>` pays nothing
/// for resource accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_allocate(&mut self, _get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_free(&mut self, _get_size: impl FnOnce() -> usize) {}

    #[inline]
    fn check_time(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_frame_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if current_depth >= DEFAULT_MAX_FRAME_DEPTH {
            Err(ResourceError::Recursion {
                limit: DEFAULT_MAX_FRAME_DEPTH,
                depth: current_depth + 1,
            })
        } else {
            Ok(())
        }
    }
}

/// Configuration for resource limits.
///
/// All limits are optional - set to `None` to disable a specific limit.
/// Use `ResourceLimits::default()` for no limits, or build custom limits
/// with the builder methods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum number of heap allocations allowed.
    pub max_allocations: Option<usize>,
    /// Maximum execution time.
    pub max_duration: Option<Duration>,
    /// Maximum heap memory in bytes (approximate).
    pub max_memory: Option<usize>,
    /// Maximum frame stack depth.
    pub max_frame_depth: Option<usize>,
}

impl ResourceLimits {
    /// Creates limits with everything disabled except the frame depth, which is
    /// set to [`DEFAULT_MAX_FRAME_DEPTH`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_depth: Some(DEFAULT_MAX_FRAME_DEPTH),
            ..Default::default()
        }
    }

    /// Sets the maximum number of allocations.
    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    /// Sets the maximum execution duration.
    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    /// Sets the maximum memory usage in bytes.
    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }

    /// Sets the maximum frame stack depth.
    #[must_use]
    pub fn max_frame_depth(mut self, limit: usize) -> Self {
        self.max_frame_depth = Some(limit);
        self
    }
}

/// Tracker that enforces the configured [`ResourceLimits`].
#[derive(Debug, Clone)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    /// When execution started, for time limit checking.
    start_time: Instant,
    /// Total number of allocations made.
    allocation_count: usize,
    /// Current approximate memory usage in bytes.
    current_memory: usize,
}

impl LimitedTracker {
    /// Creates a new tracker; the time budget starts now.
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
            allocation_count: 0,
            current_memory: 0,
        }
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_allocations
            && self.allocation_count >= max
        {
            return Err(ResourceError::Allocation {
                limit: max,
                count: self.allocation_count + 1,
            });
        }

        let size = get_size();
        if let Some(max) = self.limits.max_memory {
            let new_memory = self.current_memory + size;
            if new_memory > max {
                return Err(ResourceError::Memory {
                    limit: max,
                    used: new_memory,
                });
            }
        }

        self.allocation_count += 1;
        self.current_memory += size;
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        self.current_memory = self.current_memory.saturating_sub(get_size());
    }

    fn check_time(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_duration {
            let elapsed = self.start_time.elapsed();
            if elapsed > max {
                return Err(ResourceError::Time { limit: max, elapsed });
            }
        }
        Ok(())
    }

    fn check_frame_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        let limit = self.limits.max_frame_depth.unwrap_or(DEFAULT_MAX_FRAME_DEPTH);
        if current_depth >= limit {
            Err(ResourceError::Recursion {
                limit,
                depth: current_depth + 1,
            })
        } else {
            Ok(())
        }
    }

    fn allocation_count(&self) -> Option<usize> {
        Some(self.allocation_count)
    }

    fn current_memory_bytes(&self) -> Option<usize> {
        Some(self.current_memory)
    }
}
