#![doc = include_str!("../../../README.md")]
pub mod heap;

mod channel;
mod class;
mod context;
mod exception_private;
mod exception_public;
mod frame;
mod object;
mod resource;
pub mod tracer;
mod try_catch;
mod value;

pub use crate::{
    channel::ExceptionChannel,
    class::{ClassDef, ClassId, ClassTable, NativeMethod},
    context::Context,
    exception_private::{ExcType, RunError, RunResult},
    exception_public::{Exception, ExecError},
    frame::{Frame, FrameHandle, FrameStack, Local},
    heap::{ContainsHeap, DropWithHeap, Heap, HeapData, HeapDiff, HeapGuard, HeapId, HeapStats},
    object::Object,
    resource::{
        DEFAULT_MAX_FRAME_DEPTH, LimitedTracker, MAX_INHERITANCE_DEPTH, NoLimitTracker, ResourceError, ResourceLimits,
        ResourceTracker,
    },
    tracer::{
        NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, RuntimeTracer, StderrTracer, TraceEvent,
        TryOutcome,
    },
    try_catch::TryCatch,
    value::Value,
};
