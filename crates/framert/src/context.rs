//! The execution context: heap, frame stack, pending-exception slot and class
//! table of one logical thread of generated code.
//!
//! Every lowered function takes `&mut Context` and returns a [`RunResult`]. The
//! calling convention is:
//!
//! * an activation that allocates runs inside [`Context::activation`], which
//!   enters a frame and exits it on every path;
//! * every call that may raise goes through [`Context::call`] (or
//!   [`Context::call_method`]), which turns a pending exception into
//!   `Err(RunError::Exc)` even when the callee returned a sentinel value;
//! * `throw expr` lowers to `return Err(ctx.throw(id))`;
//! * `try`/`catch`/`finally` lowers to a [`TryCatch`](crate::TryCatch).
//!
//! ```
//! use framert::{Context, ExcType, ExecError, HeapData};
//!
//! let mut ctx = Context::new();
//! let result = ctx.run_top_level("testThrow2", |ctx| {
//!     let message = ctx.init(HeapData::Str("error".to_owned()))?;
//!     let exc = ctx.instantiate(ExcType::Exception.into())?;
//!     let (exc_id, message_id) = (ctx.get(exc), ctx.get(message));
//!     if let Some(ret) = ctx.call_method(exc_id, "__construct", &[message_id])? {
//!         ctx.drop_value(ret);
//!     }
//!     Err::<(), _>(ctx.throw(exc_id))
//! });
//! let Err(ExecError::Exception(exc)) = result else { panic!("expected an uncaught exception") };
//! assert_eq!(exc.to_string(), "Exception: error");
//! assert_eq!(ctx.heap().live_count(), 0);
//! ```

use std::borrow::Cow;

use crate::{
    class::{ClassId, ClassTable},
    channel::ExceptionChannel,
    defer_drop,
    exception_private::{ExcType, RunError, RunResult},
    exception_public::{Exception, ExecError},
    frame::{FrameHandle, FrameStack, Local},
    heap::{ContainsHeap, DropWithHeap, Heap, HeapData, HeapId, HeapStats},
    object::Object,
    resource::{LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker},
    tracer::{NoopTracer, RuntimeTracer},
    value::Value,
};

/// Maximum number of `previous` links followed when describing an exception.
const MAX_PREVIOUS_CHAIN: usize = 64;

/// One execution context. Separate contexts share nothing and may live on
/// separate threads.
#[derive(Debug)]
pub struct Context<T: ResourceTracker = NoLimitTracker, Tr: RuntimeTracer = NoopTracer> {
    heap: Heap<T>,
    frames: FrameStack,
    channel: ExceptionChannel,
    classes: ClassTable<T, Tr>,
    tracer: Tr,
}

impl Context {
    /// Creates a context with no resource limits beyond the default frame depth.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tracker(NoLimitTracker, NoopTracer)
    }
}

impl Context<LimitedTracker> {
    /// Creates a context enforcing `limits`; the time budget starts now.
    #[must_use]
    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self::with_tracker(LimitedTracker::new(limits), NoopTracer)
    }
}

impl<T: ResourceTracker + Default, Tr: RuntimeTracer + Default> Default for Context<T, Tr> {
    fn default() -> Self {
        Self::with_tracker(T::default(), Tr::default())
    }
}

impl<T: ResourceTracker, Tr: RuntimeTracer> Context<T, Tr> {
    pub fn with_tracker(tracker: T, tracer: Tr) -> Self {
        Self {
            heap: Heap::new(64, tracker),
            frames: FrameStack::new(),
            channel: ExceptionChannel::new(),
            classes: ClassTable::new(),
            tracer,
        }
    }

    #[must_use]
    pub fn heap(&self) -> &Heap<T> {
        &self.heap
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.heap_stats()
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tr {
        &mut self.tracer
    }

    #[must_use]
    pub fn classes(&self) -> &ClassTable<T, Tr> {
        &self.classes
    }

    /// Mutable access to the class table, for registering host classes.
    pub fn classes_mut(&mut self) -> &mut ClassTable<T, Tr> {
        &mut self.classes
    }

    /// Number of active frames.
    #[must_use]
    pub fn frame_depth(&self) -> usize {
        self.frames.depth()
    }

    // ------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------

    /// Pushes a new frame for an activation named `name`.
    ///
    /// Exceeding the frame depth limit raises a catchable `RuntimeException`.
    pub fn frame_enter(&mut self, name: impl Into<Cow<'static, str>>) -> RunResult<FrameHandle> {
        match self.heap.tracker().check_frame_depth(self.frames.depth()) {
            Ok(()) => {}
            Err(err @ ResourceError::Recursion { .. }) => {
                return Err(self.throw_new(ExcType::RuntimeException, &err.to_string()));
            }
            Err(err) => return Err(err.into()),
        }
        let handle = self.frames.push(name.into());
        if let Some(frame) = self.frames.top() {
            self.tracer.on_frame_enter(frame.name(), handle.depth());
        }
        Ok(handle)
    }

    /// Pops the frame and releases every value it still owns, most recent first.
    ///
    /// # Panics
    /// Panics if `handle` is not the innermost frame.
    pub fn frame_exit(&mut self, handle: FrameHandle) {
        let depth = self.frames.depth();
        let mut frame = self.frames.pop(handle);
        let mut released = 0;
        for id in frame.drain_owned_rev() {
            self.release_id(id);
            released += 1;
        }
        self.tracer.on_frame_exit(frame.name(), depth, released);
    }

    /// Runs `body` inside a fresh frame, exiting the frame on every path.
    ///
    /// A value `body` returns must have been moved out of the frame first
    /// (see [`take`](Self::take)), otherwise the exit releases it.
    pub fn activation<R>(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        body: impl FnOnce(&mut Self) -> RunResult<R>,
    ) -> RunResult<R> {
        let handle = self.frame_enter(name)?;
        let result = body(self);
        self.frame_exit(handle);
        result
    }

    // ------------------------------------------------------------------
    // Value model
    // ------------------------------------------------------------------

    fn allocate(&mut self, data: HeapData) -> RunResult<HeapId> {
        let kind = data.variant_name();
        let id = self.heap.allocate(data)?;
        self.tracer.on_allocate(id, kind);
        Ok(id)
    }

    fn release_id(&mut self, id: HeapId) {
        let freed = self.heap.dec_ref(id);
        self.tracer.on_release(id, freed);
    }

    /// Allocates `data` and registers it in a new local of the innermost frame.
    ///
    /// # Panics
    /// Panics if no frame is active.
    pub fn init(&mut self, data: HeapData) -> RunResult<Local> {
        let local = self.frames.register(None);
        let id = self.allocate(data)?;
        *self.frames.slot_mut(local) = Some(id);
        Ok(local)
    }

    /// Re-initializes `dest`: releases what it held, then stores a fresh allocation.
    pub fn init_into(&mut self, dest: Local, data: HeapData) -> RunResult<()> {
        if let Some(old) = self.frames.slot_mut(dest).take() {
            self.release_id(old);
        }
        let id = self.allocate(data)?;
        *self.frames.slot_mut(dest) = Some(id);
        Ok(())
    }

    /// Registers an empty local in the innermost frame.
    pub fn declare(&mut self) -> Local {
        self.frames.register(None)
    }

    /// Makes `dest` share `id`: takes a reference, then releases the old occupant.
    pub fn assign(&mut self, dest: Local, id: HeapId) {
        self.heap.inc_ref(id);
        if let Some(old) = self.frames.slot_mut(dest).replace(id) {
            self.release_id(old);
        }
    }

    /// Releases the value held by `local`, leaving it empty.
    pub fn release(&mut self, local: Local) {
        if let Some(old) = self.frames.slot_mut(local).take() {
            self.release_id(old);
        }
    }

    /// Moves the owned reference out of `local`, so the frame exit does not release it.
    pub fn take(&mut self, local: Local) -> Option<Value> {
        self.frames.slot_mut(local).take().map(Value::from_owned)
    }

    /// Hands an owned value to a new local of the innermost frame.
    pub fn store(&mut self, value: Value) -> Local {
        self.frames.register(Some(value.into_id()))
    }

    /// # Panics
    /// Panics if `local` is empty or its frame has exited.
    #[must_use]
    pub fn get(&self, local: Local) -> HeapId {
        self.frames.slot(local).expect("Context::get: local is empty")
    }

    #[must_use]
    pub fn try_get(&self, local: Local) -> Option<HeapId> {
        self.frames.slot(local)
    }

    #[must_use]
    pub fn data(&self, local: Local) -> &HeapData {
        self.heap.get(self.get(local))
    }

    /// Allocates a value owned by the caller rather than by a frame.
    pub fn alloc_value(&mut self, data: HeapData) -> RunResult<Value> {
        self.allocate(data).map(Value::from_owned)
    }

    pub fn drop_value(&mut self, value: Value) {
        self.release_id(value.into_id());
    }

    /// Takes a new owned reference to `id`.
    pub fn share(&mut self, id: HeapId) -> Value {
        self.heap.inc_ref(id);
        Value::from_owned(id)
    }

    #[must_use]
    pub fn as_str(&self, id: HeapId) -> Option<&str> {
        match self.heap.get(id) {
            HeapData::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self, id: HeapId) -> Option<bool> {
        match self.heap.get(id) {
            HeapData::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self, id: HeapId) -> Option<i64> {
        match self.heap.get(id) {
            HeapData::Int(i) => Some(*i),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Allocates an instance of `class` with its default properties, without
    /// running a constructor.
    pub fn new_object(&mut self, class: ClassId) -> RunResult<Value> {
        let object = Value::from_owned(self.allocate(HeapData::Object(Object::new(class)))?);
        for (name, default) in self.classes.default_properties(class) {
            match self.allocate(default) {
                Ok(id) => self.set_property_owned(object.id(), &name, id),
                Err(err) => {
                    self.drop_value(object);
                    return Err(err);
                }
            }
        }
        Ok(object)
    }

    /// Allocates an instance of `class` into a new local of the innermost frame.
    pub fn instantiate(&mut self, class: ClassId) -> RunResult<Local> {
        let object = self.new_object(class)?;
        Ok(self.store(object))
    }

    /// Stores `id` (whose reference the caller hands over) in a property.
    fn set_property_owned(&mut self, object: HeapId, name: &str, id: HeapId) {
        let HeapData::Object(obj) = self.heap.get_mut(object) else {
            panic!("Context::set_property_owned: {object:?} is not an object");
        };
        if let Some(old) = obj.set_property_raw(name, id) {
            self.release_id(old);
        }
    }

    /// Assigns `id` to a property of `object`, with the same sharing rules as [`assign`](Self::assign).
    ///
    /// # Panics
    /// Panics if `object` is not an object.
    pub fn update_property(&mut self, object: HeapId, name: &str, id: HeapId) {
        self.heap.inc_ref(id);
        self.set_property_owned(object, name, id);
    }

    /// Returns the cell held by a property, without taking a reference.
    #[must_use]
    pub fn read_property(&self, object: HeapId, name: &str) -> Option<HeapId> {
        match self.heap.get(object) {
            HeapData::Object(obj) => obj.property(name),
            _ => None,
        }
    }

    /// Returns a new owned reference to a property's value.
    pub fn share_property(&mut self, object: HeapId, name: &str) -> Option<Value> {
        let id = self.read_property(object, name)?;
        Some(self.share(id))
    }

    #[must_use]
    pub fn class_of(&self, id: HeapId) -> Option<ClassId> {
        match self.heap.get(id) {
            HeapData::Object(obj) => Some(obj.class()),
            _ => None,
        }
    }

    /// Whether `id` is an instance of `class` or one of its subclasses.
    #[must_use]
    pub fn instance_of(&self, id: HeapId, class: ClassId) -> bool {
        self.class_of(id).is_some_and(|c| self.classes.is_subclass_of(c, class))
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Invokes a lowered callee and performs the post-call status check.
    ///
    /// Also the point where the time limit is enforced.
    pub fn call<R: DropWithHeap<T>>(&mut self, callee: impl FnOnce(&mut Self) -> RunResult<R>) -> RunResult<R> {
        self.heap.tracker_mut().check_time()?;
        let result = callee(self);
        self.check_call_status(result)
    }

    /// Calls method `name` on `object`, searching the class and its ancestors.
    ///
    /// The receiver and arguments are borrowed; the returned value (if any) is owned.
    pub fn call_method(&mut self, object: HeapId, name: &str, args: &[HeapId]) -> RunResult<Option<Value>> {
        let Some(class) = self.class_of(object) else {
            let msg = format!("Trying to call method {name} on a non object");
            return Err(self.throw_new(ExcType::Exception, &msg));
        };
        let Some(method) = self.classes.find_method(class, name) else {
            let msg = format!("Call to undefined method {}::{name}()", self.classes.name(class));
            return Err(self.throw_new(ExcType::BadMethodCallException, &msg));
        };
        self.call(|ctx| method(ctx, object, args))
    }

    /// Normalizes a callee's result against the pending slot.
    ///
    /// A sentinel `Ok` returned while an exception is pending is released and
    /// replaced by `Err(RunError::Exc)`.
    pub fn check_call_status<R: DropWithHeap<T>>(&mut self, result: RunResult<R>) -> RunResult<R> {
        match result {
            Ok(sentinel) if self.channel.is_pending() => {
                sentinel.drop_with_heap(self);
                Err(RunError::Exc)
            }
            Err(RunError::Exc) if !self.channel.is_pending() => {
                Err(RunError::internal("callee signalled an exception without raising one"))
            }
            other => other,
        }
    }

    // ------------------------------------------------------------------
    // Exception channel
    // ------------------------------------------------------------------

    /// Stores `id` in the pending slot, taking a new reference to it.
    ///
    /// # Panics
    /// Panics if an exception is already pending.
    pub fn raise(&mut self, id: HeapId) -> RunResult<()> {
        if !self.instance_of(id, ExcType::Exception.into()) {
            return Err(RunError::internal("can only throw objects that extend Exception"));
        }
        self.heap.inc_ref(id);
        self.raise_owned(Value::from_owned(id));
        Ok(())
    }

    fn raise_owned(&mut self, exc: Value) {
        if let Some(class) = self.class_of(exc.id()) {
            self.tracer.on_raise(self.classes.name(class), self.frames.depth());
        }
        self.channel.raise(exc);
    }

    /// Raises `id` and returns the unwinding marker: `return Err(ctx.throw(id))`.
    pub fn throw(&mut self, id: HeapId) -> RunError {
        match self.raise(id) {
            Ok(()) => RunError::Exc,
            Err(err) => err,
        }
    }

    /// Constructs an exception of `class` with `message` and raises it.
    ///
    /// The exception is owned by the pending slot alone, so no frame is needed.
    pub fn throw_new(&mut self, class: impl Into<ClassId>, message: &str) -> RunError {
        match self.new_exception(class.into(), message) {
            Ok(exc) => {
                self.raise_owned(exc);
                RunError::Exc
            }
            Err(err) => err,
        }
    }

    /// Allocates an exception of `class` and sets its message, bypassing `__construct`.
    pub fn new_exception(&mut self, class: ClassId, message: &str) -> RunResult<Value> {
        if !self.classes.is_subclass_of(class, ExcType::Exception.into()) {
            let name = self.classes.name(class);
            return Err(RunError::internal(format!("cannot throw {name}: not an exception class")));
        }
        let exc = self.new_object(class)?;
        match self.allocate(HeapData::Str(message.to_owned())) {
            Ok(msg) => {
                self.set_property_owned(exc.id(), "message", msg);
                Ok(exc)
            }
            Err(err) => {
                self.drop_value(exc);
                Err(err)
            }
        }
    }

    /// Whether an exception is pending.
    #[must_use]
    pub fn check_pending(&self) -> bool {
        self.channel.is_pending()
    }

    /// The pending exception, without clearing it.
    #[must_use]
    pub fn current_exception(&self) -> Option<HeapId> {
        self.channel.current()
    }

    /// Empties the pending slot, releasing its reference.
    pub fn clear_exception(&mut self) {
        if let Some(exc) = self.channel.take() {
            self.tracer.on_clear(self.frames.depth());
            self.drop_value(exc);
        }
    }

    /// Moves the pending exception out of the slot without releasing it.
    pub(crate) fn take_exception(&mut self) -> Option<Value> {
        self.channel.take()
    }

    /// Puts back an exception taken with [`take_exception`](Self::take_exception).
    pub(crate) fn restore_exception(&mut self, exc: Value) {
        self.channel.raise(exc);
    }

    /// Binds the pending exception to a new local, clears the slot and reports
    /// the match to the tracer. Returns `None` when nothing is pending.
    pub(crate) fn catch_pending(&mut self, clause: usize) -> Option<Local> {
        let id = self.channel.current()?;
        if let Some(class) = self.class_of(id) {
            self.tracer.on_catch(self.classes.name(class), clause, self.frames.depth());
        }
        let local = self.declare();
        self.assign(local, id);
        self.clear_exception();
        Some(local)
    }

    /// The `message` property of an exception, if it is a string.
    #[must_use]
    pub fn exception_message(&self, id: HeapId) -> Option<&str> {
        self.as_str(self.read_property(id, "message")?)
    }

    /// Copies an exception object, including its `previous` chain, into a detached [`Exception`].
    #[must_use]
    pub fn describe_exception(&self, id: HeapId) -> Exception {
        self.describe_at(id, 0)
    }

    fn describe_at(&self, id: HeapId, depth: usize) -> Exception {
        let class_name = match self.class_of(id) {
            Some(class) => self.classes.name(class).to_owned(),
            None => self.heap.get(id).variant_name().to_owned(),
        };
        let previous = self
            .read_property(id, "previous")
            .filter(|&prev| depth < MAX_PREVIOUS_CHAIN && self.class_of(prev).is_some())
            .map(|prev| Box::new(self.describe_at(prev, depth + 1)));
        Exception {
            class_name,
            message: self.exception_message(id).unwrap_or_default().to_owned(),
            code: self.read_property(id, "code").and_then(|c| self.as_int(c)).unwrap_or(0),
            previous,
        }
    }

    // ------------------------------------------------------------------
    // Host boundary
    // ------------------------------------------------------------------

    /// Runs the outermost activation and converts whatever escapes it.
    ///
    /// An uncaught exception is described, released and returned as
    /// [`ExecError::Exception`]; on return the frame stack and the pending slot
    /// are both empty.
    pub fn run_top_level<R: DropWithHeap<T>>(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        body: impl FnOnce(&mut Self) -> RunResult<R>,
    ) -> Result<R, ExecError> {
        if self.frames.depth() != 0 || self.channel.is_pending() {
            return Err(ExecError::Internal(
                "run_top_level requires an empty frame stack and no pending exception".to_owned(),
            ));
        }
        let result = self.activation(name, body);
        let result = self.check_call_status(result);
        debug_assert_eq!(self.frames.depth(), 0, "activation left frames behind");
        match result {
            Ok(value) => Ok(value),
            Err(RunError::Exc) => {
                let this = self;
                let Some(exc) = this.channel.take() else {
                    return Err(ExecError::from_abort(RunError::Exc));
                };
                defer_drop!(exc, this);
                let described = this.describe_exception(exc.id());
                this.tracer.on_uncaught(&described.class_name);
                Err(ExecError::Exception(described))
            }
            Err(err) => {
                self.clear_exception();
                Err(ExecError::from_abort(err))
            }
        }
    }
}

impl<T: ResourceTracker, Tr: RuntimeTracer> ContainsHeap<T> for Context<T, Tr> {
    #[inline]
    fn heap_mut(&mut self) -> &mut Heap<T> {
        &mut self.heap
    }

    #[inline]
    fn release_cell(&mut self, id: HeapId) {
        self.release_id(id);
    }
}
