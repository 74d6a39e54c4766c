//! Structured lowering of `try { } catch (A $e) { } catch (B $e) { } finally { }`.

use smallvec::{SmallVec, smallvec};

use crate::{
    class::ClassId,
    context::Context,
    exception_private::{RunError, RunResult},
    frame::Local,
    heap::DropWithHeap,
    resource::ResourceTracker,
    tracer::{RuntimeTracer, TryOutcome},
};

type Handler<'f, T, Tr, R> = Box<dyn FnOnce(&mut Context<T, Tr>, Local) -> RunResult<R> + 'f>;
type FinallyBlock<'f, T, Tr> = Box<dyn FnOnce(&mut Context<T, Tr>) -> RunResult<()> + 'f>;

/// One catch clause: the classes it names and its handler.
struct Clause<'f, T: ResourceTracker, Tr: RuntimeTracer, R> {
    classes: SmallVec<[ClassId; 2]>,
    handler: Handler<'f, T, Tr, R>,
}

/// A try region with its catch clauses and optional finally block.
///
/// Every raise inside the body (a local throw, or a pending exception noticed
/// after a call) ends the body and arrives at one dispatch point. There the
/// clauses are scanned in declaration order and the first whose class is the
/// pending exception's class or an ancestor of it wins. The winner's handler
/// receives the exception bound to a local of the active frame (or of a frame
/// entered for the handler when none is active), with the pending slot
/// already cleared. With no match the exception stays pending,
/// unchanged, and the region returns `Err(RunError::Exc)`.
///
/// The finally block runs after the body or handler on every catchable path.
/// Any exception still pending is parked outside the slot while it runs and
/// restored afterwards; an exception raised by the finally block replaces the
/// parked one. Uncatchable errors skip both clauses and the finally block.
///
/// ```
/// use framert::{Context, ExcType, TryCatch};
///
/// let mut ctx = Context::new();
/// let caught = ctx
///     .activation("testTry", |ctx| {
///         TryCatch::new()
///             .catch(ExcType::RuntimeException, |ctx, e| {
///                 Ok(ctx.exception_message(ctx.get(e)) == Some("error!"))
///             })
///             .run(ctx, |ctx| Err(ctx.throw_new(ExcType::OutOfBoundsException, "error!")))
///     })
///     .unwrap();
/// assert!(caught);
/// assert_eq!(ctx.heap().live_count(), 0);
/// ```
#[must_use = "a TryCatch does nothing until `run` is called"]
pub struct TryCatch<'f, T: ResourceTracker, Tr: RuntimeTracer, R> {
    clauses: Vec<Clause<'f, T, Tr, R>>,
    finally: Option<FinallyBlock<'f, T, Tr>>,
}

impl<'f, T: ResourceTracker, Tr: RuntimeTracer, R: DropWithHeap<T>> TryCatch<'f, T, Tr, R> {
    pub fn new() -> Self {
        Self {
            clauses: Vec::new(),
            finally: None,
        }
    }

    /// Appends a `catch (class $e)` clause.
    pub fn catch(
        mut self,
        class: impl Into<ClassId>,
        handler: impl FnOnce(&mut Context<T, Tr>, Local) -> RunResult<R> + 'f,
    ) -> Self {
        self.clauses.push(Clause {
            classes: smallvec![class.into()],
            handler: Box::new(handler),
        });
        self
    }

    /// Appends a clause naming several classes, `catch (A | B $e)`.
    pub fn catch_any(
        mut self,
        classes: impl IntoIterator<Item = ClassId>,
        handler: impl FnOnce(&mut Context<T, Tr>, Local) -> RunResult<R> + 'f,
    ) -> Self {
        self.clauses.push(Clause {
            classes: classes.into_iter().collect(),
            handler: Box::new(handler),
        });
        self
    }

    /// Sets the finally block.
    pub fn finally(mut self, block: impl FnOnce(&mut Context<T, Tr>) -> RunResult<()> + 'f) -> Self {
        self.finally = Some(Box::new(block));
        self
    }

    /// Runs `body` as the try region.
    pub fn run(self, ctx: &mut Context<T, Tr>, body: impl FnOnce(&mut Context<T, Tr>) -> RunResult<R>) -> RunResult<R> {
        let depth = ctx.frame_depth();
        ctx.tracer_mut().on_try_enter(depth);

        let result = body(ctx);
        let result = ctx.check_call_status(result);
        let (result, caught) = match result {
            Err(RunError::Exc) => Self::dispatch(self.clauses, ctx),
            other => (other, None),
        };
        let result = match self.finally {
            Some(block) if !is_abort(&result) => run_finally(ctx, block, result),
            _ => result,
        };

        let outcome = match (&result, caught) {
            (Err(RunError::Exc), _) => TryOutcome::Propagated,
            (Err(_), _) => TryOutcome::Aborted,
            (Ok(_), Some(clause)) => TryOutcome::Caught { clause },
            (Ok(_), None) => TryOutcome::Completed,
        };
        ctx.tracer_mut().on_try_exit(outcome, depth);
        result
    }

    /// Selects and runs the first matching clause. Returns the clause index when one matched.
    fn dispatch(clauses: Vec<Clause<'f, T, Tr, R>>, ctx: &mut Context<T, Tr>) -> (RunResult<R>, Option<usize>) {
        let Some(class) = ctx.current_exception().and_then(|exc| ctx.class_of(exc)) else {
            return (Err(RunError::Exc), None);
        };
        let matched = clauses
            .into_iter()
            .enumerate()
            .find(|(_, clause)| {
                clause
                    .classes
                    .iter()
                    .any(|&catches| ctx.classes().is_subclass_of(class, catches))
            });
        let Some((index, Clause { handler, .. })) = matched else {
            return (Err(RunError::Exc), None);
        };
        // the bound exception needs a frame to live in
        let result = if ctx.frame_depth() == 0 {
            ctx.activation("catch", |ctx| Self::bind_and_handle(ctx, index, handler))
        } else {
            Self::bind_and_handle(ctx, index, handler)
        };
        (ctx.check_call_status(result), Some(index))
    }

    fn bind_and_handle(ctx: &mut Context<T, Tr>, index: usize, handler: Handler<'f, T, Tr, R>) -> RunResult<R> {
        let Some(bound) = ctx.catch_pending(index) else {
            return Err(RunError::internal("catch clause matched without a pending exception"));
        };
        handler(ctx, bound)
    }
}

impl<T: ResourceTracker, Tr: RuntimeTracer, R: DropWithHeap<T>> Default for TryCatch<'_, T, Tr, R> {
    fn default() -> Self {
        Self::new()
    }
}

fn is_abort<R>(result: &RunResult<R>) -> bool {
    matches!(result, Err(RunError::Uncatchable(_) | RunError::Internal(_)))
}

fn run_finally<T: ResourceTracker, Tr: RuntimeTracer, R: DropWithHeap<T>>(
    ctx: &mut Context<T, Tr>,
    block: FinallyBlock<'_, T, Tr>,
    result: RunResult<R>,
) -> RunResult<R> {
    let parked = ctx.take_exception();
    let finally_result = block(ctx);
    match ctx.check_call_status(finally_result) {
        Ok(()) => {
            if let Some(exc) = parked {
                ctx.restore_exception(exc);
            }
            result
        }
        Err(err) => {
            if let Some(exc) = parked {
                ctx.drop_value(exc);
            }
            if let Ok(value) = result {
                value.drop_with_heap(ctx);
            }
            Err(err)
        }
    }
}
