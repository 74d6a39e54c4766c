use std::{borrow::Cow, fmt};

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    class::ClassTable,
    context::Context,
    heap::{HeapData, HeapId},
    resource::{ResourceError, ResourceTracker},
    tracer::RuntimeTracer,
    value::Value,
};

/// Result type alias for operations that can leave an exception pending.
pub type RunResult<T> = Result<T, RunError>;

/// Why a lowered function stopped before reaching its normal return.
///
/// `Exc` carries no payload: the exception value lives in the context's
/// pending slot, and the slot alone decides which catch clause applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// An exception is pending in the context; the caller must unwind.
    Exc,
    /// A resource limit was exceeded. Cannot be caught; terminates the context.
    Uncatchable(ResourceError),
    /// Protocol misuse by the calling code, not a language-level exception.
    Internal(Cow<'static, str>),
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exc => write!(f, "exception pending"),
            Self::Uncatchable(err) => write!(f, "{err}"),
            Self::Internal(msg) => write!(f, "internal runtime error: {msg}"),
        }
    }
}

impl std::error::Error for RunError {}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        Self::Uncatchable(err)
    }
}

/// Builtin exception classes.
///
/// Registered first in every [`ClassTable`], in declaration order, so a variant's
/// discriminant is also its class id. The string form matches the class name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter)]
pub enum ExcType {
    /// Root of the hierarchy; catches every exception.
    Exception,
    ErrorException,

    // --- LogicException hierarchy ---
    LogicException,
    BadFunctionCallException,
    /// Subclass of BadFunctionCallException.
    BadMethodCallException,
    DomainException,
    InvalidArgumentException,
    LengthException,
    OutOfRangeException,

    // --- RuntimeException hierarchy ---
    RuntimeException,
    OutOfBoundsException,
    OverflowException,
    RangeException,
    UnderflowException,
    UnexpectedValueException,
}

impl ExcType {
    /// The direct parent class, `None` for the root.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::Exception => None,
            Self::ErrorException | Self::LogicException | Self::RuntimeException => Some(Self::Exception),
            Self::BadFunctionCallException
            | Self::DomainException
            | Self::InvalidArgumentException
            | Self::LengthException
            | Self::OutOfRangeException => Some(Self::LogicException),
            Self::BadMethodCallException => Some(Self::BadFunctionCallException),
            Self::OutOfBoundsException
            | Self::OverflowException
            | Self::RangeException
            | Self::UnderflowException
            | Self::UnexpectedValueException => Some(Self::RuntimeException),
        }
    }

    /// Returns true if `self` would be caught by `catch (handler_type e)`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        let mut current = Some(self);
        while let Some(exc) = current {
            if exc == handler_type {
                return true;
            }
            current = exc.parent();
        }
        false
    }
}

/// Installs `__construct`, `getMessage`, `getCode` and `getPrevious` on the root
/// exception class and the default `message`/`code`/`previous` properties.
pub(crate) fn install_exception_protocol<T: ResourceTracker, Tr: RuntimeTracer>(classes: &mut ClassTable<T, Tr>) {
    let root = ExcType::Exception.into();
    classes.add_property(root, "message", HeapData::Str(String::new()));
    classes.add_property(root, "code", HeapData::Int(0));
    classes.add_property(root, "previous", HeapData::Null);
    classes.add_method(root, "__construct", exception_construct);
    classes.add_method(root, "getMessage", exception_get_message);
    classes.add_method(root, "getCode", exception_get_code);
    classes.add_method(root, "getPrevious", exception_get_previous);
}

const CONSTRUCT_SIGNATURE: &str =
    "Wrong parameters for Exception([string $message [, long $code [, Exception $previous = NULL]]])";

/// `Exception::__construct(message = "", code = 0, previous = null)`.
fn exception_construct<T: ResourceTracker, Tr: RuntimeTracer>(
    ctx: &mut Context<T, Tr>,
    this: HeapId,
    args: &[HeapId],
) -> RunResult<Option<Value>> {
    if args.len() > 3 {
        return Err(ctx.throw_new(ExcType::InvalidArgumentException, CONSTRUCT_SIGNATURE));
    }
    if let Some(&message) = args.first() {
        if !matches!(ctx.heap().get(message), HeapData::Str(_)) {
            return Err(ctx.throw_new(ExcType::InvalidArgumentException, CONSTRUCT_SIGNATURE));
        }
        ctx.update_property(this, "message", message);
    }
    if let Some(&code) = args.get(1) {
        if !matches!(ctx.heap().get(code), HeapData::Int(_)) {
            return Err(ctx.throw_new(ExcType::InvalidArgumentException, CONSTRUCT_SIGNATURE));
        }
        ctx.update_property(this, "code", code);
    }
    if let Some(&previous) = args.get(2) {
        let valid = matches!(ctx.heap().get(previous), HeapData::Null)
            || ctx.instance_of(previous, ExcType::Exception.into());
        if !valid {
            return Err(ctx.throw_new(ExcType::InvalidArgumentException, CONSTRUCT_SIGNATURE));
        }
        ctx.update_property(this, "previous", previous);
    }
    Ok(None)
}

fn exception_get_message<T: ResourceTracker, Tr: RuntimeTracer>(
    ctx: &mut Context<T, Tr>,
    this: HeapId,
    _args: &[HeapId],
) -> RunResult<Option<Value>> {
    Ok(ctx.share_property(this, "message"))
}

fn exception_get_code<T: ResourceTracker, Tr: RuntimeTracer>(
    ctx: &mut Context<T, Tr>,
    this: HeapId,
    _args: &[HeapId],
) -> RunResult<Option<Value>> {
    Ok(ctx.share_property(this, "code"))
}

fn exception_get_previous<T: ResourceTracker, Tr: RuntimeTracer>(
    ctx: &mut Context<T, Tr>,
    this: HeapId,
    _args: &[HeapId],
) -> RunResult<Option<Value>> {
    Ok(ctx.share_property(this, "previous"))
}
