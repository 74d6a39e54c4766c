use std::fmt;

use serde::Serialize;

use crate::{exception_private::RunError, resource::ResourceError};

/// An exception that reached the host boundary uncaught.
///
/// A detached copy: the heap object it was read from has already been released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exception {
    /// Declared name of the exception's class.
    pub class_name: String,
    pub message: String,
    pub code: i64,
    /// The exception passed as `previous` to the constructor, if any.
    pub previous: Option<Box<Exception>>,
}

impl Exception {
    /// Iterates the previous-exception chain, starting with `self`.
    pub fn chain(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |exc| exc.previous.as_deref())
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class_name, self.message)
    }
}

impl std::error::Error for Exception {}

/// Error returned by [`Context::run_top_level`](crate::Context::run_top_level).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// An exception propagated past the outermost activation.
    Exception(Exception),
    /// A resource limit terminated execution.
    Resource(ResourceError),
    /// The lowered code broke the calling convention.
    Internal(String),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(exc) => write!(f, "uncaught {exc}"),
            Self::Resource(error) => write!(f, "{error}"),
            Self::Internal(msg) => write!(f, "internal runtime error: {msg}"),
        }
    }
}

impl std::error::Error for ExecError {}

impl From<Exception> for ExecError {
    fn from(exc: Exception) -> Self {
        Self::Exception(exc)
    }
}

impl From<ResourceError> for ExecError {
    fn from(error: ResourceError) -> Self {
        Self::Resource(error)
    }
}

impl ExecError {
    /// Converts a non-exception [`RunError`]; `Exc` needs the context to describe it.
    pub(crate) fn from_abort(error: RunError) -> Self {
        match error {
            RunError::Uncatchable(error) => Self::Resource(error),
            RunError::Internal(msg) => Self::Internal(msg.into_owned()),
            RunError::Exc => Self::Internal("exception marker without a pending exception".to_owned()),
        }
    }
}
