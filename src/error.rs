//! Errors reported through the failure channel of the combinators.

use thiserror::Error;

/// Failure of an iteration, a collector or a mapped stream.
///
/// `E` is the error type produced by steps and sources. Every failure reaches
/// the caller exactly once, through the completion [`Callback`](crate::Callback)
/// handed to the combinator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError<E> {
    /// A step resolved with a failure
    #[error("step failed: {0}")]
    Step(E),

    /// A step panicked instead of resolving
    #[error("step panicked: {0}")]
    Panicked(String),

    /// The push source reported an error
    #[error("source failed: {0}")]
    Source(E),

    /// A single-value stream emitted more than one value
    #[error("stream emitted multiple values")]
    MultipleValues,

    /// A single-value stream ended without emitting a value
    #[error("stream ended without a value")]
    ValueMissing,
}

impl<E> FlowError<E> {
    /// Returns the step or source error, if this failure carries one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            FlowError::Step(e) | FlowError::Source(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the carried step or source error.
    pub fn map<E2, F>(self, f: F) -> FlowError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            FlowError::Step(e) => FlowError::Step(f(e)),
            FlowError::Source(e) => FlowError::Source(f(e)),
            FlowError::Panicked(msg) => FlowError::Panicked(msg),
            FlowError::MultipleValues => FlowError::MultipleValues,
            FlowError::ValueMissing => FlowError::ValueMissing,
        }
    }
}

/// Renders a caught panic payload as a message.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}
