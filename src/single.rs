//! Collecting a stream that must emit exactly one value.

use std::{cell::RefCell, rc::Rc};

use tracing::debug;

use crate::{
    callback::{Callback, Settle},
    error::FlowError,
    source::Source,
};

/// Collect the only value emitted by `source`.
///
/// `done` receives the value at end of stream. A second element fails with
/// [`FlowError::MultipleValues`] and pauses the source; an end without any
/// element fails with [`FlowError::ValueMissing`]; a source error fails with
/// [`FlowError::Source`], discarding any value already received.
///
/// # Examples
///
/// ```rust
/// use callback::{single, Callback, ElementQueue, FlowError};
///
/// let queue = ElementQueue::<&str, ()>::produce(|q| {
///     q.send("x");
///     q.end();
/// });
/// let (done, outcome) = Callback::outcome();
/// single(queue, done);
/// assert_eq!(outcome.take(), Some(Ok("x")));
///
/// let empty = ElementQueue::<&str, ()>::produce(|q| q.end());
/// let (done, outcome) = Callback::outcome();
/// single(empty, done);
/// assert_eq!(outcome.take(), Some(Err(FlowError::ValueMissing)));
/// ```
pub fn single<S>(source: S, done: Callback<S::Item, FlowError<S::Error>>)
where
    S: Source + Clone + 'static,
    S::Item: 'static,
    S::Error: 'static,
{
    let settle = Settle::new(done);
    let value: Rc<RefCell<Option<S::Item>>> = Rc::new(RefCell::new(None));

    source.on_error(Box::new({
        let settle = settle.clone();
        let value = Rc::clone(&value);
        move |error| {
            value.borrow_mut().take();
            settle.notify(Err(FlowError::Source(error)));
        }
    }));

    source.on_end(Box::new({
        let settle = settle.clone();
        let value = Rc::clone(&value);
        move || {
            let stored = value.borrow_mut().take();
            match stored {
                Some(stored) => settle.notify(Ok(stored)),
                None => {
                    debug!("single-value stream ended empty");
                    settle.notify(Err(FlowError::ValueMissing));
                }
            }
        }
    }));

    let handle = source.clone();
    source.on_data(Box::new(move |element| {
        if settle.is_settled() {
            return;
        }
        let mut slot = value.borrow_mut();
        if slot.is_none() {
            *slot = Some(element);
            return;
        }
        slot.take();
        drop(slot);

        debug!("single-value stream emitted a second value");
        handle.pause();
        settle.notify(Err(FlowError::MultipleValues));
    }));
}
