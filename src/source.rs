//! Push sources with pause/resume flow control.
//!
//! A [`Source`] pushes elements to a registered data handler and announces
//! its end or its failure through one-shot handlers. Consumers apply
//! backpressure with [`Source::pause`] and [`Source::resume`].
//!
//! Methods take `&self`: handlers routinely call back into the source they
//! are registered on (a data handler pausing its own source), so
//! implementations use interior mutability and must not hold a borrow while
//! running a handler.

use std::rc::Rc;

/// Handler receiving each pushed element.
pub type DataHandler<T> = Box<dyn FnMut(T)>;
/// Handler receiving a source failure.
pub type ErrorHandler<E> = Box<dyn FnOnce(E)>;
/// Handler notified at end of stream.
pub type EndHandler = Box<dyn FnOnce()>;

/// Pausable push stream.
pub trait Source {
    /// Element type pushed to the data handler
    type Item;
    /// Error type reported to the error handler
    type Error;

    /// Register the data handler.
    fn on_data(&self, handler: DataHandler<Self::Item>);

    /// Register the error handler.
    fn on_error(&self, handler: ErrorHandler<Self::Error>);

    /// Register the end-of-stream handler.
    fn on_end(&self, handler: EndHandler);

    /// Stop delivering elements until [`resume`](Source::resume). Idempotent.
    fn pause(&self);

    /// Restart delivery. Idempotent.
    fn resume(&self);
}

impl<S> Source for Rc<S>
where
    S: Source + ?Sized,
{
    type Item = S::Item;
    type Error = S::Error;

    fn on_data(&self, handler: DataHandler<Self::Item>) {
        (**self).on_data(handler)
    }

    fn on_error(&self, handler: ErrorHandler<Self::Error>) {
        (**self).on_error(handler)
    }

    fn on_end(&self, handler: EndHandler) {
        (**self).on_end(handler)
    }

    fn pause(&self) {
        (**self).pause()
    }

    fn resume(&self) {
        (**self).resume()
    }
}

impl<T, E> Source for Box<dyn Source<Item = T, Error = E>> {
    type Item = T;
    type Error = E;

    fn on_data(&self, handler: DataHandler<T>) {
        (**self).on_data(handler)
    }

    fn on_error(&self, handler: ErrorHandler<E>) {
        (**self).on_error(handler)
    }

    fn on_end(&self, handler: EndHandler) {
        (**self).on_end(handler)
    }

    fn pause(&self) {
        (**self).pause()
    }

    fn resume(&self) {
        (**self).resume()
    }
}
