//! One-shot completion signals.
//!
//! A [`Callback<T, E>`] carries exactly one outcome, success with a `T` or
//! failure with an `E`, to whoever is waiting on an asynchronous operation.
//! Notifying consumes the callback, so a second notification cannot be
//! expressed.
//!
//! # Examples
//!
//! ```rust
//! use callback::Callback;
//!
//! let (cb, outcome) = Callback::<u32, String>::outcome();
//! let doubled = cb.map(|n: u32| n * 2);
//! doubled.ok(21);
//! assert_eq!(outcome.take(), Some(Ok(42)));
//! ```

use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

type Handler<T, E> = Box<dyn FnOnce(Result<T, E>)>;

/// A one-shot success-or-failure notification.
///
/// Dropping a callback that was never notified is a contract violation by
/// whoever held it; it is logged as a warning.
pub struct Callback<T, E> {
    handler: Option<Handler<T, E>>,
}

impl<T: 'static, E: 'static> Callback<T, E> {
    /// Create a callback from a handler receiving the result.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Result<T, E>) + 'static,
    {
        Self {
            handler: Some(Box::new(f)),
        }
    }

    /// Create a callback from separate success and failure handlers.
    ///
    /// ```rust
    /// use callback::Callback;
    /// use std::{cell::Cell, rc::Rc};
    ///
    /// let seen = Rc::new(Cell::new(0));
    /// let cb = Callback::<u32, ()>::split(
    ///     { let seen = seen.clone(); move |n| seen.set(n) },
    ///     |_| unreachable!(),
    /// );
    /// cb.ok(7);
    /// assert_eq!(seen.get(), 7);
    /// ```
    pub fn split<D, X>(on_done: D, on_fail: X) -> Self
    where
        D: FnOnce(T) + 'static,
        X: FnOnce(E) + 'static,
    {
        Self::new(move |result| match result {
            Ok(value) => on_done(value),
            Err(error) => on_fail(error),
        })
    }

    /// Create a callback together with an [`Outcome`] that records its result.
    pub fn outcome() -> (Self, Outcome<T, E>) {
        let outcome = Outcome::new();
        let slot = outcome.clone();
        (Self::new(move |result| slot.store(result)), outcome)
    }

    /// Deliver the result.
    pub fn notify(mut self, result: Result<T, E>) {
        if let Some(handler) = self.handler.take() {
            handler(result);
        }
    }

    /// Deliver a success.
    pub fn ok(self, value: T) {
        self.notify(Ok(value))
    }

    /// Deliver a failure.
    pub fn fail(self, error: E) {
        self.notify(Err(error))
    }

    /// Continue with another asynchronous operation producing an `R`.
    ///
    /// The returned callback forwards a failure to `self` unchanged. On
    /// success `f` receives the value together with `self`, and becomes
    /// responsible for notifying it.
    ///
    /// ```rust
    /// use callback::Callback;
    ///
    /// let (cb, outcome) = Callback::<String, &str>::outcome();
    /// let inner: Callback<u32, &str> = cb.and_then(|n: u32, cb| cb.ok(format!("got {n}")));
    /// inner.ok(3);
    /// assert_eq!(outcome.take(), Some(Ok("got 3".to_string())));
    /// ```
    pub fn and_then<R, F>(self, f: F) -> Callback<R, E>
    where
        R: 'static,
        F: FnOnce(R, Callback<T, E>) + 'static,
    {
        Callback::new(move |result| match result {
            Ok(value) => f(value, self),
            Err(error) => self.fail(error),
        })
    }

    /// Adapt a callback expecting `T` into one accepting `R`.
    pub fn map<R, F>(self, f: F) -> Callback<R, E>
    where
        R: 'static,
        F: FnOnce(R) -> T + 'static,
    {
        Callback::new(move |result: Result<R, E>| self.notify(result.map(f)))
    }

    /// Adapt a callback expecting failures of `E` into one accepting `E2`.
    pub fn map_err<E2, F>(self, f: F) -> Callback<T, E2>
    where
        E2: 'static,
        F: FnOnce(E2) -> E + 'static,
    {
        Callback::new(move |result: Result<T, E2>| self.notify(result.map_err(f)))
    }

    /// Convert into a plain result handler, the shape a reactor's completion
    /// hook accepts.
    pub fn into_handler(self) -> impl FnOnce(Result<T, E>) {
        move |result| self.notify(result)
    }
}

impl<T, E> Drop for Callback<T, E> {
    fn drop(&mut self) {
        if self.handler.is_some() && !std::thread::panicking() {
            tracing::warn!("callback dropped without being notified");
        }
    }
}

impl<T, E> fmt::Debug for Callback<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("pending", &self.handler.is_some())
            .finish()
    }
}

/// Callback shared between several handlers; the first to notify wins.
pub(crate) struct Settle<T, E> {
    callback: Rc<RefCell<Option<Callback<T, E>>>>,
}

impl<T: 'static, E: 'static> Settle<T, E> {
    pub(crate) fn new(callback: Callback<T, E>) -> Self {
        Self {
            callback: Rc::new(RefCell::new(Some(callback))),
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.callback.borrow().is_none()
    }

    pub(crate) fn notify(&self, result: Result<T, E>) {
        let callback = self.callback.borrow_mut().take();
        if let Some(callback) = callback {
            callback.notify(result);
        }
    }
}

impl<T, E> Clone for Settle<T, E> {
    fn clone(&self) -> Self {
        Self {
            callback: Rc::clone(&self.callback),
        }
    }
}

/// Observable slot filled by a callback created with [`Callback::outcome`].
pub struct Outcome<T, E> {
    slot: Rc<RefCell<Option<Result<T, E>>>>,
    notified: Rc<Cell<usize>>,
}

impl<T, E> Outcome<T, E> {
    fn new() -> Self {
        Self {
            slot: Rc::new(RefCell::new(None)),
            notified: Rc::new(Cell::new(0)),
        }
    }

    fn store(&self, result: Result<T, E>) {
        self.notified.set(self.notified.get() + 1);
        *self.slot.borrow_mut() = Some(result);
    }

    /// Returns `true` once the callback has been notified.
    pub fn is_ready(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Number of times the paired callback delivered a result.
    pub fn notifications(&self) -> usize {
        self.notified.get()
    }

    /// Take the delivered result, if any.
    pub fn take(&self) -> Option<Result<T, E>> {
        self.slot.borrow_mut().take()
    }
}

impl<T: Clone, E: Clone> Outcome<T, E> {
    /// Copy of the delivered result, if any.
    pub fn get(&self) -> Option<Result<T, E>> {
        self.slot.borrow().clone()
    }
}

impl<T, E> Clone for Outcome<T, E> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
            notified: Rc::clone(&self.notified),
        }
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for Outcome<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcome")
            .field("result", &self.slot.borrow())
            .finish()
    }
}
