//! Buffered push/pull stream adapter.
//!
//! An [`ElementQueue`] turns a producer calling [`send`](ElementQueue::send),
//! [`end`](ElementQueue::end) and [`fail`](ElementQueue::fail) into a
//! [`Source`] a consumer attaches to whenever it is ready. Elements sent
//! before a consumer is attached, or while it is paused, are buffered and
//! delivered in order once delivery resumes.
//!
//! # Examples
//!
//! ```rust
//! use callback::ElementQueue;
//! use std::{cell::RefCell, rc::Rc};
//!
//! let queue = ElementQueue::<&str, ()>::new();
//! queue.send("a");
//! queue.send("b");
//! queue.end();
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! queue.attach(
//!     { let seen = seen.clone(); move |v| seen.borrow_mut().push(v) },
//!     |_| {},
//!     { let seen = seen.clone(); move || seen.borrow_mut().push("end") },
//! );
//! assert_eq!(*seen.borrow(), ["a", "b", "end"]);
//! ```

use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

use tracing::{debug, trace};

use crate::source::{DataHandler, EndHandler, ErrorHandler, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    /// Producer ended; the end event waits for the buffer to drain.
    EndPending,
    Ended,
    Failed,
}

struct Inner<T, E> {
    buffer: VecDeque<T>,
    paused: bool,
    phase: Phase,
    flushing: bool,
    undelivered_error: Option<E>,
    on_data: Option<DataHandler<T>>,
    on_error: Option<ErrorHandler<E>>,
    on_end: Option<EndHandler>,
}

/// Pausable, internally buffered stream fed by a producer.
///
/// Cloning yields another handle to the same queue; the producer keeps one
/// handle and the consumer another.
pub struct ElementQueue<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> ElementQueue<T, E> {
    /// Create an empty queue. It starts paused until a consumer attaches.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty queue with room for `capacity` buffered elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                buffer: VecDeque::with_capacity(capacity),
                paused: true,
                phase: Phase::Open,
                flushing: false,
                undelivered_error: None,
                on_data: None,
                on_error: None,
                on_end: None,
            })),
        }
    }

    /// Create a queue, let `producer` start feeding it, and return it for
    /// consumption.
    pub fn produce<F>(producer: F) -> Self
    where
        F: FnOnce(&ElementQueue<T, E>),
    {
        let queue = Self::new();
        producer(&queue);
        queue
    }

    /// Bind a consumer and start delivery.
    ///
    /// Buffered elements are flushed right away, followed by the end event if
    /// the producer already ended.
    pub fn attach<D, X, N>(&self, on_data: D, on_error: X, on_end: N)
    where
        D: FnMut(T) + 'static,
        X: FnOnce(E) + 'static,
        N: FnOnce() + 'static,
    {
        self.on_error(Box::new(on_error));
        self.on_end(Box::new(on_end));
        self.on_data(Box::new(on_data));
    }

    /// Push an element. Ignored once the queue has ended or failed.
    pub fn send(&self, element: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.phase != Phase::Open {
                debug!(phase = ?inner.phase, "dropping element sent after end of stream");
                return;
            }
            inner.buffer.push_back(element);
        }
        self.flush();
    }

    /// Signal end of stream.
    ///
    /// The end event fires once every buffered element has been delivered
    /// and the queue is not paused.
    pub fn end(&self) {
        let fire = {
            let mut inner = self.inner.borrow_mut();
            if inner.phase != Phase::Open {
                return;
            }
            if inner.buffer.is_empty() && !inner.paused && !inner.flushing && inner.on_end.is_some()
            {
                inner.phase = Phase::Ended;
                inner.on_data = None;
                inner.on_end.take()
            } else {
                inner.phase = Phase::EndPending;
                None
            }
        };
        if let Some(on_end) = fire {
            debug!("element queue ended");
            on_end();
        }
    }

    /// Fail the stream.
    ///
    /// The buffer is discarded and no further element or end event is
    /// delivered. If no error handler is registered yet, the error is kept
    /// until one is.
    pub fn fail(&self, error: E) {
        let handler = {
            let mut inner = self.inner.borrow_mut();
            if matches!(inner.phase, Phase::Ended | Phase::Failed) {
                return;
            }
            inner.phase = Phase::Failed;
            inner.paused = true;
            inner.buffer.clear();
            inner.on_data = None;
            inner.on_end = None;
            match inner.on_error.take() {
                Some(handler) => handler,
                None => {
                    inner.undelivered_error = Some(error);
                    return;
                }
            }
        };
        debug!("element queue failed");
        handler(error);
    }

    /// Returns `true` once the producer called [`end`](Self::end) or
    /// [`fail`](Self::fail); later sends are ignored.
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().phase != Phase::Open
    }

    /// Returns `true` while delivery is paused.
    pub fn is_paused(&self) -> bool {
        self.inner.borrow().paused
    }

    /// Number of buffered elements awaiting delivery.
    pub fn len(&self) -> usize {
        self.inner.borrow().buffer.len()
    }

    /// Returns `true` if no element is buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().buffer.is_empty()
    }

    /// Deliver buffered elements while unpaused, then the end event if due.
    ///
    /// A flush requested from inside a handler returns immediately; the
    /// outer flush picks up whatever the handler made deliverable. A
    /// panicking handler stays registered and the panic propagates to the
    /// caller.
    fn flush(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.flushing {
                return;
            }
            inner.flushing = true;
        }

        loop {
            let next = {
                let mut inner = self.inner.borrow_mut();
                if inner.paused || inner.on_data.is_none() {
                    None
                } else {
                    match inner.buffer.pop_front() {
                        Some(element) => inner.on_data.take().map(|handler| (handler, element)),
                        None => None,
                    }
                }
            };
            let Some((mut handler, element)) = next else {
                break;
            };

            trace!("element queue delivering element");
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| handler(element)));

            {
                let mut inner = self.inner.borrow_mut();
                if inner.on_data.is_none() && matches!(inner.phase, Phase::Open | Phase::EndPending)
                {
                    inner.on_data = Some(handler);
                }
                if delivered.is_err() {
                    inner.flushing = false;
                }
            }
            if let Err(payload) = delivered {
                panic::resume_unwind(payload);
            }
        }

        let fire = {
            let mut inner = self.inner.borrow_mut();
            inner.flushing = false;
            if inner.phase == Phase::EndPending
                && !inner.paused
                && inner.buffer.is_empty()
                && inner.on_end.is_some()
            {
                inner.phase = Phase::Ended;
                inner.on_data = None;
                inner.on_end.take()
            } else {
                None
            }
        };
        if let Some(on_end) = fire {
            debug!("element queue ended");
            on_end();
        }
    }
}

impl<T, E> Source for ElementQueue<T, E> {
    type Item = T;
    type Error = E;

    /// Registering the data handler resumes delivery.
    fn on_data(&self, handler: DataHandler<T>) {
        {
            let mut inner = self.inner.borrow_mut();
            if matches!(inner.phase, Phase::Ended | Phase::Failed) {
                return;
            }
            inner.on_data = Some(handler);
        }
        self.resume();
    }

    fn on_error(&self, handler: ErrorHandler<E>) {
        let undelivered = self.inner.borrow_mut().undelivered_error.take();
        match undelivered {
            Some(error) => handler(error),
            None => self.inner.borrow_mut().on_error = Some(handler),
        }
    }

    fn on_end(&self, handler: EndHandler) {
        {
            let mut inner = self.inner.borrow_mut();
            if matches!(inner.phase, Phase::Ended | Phase::Failed) {
                return;
            }
            inner.on_end = Some(handler);
        }
        self.flush();
    }

    fn pause(&self) {
        self.inner.borrow_mut().paused = true;
    }

    fn resume(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.phase == Phase::Failed {
                return;
            }
            inner.paused = false;
        }
        self.flush();
    }
}

impl<T, E> Default for ElementQueue<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for ElementQueue<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for ElementQueue<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ElementQueue")
            .field("buffered", &inner.buffer.len())
            .field("paused", &inner.paused)
            .field("phase", &inner.phase)
            .finish()
    }
}
