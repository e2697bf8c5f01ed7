//! Trampolined sequential iteration over a finite sequence.
//!
//! [`for_each`] dispatches each element to an asynchronous step and waits for
//! the step's callback before dispatching the next one. Steps may resolve
//! before returning (synchronously) or later from the event loop; either
//! way the call stack stays flat.
//!
//! The driving loop runs on whichever stack started it. A step resolving
//! while the loop is active only records its completion; the loop notices
//! after the step returns and dispatches the next element itself. A step
//! resolving later, with no loop active, starts a new loop on its own stack.

use std::{
    cell::{Cell, RefCell},
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

use tracing::{debug, trace};

use crate::{
    callback::Callback,
    error::{panic_message, FlowError},
};

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    /// Elements dispatched so far
    cursor: usize,
    /// Steps that resolved successfully
    completed: usize,
    /// A driving loop is active on the current stack
    driving: bool,
    /// The completion callback has fired
    settled: bool,
}

struct Iteration<It, F, E> {
    elements: RefCell<It>,
    step: RefCell<F>,
    progress: Cell<Progress>,
    done: RefCell<Option<Callback<(), FlowError<E>>>>,
    /// Terminal result recorded while a driving loop is active
    result: RefCell<Option<Result<(), FlowError<E>>>>,
}

/// Run `step` over `elements` one at a time, in order.
///
/// `step` receives each element with a callback it must notify exactly once.
/// The next element is dispatched only after the previous step reported
/// success. The first failure stops the iteration and is reported through
/// `done` as [`FlowError::Step`]; a panicking step is reported as
/// [`FlowError::Panicked`]. When every step succeeded `done` receives
/// `Ok(())`. An empty sequence completes immediately.
///
/// # Examples
///
/// ```rust
/// use callback::{for_each, Callback};
/// use std::{cell::RefCell, rc::Rc};
///
/// let log = Rc::new(RefCell::new(Vec::new()));
/// let (done, outcome) = Callback::outcome();
///
/// for_each(
///     vec!["a", "b", "c"],
///     {
///         let log = log.clone();
///         move |element, resolve: Callback<(), ()>| {
///             log.borrow_mut().push(element);
///             resolve.ok(());
///         }
///     },
///     done,
/// );
///
/// assert_eq!(*log.borrow(), ["a", "b", "c"]);
/// assert_eq!(outcome.take(), Some(Ok(())));
/// ```
pub fn for_each<I, F, E>(elements: I, step: F, done: Callback<(), FlowError<E>>)
where
    I: IntoIterator,
    I::IntoIter: 'static,
    F: FnMut(I::Item, Callback<(), E>) + 'static,
    E: 'static,
{
    let iteration = Rc::new(Iteration {
        elements: RefCell::new(elements.into_iter()),
        step: RefCell::new(step),
        progress: Cell::new(Progress::default()),
        done: RefCell::new(Some(done)),
        result: RefCell::new(None),
    });
    iteration.drive();
}

impl<It, F, E> Iteration<It, F, E>
where
    It: Iterator + 'static,
    F: FnMut(It::Item, Callback<(), E>) + 'static,
    E: 'static,
{
    fn drive(self: &Rc<Self>) {
        let mut progress = self.progress.get();
        if progress.driving || progress.settled {
            return;
        }
        progress.driving = true;
        self.progress.set(progress);

        loop {
            let next = self.elements.borrow_mut().next();
            let Some(element) = next else {
                // Only reached with every dispatched step completed.
                let progress = self.progress.get();
                debug!(elements = progress.completed, "iteration complete");
                self.settle(Ok(()));
                break;
            };

            let mut progress = self.progress.get();
            let index = progress.cursor;
            progress.cursor += 1;
            self.progress.set(progress);

            trace!(index, "dispatching element");
            self.dispatch(index, element);

            let progress = self.progress.get();
            if progress.settled || progress.completed < progress.cursor {
                break;
            }
        }

        let mut progress = self.progress.get();
        progress.driving = false;
        self.progress.set(progress);

        // Outside any step's unwind boundary: a panicking `done` reaches the caller.
        self.deliver();
    }

    fn dispatch(self: &Rc<Self>, index: usize, element: It::Item) {
        let resolve = self.resolver(index);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            (*self.step.borrow_mut())(element, resolve)
        }));
        if let Err(payload) = outcome {
            let message = panic_message(payload);
            debug!(index, %message, "step panicked");
            self.settle(Err(FlowError::Panicked(message)));
        }
    }

    fn resolver(self: &Rc<Self>, index: usize) -> Callback<(), E> {
        let iteration = Rc::clone(self);
        Callback::new(move |result| iteration.resolve(index, result))
    }

    fn resolve(self: &Rc<Self>, index: usize, result: Result<(), E>) {
        match result {
            Ok(()) => {
                let mut progress = self.progress.get();
                if progress.settled {
                    return;
                }
                progress.completed += 1;
                self.progress.set(progress);
                if !progress.driving {
                    self.drive();
                }
            }
            Err(error) => {
                debug!(index, "step failed");
                self.settle(Err(FlowError::Step(error)));
            }
        }
    }

    fn settle(&self, result: Result<(), FlowError<E>>) {
        let mut progress = self.progress.get();
        if progress.settled {
            return;
        }
        progress.settled = true;
        self.progress.set(progress);

        *self.result.borrow_mut() = Some(result);
        if !progress.driving {
            self.deliver();
        }
    }

    fn deliver(&self) {
        let result = self.result.borrow_mut().take();
        let done = self.done.borrow_mut().take();
        if let (Some(result), Some(done)) = (result, done) {
            done.notify(result);
        }
    }
}
