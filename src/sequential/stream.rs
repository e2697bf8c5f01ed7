//! Sequential iteration over a live push source.
//!
//! Backpressure replaces the cursor of [`for_each`](super::for_each): the
//! source is paused as soon as an element arrives and resumed only after the
//! step for that element reported success.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

use tracing::{debug, trace};

use crate::{
    callback::Callback,
    error::{panic_message, FlowError},
    queue::ElementQueue,
    source::Source,
};

type Emit<U> = Box<dyn FnMut(U)>;
type Finish<E> = Box<dyn FnOnce(Result<(), FlowError<E>>)>;

#[derive(Debug, Clone, Copy, Default)]
struct PumpState {
    /// A step was dispatched and has not completed yet
    in_flight: bool,
    /// The step function is on the stack
    stepping: bool,
    /// The source ended while a step was in flight
    end_pending: bool,
    settled: bool,
}

/// Drives one step at a time over a push source.
///
/// Results a step reports before returning are parked in `early` and
/// handled once the step has returned. `finish` never runs inside the step's
/// unwind boundary.
struct Pump<S: Source, U, F> {
    source: S,
    step: RefCell<F>,
    emit: RefCell<Emit<U>>,
    finish: RefCell<Option<Finish<S::Error>>>,
    state: Cell<PumpState>,
    early: RefCell<Option<Result<U, S::Error>>>,
    /// Elements pushed by a source that ignored `pause`
    backlog: RefCell<VecDeque<S::Item>>,
}

fn pump<S, U, F>(source: S, step: F, emit: Emit<U>, finish: Finish<S::Error>)
where
    S: Source + Clone + 'static,
    S::Item: 'static,
    S::Error: 'static,
    U: 'static,
    F: FnMut(S::Item, Callback<U, S::Error>) + 'static,
{
    let pump = Rc::new(Pump {
        source: source.clone(),
        step: RefCell::new(step),
        emit: RefCell::new(emit),
        finish: RefCell::new(Some(finish)),
        state: Cell::new(PumpState::default()),
        early: RefCell::new(None),
        backlog: RefCell::new(VecDeque::new()),
    });

    source.on_error(Box::new({
        let pump = Rc::clone(&pump);
        move |error| {
            debug!("stream source failed");
            pump.fail(FlowError::Source(error));
        }
    }));
    source.on_end(Box::new({
        let pump = Rc::clone(&pump);
        move || pump.end()
    }));
    source.on_data(Box::new(move |element| pump.receive(element)));
}

impl<S, U, F> Pump<S, U, F>
where
    S: Source + 'static,
    S::Item: 'static,
    S::Error: 'static,
    U: 'static,
    F: FnMut(S::Item, Callback<U, S::Error>) + 'static,
{
    fn update(&self, f: impl FnOnce(&mut PumpState)) {
        let mut state = self.state.get();
        f(&mut state);
        self.state.set(state);
    }

    fn receive(self: &Rc<Self>, element: S::Item) {
        let state = self.state.get();
        if state.settled {
            self.source.pause();
            return;
        }
        if state.in_flight {
            trace!("source pushed an element while paused; holding it back");
            self.backlog.borrow_mut().push_back(element);
            return;
        }
        self.run(element);
    }

    /// Dispatch `element`, then keep going for as long as steps resolve
    /// before returning.
    fn run(self: &Rc<Self>, mut element: S::Item) {
        loop {
            let Some(result) = self.dispatch(element) else {
                return;
            };
            if !self.complete(result) {
                return;
            }
            let next = self.backlog.borrow_mut().pop_front();
            match next {
                Some(next) => element = next,
                None => return self.idle(),
            }
        }
    }

    /// Run the step for one element. Returns its result if the step
    /// resolved before returning.
    fn dispatch(self: &Rc<Self>, element: S::Item) -> Option<Result<U, S::Error>> {
        self.source.pause();
        self.update(|state| {
            state.in_flight = true;
            state.stepping = true;
        });
        trace!("dispatching stream element");

        let resolve = {
            let pump = Rc::clone(self);
            Callback::new(move |result| pump.resolve(result))
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            (*self.step.borrow_mut())(element, resolve)
        }));
        self.update(|state| state.stepping = false);

        if let Err(payload) = outcome {
            let message = panic_message(payload);
            debug!(%message, "stream step panicked");
            self.early.borrow_mut().take();
            self.fail(FlowError::Panicked(message));
            return None;
        }
        self.early.borrow_mut().take()
    }

    fn resolve(self: &Rc<Self>, result: Result<U, S::Error>) {
        let state = self.state.get();
        if state.settled {
            return;
        }
        if state.stepping {
            *self.early.borrow_mut() = Some(result);
            return;
        }
        if !self.complete(result) {
            return;
        }
        let next = self.backlog.borrow_mut().pop_front();
        match next {
            Some(next) => self.run(next),
            None => self.idle(),
        }
    }

    /// Record the result of the step in flight. Returns `true` if iteration
    /// continues.
    fn complete(&self, result: Result<U, S::Error>) -> bool {
        if self.state.get().settled {
            return false;
        }
        match result {
            Ok(value) => {
                (*self.emit.borrow_mut())(value);
                self.update(|state| state.in_flight = false);
                !self.state.get().settled
            }
            Err(error) => {
                debug!("stream step failed");
                self.fail(FlowError::Step(error));
                false
            }
        }
    }

    /// No step in flight and nothing held back: finish a deferred end or ask
    /// the source for more.
    fn idle(&self) {
        let state = self.state.get();
        if state.settled {
            return;
        }
        if state.end_pending {
            debug!("stream iteration complete");
            self.settle(Ok(()));
        } else {
            self.source.resume();
        }
    }

    fn end(&self) {
        let state = self.state.get();
        if state.settled {
            return;
        }
        if state.in_flight || !self.backlog.borrow().is_empty() {
            trace!("end of stream waits for the step in flight");
            self.update(|state| state.end_pending = true);
            return;
        }
        debug!("stream iteration complete");
        self.settle(Ok(()));
    }

    fn fail(&self, error: FlowError<S::Error>) {
        if self.state.get().settled {
            return;
        }
        self.source.pause();
        self.backlog.borrow_mut().clear();
        self.settle(Err(error));
    }

    fn settle(&self, result: Result<(), FlowError<S::Error>>) {
        self.update(|state| state.settled = true);
        let finish = self.finish.borrow_mut().take();
        if let Some(finish) = finish {
            finish(result);
        }
    }
}

/// Run `step` over every element pushed by `source`, one at a time.
///
/// Each element pauses the source before its step runs; a successful step
/// resumes it. Elements pushed by a source that does not honour `pause` are
/// held back and stepped in order. `done` receives `Ok(())` once the source
/// ended and the last step succeeded, or the first of a step failure
/// ([`FlowError::Step`]), a step panic ([`FlowError::Panicked`]) or a source
/// error ([`FlowError::Source`]). After a failure the source stays paused.
///
/// # Examples
///
/// ```rust
/// use callback::{for_each_stream, Callback, ElementQueue};
/// use std::{cell::RefCell, rc::Rc};
///
/// let queue = ElementQueue::<u32, ()>::new();
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let (done, outcome) = Callback::outcome();
///
/// for_each_stream(
///     queue.clone(),
///     {
///         let seen = seen.clone();
///         move |n, resolve: Callback<(), ()>| {
///             seen.borrow_mut().push(n);
///             resolve.ok(());
///         }
///     },
///     done,
/// );
/// queue.send(1);
/// queue.send(2);
/// queue.end();
///
/// assert_eq!(*seen.borrow(), [1, 2]);
/// assert_eq!(outcome.take(), Some(Ok(())));
/// ```
pub fn for_each_stream<S, F>(source: S, step: F, done: Callback<(), FlowError<S::Error>>)
where
    S: Source + Clone + 'static,
    S::Item: 'static,
    S::Error: 'static,
    F: FnMut(S::Item, Callback<(), S::Error>) + 'static,
{
    pump(
        source,
        step,
        Box::new(|()| {}),
        Box::new(move |result| done.notify(result)),
    );
}

/// Map every element of `source` through an asynchronous step.
///
/// Elements are processed one at a time with the same pause/resume
/// discipline as [`for_each_stream`]. Each step's result is pushed into the
/// returned queue. The queue ends after the last mapped value; a step
/// failure, a panic or a source error fails it.
///
/// # Examples
///
/// ```rust
/// use callback::{map_stream, Callback, ElementQueue};
/// use std::{cell::RefCell, rc::Rc};
///
/// let input = ElementQueue::<u32, ()>::new();
/// let output = map_stream(input.clone(), |n, resolve: Callback<String, ()>| {
///     resolve.ok(format!("#{n}"))
/// });
/// input.send(1);
/// input.send(2);
/// input.end();
///
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// output.attach(
///     { let seen = seen.clone(); move |s| seen.borrow_mut().push(s) },
///     |_| {},
///     || {},
/// );
/// assert_eq!(*seen.borrow(), ["#1", "#2"]);
/// ```
pub fn map_stream<S, U, F>(source: S, step: F) -> ElementQueue<U, FlowError<S::Error>>
where
    S: Source + Clone + 'static,
    S::Item: 'static,
    S::Error: 'static,
    U: 'static,
    F: FnMut(S::Item, Callback<U, S::Error>) + 'static,
{
    let output: ElementQueue<U, FlowError<S::Error>> = ElementQueue::new();

    let sink = output.clone();
    let finish = output.clone();
    pump(
        source,
        step,
        Box::new(move |value| sink.send(value)),
        Box::new(move |result: Result<(), FlowError<S::Error>>| match result {
            Ok(()) => finish.end(),
            Err(error) => {
                debug!("mapping stream failed");
                finish.fail(error)
            }
        }),
    );

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        source::{DataHandler, EndHandler, ErrorHandler},
        testing::EventLoop,
    };
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Source that pushes straight to its handlers, ignoring `pause`.
    #[derive(Clone, Default)]
    struct Live {
        handlers: Rc<RefCell<LiveHandlers>>,
    }

    #[derive(Default)]
    struct LiveHandlers {
        data: Option<DataHandler<u32>>,
        end: Option<EndHandler>,
        paused: bool,
    }

    impl Live {
        fn push(&self, n: u32) {
            let handler = self.handlers.borrow_mut().data.take();
            if let Some(mut handler) = handler {
                handler(n);
                let mut handlers = self.handlers.borrow_mut();
                if handlers.data.is_none() {
                    handlers.data = Some(handler);
                }
            }
        }

        fn end(&self) {
            let handler = self.handlers.borrow_mut().end.take();
            if let Some(handler) = handler {
                handler();
            }
        }

        fn is_paused(&self) -> bool {
            self.handlers.borrow().paused
        }
    }

    impl Source for Live {
        type Item = u32;
        type Error = &'static str;

        fn on_data(&self, handler: DataHandler<u32>) {
            self.handlers.borrow_mut().data = Some(handler);
        }

        fn on_error(&self, _handler: ErrorHandler<&'static str>) {}

        fn on_end(&self, handler: EndHandler) {
            self.handlers.borrow_mut().end = Some(handler);
        }

        fn pause(&self) {
            self.handlers.borrow_mut().paused = true;
        }

        fn resume(&self) {
            self.handlers.borrow_mut().paused = false;
        }
    }

    /// Step that parks its callback until the test resolves it.
    fn parked<T: 'static>(
        slot: &Rc<RefCell<Option<Callback<T, &'static str>>>>,
        log: &Rc<RefCell<Vec<u32>>>,
    ) -> impl FnMut(u32, Callback<T, &'static str>) + 'static {
        let slot = Rc::clone(slot);
        let log = Rc::clone(log);
        move |n, resolve| {
            log.borrow_mut().push(n);
            *slot.borrow_mut() = Some(resolve);
        }
    }

    fn letters() -> ElementQueue<&'static str, &'static str> {
        ElementQueue::produce(|q| {
            for letter in ["a", "b", "c", "d"] {
                q.send(letter);
            }
            q.end();
        })
    }

    #[test]
    fn test_for_each_stream_buffered_source() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (done, outcome) = Callback::outcome();

        for_each_stream(
            letters(),
            {
                let log = Rc::clone(&log);
                move |element, resolve: Callback<(), &str>| {
                    log.borrow_mut().push(element);
                    resolve.ok(());
                }
            },
            done,
        );

        assert_eq!(*log.borrow(), ["a", "b", "c", "d"]);
        assert_eq!(outcome.take(), Some(Ok(())));
    }

    #[test]
    fn test_for_each_stream_step_failure_leaves_source_paused() {
        let source = letters();
        let log = Rc::new(RefCell::new(Vec::new()));
        let (done, outcome) = Callback::outcome();

        for_each_stream(
            source.clone(),
            {
                let log = Rc::clone(&log);
                move |element, resolve: Callback<(), &str>| {
                    if element == "c" {
                        resolve.fail("E");
                    } else {
                        log.borrow_mut().push(element);
                        resolve.ok(());
                    }
                }
            },
            done,
        );

        assert_eq!(*log.borrow(), ["a", "b"]);
        assert_eq!(outcome.take(), Some(Err(FlowError::Step("E"))));
        assert!(source.is_paused());
        assert_eq!(source.len(), 1);
    }

    #[test]
    fn test_for_each_stream_one_element_in_flight() {
        let event_loop = EventLoop::new();
        let source: ElementQueue<u32, ()> = ElementQueue::new();
        let in_flight = Rc::new(RefCell::new(0_u32));
        let log = Rc::new(RefCell::new(Vec::new()));
        let (done, outcome) = Callback::outcome();

        for_each_stream(
            source.clone(),
            {
                let log = Rc::clone(&log);
                let in_flight = Rc::clone(&in_flight);
                let event_loop = event_loop.clone();
                move |n, resolve: Callback<(), ()>| {
                    *in_flight.borrow_mut() += 1;
                    assert_eq!(*in_flight.borrow(), 1);
                    log.borrow_mut().push(n);
                    let in_flight = Rc::clone(&in_flight);
                    event_loop.defer(move || {
                        *in_flight.borrow_mut() -= 1;
                        resolve.ok(());
                    });
                }
            },
            done,
        );

        for n in 0..5 {
            source.send(n);
        }
        source.end();
        assert_eq!(*log.borrow(), [0]);
        assert!(!outcome.is_ready());

        event_loop.run();
        assert_eq!(*log.borrow(), [0, 1, 2, 3, 4]);
        assert_eq!(outcome.take(), Some(Ok(())));
    }

    #[test]
    fn test_for_each_stream_source_error() {
        let source: ElementQueue<u32, &str> = ElementQueue::new();
        let (done, outcome) = Callback::outcome();

        for_each_stream(source.clone(), |_, resolve: Callback<(), &str>| resolve.ok(()), done);
        source.send(1);
        source.fail("disk");
        source.end();

        assert_eq!(outcome.take(), Some(Err(FlowError::Source("disk"))));
        assert_eq!(outcome.notifications(), 1);
    }

    #[test]
    fn test_for_each_stream_panicking_step() {
        let source = letters();
        let (done, outcome) = Callback::<(), FlowError<&str>>::outcome();

        for_each_stream(
            source.clone(),
            |element, resolve: Callback<(), &str>| {
                if element == "b" {
                    panic!("cannot handle {element}");
                }
                resolve.ok(());
            },
            done,
        );

        assert_eq!(
            outcome.take(),
            Some(Err(FlowError::Panicked("cannot handle b".to_string())))
        );
        assert!(source.is_paused());
    }

    #[test]
    fn test_map_stream_transforms_in_order() {
        let event_loop = EventLoop::new();
        let input: ElementQueue<u32, &str> = ElementQueue::new();
        let output = map_stream(input.clone(), {
            let event_loop = event_loop.clone();
            move |n, resolve: Callback<u32, &str>| {
                if n % 2 == 0 {
                    event_loop.defer(move || resolve.ok(n * 10));
                } else {
                    resolve.ok(n * 10);
                }
            }
        });

        let seen = Rc::new(RefCell::new(Vec::new()));
        output.attach(
            {
                let seen = Rc::clone(&seen);
                move |n: u32| seen.borrow_mut().push(n.to_string())
            },
            |_| {},
            {
                let seen = Rc::clone(&seen);
                move || seen.borrow_mut().push("end".to_string())
            },
        );

        for n in 0..4 {
            input.send(n);
        }
        input.end();
        event_loop.run();

        assert_eq!(*seen.borrow(), ["0", "10", "20", "30", "end"]);
    }

    #[test]
    fn test_map_stream_step_failure_fails_output() {
        let input = letters();
        let output = map_stream(input.clone(), |element, resolve: Callback<String, &str>| {
            if element == "b" {
                resolve.fail("bad");
            } else {
                resolve.ok(element.to_uppercase());
            }
        });

        let seen = Rc::new(RefCell::new(Vec::new()));
        output.attach(
            {
                let seen = Rc::clone(&seen);
                move |s: String| seen.borrow_mut().push(s)
            },
            {
                let seen = Rc::clone(&seen);
                move |e: FlowError<&str>| seen.borrow_mut().push(e.to_string())
            },
            || {},
        );

        assert_eq!(*seen.borrow(), ["step failed: bad"]);
        assert!(input.is_paused());
    }

    #[test]
    fn test_for_each_stream_panic_after_resolve_leaves_source_paused() {
        let source: ElementQueue<u32, ()> = ElementQueue::produce(|q| {
            for n in 0..5 {
                q.send(n);
            }
            q.end();
        });
        let (done, outcome) = Callback::<(), FlowError<()>>::outcome();

        for_each_stream(
            source.clone(),
            |n, resolve: Callback<(), ()>| {
                resolve.ok(());
                if n == 1 {
                    panic!("late panic");
                }
            },
            done,
        );

        assert_eq!(
            outcome.take(),
            Some(Err(FlowError::Panicked("late panic".to_string())))
        );
        assert_eq!(outcome.notifications(), 1);
        assert!(source.is_paused());
        assert_eq!(source.len(), 3);
    }

    #[test]
    fn test_map_stream_panic_after_resolve_leaves_source_paused() {
        let input: ElementQueue<u32, &str> = ElementQueue::produce(|q| {
            for n in 0..5 {
                q.send(n);
            }
        });
        let output = map_stream(input.clone(), |n, resolve: Callback<u32, &str>| {
            resolve.ok(n);
            if n == 1 {
                panic!("late panic");
            }
        });

        let seen = Rc::new(RefCell::new(Vec::new()));
        output.attach(
            {
                let seen = Rc::clone(&seen);
                move |n: u32| seen.borrow_mut().push(n.to_string())
            },
            {
                let seen = Rc::clone(&seen);
                move |e: FlowError<&str>| seen.borrow_mut().push(e.to_string())
            },
            || {},
        );

        assert_eq!(*seen.borrow(), ["step panicked: late panic"]);
        assert!(input.is_paused());
        assert_eq!(input.len(), 3);
    }

    #[test]
    fn test_for_each_stream_end_waits_for_step_in_flight() {
        let source = Live::default();
        let slot = Rc::new(RefCell::new(None));
        let log = Rc::new(RefCell::new(Vec::new()));
        let (done, outcome) = Callback::outcome();

        for_each_stream(source.clone(), parked::<()>(&slot, &log), done);
        source.push(7);
        assert!(source.is_paused());
        source.end();
        assert!(!outcome.is_ready());

        let resolve = slot.borrow_mut().take().expect("step in flight");
        resolve.ok(());

        assert_eq!(*log.borrow(), [7]);
        assert_eq!(outcome.take(), Some(Ok(())));
        assert_eq!(outcome.notifications(), 1);
    }

    #[test]
    fn test_for_each_stream_step_failure_after_end_is_reported() {
        let source = Live::default();
        let slot = Rc::new(RefCell::new(None));
        let log = Rc::new(RefCell::new(Vec::new()));
        let (done, outcome) = Callback::outcome();

        for_each_stream(source.clone(), parked::<()>(&slot, &log), done);
        source.push(7);
        source.end();

        let resolve = slot.borrow_mut().take().expect("step in flight");
        resolve.fail("E");

        assert_eq!(outcome.take(), Some(Err(FlowError::Step("E"))));
        assert_eq!(outcome.notifications(), 1);
    }

    #[test]
    fn test_for_each_stream_holds_back_elements_pushed_while_paused() {
        let source = Live::default();
        let slot = Rc::new(RefCell::new(None));
        let log = Rc::new(RefCell::new(Vec::new()));
        let (done, outcome) = Callback::outcome();

        for_each_stream(source.clone(), parked::<()>(&slot, &log), done);
        source.push(1);
        source.push(2);
        source.end();
        assert_eq!(*log.borrow(), [1]);

        let resolve = slot.borrow_mut().take().expect("first step in flight");
        resolve.ok(());
        assert_eq!(*log.borrow(), [1, 2]);
        assert!(!outcome.is_ready());

        let resolve = slot.borrow_mut().take().expect("second step in flight");
        resolve.ok(());
        assert_eq!(outcome.take(), Some(Ok(())));
    }

    #[test]
    fn test_map_stream_end_waits_for_step_in_flight() {
        let source = Live::default();
        let slot = Rc::new(RefCell::new(None));
        let log = Rc::new(RefCell::new(Vec::new()));
        let output = map_stream(source.clone(), parked::<u32>(&slot, &log));

        let seen = Rc::new(RefCell::new(Vec::new()));
        output.attach(
            {
                let seen = Rc::clone(&seen);
                move |n: u32| seen.borrow_mut().push(n)
            },
            |_| {},
            {
                let seen = Rc::clone(&seen);
                move || seen.borrow_mut().push(999)
            },
        );

        source.push(7);
        source.end();
        assert!(seen.borrow().is_empty());

        let resolve = slot.borrow_mut().take().expect("step in flight");
        resolve.ok(70);

        assert_eq!(*seen.borrow(), [70, 999]);
    }
}
