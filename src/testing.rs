//! Deferred-task loop standing in for a reactor in unit tests.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

type Task = Box<dyn FnOnce()>;

/// Single-threaded FIFO of deferred tasks. Cloning shares the queue.
#[derive(Clone, Default)]
pub(crate) struct EventLoop {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl EventLoop {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` to run on a later turn of the loop.
    pub(crate) fn defer<F>(&self, task: F)
    where
        F: FnOnce() + 'static,
    {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    /// Run tasks until none are left, returning how many ran.
    pub(crate) fn run(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.tasks.borrow_mut().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}
