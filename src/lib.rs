//! # Callback: Sequential Combinators for Callback-Style Async Code
//!
//! Drive asynchronous steps one at a time, in order, on a single-threaded
//! event loop, without growing the call stack with the length of the
//! sequence, whether steps complete synchronously or later.
//!
//! ## Core Types
//!
//! - **[`Callback<T, E>`]**: One-shot completion signal carrying success or failure
//! - **[`Source`]**: Push stream with `pause`/`resume` backpressure
//! - **[`ElementQueue<T, E>`]**: Buffered adapter turning a producer into a [`Source`]
//! - **[`FlowError<E>`]**: Failures reported by the combinators
//!
//! ## Example
//!
//! ```
//! use callback::*;
//! use std::{cell::RefCell, rc::Rc};
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let (done, outcome) = Callback::outcome();
//!
//! for_each(
//!     ["a", "b", "c", "d"],
//!     {
//!         let log = log.clone();
//!         move |element, resolve: Callback<(), &str>| {
//!             if element == "c" {
//!                 return resolve.fail("E");
//!             }
//!             log.borrow_mut().push(element);
//!             resolve.ok(());
//!         }
//!     },
//!     done,
//! );
//!
//! assert_eq!(*log.borrow(), ["a", "b"]);
//! assert_eq!(outcome.take(), Some(Err(FlowError::Step("E"))));
//! ```
//!
//! ## Common Functions
//!
//! - [`for_each(elements, step, done)`] - Run a step per element of a finite sequence
//! - [`for_each_stream(source, step, done)`] - Run a step per element of a live source
//! - [`map_stream(source, step)`] - Map a live source through a step into a new queue
//! - [`single(source, done)`] - Collect the one value a source emits

mod callback;
mod error;
mod queue;
pub mod prelude;
pub mod sequential;
mod single;
mod source;

#[cfg(test)]
mod testing;

pub use callback::{Callback, Outcome};
pub use error::FlowError;
pub use queue::ElementQueue;
pub use sequential::{for_each, for_each_stream, map_stream};
pub use single::single;
pub use source::{DataHandler, EndHandler, ErrorHandler, Source};
