//! Run asynchronous steps one after another
//!
//! This module provides the sequential iteration combinators: [`for_each`]
//! over a finite sequence, and [`for_each_stream`] / [`map_stream`] over a
//! live [`Source`](crate::Source).

mod each;
mod stream;

pub use each::for_each;
pub use stream::{for_each_stream, map_stream};
