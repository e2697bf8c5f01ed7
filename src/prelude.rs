//! Commonly used imports
//!
//! Use `use callback::prelude::*;` for quick access to the most common types and functions.

// Core types
pub use crate::{Callback, ElementQueue, FlowError, Source};

// Sequential iteration
pub use crate::sequential::{for_each, for_each_stream, map_stream};

// Collectors
pub use crate::single::single;
