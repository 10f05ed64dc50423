//! Ordered list substrate for the scheduler's queues.
//!
//! An arena-backed doubly-linked list whose members are named by generational
//! handles, giving O(1) removal of arbitrary members without raw pointers.

mod arena;
mod ordered;

pub use arena::NodeHandle;
pub use ordered::{Elements, IntoIter, ListError, OrderedList};
