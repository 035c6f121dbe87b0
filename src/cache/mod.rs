//! Cache of per-symbol priority classes consulted on queue admission.

pub mod priority_cache;

pub use priority_cache::{PriorityCache, PriorityClass};
