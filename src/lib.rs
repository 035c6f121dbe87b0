//! TickStock backend core library.
//!
//! Real-time market-event processing: typed events in, prioritized
//! dispatch through a bounded queue and worker pool, filtered fan-out
//! out, plus the daily universe synchronizer.

pub mod bus;
pub mod cache;
pub mod detectors;
pub mod events;
pub mod fanout;
pub mod feed;
pub mod filters;
pub mod market;
pub mod models;
pub mod queue;
pub mod universe;
pub mod workers;

pub use events::{Event, EventKind, EventPayload, ValidationError};
pub use models::Config;
pub use queue::{EventQueue, QueueConfig};
pub use workers::{WorkerPool, WorkerPoolConfig};
