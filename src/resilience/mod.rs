//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Async exchange response:
//!     → workqueue.rs (reserve a worker within the async execute timeout)
//!     → accepted: deliver on the worker
//!     → rejected: deliver inline (one-time warning) or propagate
//! ```
//!
//! # Design Decisions
//! - Bounded concurrency: the queue never grows past `max_workers` tasks
//! - Rejection is explicit, never an unbounded wait

pub mod workqueue;

pub use workqueue::{QueueRejected, WorkQueue, WorkSlot};
