//! Process lifecycle for the `http-conduit` server.
//!
//! ```text
//! Ctrl-C / SIGTERM ──▶ signals.rs ──▶ Shutdown::trigger
//!                                        │
//!            destination::server::serve ◀┘ stops accepting, drains
//!            in-flight requests, then returns
//! ```
//!
//! Suspended requests that never resume are released when their HTTP
//! request is dropped during the drain.

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
