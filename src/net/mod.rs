//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! HttpConduit::prepare
//!     → ConnectionFactory::create (tls params, proxy, url)
//!     → PhysicalConnection (headers → connect → trust check → body → response)
//!     → disconnect before the next attempt
//! ```
//!
//! # Design Decisions
//! - The conduit only sees the `PhysicalConnection` capability, so tests
//!   script connections in memory and TLS stacks plug in as factories
//! - `client.rs` is the plain-HTTP implementation on hyper

pub mod client;
pub mod connection;
#[cfg(test)]
pub(crate) mod scripted;

pub use client::{HyperConnection, HyperConnectionFactory};
pub use connection::{
    ConnectionFactory, ConnectionId, ConnectionInfo, ConnectionRequest, PhysicalConnection,
    ResponseHead,
};
