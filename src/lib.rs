//! HTTP transport core.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                      HTTP TRANSPORT                       │
//!                 │                                                          │
//!   outbound      │  ┌──────────┐    ┌────────────┐    ┌──────────────────┐  │
//!   Message  ─────┼─▶│ conduit  │───▶│    net     │───▶│ hyper connection │──┼──▶ server
//!                 │  │ (stream, │    │ (factory,  │    │  (one per try)   │  │
//!   inbound  ◀────┼──│ retrans.)│◀───│  trust)    │◀───│                  │◀─┼───
//!   Message       │  └──────────┘    └────────────┘    └──────────────────┘  │
//!                 │                                                          │
//!   client   ─────┼─▶┌──────────┐    ┌─────────────┐    ┌───────────────┐   │
//!   request       │  │  axum    │───▶│ destination │───▶│   observer    │   │
//!   response ◀────┼──│ adapter  │◀───│ (flush, back│◀───│  (pipeline)   │   │
//!                 │  └──────────┘    │  channel)   │    └───────────────┘   │
//!                 │                  └─────────────┘                        │
//!                 │  ┌────────────────────────────────────────────────────┐  │
//!                 │  │ http (headers, cookies, charset) · security (auth, │  │
//!                 │  │ trust) · config · resilience (work queue) ·        │  │
//!                 │  │ observability · lifecycle                          │  │
//!                 │  └────────────────────────────────────────────────────┘  │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod conduit;
pub mod destination;
pub mod error;
pub mod http;
pub mod message;
pub mod net;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use conduit::{ConduitStream, HttpConduit};
pub use config::TransportConfig;
pub use destination::HttpDestination;
pub use error::{Result, TransportError};
pub use lifecycle::Shutdown;
pub use message::{Delivery, Exchange, Message, MessageObserver};
