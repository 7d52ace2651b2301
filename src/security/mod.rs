//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request:
//!     → auth.rs (preemptive Authorization / Proxy-Authorization)
//!     → trust.rs (connect, then trust deciders veto or accept)
//!     → 401 / 407: auth.rs answers the challenge, conduit retransmits
//!
//! Inbound request:
//!     → auth.rs (decode Basic credentials into the message)
//! ```
//!
//! # Design Decisions
//! - Fail closed: a trust veto is fatal and never retried
//! - Credentials are stripped before following a redirect

pub mod auth;
pub mod trust;

pub use auth::{AuthSupplier, CustomAuthSupplier, DefaultBasicAuthSupplier, HttpAuthHeader};
pub use trust::{make_trust_decision, TrustDecider};
