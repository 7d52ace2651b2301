//! HTTP protocol helpers shared by the conduit and the destination.
//!
//! # Data Flow
//! ```text
//! Outbound (conduit):
//!     Message → headers.rs (policy defaults, Cookie from cookies.rs)
//!             → physical connection
//!
//! Inbound (conduit):
//!     response headers → cookies.rs (Set-Cookie) → charset.rs (encoding)
//!
//! Inbound (destination):
//!     request HeaderMap → headers.rs → Message
//! ```

pub mod charset;
pub mod cookies;
pub mod headers;

pub use cookies::{Cookie, Cookies};
pub use headers::{HeaderSink, Headers};
