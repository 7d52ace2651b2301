//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TransportConfig (validated, immutable)
//!     → ClientPolicy handed to HttpConduit, ServerPolicy to HttpDestination
//!
//! On reload:
//!     watcher.rs sees the file change
//!     → loader.rs + validation.rs produce the next TransportConfig
//!     → PolicyUpdate carries only the policies that differ
//!     → HttpConduit::set_client_policy / HttpDestination::set_server_policy
//! ```
//!
//! # Design Decisions
//! - Policies are read-only to the transport; changes replace them wholesale
//! - Listener and work queue settings apply at startup only
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AuthorizationPolicy, ClientPolicy, ConnectionType, ListenerConfig, ObservabilityConfig,
    ServerPolicy, TlsClientParameters, TransportConfig, WorkQueueConfig,
};
pub use watcher::{ConfigWatcher, PolicyUpdate};
