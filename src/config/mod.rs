//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → NetConfig (validated, immutable)
//!     → shared via Arc by the coordinator and its listeners
//!
//! Before the primary bind:
//!     coordinator → RunPidStore::persist_run_pid(pid)
//!     → loader.rs read-modify-write of server.run_pid
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigError, ConfigFile, RunPidStore};
pub use schema::NetConfig;
pub use schema::{MessageConfig, ObservabilityConfig, StreamConfig, TaskPoolConfig};
