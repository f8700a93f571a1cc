//! Membank - memory bank for development assistants
//!
//! Typed knowledge units scoped to projects, with semantic, faceted and
//! relevance-ranked search, development sessions, task tracking and
//! collaborator health checks.

pub mod bank;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod health;
pub mod mcp;
pub mod memory;
pub mod search;
pub mod session;
pub mod storage;
pub mod tasks;
pub mod types;
pub mod vector;

pub use bank::MemoryBank;
pub use context::RequestContext;
pub use error::{ErrorKind, MembankError, Result, Service};
pub use session::SessionRef;
pub use storage::Storage;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
