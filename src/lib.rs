//! aeromap - backend-agnostic object storage mapping
//!
//! Collections are declared once, resolved into a relationship graph, and
//! every operation is dispatched through an interceptor chain to a
//! pluggable storage backend. Nested creates are decomposed into
//! parent-first steps and either batched atomically or run sequentially.

pub mod backend;
pub mod cli;
pub mod config;
pub mod core;
pub mod create;
pub mod error;
pub mod fields;
pub mod operations;
pub mod schema;

/// JSON object exchanged with backends and callers
pub type Object = serde_json::Map<String, serde_json::Value>;

pub use crate::backend::{MemoryBackend, StorageBackend};
pub use crate::config::MapperConfig;
pub use crate::core::{BackendPlugin, StorageManager, TracingMiddleware};
pub use crate::error::{CoreError, CoreResult, DeletionTooBroadError};
pub use crate::schema::StorageRegistry;
