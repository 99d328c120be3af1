//! # Operation Dispatch
//!
//! Every collection operation flows through one pipeline: interceptors in
//! registration order, then the backend executor.

pub mod context;
pub mod executor;
pub mod manager;
pub mod middleware;
pub mod operation;
pub mod pipeline;

pub use context::OperationContext;
pub use executor::{BackendExecutor, OperationHandler};
pub use manager::{BackendPlugin, CollectionHandle, StorageManager};
pub use middleware::{Middleware, TracingMiddleware};
pub use operation::{
    resolve_collection_alias, validate_operation_registration, CoreOperation, OperationCall,
    OperationIdentifier,
};
pub use pipeline::{Next, OperationExecutor, OperationResult, Pipeline};
