//! Middleware Traits and Implementations
//!
//! Interceptors wrapping every operation on its way to the backend.

use std::future::Future;
use std::pin::Pin;

use super::context::OperationContext;
use super::operation::OperationCall;
use super::pipeline::{Next, OperationResult};

/// Middleware trait for pipeline stages
pub trait Middleware: Send + Sync {
    /// Inspect or rewrite the call, run `next`, post-process the result
    fn process<'a>(
        &'a self,
        call: OperationCall,
        ctx: &'a mut OperationContext,
        next: Next<'a>,
    ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>>;
}

pub mod observe;

pub use observe::TracingMiddleware;
