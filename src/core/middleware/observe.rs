//! Observability Middleware
//!
//! Logs every operation with its collection, duration and outcome.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::core::context::OperationContext;
use crate::core::operation::OperationCall;
use crate::core::pipeline::{Next, OperationResult};

use super::Middleware;

/// Observability middleware
#[derive(Debug, Clone, Default)]
pub struct TracingMiddleware {
    log_args: bool,
}

impl TracingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also log the call arguments at debug level
    pub fn with_args(mut self) -> Self {
        self.log_args = true;
        self
    }
}

impl Middleware for TracingMiddleware {
    fn process<'a>(
        &'a self,
        call: OperationCall,
        ctx: &'a mut OperationContext,
        next: Next<'a>,
    ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
        Box::pin(async move {
            let operation = call.name.clone();
            let collection = call.collection().unwrap_or("none").to_string();
            let request_id = ctx.request_id;

            if self.log_args {
                debug!(%request_id, %operation, args = ?call.args, "Dispatching operation");
            }

            let result = next.run(call, ctx).await;
            let elapsed_ms = ctx.elapsed_ms() as u64;

            match &result {
                Ok(_) => debug!(
                    %request_id,
                    %operation,
                    %collection,
                    elapsed_ms,
                    "Operation succeeded"
                ),
                Err(e) => warn!(
                    %request_id,
                    %operation,
                    %collection,
                    elapsed_ms,
                    code = e.code(),
                    error = %e,
                    "Operation failed"
                ),
            }

            result
        })
    }
}
