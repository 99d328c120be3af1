//! Dispatch Pipeline
//!
//! Every operation passes through the registered interceptors in
//! registration order before reaching the executor; results travel back out
//! in reverse order.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use super::context::OperationContext;
use super::middleware::Middleware;
use super::operation::OperationCall;
use crate::error::{CoreError, CoreResult};

/// Result of an operation
pub type OperationResult = CoreResult<Value>;

/// Next middleware in chain
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    executor: &'a dyn OperationExecutor,
}

impl<'a> Next<'a> {
    /// Run the next middleware or executor.
    ///
    /// The context is only borrowed for the returned future, so callers can
    /// read it again once the rest of the chain has finished.
    pub fn run<'b>(
        self,
        call: OperationCall,
        ctx: &'b mut OperationContext,
    ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'b>>
    where
        'a: 'b,
    {
        Box::pin(async move {
            if let Some((first, rest)) = self.middleware.split_first() {
                let next = Next {
                    middleware: rest,
                    executor: self.executor,
                };
                first.process(call, ctx, next).await
            } else {
                self.executor.execute(call, ctx).await
            }
        })
    }
}

/// Innermost stage of the pipeline
pub trait OperationExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        call: OperationCall,
        ctx: &'a OperationContext,
    ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>>;
}

pub struct Pipeline {
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    executor: Arc<dyn OperationExecutor>,
}

impl Pipeline {
    pub fn new(executor: Arc<dyn OperationExecutor>) -> Self {
        Self {
            middleware: RwLock::new(Vec::new()),
            executor,
        }
    }

    /// Add middleware to the pipeline
    pub fn with_middleware(self, m: impl Middleware + 'static) -> Self {
        if let Ok(mut middleware) = self.middleware.write() {
            middleware.push(Arc::new(m));
        }
        self
    }

    /// Replace the whole interceptor list
    pub fn set_middleware(&self, middleware: Vec<Arc<dyn Middleware>>) -> CoreResult<()> {
        *self
            .middleware
            .write()
            .map_err(|_| CoreError::internal("Lock poisoned"))? = middleware;
        Ok(())
    }

    /// Run one call through a chain built from the current interceptors
    pub async fn execute(&self, call: OperationCall, mut ctx: OperationContext) -> OperationResult {
        let middleware = self
            .middleware
            .read()
            .map_err(|_| CoreError::internal("Lock poisoned"))?
            .clone();
        let next = Next {
            middleware: &middleware,
            executor: self.executor.as_ref(),
        };
        next.run(call, &mut ctx).await
    }

    /// Get the number of middleware stages
    pub fn middleware_count(&self) -> usize {
        self.middleware.read().map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoExecutor;

    impl OperationExecutor for EchoExecutor {
        fn execute<'a>(
            &'a self,
            call: OperationCall,
            ctx: &'a OperationContext,
        ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
            Box::pin(async move {
                Ok(json!({
                    "operation": call.name,
                    "args": call.args,
                    "extra": ctx.extra_data,
                }))
            })
        }
    }

    struct RenameTo(&'static str);

    impl Middleware for RenameTo {
        fn process<'a>(
            &'a self,
            mut call: OperationCall,
            ctx: &'a mut OperationContext,
            next: Next<'a>,
        ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
            Box::pin(async move {
                ctx.extra_data.insert("renamed".into(), json!(call.name));
                call.name = self.0.to_string();
                next.run(call, ctx).await
            })
        }
    }

    #[tokio::test]
    async fn test_pipeline_with_no_middleware() {
        let pipeline = Pipeline::new(Arc::new(EchoExecutor));
        let result = pipeline
            .execute(
                OperationCall::new("findObjects", vec![json!("user")]),
                OperationContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(result["operation"], "findObjects");
        assert_eq!(pipeline.middleware_count(), 0);
    }

    #[tokio::test]
    async fn test_middleware_can_rewrite_the_call() {
        let pipeline = Pipeline::new(Arc::new(EchoExecutor)).with_middleware(RenameTo("countObjects"));
        let result = pipeline
            .execute(
                OperationCall::new("findObjects", vec![json!("user")]),
                OperationContext::new(),
            )
            .await
            .unwrap();

        assert_eq!(result["operation"], "countObjects");
        assert_eq!(result["extra"], json!({"renamed": "findObjects"}));
    }
}
