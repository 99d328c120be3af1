//! Operation Context
//!
//! Created fresh for every top-level call and dropped when it returns.

use std::time::Instant;

use serde_json::Value;
use uuid::Uuid;

use crate::Object;

/// Context carried through the dispatch chain
#[derive(Debug, Clone)]
pub struct OperationContext {
    /// Request ID for tracing
    pub request_id: Uuid,

    /// Data interceptors hand forward to the stages after them
    pub extra_data: Object,

    started_at: Instant,
}

impl OperationContext {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            extra_data: Object::new(),
            started_at: Instant::now(),
        }
    }

    /// Merge data into what later stages see; earlier keys are overwritten
    pub fn merge_extra_data(&mut self, data: Object) {
        self.extra_data.extend(data);
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra_data.insert(key.into(), value);
        self
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}
