//! Core Error Types
//!
//! Unified error handling for registration, decomposition and dispatch.

use serde_json::Value;
use thiserror::Error;

/// Crate-wide result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Raised by a backend when a limited delete would remove more rows than allowed
#[derive(Debug, Clone, Error)]
#[error(
    "Refusing to delete from '{collection}': limit was {limit} but the query matches {actual} objects"
)]
pub struct DeletionTooBroadError {
    pub collection: String,
    pub query: Value,
    pub limit: usize,
    pub actual: usize,
}

impl DeletionTooBroadError {
    pub fn new(collection: impl Into<String>, query: Value, limit: usize, actual: usize) -> Self {
        Self {
            collection: collection.into(),
            query,
            limit,
            actual,
        }
    }
}

/// Core error type
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ==================
    // Schema errors
    // ==================
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Invalid relationship detected in collection '{collection}': {relationship}")]
    InvalidRelationship {
        collection: String,
        relationship: String,
    },

    #[error("Flagging field {field} of collection {collection} as index, but field does not exist")]
    UnknownIndexField { field: String, collection: String },

    #[error("Got an invalid index for collection {collection}: {reason}")]
    InvalidIndex { collection: String, reason: String },

    #[error("Field '{field}' of collection '{collection}' has type '{field_type}', but no handler is registered for it")]
    MissingFieldType {
        collection: String,
        field: String,
        field_type: String,
    },

    #[error("Invalid primary key for collection '{0}': a primary key cannot be a relationship reference")]
    InvalidPrimaryKey(String),

    #[error("Malformed schema file '{path}': {reason}")]
    MalformedSchema { path: String, reason: String },

    // ==================
    // Unsupported shapes
    // ==================
    #[error("Unsupported: {0}")]
    Unsupported(String),

    // ==================
    // Routing
    // ==================
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("{0}")]
    InvalidOperationRegistration(String),

    #[error("Invalid arguments for '{operation}': {reason}")]
    InvalidArguments { operation: String, reason: String },

    // ==================
    // Lifecycle
    // ==================
    #[error("Storage registry is not initialized; call finish_initialization() first")]
    NotInitialized,

    #[error("Storage registry is already initialized")]
    AlreadyInitialized,

    // ==================
    // Backend-surfaced
    // ==================
    #[error(transparent)]
    DeletionTooBroad(#[from] DeletionTooBroadError),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Field error: {0}")]
    Field(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Create an unsupported-shape error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid-arguments error for an operation
    pub fn invalid_arguments(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Get stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownCollection(_) => "MAP_UNKNOWN_COLLECTION",
            Self::InvalidRelationship { .. } => "MAP_INVALID_RELATIONSHIP",
            Self::UnknownIndexField { .. } => "MAP_UNKNOWN_INDEX_FIELD",
            Self::InvalidIndex { .. } => "MAP_INVALID_INDEX",
            Self::MissingFieldType { .. } => "MAP_MISSING_FIELD_TYPE",
            Self::InvalidPrimaryKey(_) => "MAP_INVALID_PRIMARY_KEY",
            Self::MalformedSchema { .. } => "MAP_MALFORMED_SCHEMA",
            Self::Unsupported(_) => "MAP_UNSUPPORTED",
            Self::UnknownOperation(_) => "MAP_UNKNOWN_OPERATION",
            Self::InvalidOperationRegistration(_) => "MAP_INVALID_OPERATION_REGISTRATION",
            Self::InvalidArguments { .. } => "MAP_INVALID_ARGUMENTS",
            Self::NotInitialized => "MAP_NOT_INITIALIZED",
            Self::AlreadyInitialized => "MAP_ALREADY_INITIALIZED",
            Self::DeletionTooBroad(_) => "MAP_DELETION_TOO_BROAD",
            Self::Backend(_) => "MAP_BACKEND_ERROR",
            Self::Field(_) => "MAP_FIELD_ERROR",
            Self::Internal(_) => "MAP_INTERNAL_ERROR",
        }
    }

    /// Whether the error was detected while resolving or applying a schema
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownCollection(_)
                | Self::InvalidRelationship { .. }
                | Self::UnknownIndexField { .. }
                | Self::InvalidIndex { .. }
                | Self::MissingFieldType { .. }
                | Self::InvalidPrimaryKey(_)
                | Self::MalformedSchema { .. }
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deletion_too_broad_reports_counts() {
        let err: CoreError =
            DeletionTooBroadError::new("user", json!({"isActive": false}), 1, 3).into();
        assert_eq!(err.code(), "MAP_DELETION_TOO_BROAD");

        let message = err.to_string();
        assert!(message.contains("user"));
        assert!(message.contains('1'));
        assert!(message.contains('3'));
    }

    #[test]
    fn test_index_field_error_names_field_and_collection() {
        let err = CoreError::UnknownIndexField {
            field: "email".into(),
            collection: "user".into(),
        };
        assert_eq!(
            err.to_string(),
            "Flagging field email of collection user as index, but field does not exist"
        );
        assert!(err.is_schema_error());
    }

    #[test]
    fn test_unsupported_is_not_schema_error() {
        assert!(!CoreError::unsupported("compound pk").is_schema_error());
    }
}
