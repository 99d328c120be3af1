//! Operation Model
//!
//! Every call is an operation name plus positional JSON arguments. Names are
//! parsed once into a structured identifier and routed through a lookup
//! table: core operations map to backend methods, anything namespaced to a
//! registered handler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::StorageBackend;
use crate::error::{CoreError, CoreResult};

/// One call flowing through the dispatch chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationCall {
    pub name: String,
    pub args: Vec<Value>,
}

impl OperationCall {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Collection operations carry the collection name first
    pub fn collection(&self) -> Option<&str> {
        self.args.first().and_then(Value::as_str)
    }
}

/// Parsed `project:backend.operation` name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationIdentifier {
    pub project: Option<String>,
    pub backend: Option<String>,
    pub operation: String,
}

impl OperationIdentifier {
    pub fn parse(name: &str) -> CoreResult<Self> {
        let (project, rest) = match name.split_once(':') {
            Some((project, rest)) => (Some(project), rest),
            None => (None, name),
        };
        let (backend, operation) = match rest.split_once('.') {
            Some((backend, operation)) => (Some(backend), operation),
            None => (None, rest),
        };

        let empty = |part: Option<&str>| part.map_or(false, str::is_empty);
        if operation.is_empty() || empty(project) || empty(backend) {
            return Err(CoreError::UnknownOperation(name.to_string()));
        }

        Ok(Self {
            project: project.map(str::to_string),
            backend: backend.map(str::to_string),
            operation: operation.to_string(),
        })
    }

    pub fn is_namespaced(&self) -> bool {
        self.project.is_some() || self.backend.is_some()
    }
}

impl fmt::Display for OperationIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(project) = &self.project {
            write!(f, "{}:", project)?;
        }
        if let Some(backend) = &self.backend {
            write!(f, "{}.", backend)?;
        }
        f.write_str(&self.operation)
    }
}

/// Operations every backend answers directly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreOperation {
    CreateObject,
    RawCreateObjects,
    FindObject,
    FindObjects,
    CountObjects,
    UpdateObject,
    UpdateObjects,
    DeleteObject,
    DeleteObjects,
    ExecuteBatch,
    AlterSchema,
    Migrate,
    Cleanup,
}

impl CoreOperation {
    pub const ALL: [CoreOperation; 13] = [
        Self::CreateObject,
        Self::RawCreateObjects,
        Self::FindObject,
        Self::FindObjects,
        Self::CountObjects,
        Self::UpdateObject,
        Self::UpdateObjects,
        Self::DeleteObject,
        Self::DeleteObjects,
        Self::ExecuteBatch,
        Self::AlterSchema,
        Self::Migrate,
        Self::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateObject => "createObject",
            Self::RawCreateObjects => "rawCreateObjects",
            Self::FindObject => "findObject",
            Self::FindObjects => "findObjects",
            Self::CountObjects => "countObjects",
            Self::UpdateObject => "updateObject",
            Self::UpdateObjects => "updateObjects",
            Self::DeleteObject => "deleteObject",
            Self::DeleteObjects => "deleteObjects",
            Self::ExecuteBatch => "executeBatch",
            Self::AlterSchema => "alterSchema",
            Self::Migrate => "migrate",
            Self::Cleanup => "cleanup",
        }
    }
}

impl FromStr for CoreOperation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| CoreError::UnknownOperation(s.to_string()))
    }
}

impl fmt::Display for CoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical name of a collection-level operation alias
pub fn resolve_collection_alias(name: &str) -> &str {
    match name {
        "findOneObject" => "findObject",
        "findAllObjects" => "findObjects",
        "updateOneObject" => "updateObject",
        "updateAllObjects" => "updateObjects",
        "deleteOneObject" => "deleteObject",
        "deleteAllObjects" => "deleteObjects",
        other => other,
    }
}

/// Reject handler names that are neither project-scoped, a core operation,
/// nor one of the backend's own pluggable operations
pub fn validate_operation_registration(
    name: &str,
    backend: &dyn StorageBackend,
) -> CoreResult<OperationIdentifier> {
    let identifier = OperationIdentifier::parse(name)?;
    if identifier.project.is_some() {
        return Ok(identifier);
    }

    match &identifier.backend {
        Some(namespace) => {
            let pluggable = namespace == backend.backend_type()
                && backend
                    .pluggable_operations()
                    .contains(&identifier.operation.as_str());
            if !pluggable {
                return Err(CoreError::InvalidOperationRegistration(format!(
                    "Cannot register non-standard backend-specific operation '{}'",
                    name
                )));
            }
        }
        None => {
            if identifier.operation.parse::<CoreOperation>().is_err() {
                return Err(CoreError::InvalidOperationRegistration(format!(
                    "Cannot register non-standard top-level operation '{}'",
                    name
                )));
            }
        }
    }
    Ok(identifier)
}
