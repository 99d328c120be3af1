//! Field types
//!
//! Every custom field type transforms a value on its way into storage and
//! back out again. Primitive types are stored as-is and never looked up here.

mod random_key;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;

pub use random_key::RandomKeyField;

/// Declared type of a collection field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    AutoPk,
    ForeignKey,
    Text,
    Json,
    Datetime,
    Timestamp,
    String,
    Boolean,
    Float,
    Int,
    Blob,
    Binary,
    /// Any non-primitive type, resolved through the [`FieldTypeRegistry`]
    Custom(String),
}

impl FieldType {
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::AutoPk => "auto-pk",
            FieldType::ForeignKey => "foreign-key",
            FieldType::Text => "text",
            FieldType::Json => "json",
            FieldType::Datetime => "datetime",
            FieldType::Timestamp => "timestamp",
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Float => "float",
            FieldType::Int => "int",
            FieldType::Blob => "blob",
            FieldType::Binary => "binary",
            FieldType::Custom(name) => name,
        }
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, FieldType::Custom(_))
    }
}

impl From<String> for FieldType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "auto-pk" => FieldType::AutoPk,
            "foreign-key" => FieldType::ForeignKey,
            "text" => FieldType::Text,
            "json" => FieldType::Json,
            "datetime" => FieldType::Datetime,
            "timestamp" => FieldType::Timestamp,
            "string" => FieldType::String,
            "boolean" => FieldType::Boolean,
            "float" => FieldType::Float,
            "int" => FieldType::Int,
            "blob" => FieldType::Blob,
            "binary" => FieldType::Binary,
            _ => FieldType::Custom(name),
        }
    }
}

impl From<&str> for FieldType {
    fn from(name: &str) -> Self {
        FieldType::from(name.to_string())
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        field_type.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability every custom field type implements
#[async_trait]
pub trait Field: Send + Sync + fmt::Debug {
    /// The primitive type the backend stores this field as
    fn primitive_type(&self) -> FieldType;

    /// Transform a value (`Null` when absent) before it is written
    async fn prepare_for_storage(&self, input: Value) -> CoreResult<Value> {
        Ok(input)
    }

    /// Transform a stored value back for the caller
    async fn prepare_from_storage(&self, stored: Value) -> CoreResult<Value> {
        Ok(stored)
    }
}

/// Plain string field carrying a URL
#[derive(Debug, Default)]
pub struct UrlField;

impl Field for UrlField {
    fn primitive_type(&self) -> FieldType {
        FieldType::String
    }
}

/// Binary media payload
#[derive(Debug, Default)]
pub struct MediaField;

impl Field for MediaField {
    fn primitive_type(&self) -> FieldType {
        FieldType::Binary
    }
}

/// Builds a fresh handler for every field declared with the type
pub type FieldFactory = Arc<dyn Fn() -> Arc<dyn Field> + Send + Sync>;

/// Named custom field types
#[derive(Clone, Default)]
pub struct FieldTypeRegistry {
    types: HashMap<String, FieldFactory>,
}

impl FieldTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a field type
    pub fn register_type<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Field> + Send + Sync + 'static,
    {
        self.types.insert(name.into(), Arc::new(factory));
        self
    }

    /// Instantiate the handler for a type name, if one is registered
    pub fn instantiate(&self, name: &str) -> Option<Arc<dyn Field>> {
        self.types.get(name).map(|factory| factory())
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for FieldTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldTypeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

/// Registry with the built-in `random-key`, `url` and `media` types
pub fn create_default_field_type_registry(random_key_length: usize) -> FieldTypeRegistry {
    let mut registry = FieldTypeRegistry::new();
    registry
        .register_type("random-key", move || {
            Arc::new(RandomKeyField::with_length(random_key_length))
        })
        .register_type("url", || Arc::new(UrlField))
        .register_type("media", || Arc::new(MediaField));
    registry
}
