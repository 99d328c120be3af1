//! Storage backend contract
//!
//! A backend implements the four raw multi-object primitives; the
//! single-object operations derive from them unless overridden.

mod batch;
mod features;
mod memory;
mod query;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::schema::{CollectionDefinition, IndexSourceField, StorageRegistry};
use crate::Object;

pub use batch::{BatchOperation, BatchResult, BatchStepResult, OperationBatch, Replacement};
pub use features::{BackendFeatures, Feature};
pub use memory::{IdGenerator, MemoryBackend};

/// Backend-specific options, passed through untouched
pub type OperationOptions = Object;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Ordering and pagination for finds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    /// `[[field, "asc" | "desc"], ...]`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<(String, SortDirection)>,
}

impl FindOptions {
    pub fn limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Refuse the delete when more objects than this match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateResult {
    pub object: Object,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateManyResult {
    pub objects: Vec<Object>,
}

/// Outcome of an update or delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResult {
    pub affected: usize,
}

/// Contract every storage backend implements
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name used as the backend namespace of operation identifiers
    fn backend_type(&self) -> &str;

    /// Called once with the registry the backend resolves collections against
    fn configure(&mut self, registry: Arc<StorageRegistry>);

    /// The configured registry
    fn registry(&self) -> Option<&Arc<StorageRegistry>>;

    fn features(&self) -> BackendFeatures {
        BackendFeatures::none()
    }

    fn supports(&self, feature: Feature) -> bool {
        self.features().contains(feature)
    }

    /// Names of backend-namespaced operations plugins may register
    fn pluggable_operations(&self) -> &[&str] {
        &[]
    }

    async fn create_object(
        &self,
        collection: &str,
        object: Object,
        options: &OperationOptions,
    ) -> CoreResult<CreateResult>;

    async fn find_objects(
        &self,
        collection: &str,
        query: &Object,
        options: &FindOptions,
    ) -> CoreResult<Vec<Object>>;

    async fn update_objects(
        &self,
        collection: &str,
        query: &Object,
        updates: &Object,
        options: &OperationOptions,
    ) -> CoreResult<MutationResult>;

    async fn delete_objects(
        &self,
        collection: &str,
        query: &Object,
        options: &DeleteOptions,
    ) -> CoreResult<MutationResult>;

    async fn find_object(
        &self,
        collection: &str,
        query: &Object,
        options: &FindOptions,
    ) -> CoreResult<Option<Object>> {
        let options = FindOptions {
            limit: Some(1),
            ..options.clone()
        };
        let objects = self.find_objects(collection, query, &options).await?;
        Ok(objects.into_iter().next())
    }

    async fn count_objects(&self, collection: &str, query: &Object) -> CoreResult<usize> {
        let objects = self
            .find_objects(collection, query, &FindOptions::default())
            .await?;
        Ok(objects.len())
    }

    async fn update_object(
        &self,
        collection: &str,
        object: &Object,
        updates: &Object,
        options: &OperationOptions,
    ) -> CoreResult<MutationResult> {
        let definition = self.definition(collection)?;
        let query = where_for_object(&definition, object)?;
        self.update_objects(collection, &query, updates, options).await
    }

    async fn delete_object(
        &self,
        collection: &str,
        object: &Object,
        options: &DeleteOptions,
    ) -> CoreResult<MutationResult> {
        let definition = self.definition(collection)?;
        let query = where_for_object(&definition, object)?;
        let options = DeleteOptions {
            limit: Some(1),
            ..options.clone()
        };
        self.delete_objects(collection, &query, &options).await
    }

    async fn raw_create_objects(
        &self,
        _collection: &str,
        _objects: Vec<Object>,
        _options: &OperationOptions,
    ) -> CoreResult<CreateManyResult> {
        Err(CoreError::unsupported(format!(
            "backend '{}' does not support rawCreateObjects",
            self.backend_type()
        )))
    }

    async fn execute_batch(&self, _batch: &OperationBatch) -> CoreResult<BatchResult> {
        Err(CoreError::unsupported(format!(
            "backend '{}' does not support executeBatch",
            self.backend_type()
        )))
    }

    async fn migrate(&self, _database: Option<&str>) -> CoreResult<()> {
        Ok(())
    }

    async fn cleanup(&self) -> CoreResult<()> {
        Ok(())
    }

    /// Live definition of a collection from the configured registry
    fn definition(&self, collection: &str) -> CoreResult<Arc<CollectionDefinition>> {
        self.registry()
            .ok_or_else(|| {
                CoreError::internal(format!(
                    "backend '{}' was used before being configured",
                    self.backend_type()
                ))
            })?
            .get(collection)
    }
}

/// Builds the `where` clause selecting one object by its primary key
pub fn where_for_object(definition: &CollectionDefinition, object: &Object) -> CoreResult<Object> {
    let pk_index = definition.pk_index.as_ref().ok_or_else(|| {
        CoreError::internal(format!(
            "collection '{}' has no primary key",
            definition.name
        ))
    })?;

    let mut query = Object::new();
    for source in pk_index.sources() {
        match source {
            IndexSourceField::Field(field) => {
                let value = object.get(field).cloned().unwrap_or(Value::Null);
                query.insert(field.clone(), value);
            }
            IndexSourceField::Relationship(reference) => {
                return Err(CoreError::unsupported(format!(
                    "primary key of '{}' references relationship '{}'; single-object operations need plain key fields",
                    definition.name, reference.relationship
                )));
            }
        }
    }
    Ok(query)
}
