//! Relationship-aware creates
//!
//! A nested `createObject` call runs down one of three paths:
//! - natively, when the backend creates relationships itself
//! - as one atomic batch built from the dissection, when the backend
//!   executes batches
//! - sequentially through [`augmented_create_object`] otherwise

mod augment;
mod dissect;

use serde_json::Value;
use tracing::debug;

use crate::backend::{Feature, OperationOptions, StorageBackend};
use crate::error::{CoreError, CoreResult};
use crate::schema::{CollectionDefinition, StorageRegistry};
use crate::Object;

pub use augment::augmented_create_object;
pub use dissect::{
    convert_create_object_dissection_to_batch, dissect_create_object_operation,
    dissect_create_object_operation_with, reconstruct_created_object_from_batch_result,
    CreateObjectDissection, DissectionNode, PathSegment, Placeholder,
};

pub(crate) use dissect::value_at_path_mut;

/// How a create reaches the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePath {
    Native,
    Batch,
    Sequential,
}

impl CreatePath {
    pub fn choose(backend: &dyn StorageBackend, prefer_batch: bool) -> Self {
        if backend.supports(Feature::CreateWithRelationships) {
            CreatePath::Native
        } else if prefer_batch && backend.supports(Feature::ExecuteBatch) {
            CreatePath::Batch
        } else {
            CreatePath::Sequential
        }
    }
}

/// Run every custom field of `object` through its storage transform.
///
/// Absent fields are transformed from `null`; `null` results are left out.
pub async fn prepare_object_for_storage(
    definition: &CollectionDefinition,
    object: &mut Object,
) -> CoreResult<()> {
    for field_name in &definition.fields_with_custom_type {
        let Some(handler) = definition
            .fields
            .get(field_name)
            .and_then(|field| field.field_object.clone())
        else {
            continue;
        };

        let input = object.remove(field_name).unwrap_or(Value::Null);
        let prepared = handler.prepare_for_storage(input).await?;
        if !prepared.is_null() {
            object.insert(field_name.clone(), prepared);
        }
    }
    Ok(())
}

/// Replace forward `ChildOf` aliases holding an already created parent
/// object with that parent's key
pub(crate) fn replace_created_parents(
    registry: &StorageRegistry,
    definition: &CollectionDefinition,
    object: &mut Object,
) -> CoreResult<()> {
    for (alias, relationship) in &definition.relationships_by_alias {
        let Some(r) = relationship.as_child_of() else {
            continue;
        };
        let Some(Value::Object(parent)) = object.get(alias) else {
            continue;
        };
        let parent_key = registry
            .get(&r.target_collection)?
            .single_pk_field()
            .and_then(|pk| parent.get(pk))
            .cloned();
        if let Some(parent_key) = parent_key {
            object.insert(alias.clone(), parent_key);
        }
    }
    Ok(())
}

/// Create a possibly nested object along the path the backend supports
pub async fn create_object(
    backend: &dyn StorageBackend,
    registry: &StorageRegistry,
    collection: &str,
    object: Object,
    options: &OperationOptions,
    prefer_batch: bool,
) -> CoreResult<Object> {
    let path = CreatePath::choose(backend, prefer_batch);
    debug!(collection, ?path, "Creating object");

    match path {
        CreatePath::Native => Ok(backend.create_object(collection, object, options).await?.object),
        CreatePath::Batch => {
            batch_create_object(backend, registry, collection, object, options).await
        }
        CreatePath::Sequential => {
            augmented_create_object(backend, registry, collection, object, options).await
        }
    }
}

/// Create through one batch. Custom fields are prepared here only; the batch
/// carries storage values.
async fn batch_create_object(
    backend: &dyn StorageBackend,
    registry: &StorageRegistry,
    collection: &str,
    object: Object,
    options: &OperationOptions,
) -> CoreResult<Object> {
    let mut dissection = dissect_create_object_operation(collection, &object, registry)?;
    if dissection.objects.len() <= 1 {
        let definition = registry.get(collection)?;
        let mut object = dissection
            .objects
            .pop()
            .map_or(object, |node| node.object);
        replace_created_parents(registry, &definition, &mut object)?;
        prepare_object_for_storage(&definition, &mut object).await?;
        let created = backend.create_object(collection, object, options).await?;
        return Ok(created.object);
    }

    for node in &mut dissection.objects {
        let definition = registry.get(&node.collection)?;
        if definition.single_pk_field().is_none() {
            return Err(CoreError::unsupported(format!(
                "batch creates of '{}' need a single-field primary key; compound keys are not supported",
                node.collection
            )));
        }
        replace_created_parents(registry, &definition, &mut node.object)?;
        prepare_object_for_storage(&definition, &mut node.object).await?;
    }

    let batch = convert_create_object_dissection_to_batch(&dissection);
    let result = backend.execute_batch(&batch).await?;

    let reconstructed = reconstruct_created_object_from_batch_result(
        object,
        collection,
        registry,
        &dissection,
        &result,
    )?;

    // Report what was stored, not what was passed in
    let mut root = Value::Object(reconstructed);
    for node in &dissection.objects {
        let Some(target) = value_at_path_mut(&mut root, &node.path).and_then(Value::as_object_mut)
        else {
            continue;
        };
        for (field_name, value) in &node.object {
            if !node.relations.contains_key(field_name) {
                target.insert(field_name.clone(), value.clone());
            }
        }
    }

    match root {
        Value::Object(object) => Ok(object),
        _ => Err(CoreError::internal("reconstructed value is not an object")),
    }
}
