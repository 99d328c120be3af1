//! Sequential create for backends without atomic batches
//!
//! Each object is inserted as soon as its parent key is known. A failure
//! aborts the remaining steps; rows created before it stay in place.

use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use super::dissect::{connects_create_error, nested_shape_error};
use super::{prepare_object_for_storage, replace_created_parents};
use crate::backend::{OperationOptions, StorageBackend};
use crate::error::{CoreError, CoreResult};
use crate::schema::{Relationship, StorageRegistry};
use crate::Object;

/// Create `object` and every embedded child through the raw insert primitive
pub fn augmented_create_object<'a>(
    backend: &'a dyn StorageBackend,
    registry: &'a StorageRegistry,
    collection: &'a str,
    object: Object,
    options: &'a OperationOptions,
) -> BoxFuture<'a, CoreResult<Object>> {
    Box::pin(async move {
        let definition = registry.get(collection)?;

        let mut lonely_object: Object = object
            .iter()
            .filter(|(key, _)| !definition.reverse_relationships_by_alias.contains_key(*key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        replace_created_parents(registry, &definition, &mut lonely_object)?;
        prepare_object_for_storage(&definition, &mut lonely_object).await?;

        let mut inserted = backend
            .create_object(collection, lonely_object, options)
            .await?
            .object;
        debug!(collection, "Created object");

        for (reverse_alias, relationship) in &definition.reverse_relationships_by_alias {
            let to_create = match object.get(reverse_alias) {
                None | Some(Value::Null) => continue,
                Some(value) => value,
            };

            let (child_of, children) = match relationship {
                Relationship::ChildOf(r) => {
                    let children = to_create.as_array().ok_or_else(|| {
                        nested_shape_error(collection, reverse_alias, "an array of objects")
                    })?;
                    (r, children.clone())
                }
                Relationship::SingleChildOf(r) => (r, vec![to_create.clone()]),
                Relationship::Connects(_) => return Err(connects_create_error()),
            };

            let pk_field = definition.single_pk_field().ok_or_else(|| {
                CoreError::unsupported(format!(
                    "nested creates under '{}' need a single-field primary key",
                    collection
                ))
            })?;
            let parent_key = inserted.get(pk_field).cloned().ok_or_else(|| {
                CoreError::backend(format!(
                    "created '{}' object has no '{}' key",
                    collection, pk_field
                ))
            })?;

            let mut created_children = Vec::with_capacity(children.len());
            for child in children {
                let Value::Object(mut child) = child else {
                    return Err(nested_shape_error(collection, reverse_alias, "objects"));
                };
                child.insert(child_of.alias.clone(), parent_key.clone());

                let created = augmented_create_object(
                    backend,
                    registry,
                    &child_of.source_collection,
                    child,
                    options,
                )
                .await?;
                created_children.push(Value::Object(created));
            }

            let embedded = if relationship.is_single() {
                created_children.pop().unwrap_or(Value::Null)
            } else {
                Value::Array(created_children)
            };
            inserted.insert(reverse_alias.clone(), embedded);
        }

        Ok(inserted)
    })
}
