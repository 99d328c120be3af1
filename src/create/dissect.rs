//! Create decomposition
//!
//! A nested create is flattened into single-collection steps, parent first.
//! Each step is addressed by a placeholder that children reference until the
//! parent's real key is known.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{BatchOperation, BatchResult, OperationBatch, Replacement};
use crate::error::{CoreError, CoreResult};
use crate::schema::{Relationship, StorageRegistry};
use crate::Object;

/// Stand-in for a key that does not exist yet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Placeholder {
    Seq(u64),
    Named(String),
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Seq(n) => write!(f, "{}", n),
            Placeholder::Named(name) => f.write_str(name),
        }
    }
}

/// Step from the root of the created object to a nested child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// One flattened create step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DissectionNode {
    pub placeholder: Placeholder,
    pub collection: String,
    pub path: Vec<PathSegment>,
    /// Fields stored by this step, reverse relationships stripped
    pub object: Object,
    /// Relationship alias to the placeholder of the parent it points at
    pub relations: BTreeMap<String, Placeholder>,
}

/// Steps of one create, every parent before its children
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateObjectDissection {
    pub objects: Vec<DissectionNode>,
}

/// Dissect with placeholders numbered from 1
pub fn dissect_create_object_operation(
    collection: &str,
    object: &Object,
    registry: &StorageRegistry,
) -> CoreResult<CreateObjectDissection> {
    let mut next = 0u64;
    dissect_create_object_operation_with(collection, object, registry, || {
        next += 1;
        Placeholder::Seq(next)
    })
}

/// Dissect with a caller-supplied placeholder generator
pub fn dissect_create_object_operation_with<G>(
    collection: &str,
    object: &Object,
    registry: &StorageRegistry,
    generate_placeholder: G,
) -> CoreResult<CreateObjectDissection>
where
    G: FnMut() -> Placeholder,
{
    let mut dissector = Dissector {
        registry,
        generate_placeholder,
        nodes: Vec::new(),
    };
    dissector.dissect(collection, object, Vec::new(), BTreeMap::new())?;
    Ok(CreateObjectDissection {
        objects: dissector.nodes,
    })
}

struct Dissector<'r, G> {
    registry: &'r StorageRegistry,
    generate_placeholder: G,
    nodes: Vec<DissectionNode>,
}

impl<G: FnMut() -> Placeholder> Dissector<'_, G> {
    fn dissect(
        &mut self,
        collection: &str,
        object: &Object,
        path: Vec<PathSegment>,
        relations: BTreeMap<String, Placeholder>,
    ) -> CoreResult<()> {
        let definition = self.registry.get(collection)?;

        let lonely_object: Object = object
            .iter()
            .filter(|(key, _)| !definition.reverse_relationships_by_alias.contains_key(*key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let placeholder = (self.generate_placeholder)();
        self.nodes.push(DissectionNode {
            placeholder: placeholder.clone(),
            collection: collection.to_string(),
            path: path.clone(),
            object: lonely_object,
            relations,
        });

        for (reverse_alias, relationship) in &definition.reverse_relationships_by_alias {
            let to_create = match object.get(reverse_alias) {
                None | Some(Value::Null) => continue,
                Some(value) => value,
            };

            match relationship {
                Relationship::ChildOf(r) => {
                    let children = to_create.as_array().ok_or_else(|| {
                        nested_shape_error(collection, reverse_alias, "an array of objects")
                    })?;
                    for (index, child) in children.iter().enumerate() {
                        let child = child.as_object().ok_or_else(|| {
                            nested_shape_error(collection, reverse_alias, "an array of objects")
                        })?;
                        let mut child_path = path.clone();
                        child_path.push(PathSegment::Key(reverse_alias.clone()));
                        child_path.push(PathSegment::Index(index));
                        self.dissect(
                            &r.source_collection,
                            child,
                            child_path,
                            BTreeMap::from([(r.alias.clone(), placeholder.clone())]),
                        )?;
                    }
                }
                Relationship::SingleChildOf(r) => {
                    let child = to_create.as_object().ok_or_else(|| {
                        nested_shape_error(collection, reverse_alias, "an object")
                    })?;
                    let mut child_path = path.clone();
                    child_path.push(PathSegment::Key(reverse_alias.clone()));
                    self.dissect(
                        &r.source_collection,
                        child,
                        child_path,
                        BTreeMap::from([(r.alias.clone(), placeholder.clone())]),
                    )?;
                }
                Relationship::Connects(_) => return Err(connects_create_error()),
            }
        }

        Ok(())
    }
}

pub(crate) fn connects_create_error() -> CoreError {
    CoreError::unsupported("creating connects relationships through a nested create is unsupported")
}

pub(crate) fn nested_shape_error(collection: &str, alias: &str, expected: &str) -> CoreError {
    CoreError::invalid_arguments(
        "createObject",
        format!(
            "'{}' of collection '{}' must hold {}",
            alias, collection, expected
        ),
    )
}

/// One create step per node; relations become `replace` entries
pub fn convert_create_object_dissection_to_batch(
    dissection: &CreateObjectDissection,
) -> OperationBatch {
    dissection
        .objects
        .iter()
        .map(|node| BatchOperation::CreateObject {
            collection: node.collection.clone(),
            placeholder: node.placeholder.to_string(),
            args: node.object.clone(),
            replace: node
                .relations
                .iter()
                .map(|(alias, placeholder)| Replacement {
                    path: alias.clone(),
                    placeholder: placeholder.to_string(),
                })
                .collect(),
        })
        .collect()
}

/// Writes the keys a batch generated back into the nested object.
///
/// Every node's primary key lands at its path, and every child also gets
/// its relation aliases set to the parent's real key.
pub fn reconstruct_created_object_from_batch_result(
    object: Object,
    collection: &str,
    registry: &StorageRegistry,
    dissection: &CreateObjectDissection,
    batch_result: &BatchResult,
) -> CoreResult<Object> {
    if let Some(root) = dissection.objects.first() {
        if root.collection != collection {
            return Err(CoreError::internal(format!(
                "dissection of '{}' does not belong to collection '{}'",
                root.collection, collection
            )));
        }
    }

    let mut root = Value::Object(object);
    let mut keys: HashMap<&Placeholder, Value> = HashMap::new();

    for node in &dissection.objects {
        let definition = registry.get(&node.collection)?;
        let pk_field = definition.single_pk_field().ok_or_else(|| {
            CoreError::unsupported(format!(
                "batch creates of '{}' need a single-field primary key; compound keys are not supported",
                node.collection
            ))
        })?;

        let placeholder = node.placeholder.to_string();
        let created = batch_result.info.get(&placeholder).ok_or_else(|| {
            CoreError::backend(format!(
                "batch result has no entry for placeholder '{}'",
                placeholder
            ))
        })?;
        let key = created.object.get(pk_field).cloned().ok_or_else(|| {
            CoreError::backend(format!(
                "batch result for placeholder '{}' has no '{}' key",
                placeholder, pk_field
            ))
        })?;

        let target = value_at_path_mut(&mut root, &node.path)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                CoreError::internal(format!(
                    "no object at the recorded path of placeholder '{}'",
                    placeholder
                ))
            })?;
        target.insert(pk_field.to_string(), key.clone());
        for (alias, parent) in &node.relations {
            if let Some(parent_key) = keys.get(parent) {
                target.insert(alias.clone(), parent_key.clone());
            }
        }

        keys.insert(&node.placeholder, key);
    }

    match root {
        Value::Object(object) => Ok(object),
        _ => Err(CoreError::internal("reconstructed value is not an object")),
    }
}

/// Walk `path` from `root`
pub(crate) fn value_at_path_mut<'v>(
    root: &'v mut Value,
    path: &[PathSegment],
) -> Option<&'v mut Value> {
    path.iter().try_fold(root, |current, segment| match segment {
        PathSegment::Key(key) => current.get_mut(key.as_str()),
        PathSegment::Index(index) => current.get_mut(*index),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CollectionDefinition, CollectionField};
    use chrono::Utc;
    use serde_json::json;

    async fn registry() -> StorageRegistry {
        let registry = StorageRegistry::default();
        registry
            .register_collection(
                "user",
                CollectionDefinition::new(Utc::now())
                    .with_field("identifier", CollectionField::new("string")),
            )
            .unwrap();
        registry
            .register_collection(
                "userEmail",
                CollectionDefinition::new(Utc::now())
                    .with_field("email", CollectionField::new("string"))
                    .with_relationship(Relationship::child_of("user").with_reverse_alias("emails")),
            )
            .unwrap();
        registry.finish_initialization().await.unwrap();
        registry
    }

    fn object(value: Value) -> Object {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_named_placeholders() {
        let registry = registry().await;
        let names = ["parent", "child"];
        let mut counter = 0;

        let dissection = dissect_create_object_operation_with(
            "user",
            &object(json!({"identifier": "e", "emails": [{"email": "a@b.com"}]})),
            &registry,
            || {
                counter += 1;
                Placeholder::Named(names[counter - 1].to_string())
            },
        )
        .unwrap();

        assert_eq!(
            dissection.objects[1].relations["user"],
            Placeholder::Named("parent".into())
        );

        let batch = convert_create_object_dissection_to_batch(&dissection);
        let BatchOperation::CreateObject {
            placeholder,
            replace,
            ..
        } = &batch[1]
        else {
            panic!("Expected create step");
        };
        assert_eq!(placeholder, "child");
        assert_eq!(
            replace,
            &vec![Replacement {
                path: "user".into(),
                placeholder: "parent".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_collection_fails() {
        let registry = registry().await;
        let err = dissect_create_object_operation("nope", &Object::new(), &registry).unwrap_err();
        assert_eq!(err.code(), "MAP_UNKNOWN_COLLECTION");
    }

    #[tokio::test]
    async fn test_child_of_value_must_be_array() {
        let registry = registry().await;
        let err = dissect_create_object_operation(
            "user",
            &object(json!({"identifier": "e", "emails": {"email": "a@b.com"}})),
            &registry,
        )
        .unwrap_err();
        assert_eq!(err.code(), "MAP_INVALID_ARGUMENTS");
    }

    #[test]
    fn test_value_at_path() {
        let mut root = json!({"emails": [{"email": "a"}, {"email": "b"}]});
        let path = [PathSegment::Key("emails".into()), PathSegment::Index(1)];
        assert_eq!(
            value_at_path_mut(&mut root, &path).cloned(),
            Some(json!({"email": "b"}))
        );
        assert!(value_at_path_mut(&mut root, &[PathSegment::Key("x".into())]).is_none());
    }
}
