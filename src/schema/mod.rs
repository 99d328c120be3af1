//! Schema subsystem
//!
//! Collections are declared with fields, indices and relationships, and
//! resolved by the [`StorageRegistry`] into a bidirectional relationship
//! graph with derived foreign keys and primary-key indices.

mod inflection;
mod loader;
mod registry;
mod relationships;
mod types;

pub use inflection::pluralize;
pub use loader::SchemaLoader;
pub use registry::{RegistryCollections, SchemaHistoryEntry, StorageRegistry};
pub use relationships::{ChildOfRelationship, ConnectsRelationship, Relationship};
pub use types::{
    CollectionDefinition, CollectionDefinitionMap, CollectionDefinitions, CollectionField,
    CollectionFields, IndexDefinition, IndexSourceField, IndexSourceFields,
    RelationshipReference, RelationshipsByAlias,
};
