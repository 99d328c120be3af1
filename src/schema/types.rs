//! Collection definitions
//!
//! The same structs carry both what an application declares and what the
//! registry resolves (`pk_index`, relationship lookups, field index flags).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::relationships::Relationship;
use crate::fields::{Field, FieldType};

/// Fields of a collection, keyed by name
pub type CollectionFields = BTreeMap<String, CollectionField>;

/// Relationships keyed by alias
pub type RelationshipsByAlias = BTreeMap<String, Relationship>;

/// Field definition
#[derive(Clone, Serialize, Deserialize)]
pub struct CollectionField {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    /// Ordinal of the index covering this field, set by the registry
    #[serde(rename = "_index", default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Handler for custom field types, set by the registry
    #[serde(skip)]
    pub field_object: Option<Arc<dyn Field>>,
}

impl CollectionField {
    pub fn new(field_type: impl Into<FieldType>) -> Self {
        Self {
            field_type: field_type.into(),
            optional: false,
            index: None,
            field_object: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

impl fmt::Debug for CollectionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionField")
            .field("field_type", &self.field_type)
            .field("optional", &self.optional)
            .field("index", &self.index)
            .field("custom", &self.field_object.is_some())
            .finish()
    }
}

impl PartialEq for CollectionField {
    fn eq(&self, other: &Self) -> bool {
        self.field_type == other.field_type
            && self.optional == other.optional
            && self.index == other.index
            && self.field_object.is_some() == other.field_object.is_some()
    }
}

/// Reference to the field(s) a relationship materializes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipReference {
    pub relationship: String,
}

/// One source of an index: a field name or a relationship alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexSourceField {
    Field(String),
    Relationship(RelationshipReference),
}

impl IndexSourceField {
    pub fn as_field(&self) -> Option<&str> {
        match self {
            IndexSourceField::Field(name) => Some(name),
            IndexSourceField::Relationship(_) => None,
        }
    }
}

/// Source of an index; compound indices list several sources in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexSourceFields {
    Single(IndexSourceField),
    Compound(Vec<IndexSourceField>),
}

impl IndexSourceFields {
    pub fn field(name: impl Into<String>) -> Self {
        IndexSourceFields::Single(IndexSourceField::Field(name.into()))
    }

    pub fn relationship(alias: impl Into<String>) -> Self {
        IndexSourceFields::Single(IndexSourceField::Relationship(RelationshipReference {
            relationship: alias.into(),
        }))
    }

    pub fn compound<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        IndexSourceFields::Compound(
            names
                .into_iter()
                .map(|name| IndexSourceField::Field(name.to_string()))
                .collect(),
        )
    }

    pub fn sources(&self) -> &[IndexSourceField] {
        match self {
            IndexSourceFields::Single(source) => std::slice::from_ref(source),
            IndexSourceFields::Compound(sources) => sources,
        }
    }

    /// The field name when this is a single plain field
    pub fn as_single_field(&self) -> Option<&str> {
        match self {
            IndexSourceFields::Single(source) => source.as_field(),
            IndexSourceFields::Compound(_) => None,
        }
    }
}

impl From<&str> for IndexSourceFields {
    fn from(name: &str) -> Self {
        IndexSourceFields::field(name)
    }
}

/// Index definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    /// Field(s) the index covers
    pub field: IndexSourceFields,
    /// Whether this index is the primary key; at most one per collection
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pk: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    /// Auto-incremented primary key; implies `unique`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_inc: bool,
    /// Custom name for the full-text index of a `text` field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text_index_name: Option<String>,
}

impl IndexDefinition {
    pub fn new(field: impl Into<IndexSourceFields>) -> Self {
        Self {
            field: field.into(),
            pk: false,
            unique: false,
            auto_inc: false,
            full_text_index_name: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.pk = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

impl From<IndexSourceField> for IndexSourceFields {
    fn from(source: IndexSourceField) -> Self {
        IndexSourceFields::Single(source)
    }
}

/// Complete collection definition for one schema version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDefinition {
    /// Set by the registry from the registration name
    #[serde(default)]
    pub name: String,
    pub version: DateTime<Utc>,
    pub fields: CollectionFields,
    #[serde(default)]
    pub indices: Vec<IndexDefinition>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk_index: Option<IndexSourceFields>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships_by_alias: RelationshipsByAlias,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reverse_relationships_by_alias: RelationshipsByAlias,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields_with_custom_type: Vec<String>,
    /// Whether changes to this collection are reported to watchers
    #[serde(default = "default_true")]
    pub watch: bool,
    /// Whether this collection is included in backups
    #[serde(default = "default_true")]
    pub backup: bool,
}

fn default_true() -> bool {
    true
}

impl CollectionDefinition {
    pub fn new(version: DateTime<Utc>) -> Self {
        Self {
            name: String::new(),
            version,
            fields: CollectionFields::new(),
            indices: Vec::new(),
            relationships: Vec::new(),
            pk_index: None,
            relationships_by_alias: RelationshipsByAlias::new(),
            reverse_relationships_by_alias: RelationshipsByAlias::new(),
            fields_with_custom_type: Vec::new(),
            watch: true,
            backup: true,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, field: CollectionField) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indices.push(index);
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Primary key field names, in order. Fails on relationship references.
    pub fn pk_fields(&self) -> Option<Vec<&str>> {
        self.pk_index
            .as_ref()?
            .sources()
            .iter()
            .map(IndexSourceField::as_field)
            .collect()
    }

    /// The primary key field when the key is a single plain field
    pub fn single_pk_field(&self) -> Option<&str> {
        self.pk_index.as_ref()?.as_single_field()
    }

    pub fn is_connects_collection(&self) -> bool {
        self.relationships
            .iter()
            .any(|r| matches!(r, Relationship::Connects(_)))
    }
}

/// One definition or a list of versions of it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CollectionDefinitions {
    Single(Box<CollectionDefinition>),
    Versions(Vec<CollectionDefinition>),
}

impl CollectionDefinitions {
    pub fn into_vec(self) -> Vec<CollectionDefinition> {
        match self {
            CollectionDefinitions::Single(def) => vec![*def],
            CollectionDefinitions::Versions(defs) => defs,
        }
    }
}

impl From<CollectionDefinition> for CollectionDefinitions {
    fn from(def: CollectionDefinition) -> Self {
        CollectionDefinitions::Single(Box::new(def))
    }
}

impl From<Vec<CollectionDefinition>> for CollectionDefinitions {
    fn from(defs: Vec<CollectionDefinition>) -> Self {
        CollectionDefinitions::Versions(defs)
    }
}

/// Collection name to definition(s), as declared by an application
pub type CollectionDefinitionMap = BTreeMap<String, CollectionDefinitions>;
