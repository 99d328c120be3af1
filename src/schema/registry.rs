//! Storage registry
//!
//! Owns every registered collection definition across versions and resolves
//! the relationship graph in two passes: a forward pass while each collection
//! is registered, and a reverse pass in [`StorageRegistry::finish_initialization`]
//! once every collection is known.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, TimeZone, Utc};
use futures_util::future::{try_join_all, BoxFuture};
use tracing::{debug, info};

use super::relationships::Relationship;
use super::types::{
    CollectionDefinition, CollectionDefinitions, CollectionDefinitionMap, CollectionField,
    IndexDefinition, IndexSourceField, IndexSourceFields,
};
use crate::error::{CoreError, CoreResult};
use crate::fields::{FieldType, FieldTypeRegistry};

/// Live collections keyed by name
pub type RegistryCollections = BTreeMap<String, Arc<CollectionDefinition>>;

/// Collections introduced at one schema version
#[derive(Debug, Clone)]
pub struct SchemaHistoryEntry {
    pub version: DateTime<Utc>,
    pub collections: RegistryCollections,
}

type RegisteredListener = Arc<dyn Fn(&CollectionDefinition) + Send + Sync>;
type InitializedListener = Box<dyn FnOnce() -> BoxFuture<'static, CoreResult<()>> + Send>;

#[derive(Default)]
struct RegistryState {
    /// Every definition ever registered; other maps hold positions into it
    arena: Vec<Arc<CollectionDefinition>>,
    current: BTreeMap<String, usize>,
    by_version: BTreeMap<i64, Vec<usize>>,
    version_map: BTreeMap<i64, BTreeMap<String, usize>>,
}

/// Registry of collection definitions
pub struct StorageRegistry {
    field_types: FieldTypeRegistry,
    state: RwLock<RegistryState>,
    registered_listeners: RwLock<Vec<RegisteredListener>>,
    initialized_listeners: Mutex<Vec<InitializedListener>>,
    initialized: AtomicBool,
}

impl StorageRegistry {
    pub fn new(field_types: FieldTypeRegistry) -> Self {
        Self {
            field_types,
            state: RwLock::new(RegistryState::default()),
            registered_listeners: RwLock::new(Vec::new()),
            initialized_listeners: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn field_types(&self) -> &FieldTypeRegistry {
        &self.field_types
    }

    /// Register one definition or several versions of one collection.
    ///
    /// Definitions are resolved in ascending version order. Nothing is stored
    /// unless every definition resolves.
    pub fn register_collection(
        &self,
        name: &str,
        defs: impl Into<CollectionDefinitions>,
    ) -> CoreResult<()> {
        if self.is_initialized() {
            return Err(CoreError::AlreadyInitialized);
        }

        let mut defs = defs.into().into_vec();
        defs.sort_by_key(|def| def.version);

        let resolved = defs
            .into_iter()
            .map(|def| self.resolve_definition(name, def))
            .collect::<CoreResult<Vec<_>>>()?;

        let current = {
            let mut state = self
                .state
                .write()
                .map_err(|_| CoreError::internal("Lock poisoned"))?;

            for def in resolved {
                let version = def.version.timestamp_millis();
                debug!(collection = name, version = %def.version, "Registering collection version");

                let position = state.arena.len();
                let replaces_current = match state.current.get(name) {
                    Some(&existing) => def.version >= state.arena[existing].version,
                    None => true,
                };
                state.arena.push(Arc::new(def));

                if replaces_current {
                    state.current.insert(name.to_string(), position);
                }
                state.by_version.entry(version).or_default().push(position);
                state
                    .version_map
                    .entry(version)
                    .or_default()
                    .insert(name.to_string(), position);
            }

            state
                .current
                .get(name)
                .map(|&position| state.arena[position].clone())
        };

        if let Some(current) = current {
            let listeners = self
                .registered_listeners
                .read()
                .map_err(|_| CoreError::internal("Lock poisoned"))?
                .clone();
            for listener in listeners {
                listener(&current);
            }
        }

        Ok(())
    }

    /// Register every collection of a declaration map
    pub fn register_collections(&self, collections: CollectionDefinitionMap) -> CoreResult<()> {
        for (name, defs) in collections {
            self.register_collection(&name, defs)?;
        }
        Ok(())
    }

    /// Call `listener` with the live definition after each registration
    pub fn on_collection_registered<F>(&self, listener: F) -> CoreResult<()>
    where
        F: Fn(&CollectionDefinition) + Send + Sync + 'static,
    {
        self.registered_listeners
            .write()
            .map_err(|_| CoreError::internal("Lock poisoned"))?
            .push(Arc::new(listener));
        Ok(())
    }

    /// Run `listener` once initialization finishes. All listeners are awaited.
    pub fn on_initialized<F, Fut>(&self, listener: F) -> CoreResult<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = CoreResult<()>> + Send + 'static,
    {
        self.initialized_listeners
            .lock()
            .map_err(|_| CoreError::internal("Lock poisoned"))?
            .push(Box::new(move || Box::pin(listener())));
        Ok(())
    }

    /// Connect reverse relationships over the whole graph and notify listeners.
    ///
    /// Must be called exactly once, after every collection is registered and
    /// before any operation is issued.
    pub async fn finish_initialization(&self) -> CoreResult<()> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CoreError::AlreadyInitialized);
        }

        if let Err(e) = self.connect_reverse_relationships() {
            self.initialized.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let listeners: Vec<InitializedListener> = std::mem::take(
            &mut *self
                .initialized_listeners
                .lock()
                .map_err(|_| CoreError::internal("Lock poisoned"))?,
        );
        info!(listeners = listeners.len(), "Storage registry initialized");

        try_join_all(listeners.into_iter().map(|listener| listener())).await?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Fails unless [`Self::finish_initialization`] has run
    pub fn ensure_initialized(&self) -> CoreResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(CoreError::NotInitialized)
        }
    }

    /// Live definition of a collection
    pub fn get(&self, name: &str) -> CoreResult<Arc<CollectionDefinition>> {
        self.collection(name)?
            .ok_or_else(|| CoreError::UnknownCollection(name.to_string()))
    }

    pub fn collection(&self, name: &str) -> CoreResult<Option<Arc<CollectionDefinition>>> {
        let state = self
            .state
            .read()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;
        Ok(state
            .current
            .get(name)
            .map(|&position| state.arena[position].clone()))
    }

    /// Every live definition
    pub fn collections(&self) -> CoreResult<RegistryCollections> {
        let state = self
            .state
            .read()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;
        Ok(state
            .current
            .iter()
            .map(|(name, &position)| (name.clone(), state.arena[position].clone()))
            .collect())
    }

    /// Collections registered at exactly `version`
    pub fn get_collections_by_version(
        &self,
        version: DateTime<Utc>,
    ) -> CoreResult<Option<RegistryCollections>> {
        let state = self
            .state
            .read()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;
        Ok(state
            .version_map
            .get(&version.timestamp_millis())
            .map(|collections| {
                collections
                    .iter()
                    .map(|(name, &position)| (name.clone(), state.arena[position].clone()))
                    .collect()
            }))
    }

    /// Every schema version, oldest first
    pub fn get_schema_history(&self) -> CoreResult<Vec<SchemaHistoryEntry>> {
        let state = self
            .state
            .read()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;

        state
            .by_version
            .iter()
            .map(|(&millis, positions)| {
                let version = Utc
                    .timestamp_millis_opt(millis)
                    .single()
                    .ok_or_else(|| CoreError::internal(format!("Invalid version {}", millis)))?;
                let collections = positions
                    .iter()
                    .map(|&position| {
                        let def = &state.arena[position];
                        (def.name.clone(), def.clone())
                    })
                    .collect();
                Ok(SchemaHistoryEntry {
                    version,
                    collections,
                })
            })
            .collect()
    }

    // ==================
    // Forward pass
    // ==================

    fn resolve_definition(
        &self,
        name: &str,
        mut def: CollectionDefinition,
    ) -> CoreResult<CollectionDefinition> {
        def.name = name.to_string();
        self.preprocess_field_types(&mut def)?;
        assign_primary_key(&mut def)?;
        preprocess_relationships(&mut def)?;
        flag_indexed_fields(&mut def)?;
        Ok(def)
    }

    fn preprocess_field_types(&self, def: &mut CollectionDefinition) -> CoreResult<()> {
        def.fields_with_custom_type.clear();

        for (field_name, field) in def.fields.iter_mut() {
            let FieldType::Custom(type_name) = &field.field_type else {
                continue;
            };

            let handler = self.field_types.instantiate(type_name).ok_or_else(|| {
                CoreError::MissingFieldType {
                    collection: def.name.clone(),
                    field: field_name.clone(),
                    field_type: type_name.clone(),
                }
            })?;
            field.field_object = Some(handler);
            def.fields_with_custom_type.push(field_name.clone());
        }

        Ok(())
    }

    // ==================
    // Reverse pass
    // ==================

    fn connect_reverse_relationships(&self) -> CoreResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;

        let mut edges: Vec<(usize, String, Relationship)> = Vec::new();
        for (source, &position) in &state.current {
            for relationship in &state.arena[position].relationships {
                match relationship {
                    Relationship::ChildOf(r) | Relationship::SingleChildOf(r) => {
                        let target = lookup_current(&state, &r.target_collection, source)?;
                        edges.push((target, r.reverse_alias.clone(), relationship.clone()));
                    }
                    Relationship::Connects(r) => {
                        for (endpoint, reverse_alias) in r.connects.iter().zip(&r.reverse_aliases) {
                            let target = lookup_current(&state, endpoint, source)?;
                            edges.push((target, reverse_alias.clone(), relationship.clone()));
                        }
                    }
                }
            }
        }

        for (target, reverse_alias, relationship) in edges {
            debug!(
                collection = %state.arena[target].name,
                reverse_alias = %reverse_alias,
                "Connecting reverse relationship"
            );
            Arc::make_mut(&mut state.arena[target])
                .reverse_relationships_by_alias
                .insert(reverse_alias, relationship);
        }

        Ok(())
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new(FieldTypeRegistry::default())
    }
}

impl std::fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("field_types", &self.field_types)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

fn lookup_current(state: &RegistryState, target: &str, source: &str) -> CoreResult<usize> {
    state
        .current
        .get(target)
        .copied()
        .ok_or_else(|| CoreError::InvalidRelationship {
            collection: source.to_string(),
            relationship: format!("references unknown collection '{}'", target),
        })
}

fn assign_primary_key(def: &mut CollectionDefinition) -> CoreResult<()> {
    let mut pk_indices = def.indices.iter().filter(|index| index.pk);
    let pk_index = pk_indices.next().map(|index| index.field.clone());
    if pk_indices.next().is_some() {
        return Err(CoreError::InvalidIndex {
            collection: def.name.clone(),
            reason: "more than one index is flagged as primary key".to_string(),
        });
    }

    let pk_index = match pk_index {
        Some(IndexSourceFields::Single(IndexSourceField::Relationship(_))) => {
            return Err(CoreError::InvalidPrimaryKey(def.name.clone()));
        }
        Some(pk_index) => pk_index,
        None => {
            def.indices
                .insert(0, IndexDefinition::new("id").primary().unique());
            IndexSourceFields::field("id")
        }
    };

    if let Some(field) = pk_index.as_single_field() {
        if !def.fields.contains_key(field) {
            def.fields
                .insert(field.to_string(), CollectionField::new(FieldType::AutoPk));
        }
    }

    def.pk_index = Some(pk_index);
    Ok(())
}

fn preprocess_relationships(def: &mut CollectionDefinition) -> CoreResult<()> {
    def.relationships_by_alias.clear();
    def.reverse_relationships_by_alias.clear();

    for relationship in def.relationships.iter_mut() {
        if !relationship.resolve_names(&def.name) {
            return Err(CoreError::InvalidRelationship {
                collection: def.name.clone(),
                relationship: format!("{:?}", relationship),
            });
        }

        let (fields, index_source) = relationship.implicit_schema();
        for (field_name, field_type) in fields {
            def.fields.insert(field_name, CollectionField::new(field_type));
        }
        if !def.indices.iter().any(|index| index.field == index_source) {
            def.indices.push(IndexDefinition::new(index_source));
        }

        let aliases: Vec<String> = match &*relationship {
            Relationship::ChildOf(r) | Relationship::SingleChildOf(r) => vec![r.alias.clone()],
            Relationship::Connects(r) => r.aliases.to_vec(),
        };
        for alias in aliases {
            if def
                .relationships_by_alias
                .insert(alias.clone(), relationship.clone())
                .is_some()
            {
                return Err(CoreError::InvalidRelationship {
                    collection: def.name.clone(),
                    relationship: format!("alias '{}' is declared more than once", alias),
                });
            }
        }
    }

    Ok(())
}

fn flag_indexed_fields(def: &mut CollectionDefinition) -> CoreResult<()> {
    let CollectionDefinition {
        name,
        fields,
        indices,
        relationships_by_alias,
        ..
    } = def;

    for (ordinal, index) in indices.iter().enumerate() {
        for source in index.field.sources() {
            let field_names: Vec<&str> = match source {
                IndexSourceField::Field(field_name) => vec![field_name.as_str()],
                IndexSourceField::Relationship(reference) => relationships_by_alias
                    .get(&reference.relationship)
                    .map(Relationship::field_names)
                    .ok_or_else(|| CoreError::InvalidIndex {
                        collection: name.clone(),
                        reason: format!(
                            "index references unknown relationship '{}'",
                            reference.relationship
                        ),
                    })?,
            };

            for field_name in field_names {
                let field = fields
                    .get_mut(field_name)
                    .ok_or_else(|| CoreError::UnknownIndexField {
                        field: field_name.to_string(),
                        collection: name.clone(),
                    })?;
                field.index = Some(ordinal);
            }
        }
    }

    Ok(())
}
