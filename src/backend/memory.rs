//! In-memory storage backend
//!
//! Objects are exchanged with callers keyed by relationship alias and stored
//! keyed by the relationship's field name. Batches run against a copy of the
//! tables that only replaces the live tables when every step succeeded.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::query::{apply_options, matches};
use super::{
    BackendFeatures, BatchOperation, BatchResult, BatchStepResult, CreateManyResult,
    CreateResult, DeleteOptions, Feature, FindOptions, MutationResult, OperationBatch,
    OperationOptions, StorageBackend,
};
use crate::create::{
    dissect_create_object_operation, value_at_path_mut, CreateObjectDissection, Placeholder,
};
use crate::error::{CoreError, CoreResult, DeletionTooBroadError};
use crate::fields::FieldType;
use crate::schema::{CollectionDefinition, IndexSourceField, Relationship, StorageRegistry};
use crate::Object;

/// Produces the key of a new object in the named collection
pub type IdGenerator = Arc<dyn Fn(&str) -> Value + Send + Sync>;

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<String, Vec<Object>>,
    counters: HashMap<String, u64>,
}

enum PlannedStep {
    Create {
        placeholder: String,
        args: Object,
        replace: Vec<super::Replacement>,
        dissection: CreateObjectDissection,
    },
    Update {
        collection: String,
        query: Object,
        updates: Object,
    },
    Delete {
        collection: String,
        query: Object,
    },
}

/// Reference backend keeping every collection in memory
pub struct MemoryBackend {
    registry: Option<Arc<StorageRegistry>>,
    features: BackendFeatures,
    id_generator: Option<IdGenerator>,
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    /// Backend that executes batches atomically
    pub fn new() -> Self {
        Self::with_features(
            BackendFeatures::none()
                .with(Feature::ExecuteBatch)
                .with(Feature::RawCreateObjects)
                .with(Feature::Count),
        )
    }

    /// Backend without batch support; nested creates run sequentially
    pub fn sequential() -> Self {
        Self::with_features(
            BackendFeatures::none()
                .with(Feature::RawCreateObjects)
                .with(Feature::Count),
        )
    }

    pub fn with_features(features: BackendFeatures) -> Self {
        Self {
            registry: None,
            features,
            id_generator: None,
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Replace the per-collection counter used for `auto-pk` keys
    pub fn with_id_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&str) -> Value + Send + Sync + 'static,
    {
        self.id_generator = Some(Arc::new(generator));
        self
    }

    /// Rows as stored, relationship columns under their field names
    pub fn stored_rows(&self, collection: &str) -> CoreResult<Vec<Object>> {
        let tables = self
            .tables
            .read()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;
        Ok(tables.rows.get(collection).cloned().unwrap_or_default())
    }

    fn configured_registry(&self) -> CoreResult<Arc<StorageRegistry>> {
        self.registry
            .clone()
            .ok_or_else(|| CoreError::internal("backend 'memory' was used before being configured"))
    }

    fn generate_id(&self, tables: &mut Tables, collection: &str) -> Value {
        match &self.id_generator {
            Some(generator) => generator(collection),
            None => {
                let counter = tables.counters.entry(collection.to_string()).or_insert(0);
                *counter += 1;
                Value::from(*counter)
            }
        }
    }

    fn insert(
        &self,
        tables: &mut Tables,
        definition: &CollectionDefinition,
        mut object: Object,
    ) -> CoreResult<Object> {
        if let Some(pk) = definition.single_pk_field() {
            let auto_pk = definition
                .fields
                .get(pk)
                .map_or(false, |field| field.field_type == FieldType::AutoPk);
            if auto_pk && object.get(pk).map_or(true, Value::is_null) {
                let id = self.generate_id(tables, &definition.name);
                object.insert(pk.to_string(), id);
            }
        }

        let stored = to_storage(definition, &object);
        check_unique(tables, definition, &stored)?;
        tables
            .rows
            .entry(definition.name.clone())
            .or_default()
            .push(stored);
        Ok(object)
    }

    fn apply_batch(
        &self,
        registry: &StorageRegistry,
        steps: Vec<PlannedStep>,
    ) -> CoreResult<BatchResult> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;
        let mut working = tables.clone();

        let mut result = BatchResult::default();
        let mut step_keys: HashMap<String, Value> = HashMap::new();

        for step in steps {
            match step {
                PlannedStep::Create {
                    placeholder,
                    mut args,
                    replace,
                    mut dissection,
                } => {
                    for replacement in replace {
                        let key = step_keys.get(&replacement.placeholder).ok_or_else(|| {
                            CoreError::backend(format!(
                                "batch step '{}' refers to unknown placeholder '{}'",
                                placeholder, replacement.placeholder
                            ))
                        })?;
                        args.insert(replacement.path.clone(), key.clone());
                        if let Some(root) = dissection.objects.first_mut() {
                            root.object.insert(replacement.path, key.clone());
                        }
                    }

                    let object =
                        self.create_dissected(&mut working, registry, args, &dissection)?;
                    if let Some(key) = primary_key_of(registry, &dissection, &object)? {
                        step_keys.insert(placeholder.clone(), key);
                    }
                    result.info.insert(placeholder, BatchStepResult { object });
                }
                PlannedStep::Update {
                    collection,
                    query,
                    updates,
                } => {
                    let definition = registry.get(&collection)?;
                    update_rows(&mut working, &definition, &query, &updates)?;
                }
                PlannedStep::Delete { collection, query } => {
                    let definition = registry.get(&collection)?;
                    delete_rows(&mut working, &definition, &query, None)?;
                }
            }
        }

        *tables = working;
        Ok(result)
    }

    /// Insert every node of a dissection and return the nested object with
    /// what the inserts produced merged in
    fn create_dissected(
        &self,
        tables: &mut Tables,
        registry: &StorageRegistry,
        args: Object,
        dissection: &CreateObjectDissection,
    ) -> CoreResult<Object> {
        let mut root = Value::Object(args);
        let mut keys: HashMap<&Placeholder, Value> = HashMap::new();

        for node in &dissection.objects {
            let definition = registry.get(&node.collection)?;

            let mut object = node.object.clone();
            for (alias, parent) in &node.relations {
                let key = keys.get(parent).ok_or_else(|| {
                    CoreError::unsupported(format!(
                        "nested creates under '{}' need a single-field primary key on the parent",
                        node.collection
                    ))
                })?;
                object.insert(alias.clone(), key.clone());
            }

            let created = self.insert(tables, &definition, object)?;
            if let Some(key) = definition.single_pk_field().and_then(|pk| created.get(pk)) {
                keys.insert(&node.placeholder, key.clone());
            }

            if let Some(target) =
                value_at_path_mut(&mut root, &node.path).and_then(Value::as_object_mut)
            {
                target.extend(created);
            }
        }

        match root {
            Value::Object(object) => Ok(object),
            _ => Err(CoreError::internal("created value is not an object")),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn backend_type(&self) -> &str {
        "memory"
    }

    fn configure(&mut self, registry: Arc<StorageRegistry>) {
        self.registry = Some(registry);
    }

    fn registry(&self) -> Option<&Arc<StorageRegistry>> {
        self.registry.as_ref()
    }

    fn features(&self) -> BackendFeatures {
        self.features.clone()
    }

    fn pluggable_operations(&self) -> &[&str] {
        &["dump"]
    }

    async fn create_object(
        &self,
        collection: &str,
        object: Object,
        _options: &OperationOptions,
    ) -> CoreResult<CreateResult> {
        let definition = self.definition(collection)?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;
        let object = self.insert(&mut tables, &definition, object)?;
        Ok(CreateResult { object })
    }

    async fn find_objects(
        &self,
        collection: &str,
        query: &Object,
        options: &FindOptions,
    ) -> CoreResult<Vec<Object>> {
        let definition = self.definition(collection)?;
        let tables = self
            .tables
            .read()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;

        let mut found = Vec::new();
        for row in tables.rows.get(collection).into_iter().flatten() {
            let object = from_storage(&definition, row);
            if matches(&object, query)? {
                found.push(object);
            }
        }
        Ok(apply_options(found, options))
    }

    async fn count_objects(&self, collection: &str, query: &Object) -> CoreResult<usize> {
        let definition = self.definition(collection)?;
        let tables = self
            .tables
            .read()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;
        Ok(matching_positions(&tables, &definition, query)?.len())
    }

    async fn update_objects(
        &self,
        collection: &str,
        query: &Object,
        updates: &Object,
        _options: &OperationOptions,
    ) -> CoreResult<MutationResult> {
        let definition = self.definition(collection)?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;
        update_rows(&mut tables, &definition, query, updates)
    }

    async fn delete_objects(
        &self,
        collection: &str,
        query: &Object,
        options: &DeleteOptions,
    ) -> CoreResult<MutationResult> {
        let definition = self.definition(collection)?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;
        delete_rows(&mut tables, &definition, query, options.limit)
    }

    async fn raw_create_objects(
        &self,
        collection: &str,
        objects: Vec<Object>,
        _options: &OperationOptions,
    ) -> CoreResult<CreateManyResult> {
        let definition = self.definition(collection)?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;

        let mut working = tables.clone();
        let objects = objects
            .into_iter()
            .map(|object| self.insert(&mut working, &definition, object))
            .collect::<CoreResult<Vec<_>>>()?;
        *tables = working;

        Ok(CreateManyResult { objects })
    }

    async fn execute_batch(&self, batch: &OperationBatch) -> CoreResult<BatchResult> {
        if !self.supports(Feature::ExecuteBatch) {
            return Err(CoreError::unsupported(
                "backend 'memory' is configured without executeBatch",
            ));
        }
        let registry = self.configured_registry()?;

        // Batch arguments hold storage values; custom fields are not prepared again
        let mut steps = Vec::with_capacity(batch.len());
        for operation in batch {
            let step = match operation {
                BatchOperation::CreateObject {
                    collection,
                    placeholder,
                    args,
                    replace,
                } => {
                    let dissection = dissect_create_object_operation(collection, args, &registry)?;
                    PlannedStep::Create {
                        placeholder: placeholder.clone(),
                        args: args.clone(),
                        replace: replace.clone(),
                        dissection,
                    }
                }
                BatchOperation::UpdateObjects {
                    collection,
                    where_,
                    updates,
                } => PlannedStep::Update {
                    collection: collection.clone(),
                    query: where_.clone(),
                    updates: updates.clone(),
                },
                BatchOperation::DeleteObjects { collection, where_ } => PlannedStep::Delete {
                    collection: collection.clone(),
                    query: where_.clone(),
                },
            };
            steps.push(step);
        }

        debug!(steps = steps.len(), "Executing batch");
        self.apply_batch(&registry, steps)
    }

    async fn migrate(&self, _database: Option<&str>) -> CoreResult<()> {
        let registry = self.configured_registry()?;
        let mut tables = self
            .tables
            .write()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;
        for name in registry.collections()?.keys() {
            tables.rows.entry(name.clone()).or_default();
        }
        Ok(())
    }

    async fn cleanup(&self) -> CoreResult<()> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| CoreError::internal("Lock poisoned"))?;
        *tables = Tables::default();
        Ok(())
    }
}

/// Alias to field name of every relationship column
fn relationship_columns(definition: &CollectionDefinition) -> Vec<(&str, &str)> {
    let mut columns = Vec::new();
    for relationship in &definition.relationships {
        match relationship {
            Relationship::ChildOf(r) | Relationship::SingleChildOf(r) => {
                columns.push((r.alias.as_str(), r.field_name.as_str()));
            }
            Relationship::Connects(r) => {
                for (alias, field_name) in r.aliases.iter().zip(&r.field_names) {
                    columns.push((alias.as_str(), field_name.as_str()));
                }
            }
        }
    }
    columns
}

fn to_storage(definition: &CollectionDefinition, object: &Object) -> Object {
    let mut stored = object.clone();
    for (alias, field_name) in relationship_columns(definition) {
        if let Some(value) = stored.remove(alias) {
            stored.insert(field_name.to_string(), value);
        }
    }
    stored
}

fn from_storage(definition: &CollectionDefinition, row: &Object) -> Object {
    let mut object = row.clone();
    for (alias, field_name) in relationship_columns(definition) {
        if let Some(value) = object.remove(field_name) {
            object.insert(alias.to_string(), value);
        }
    }
    object
}

fn matching_positions(
    tables: &Tables,
    definition: &CollectionDefinition,
    query: &Object,
) -> CoreResult<Vec<usize>> {
    let mut positions = Vec::new();
    for (position, row) in tables
        .rows
        .get(&definition.name)
        .into_iter()
        .flatten()
        .enumerate()
    {
        if matches(&from_storage(definition, row), query)? {
            positions.push(position);
        }
    }
    Ok(positions)
}

fn update_rows(
    tables: &mut Tables,
    definition: &CollectionDefinition,
    query: &Object,
    updates: &Object,
) -> CoreResult<MutationResult> {
    let positions = matching_positions(tables, definition, query)?;
    let updates = to_storage(definition, updates);

    if let Some(rows) = tables.rows.get_mut(&definition.name) {
        for &position in &positions {
            rows[position].extend(updates.clone());
        }
    }
    Ok(MutationResult {
        affected: positions.len(),
    })
}

fn delete_rows(
    tables: &mut Tables,
    definition: &CollectionDefinition,
    query: &Object,
    limit: Option<usize>,
) -> CoreResult<MutationResult> {
    let positions = matching_positions(tables, definition, query)?;
    if let Some(limit) = limit {
        if positions.len() > limit {
            return Err(DeletionTooBroadError::new(
                definition.name.clone(),
                Value::Object(query.clone()),
                limit,
                positions.len(),
            )
            .into());
        }
    }

    if let Some(rows) = tables.rows.get_mut(&definition.name) {
        for &position in positions.iter().rev() {
            rows.remove(position);
        }
    }
    Ok(MutationResult {
        affected: positions.len(),
    })
}

/// Rejects a row whose unique-index values are already taken
fn check_unique(
    tables: &Tables,
    definition: &CollectionDefinition,
    stored: &Object,
) -> CoreResult<()> {
    let Some(rows) = tables.rows.get(&definition.name) else {
        return Ok(());
    };

    for index in definition.indices.iter().filter(|index| index.pk || index.unique) {
        let mut columns: Vec<&str> = Vec::new();
        for source in index.field.sources() {
            match source {
                IndexSourceField::Field(field) => columns.push(field),
                IndexSourceField::Relationship(reference) => {
                    if let Some(relationship) =
                        definition.relationships_by_alias.get(&reference.relationship)
                    {
                        columns.extend(relationship.field_names());
                    }
                }
            }
        }

        let key: Vec<&Value> = columns
            .iter()
            .map(|column| stored.get(*column).unwrap_or(&Value::Null))
            .collect();
        if key.iter().all(|value| value.is_null()) {
            continue;
        }

        let taken = rows.iter().any(|row| {
            columns
                .iter()
                .zip(&key)
                .all(|(column, value)| row.get(*column).unwrap_or(&Value::Null) == *value)
        });
        if taken {
            return Err(CoreError::backend(format!(
                "duplicate value for unique index on {:?} of collection '{}'",
                columns, definition.name
            )));
        }
    }
    Ok(())
}

fn primary_key_of(
    registry: &StorageRegistry,
    dissection: &CreateObjectDissection,
    object: &Object,
) -> CoreResult<Option<Value>> {
    let Some(root) = dissection.objects.first() else {
        return Ok(None);
    };
    let definition = registry.get(&root.collection)?;
    Ok(definition
        .single_pk_field()
        .and_then(|pk| object.get(pk))
        .cloned())
}
