//! Storage Manager
//!
//! Entry point applications hold: owns the registry, the configured backend
//! and the dispatch pipeline. Collection handles are sugar over
//! [`StorageManager::operation`].

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tracing::info;

use crate::backend::{DeleteOptions, FindOptions, MutationResult, StorageBackend};
use crate::config::MapperConfig;
use crate::core::context::OperationContext;
use crate::core::executor::BackendExecutor;
use crate::core::middleware::Middleware;
use crate::core::operation::{resolve_collection_alias, validate_operation_registration, OperationCall};
use crate::core::pipeline::{OperationResult, Pipeline};
use crate::error::{CoreError, CoreResult};
use crate::fields::create_default_field_type_registry;
use crate::schema::StorageRegistry;
use crate::Object;

/// Installs backend-specific operation handlers on a manager
pub trait BackendPlugin: Send + Sync {
    fn install(&self, manager: &StorageManager) -> CoreResult<()>;
}

pub struct StorageManager {
    registry: Arc<StorageRegistry>,
    backend: Arc<dyn StorageBackend>,
    executor: Arc<BackendExecutor>,
    pipeline: Pipeline,
}

impl StorageManager {
    /// Configure `backend` against a fresh registry built from `config`
    pub fn new<B>(mut backend: B, config: &MapperConfig) -> Self
    where
        B: StorageBackend + 'static,
    {
        let registry = Arc::new(StorageRegistry::new(create_default_field_type_registry(
            config.random_key_length,
        )));
        backend.configure(Arc::clone(&registry));
        let backend: Arc<dyn StorageBackend> = Arc::new(backend);

        let executor = Arc::new(BackendExecutor::new(
            Arc::clone(&backend),
            Arc::clone(&registry),
            config.prefer_batch_create,
        ));
        let pipeline = Pipeline::new(executor.clone());

        Self {
            registry,
            backend,
            executor,
            pipeline,
        }
    }

    pub fn registry(&self) -> &Arc<StorageRegistry> {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Append an interceptor; the first added runs outermost
    pub fn with_middleware(self, m: impl Middleware + 'static) -> Self {
        Self {
            pipeline: self.pipeline.with_middleware(m),
            ..self
        }
    }

    /// Replace the interceptor list
    pub fn set_middleware(&self, middleware: Vec<Arc<dyn Middleware>>) -> CoreResult<()> {
        self.pipeline.set_middleware(middleware)
    }

    /// Register a handler for a project-scoped, core, or pluggable backend
    /// operation name
    pub fn register_operation<F, Fut>(&self, name: &str, handler: F) -> CoreResult<()>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<Value>> + Send + 'static,
    {
        let identifier = validate_operation_registration(name, self.backend.as_ref())?;
        info!(operation = %identifier, "Registering operation handler");
        self.executor.register_handler(
            &identifier,
            Arc::new(move |args| -> BoxFuture<'static, CoreResult<Value>> {
                Box::pin(handler(args))
            }),
        )
    }

    pub fn use_plugin(&self, plugin: &dyn BackendPlugin) -> CoreResult<()> {
        plugin.install(self)
    }

    /// Connect reverse relationships and run the initialization listeners
    pub async fn finish_initialization(&self) -> CoreResult<()> {
        self.registry.finish_initialization().await?;
        info!(
            backend = self.backend.backend_type(),
            "Storage manager initialized"
        );
        Ok(())
    }

    /// Run an operation through the interceptor chain
    pub async fn operation(&self, name: &str, args: Vec<Value>) -> OperationResult {
        self.pipeline
            .execute(OperationCall::new(name, args), OperationContext::new())
            .await
    }

    pub fn collection(&self, name: impl Into<String>) -> CollectionHandle<'_> {
        CollectionHandle {
            manager: self,
            name: name.into(),
        }
    }
}

/// Operations bound to one collection
pub struct CollectionHandle<'m> {
    manager: &'m StorageManager,
    name: String,
}

impl CollectionHandle<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run a collection-level operation, resolving alias names
    pub async fn operation(&self, name: &str, args: Vec<Value>) -> OperationResult {
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(Value::String(self.name.clone()));
        full_args.extend(args);
        self.manager
            .operation(resolve_collection_alias(name), full_args)
            .await
    }

    /// Create a possibly nested object, returning it with every generated key
    pub async fn create_object(&self, object: Value) -> CoreResult<Object> {
        let result = self.operation("createObject", vec![object]).await?;
        match result {
            Value::Object(mut map) => match map.remove("object") {
                Some(Value::Object(object)) => Ok(object),
                _ => Err(unexpected_result("createObject")),
            },
            _ => Err(unexpected_result("createObject")),
        }
    }

    pub async fn find_object(&self, query: Value) -> CoreResult<Option<Object>> {
        match self.operation("findObject", vec![query]).await? {
            Value::Null => Ok(None),
            Value::Object(object) => Ok(Some(object)),
            _ => Err(unexpected_result("findObject")),
        }
    }

    pub async fn find_objects(&self, query: Value, options: FindOptions) -> CoreResult<Vec<Object>> {
        let result = self
            .operation("findObjects", vec![query, serde_json::to_value(options)?])
            .await?;
        serde_json::from_value(result).map_err(|_| unexpected_result("findObjects"))
    }

    pub async fn count_objects(&self, query: Value) -> CoreResult<usize> {
        let result = self.operation("countObjects", vec![query]).await?;
        serde_json::from_value(result).map_err(|_| unexpected_result("countObjects"))
    }

    pub async fn update_object(&self, object: Value, updates: Value) -> CoreResult<MutationResult> {
        let result = self.operation("updateObject", vec![object, updates]).await?;
        serde_json::from_value(result).map_err(|_| unexpected_result("updateObject"))
    }

    pub async fn update_objects(&self, query: Value, updates: Value) -> CoreResult<MutationResult> {
        let result = self.operation("updateObjects", vec![query, updates]).await?;
        serde_json::from_value(result).map_err(|_| unexpected_result("updateObjects"))
    }

    pub async fn delete_object(&self, object: Value) -> CoreResult<MutationResult> {
        let result = self.operation("deleteObject", vec![object]).await?;
        serde_json::from_value(result).map_err(|_| unexpected_result("deleteObject"))
    }

    pub async fn delete_objects(
        &self,
        query: Value,
        options: DeleteOptions,
    ) -> CoreResult<MutationResult> {
        let result = self
            .operation("deleteObjects", vec![query, json!(options)])
            .await?;
        serde_json::from_value(result).map_err(|_| unexpected_result("deleteObjects"))
    }
}

fn unexpected_result(operation: &str) -> CoreError {
    CoreError::internal(format!("unexpected result shape from '{}'", operation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::schema::{CollectionDefinition, CollectionField};
    use chrono::Utc;

    async fn manager() -> StorageManager {
        let manager = StorageManager::new(MemoryBackend::new(), &MapperConfig::default());
        manager
            .registry()
            .register_collection(
                "note",
                CollectionDefinition::new(Utc::now())
                    .with_field("title", CollectionField::new("string")),
            )
            .unwrap();
        manager.finish_initialization().await.unwrap();
        manager
    }

    #[tokio::test]
    async fn test_collection_sugar_round_trip() {
        let manager = manager().await;
        let notes = manager.collection("note");

        let created = notes.create_object(json!({"title": "a"})).await.unwrap();
        assert_eq!(created.get("id"), Some(&json!(1)));

        let found = notes.find_object(json!({"title": "a"})).await.unwrap();
        assert_eq!(found, Some(created));
        assert_eq!(notes.count_objects(json!({})).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_alias_resolves_to_canonical_operation() {
        let manager = manager().await;
        let notes = manager.collection("note");
        notes.create_object(json!({"title": "a"})).await.unwrap();

        let all = notes
            .operation("findAllObjects", vec![json!({})])
            .await
            .unwrap();
        assert_eq!(all.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_operations_require_initialization() {
        let manager = StorageManager::new(MemoryBackend::new(), &MapperConfig::default());
        let err = manager
            .operation("findObjects", vec![json!("note")])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MAP_NOT_INITIALIZED");
    }
}
