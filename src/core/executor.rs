//! Backend Executor
//!
//! Innermost stage of the dispatch chain. Registered handlers are looked up
//! first; bare core operation names then map onto the backend contract.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::backend::{DeleteOptions, FindOptions, OperationBatch, StorageBackend};
use crate::core::context::OperationContext;
use crate::core::operation::{CoreOperation, OperationCall, OperationIdentifier};
use crate::core::pipeline::{OperationExecutor, OperationResult};
use crate::create::create_object;
use crate::error::{CoreError, CoreResult};
use crate::schema::{CollectionDefinition, StorageRegistry};
use crate::Object;

/// Handler for a registered operation; receives the positional arguments
pub type OperationHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, CoreResult<Value>> + Send + Sync>;

pub struct BackendExecutor {
    backend: Arc<dyn StorageBackend>,
    registry: Arc<StorageRegistry>,
    handlers: RwLock<HashMap<String, OperationHandler>>,
    prefer_batch_create: bool,
}

impl BackendExecutor {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        registry: Arc<StorageRegistry>,
        prefer_batch_create: bool,
    ) -> Self {
        Self {
            backend,
            registry,
            handlers: RwLock::new(HashMap::new()),
            prefer_batch_create,
        }
    }

    /// Register a handler under an already validated identifier
    pub fn register_handler(
        &self,
        identifier: &OperationIdentifier,
        handler: OperationHandler,
    ) -> CoreResult<()> {
        self.handlers
            .write()
            .map_err(|_| CoreError::internal("Lock poisoned"))?
            .insert(identifier.to_string(), handler);
        Ok(())
    }

    fn handler(&self, identifier: &OperationIdentifier) -> CoreResult<Option<OperationHandler>> {
        Ok(self
            .handlers
            .read()
            .map_err(|_| CoreError::internal("Lock poisoned"))?
            .get(&identifier.to_string())
            .cloned())
    }

    async fn dispatch(&self, call: OperationCall) -> OperationResult {
        self.registry.ensure_initialized()?;

        let identifier = OperationIdentifier::parse(&call.name)?;
        if let Some(handler) = self.handler(&identifier)? {
            debug!(operation = %identifier, "Dispatching to registered handler");
            return handler(call.args).await;
        }
        if identifier.is_namespaced() {
            return Err(CoreError::UnknownOperation(call.name));
        }

        let operation: CoreOperation = identifier.operation.parse()?;
        self.run_core(operation, Args::new(operation, call.args)).await
    }

    async fn run_core(&self, operation: CoreOperation, args: Args) -> OperationResult {
        let backend = self.backend.as_ref();

        match operation {
            CoreOperation::CreateObject => {
                let collection = args.string(0)?;
                let object = create_object(
                    backend,
                    &self.registry,
                    &collection,
                    args.object(1)?,
                    &args.object_or_default(2)?,
                    self.prefer_batch_create,
                )
                .await?;
                Ok(json!({ "object": object }))
            }
            CoreOperation::RawCreateObjects => {
                let collection = args.string(0)?;
                let objects: Vec<Object> = args.decode(1)?;
                let result = backend
                    .raw_create_objects(&collection, objects, &args.object_or_default(2)?)
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
            CoreOperation::FindObject => {
                let collection = args.string(0)?;
                let found = backend
                    .find_object(&collection, &args.object_or_default(1)?, &args.decode(2)?)
                    .await?;
                match found {
                    Some(mut object) => {
                        let definition = self.registry.get(&collection)?;
                        prepare_object_from_storage(&definition, &mut object).await?;
                        Ok(Value::Object(object))
                    }
                    None => Ok(Value::Null),
                }
            }
            CoreOperation::FindObjects => {
                let collection = args.string(0)?;
                let options: FindOptions = args.decode(2)?;
                let mut objects = backend
                    .find_objects(&collection, &args.object_or_default(1)?, &options)
                    .await?;
                let definition = self.registry.get(&collection)?;
                for object in &mut objects {
                    prepare_object_from_storage(&definition, object).await?;
                }
                Ok(json!(objects))
            }
            CoreOperation::CountObjects => {
                let collection = args.string(0)?;
                let count = backend
                    .count_objects(&collection, &args.object_or_default(1)?)
                    .await?;
                Ok(json!(count))
            }
            CoreOperation::UpdateObject => {
                let collection = args.string(0)?;
                let result = backend
                    .update_object(
                        &collection,
                        &args.object(1)?,
                        &args.object(2)?,
                        &args.object_or_default(3)?,
                    )
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
            CoreOperation::UpdateObjects => {
                let collection = args.string(0)?;
                let result = backend
                    .update_objects(
                        &collection,
                        &args.object(1)?,
                        &args.object(2)?,
                        &args.object_or_default(3)?,
                    )
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
            CoreOperation::DeleteObject => {
                let collection = args.string(0)?;
                let options: DeleteOptions = args.decode(2)?;
                let result = backend
                    .delete_object(&collection, &args.object(1)?, &options)
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
            CoreOperation::DeleteObjects => {
                let collection = args.string(0)?;
                let options: DeleteOptions = args.decode(2)?;
                let result = backend
                    .delete_objects(&collection, &args.object(1)?, &options)
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
            CoreOperation::ExecuteBatch => {
                let batch: OperationBatch = args.decode(0)?;
                let result = backend.execute_batch(&batch).await?;
                Ok(serde_json::to_value(result)?)
            }
            CoreOperation::Migrate => {
                let options = args.object_or_default(0)?;
                let database = options.get("database").and_then(Value::as_str);
                backend.migrate(database).await?;
                Ok(Value::Null)
            }
            CoreOperation::Cleanup => {
                backend.cleanup().await?;
                Ok(Value::Null)
            }
            CoreOperation::AlterSchema => Err(CoreError::unsupported(format!(
                "backend '{}' has no alterSchema handler",
                backend.backend_type()
            ))),
        }
    }
}

impl OperationExecutor for BackendExecutor {
    fn execute<'a>(
        &'a self,
        call: OperationCall,
        _ctx: &'a OperationContext,
    ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
        Box::pin(self.dispatch(call))
    }
}

/// Run every custom field of a stored object through its read transform
async fn prepare_object_from_storage(
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
        if let Some(stored) = object.remove(field_name) {
            let value = handler.prepare_from_storage(stored).await?;
            object.insert(field_name.clone(), value);
        }
    }
    Ok(())
}

/// Positional arguments of a core operation
struct Args {
    operation: CoreOperation,
    values: Vec<Value>,
}

impl Args {
    fn new(operation: CoreOperation, values: Vec<Value>) -> Self {
        Self { operation, values }
    }

    fn get(&self, index: usize) -> &Value {
        self.values.get(index).unwrap_or(&Value::Null)
    }

    fn invalid(&self, reason: String) -> CoreError {
        CoreError::invalid_arguments(self.operation.as_str(), reason)
    }

    fn string(&self, index: usize) -> CoreResult<String> {
        self.get(index)
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.invalid(format!("argument {} must be a string", index)))
    }

    fn object(&self, index: usize) -> CoreResult<Object> {
        self.get(index)
            .as_object()
            .cloned()
            .ok_or_else(|| self.invalid(format!("argument {} must be an object", index)))
    }

    /// Missing or `null` arguments read as an empty object
    fn object_or_default(&self, index: usize) -> CoreResult<Object> {
        match self.get(index) {
            Value::Null => Ok(Object::new()),
            _ => self.object(index),
        }
    }

    fn decode<T: DeserializeOwned + Default>(&self, index: usize) -> CoreResult<T> {
        match self.get(index) {
            Value::Null => Ok(T::default()),
            value => serde_json::from_value(value.clone())
                .map_err(|e| self.invalid(format!("argument {}: {}", index, e))),
        }
    }
}
