//! Operation Dispatch Tests
//!
//! Test Categories:
//! 1. Interceptor ordering and context lifetime
//! 2. Default single-object derivations
//! 3. Operation registration and plugins
//! 4. Initialization gate

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use aeromap::backend::{
    CreateResult, DeleteOptions, FindOptions, MutationResult, OperationOptions, StorageBackend,
};
use aeromap::core::{Middleware, Next, OperationCall, OperationContext, OperationResult};
use aeromap::schema::{
    CollectionDefinition, CollectionField, IndexDefinition, IndexSourceFields, StorageRegistry,
};
use aeromap::{
    BackendPlugin, CoreError, CoreResult, MapperConfig, MemoryBackend, Object, StorageManager,
    TracingMiddleware,
};

type Log = Arc<Mutex<Vec<String>>>;

/// Records entry and exit, and tags the result with its name
struct Recorder {
    name: &'static str,
    log: Log,
}

impl Middleware for Recorder {
    fn process<'a>(
        &'a self,
        call: OperationCall,
        ctx: &'a mut OperationContext,
        next: Next<'a>,
    ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
        Box::pin(async move {
            self.log.lock().unwrap().push(format!(
                "enter {} with {} extra keys",
                self.name,
                ctx.extra_data.len()
            ));
            ctx.extra_data.insert(self.name.to_string(), json!(true));

            let mut result = next.run(call, ctx).await?;

            self.log.lock().unwrap().push(format!("exit {}", self.name));
            if let Value::Object(map) = &mut result {
                map.insert(self.name.to_string(), json!(true));
            }
            Ok(result)
        })
    }
}

async fn memory_manager() -> StorageManager {
    let manager = StorageManager::new(MemoryBackend::new(), &MapperConfig::default());
    manager
        .registry()
        .register_collection(
            "note",
            CollectionDefinition::new(Utc::now()).with_field("title", CollectionField::new("string")),
        )
        .unwrap();
    manager.finish_initialization().await.unwrap();
    manager
}

// =============================================================================
// INTERCEPTORS
// =============================================================================

/// Test: Interceptors run outermost first, unwind in reverse, and every
/// contribution to the result survives.
#[tokio::test]
async fn test_interceptors_run_in_registration_order() {
    let log: Log = Arc::default();
    let manager = memory_manager()
        .await
        .with_middleware(TracingMiddleware::new())
        .with_middleware(Recorder {
            name: "outer",
            log: log.clone(),
        })
        .with_middleware(Recorder {
            name: "inner",
            log: log.clone(),
        });

    let result = manager
        .operation("createObject", vec![json!("note"), json!({"title": "a"})])
        .await
        .unwrap();

    assert_eq!(result["object"]["title"], "a");
    assert_eq!(result["outer"], true);
    assert_eq!(result["inner"], true);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "enter outer with 0 extra keys",
            "enter inner with 1 extra keys",
            "exit inner",
            "exit outer",
        ]
    );
}

/// Test: Extra data lives for one call only.
#[tokio::test]
async fn test_extra_data_is_not_retained_between_calls() {
    let log: Log = Arc::default();
    let manager = memory_manager().await.with_middleware(Recorder {
        name: "only",
        log: log.clone(),
    });

    for _ in 0..2 {
        manager
            .collection("note")
            .count_objects(json!({}))
            .await
            .unwrap();
    }

    let entries: Vec<String> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|line| line.starts_with("enter"))
        .cloned()
        .collect();
    assert_eq!(entries, vec!["enter only with 0 extra keys"; 2]);
}

/// Test: Replacing the interceptor list takes effect on the next call.
#[tokio::test]
async fn test_set_middleware_replaces_the_chain() {
    let log: Log = Arc::default();
    let manager = memory_manager().await.with_middleware(Recorder {
        name: "old",
        log: log.clone(),
    });
    manager
        .set_middleware(vec![Arc::new(Recorder {
            name: "new",
            log: log.clone(),
        })])
        .unwrap();

    let result = manager
        .collection("note")
        .operation("findAllObjects", vec![json!({})])
        .await
        .unwrap();

    assert_eq!(result, json!([]));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["enter new with 0 extra keys", "exit new"]
    );
}

// =============================================================================
// SINGLE-OBJECT DERIVATIONS
// =============================================================================

/// Backend that records the queries it receives
#[derive(Default)]
struct RecordingBackend {
    registry: Option<Arc<StorageRegistry>>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

#[async_trait]
impl StorageBackend for RecordingBackend {
    fn backend_type(&self) -> &str {
        "recording"
    }

    fn configure(&mut self, registry: Arc<StorageRegistry>) {
        self.registry = Some(registry);
    }

    fn registry(&self) -> Option<&Arc<StorageRegistry>> {
        self.registry.as_ref()
    }

    async fn create_object(
        &self,
        _collection: &str,
        object: Object,
        _options: &OperationOptions,
    ) -> CoreResult<CreateResult> {
        Ok(CreateResult { object })
    }

    async fn find_objects(
        &self,
        _collection: &str,
        _query: &Object,
        _options: &FindOptions,
    ) -> CoreResult<Vec<Object>> {
        Ok(Vec::new())
    }

    async fn update_objects(
        &self,
        _collection: &str,
        query: &Object,
        updates: &Object,
        _options: &OperationOptions,
    ) -> CoreResult<MutationResult> {
        self.calls.lock().unwrap().push((
            "update".into(),
            json!({"where": query, "updates": updates}),
        ));
        Ok(MutationResult { affected: 1 })
    }

    async fn delete_objects(
        &self,
        _collection: &str,
        query: &Object,
        options: &DeleteOptions,
    ) -> CoreResult<MutationResult> {
        self.calls.lock().unwrap().push((
            "delete".into(),
            json!({"where": query, "limit": options.limit}),
        ));
        Ok(MutationResult { affected: 1 })
    }
}

/// Test: updateObject and deleteObject select by every primary key field
/// and nothing else.
#[tokio::test]
async fn test_compound_key_derivations_build_exact_where() {
    let backend = RecordingBackend::default();
    let calls = backend.calls.clone();
    let manager = StorageManager::new(backend, &MapperConfig::default());
    manager
        .registry()
        .register_collection(
            "visit",
            CollectionDefinition::new(Utc::now())
                .with_field("pageUrl", CollectionField::new("string"))
                .with_field("createdWhen", CollectionField::new("timestamp"))
                .with_field("title", CollectionField::new("string"))
                .with_index(
                    IndexDefinition::new(IndexSourceFields::compound(["pageUrl", "createdWhen"]))
                        .primary(),
                ),
        )
        .unwrap();
    manager.finish_initialization().await.unwrap();

    let visits = manager.collection("visit");
    let visit = json!({"pageUrl": "a.com", "createdWhen": 5, "title": "old"});

    let updated = visits
        .update_object(visit.clone(), json!({"title": "new"}))
        .await
        .unwrap();
    assert_eq!(updated.affected, 1);
    visits.delete_object(visit).await.unwrap();

    let calls = calls.lock().unwrap();
    assert_eq!(
        calls[0],
        (
            "update".to_string(),
            json!({
                "where": {"pageUrl": "a.com", "createdWhen": 5},
                "updates": {"title": "new"}
            })
        )
    );
    assert_eq!(
        calls[1],
        (
            "delete".to_string(),
            json!({"where": {"pageUrl": "a.com", "createdWhen": 5}, "limit": 1})
        )
    );
}

/// Test: A backend without batches refuses executeBatch.
#[tokio::test]
async fn test_execute_batch_defaults_to_unsupported() {
    let manager = StorageManager::new(RecordingBackend::default(), &MapperConfig::default());
    manager.finish_initialization().await.unwrap();

    let err = manager
        .operation("executeBatch", vec![json!([])])
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MAP_UNSUPPORTED");
}

// =============================================================================
// REGISTRATION
// =============================================================================

/// Test: Only project-scoped, core, and pluggable backend names register.
#[tokio::test]
async fn test_operation_registration_rules() {
    let manager = memory_manager().await;
    let handler = |_args: Vec<Value>| async { Ok::<_, CoreError>(Value::Null) };

    for accepted in ["notes:archive", "notes:memory.dump", "memory.dump", "countObjects"] {
        assert!(
            manager.register_operation(accepted, handler).is_ok(),
            "{}",
            accepted
        );
    }

    for rejected in ["memory.other", "sql.dump", "bogus"] {
        let err = manager.register_operation(rejected, handler).unwrap_err();
        assert_eq!(err.code(), "MAP_INVALID_OPERATION_REGISTRATION", "{}", rejected);
    }
}

/// Test: A registered handler overrides the core operation of the same name.
#[tokio::test]
async fn test_registered_handler_overrides_core_operation() {
    let manager = memory_manager().await;
    manager
        .register_operation("countObjects", |_args| async { Ok::<_, CoreError>(json!(42)) })
        .unwrap();

    let count = manager
        .collection("note")
        .count_objects(json!({}))
        .await
        .unwrap();
    assert_eq!(count, 42);
}

struct DumpPlugin;

impl BackendPlugin for DumpPlugin {
    fn install(&self, manager: &StorageManager) -> CoreResult<()> {
        manager.register_operation("memory.dump", |args: Vec<Value>| async move {
            Ok::<_, CoreError>(json!({"dumped": args}))
        })
    }
}

/// Test: Plugins install backend-namespaced operations.
#[tokio::test]
async fn test_plugin_installs_operation() {
    let manager = memory_manager().await;
    manager.use_plugin(&DumpPlugin).unwrap();

    let result = manager
        .operation("memory.dump", vec![json!("note")])
        .await
        .unwrap();
    assert_eq!(result, json!({"dumped": ["note"]}));

    let err = manager.operation("memory.load", vec![]).await.unwrap_err();
    assert_eq!(err.code(), "MAP_UNKNOWN_OPERATION");
}

// =============================================================================
// INITIALIZATION
// =============================================================================

/// Test: Nothing dispatches before initialization finished.
#[tokio::test]
async fn test_operations_require_initialization() {
    let manager = StorageManager::new(MemoryBackend::new(), &MapperConfig::default());

    let err = manager
        .operation("findObjects", vec![json!("note")])
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MAP_NOT_INITIALIZED");
}

/// Test: Unknown bare names are rejected at dispatch.
#[tokio::test]
async fn test_unknown_operation_is_rejected() {
    let manager = memory_manager().await;

    let err = manager
        .operation("frobnicate", vec![json!("note")])
        .await
        .unwrap_err();
    assert_eq!(err.code(), "MAP_UNKNOWN_OPERATION");
}
