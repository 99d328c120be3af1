//! Schema Registry Invariant Tests
//!
//! Test Categories:
//! 1. Deterministic resolution
//! 2. Version precedence and history
//! 3. Reverse relationship connection
//! 4. Lifecycle (listeners, initialization)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use aeromap::fields::{create_default_field_type_registry, FieldType};
use aeromap::schema::{
    CollectionDefinition, CollectionDefinitionMap, CollectionField, IndexSourceFields,
    Relationship, StorageRegistry,
};

fn t(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).unwrap()
}

fn registry() -> StorageRegistry {
    StorageRegistry::new(create_default_field_type_registry(20))
}

fn declarations() -> CollectionDefinitionMap {
    serde_json::from_value(json!({
        "user": {
            "version": "2024-01-01T00:00:00Z",
            "fields": {"identifier": {"type": "string"}, "code": {"type": "random-key"}}
        },
        "userEmail": {
            "version": "2024-01-01T00:00:00Z",
            "fields": {"email": {"type": "string"}},
            "relationships": [{"childOf": "user", "reverseAlias": "emails"}]
        },
        "profile": {
            "version": "2024-01-01T00:00:00Z",
            "fields": {"bio": {"type": "text"}},
            "relationships": [{"singleChildOf": "user"}]
        },
        "note": {
            "version": "2024-01-01T00:00:00Z",
            "fields": {"text": {"type": "text"}}
        },
        "tag": {
            "version": "2024-01-01T00:00:00Z",
            "fields": {"name": {"type": "string"}}
        },
        "noteTag": {
            "version": "2024-01-01T00:00:00Z",
            "fields": {},
            "relationships": [{"connects": ["note", "tag"]}]
        }
    }))
    .unwrap()
}

async fn resolved() -> StorageRegistry {
    let registry = registry();
    registry.register_collections(declarations()).unwrap();
    registry.finish_initialization().await.unwrap();
    registry
}

// =============================================================================
// DETERMINISTIC RESOLUTION
// =============================================================================

/// Test: Two fresh registries given the same declarations resolve identically.
#[tokio::test]
async fn test_resolution_is_idempotent() {
    let first = resolved().await;
    let second = resolved().await;

    let first_collections = first.collections().unwrap();
    let second_collections = second.collections().unwrap();
    assert_eq!(
        first_collections.keys().collect::<Vec<_>>(),
        second_collections.keys().collect::<Vec<_>>()
    );

    for (name, def) in &first_collections {
        let other = &second_collections[name];
        assert_eq!(def.pk_index, other.pk_index, "{}", name);
        assert_eq!(def.relationships_by_alias, other.relationships_by_alias, "{}", name);
        assert_eq!(
            def.reverse_relationships_by_alias, other.reverse_relationships_by_alias,
            "{}",
            name
        );
        assert_eq!(def.fields_with_custom_type, other.fields_with_custom_type, "{}", name);
    }
}

/// Test: Derived relationship names follow the naming rules.
#[tokio::test]
async fn test_derived_relationship_names() {
    let registry = resolved().await;

    let email = registry.get("userEmail").unwrap();
    let Relationship::ChildOf(child_of) = &email.relationships_by_alias["user"] else {
        panic!("Expected childOf under alias 'user'");
    };
    assert_eq!(child_of.field_name, "userRel");
    assert_eq!(child_of.reverse_alias, "emails");
    assert_eq!(email.fields["userRel"].field_type, FieldType::ForeignKey);
    assert_eq!(email.pk_index, Some(IndexSourceFields::field("id")));

    let profile = registry.get("profile").unwrap();
    let Relationship::SingleChildOf(single) = &profile.relationships_by_alias["user"] else {
        panic!("Expected singleChildOf under alias 'user'");
    };
    assert_eq!(single.reverse_alias, "profile");

    let user = registry.get("user").unwrap();
    assert_eq!(user.fields_with_custom_type, vec!["code".to_string()]);
    assert!(user.fields["code"].field_object.is_some());
}

// =============================================================================
// VERSION PRECEDENCE
// =============================================================================

fn foo_versions() -> (CollectionDefinition, CollectionDefinition) {
    let old = CollectionDefinition::new(t(1_000))
        .with_field("spam", CollectionField::new("string"));
    let new = CollectionDefinition::new(t(2_000))
        .with_field("spam", CollectionField::new("string"))
        .with_field("eggs", CollectionField::new("int"));
    (old, new)
}

fn field_names(registry: &StorageRegistry) -> Vec<String> {
    registry.get("foo").unwrap().fields.keys().cloned().collect()
}

/// Test: The newest version governs, whatever order versions arrive in.
#[tokio::test]
async fn test_latest_version_wins_in_any_order() {
    let (old, new) = foo_versions();
    let expected = vec!["eggs".to_string(), "id".to_string(), "spam".to_string()];

    let forward = registry();
    forward
        .register_collection("foo", vec![old.clone(), new.clone()])
        .unwrap();
    assert_eq!(field_names(&forward), expected);

    let reversed = registry();
    reversed
        .register_collection("foo", vec![new.clone(), old.clone()])
        .unwrap();
    assert_eq!(field_names(&reversed), expected);

    let separate_calls = registry();
    separate_calls.register_collection("foo", new).unwrap();
    separate_calls.register_collection("foo", old).unwrap();
    assert_eq!(field_names(&separate_calls), expected);
}

/// Test: History lists every version oldest first.
#[tokio::test]
async fn test_schema_history_is_ascending() {
    let (old, new) = foo_versions();
    let registry = registry();
    registry.register_collection("foo", vec![new, old]).unwrap();
    registry
        .register_collection(
            "bar",
            CollectionDefinition::new(t(1_000)).with_field("x", CollectionField::new("string")),
        )
        .unwrap();

    let history = registry.get_schema_history().unwrap();
    let versions: Vec<_> = history.iter().map(|entry| entry.version).collect();
    assert_eq!(versions, vec![t(1_000), t(2_000)]);
    assert_eq!(
        history[0].collections.keys().collect::<Vec<_>>(),
        vec!["bar", "foo"]
    );

    let at_first = registry.get_collections_by_version(t(1_000)).unwrap().unwrap();
    assert!(!at_first["foo"].fields.contains_key("eggs"));
    assert!(registry.get_collections_by_version(t(3_000)).unwrap().is_none());
}

// =============================================================================
// REVERSE RELATIONSHIPS
// =============================================================================

/// Test: Reverse aliases appear on parents only after initialization.
#[tokio::test]
async fn test_reverse_aliases_connect_at_initialization() {
    let registry = registry();
    registry.register_collections(declarations()).unwrap();
    assert!(registry
        .get("user")
        .unwrap()
        .reverse_relationships_by_alias
        .is_empty());

    registry.finish_initialization().await.unwrap();

    let user = registry.get("user").unwrap();
    let mut reverse: Vec<_> = user.reverse_relationships_by_alias.keys().collect();
    reverse.sort();
    assert_eq!(reverse, vec!["emails", "profile"]);
}

/// Test: A connects relationship gives both endpoints a pluralized reverse alias.
#[tokio::test]
async fn test_connects_reverse_aliases() {
    let registry = resolved().await;

    assert!(registry
        .get("note")
        .unwrap()
        .reverse_relationships_by_alias
        .contains_key("tags"));
    assert!(registry
        .get("tag")
        .unwrap()
        .reverse_relationships_by_alias
        .contains_key("notes"));

    let join = registry.get("noteTag").unwrap();
    assert!(join.is_connects_collection());
    assert!(join.relationships_by_alias.contains_key("note"));
    assert!(join.relationships_by_alias.contains_key("tag"));
    assert_eq!(join.fields["noteRel"].field_type, FieldType::ForeignKey);
    assert_eq!(join.fields["tagRel"].field_type, FieldType::ForeignKey);
}

/// Test: A relationship to a collection that was never registered fails initialization.
#[tokio::test]
async fn test_unknown_target_fails_initialization() {
    let registry = registry();
    registry
        .register_collection(
            "comment",
            CollectionDefinition::new(t(1_000))
                .with_field("text", CollectionField::new("text"))
                .with_relationship(Relationship::child_of("post")),
        )
        .unwrap();

    let err = registry.finish_initialization().await.unwrap_err();
    assert_eq!(err.code(), "MAP_INVALID_RELATIONSHIP");
    assert!(err.to_string().contains("post"));
    assert!(!registry.is_initialized());
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Test: Registration listeners see each live definition.
#[tokio::test]
async fn test_registered_listeners_are_called() {
    let registry = registry();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    registry
        .on_collection_registered(move |def| sink.lock().unwrap().push(def.name.clone()))
        .unwrap();

    registry.register_collections(declarations()).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 6);
    assert!(seen.contains(&"noteTag".to_string()));
}

/// Test: Initialization awaits every listener and runs exactly once.
#[tokio::test]
async fn test_initialization_runs_listeners_once() {
    let registry = registry();
    registry.register_collections(declarations()).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let calls = calls.clone();
        registry
            .on_initialized(move || async move {
                tokio::task::yield_now().await;
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
    }

    registry.finish_initialization().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let err = registry.finish_initialization().await.unwrap_err();
    assert_eq!(err.code(), "MAP_ALREADY_INITIALIZED");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let err = registry
        .register_collection("late", CollectionDefinition::new(t(1)))
        .unwrap_err();
    assert_eq!(err.code(), "MAP_ALREADY_INITIALIZED");
}
