//! Registered operations
//!
//! Operations can be stored ahead of time under a content-addressed id and
//! later instantiated with variables filling `$name:type$` placeholders.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::OperationCall;
use crate::error::{CoreError, CoreResult};
use crate::Object;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredOperation {
    #[serde(rename = "type")]
    pub operation_type: String,
    pub args: Vec<Value>,
}

impl RegisteredOperation {
    /// Substitute `vars` and turn the operation into a dispatchable call
    pub fn instantiate(&self, vars: &Object) -> CoreResult<OperationCall> {
        Ok(OperationCall::new(
            self.operation_type.clone(),
            substitute_operation_placeholders(self, vars)?,
        ))
    }
}

pub type RegisteredOperationMap = BTreeMap<String, RegisteredOperation>;

#[derive(Debug, Default)]
pub struct OperationRegistry {
    operations: RegisteredOperationMap,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an operation and return its id; registering the same
    /// operation twice yields the same id
    pub fn register(&mut self, operation_type: impl Into<String>, args: Vec<Value>) -> CoreResult<String> {
        let operation = RegisteredOperation {
            operation_type: operation_type.into(),
            args,
        };
        let id = generate_id(&operation)?;
        self.operations.insert(id.clone(), operation);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredOperation> {
        self.operations.get(id)
    }

    pub fn get_all(&self) -> &RegisteredOperationMap {
        &self.operations
    }
}

/// `operation:` plus the SHA-256 of the operation's JSON with sorted keys
fn generate_id(operation: &RegisteredOperation) -> CoreResult<String> {
    let canonical = serde_json::to_vec(&serde_json::to_value(operation)?)?;
    let digest = Sha256::digest(&canonical);
    Ok(format!("operation:{}", hex::encode(digest)))
}

fn placeholder_pattern() -> CoreResult<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\$(\w+):(\w+)\$$").ok())
        .as_ref()
        .ok_or_else(|| CoreError::internal("invalid placeholder pattern"))
}

/// Arguments of `operation` with every placeholder string replaced
pub fn substitute_operation_placeholders(
    operation: &RegisteredOperation,
    vars: &Object,
) -> CoreResult<Vec<Value>> {
    operation
        .args
        .iter()
        .map(|arg| substitute(arg, vars))
        .collect()
}

fn substitute(value: &Value, vars: &Object) -> CoreResult<Value> {
    match value {
        Value::String(s) => match placeholder_pattern()?.captures(s) {
            Some(captures) => {
                let name = &captures[1];
                let expected = &captures[2];
                let replacement = vars.get(name).ok_or_else(|| {
                    CoreError::invalid_arguments(
                        "substituteOperationPlaceholders",
                        format!("missing value for placeholder '{}'", name),
                    )
                })?;
                check_type(name, expected, replacement)?;
                Ok(replacement.clone())
            }
            None => Ok(value.clone()),
        },
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| substitute(item, vars))
                .collect::<CoreResult<_>>()?,
        )),
        Value::Object(map) => {
            let mut substituted = Object::new();
            for (key, item) in map {
                substituted.insert(key.clone(), substitute(item, vars)?);
            }
            Ok(Value::Object(substituted))
        }
        _ => Ok(value.clone()),
    }
}

fn check_type(name: &str, expected: &str, value: &Value) -> CoreResult<()> {
    let matches = match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    };
    if matches {
        Ok(())
    } else {
        Err(CoreError::invalid_arguments(
            "substituteOperationPlaceholders",
            format!("placeholder '{}' expects a {}, got {}", name, expected, value),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Object {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_register_is_content_addressed() {
        let mut registry = OperationRegistry::new();
        let id = registry
            .register("createObject", vec![json!({"name": "$name:string$"})])
            .unwrap();
        let again = registry
            .register("createObject", vec![json!({"name": "$name:string$"})])
            .unwrap();

        assert!(id.starts_with("operation:"));
        assert_eq!(id.len(), "operation:".len() + 64);
        assert_eq!(id, again);
        assert_eq!(registry.get_all().len(), 1);
        assert_eq!(registry.get(&id).unwrap().operation_type, "createObject");
    }

    #[test]
    fn test_substitutes_nested_placeholders() {
        let operation = RegisteredOperation {
            operation_type: "test".into(),
            args: vec![
                json!({"test": {"name": "$name:string$"}}),
                json!({"test": [{"name": "$foo:string$"}]}),
            ],
        };
        let args =
            substitute_operation_placeholders(&operation, &vars(json!({"name": "joe", "foo": "eggs"})))
                .unwrap();

        assert_eq!(
            args,
            vec![
                json!({"test": {"name": "joe"}}),
                json!({"test": [{"name": "eggs"}]})
            ]
        );
    }

    #[test]
    fn test_missing_variable_fails() {
        let operation = RegisteredOperation {
            operation_type: "test".into(),
            args: vec![json!("$name:string$")],
        };
        let err = substitute_operation_placeholders(&operation, &Object::new()).unwrap_err();
        assert_eq!(err.code(), "MAP_INVALID_ARGUMENTS");
    }

    #[test]
    fn test_type_mismatch_fails() {
        let operation = RegisteredOperation {
            operation_type: "test".into(),
            args: vec![json!("$age:number$")],
        };
        assert!(substitute_operation_placeholders(&operation, &vars(json!({"age": "x"}))).is_err());
    }

    #[test]
    fn test_plain_strings_are_untouched() {
        let operation = RegisteredOperation {
            operation_type: "findObjects".into(),
            args: vec![json!("user"), json!({"note": "costs $5"})],
        };
        let call = operation.instantiate(&Object::new()).unwrap();
        assert_eq!(call.name, "findObjects");
        assert_eq!(call.args, operation.args);
    }
}
