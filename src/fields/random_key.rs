//! `random-key` field type

use async_trait::async_trait;
use rand::RngCore;
use serde_json::Value;

use super::{Field, FieldType};
use crate::error::CoreResult;

const DEFAULT_KEY_LENGTH: usize = 20;

/// Stores a random hex key, generated when the caller supplies none
#[derive(Debug, Clone)]
pub struct RandomKeyField {
    /// Number of random bytes; the stored key is twice as many hex chars
    length: usize,
}

impl RandomKeyField {
    pub fn new() -> Self {
        Self::with_length(DEFAULT_KEY_LENGTH)
    }

    pub fn with_length(length: usize) -> Self {
        Self { length }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Generate a fresh key
    pub fn generate_code(&self) -> String {
        let mut bytes = vec![0u8; self.length];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

impl Default for RandomKeyField {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Field for RandomKeyField {
    fn primitive_type(&self) -> FieldType {
        FieldType::String
    }

    async fn prepare_for_storage(&self, input: Value) -> CoreResult<Value> {
        match input {
            Value::Null => Ok(Value::String(self.generate_code())),
            Value::String(s) if s.is_empty() => Ok(Value::String(self.generate_code())),
            supplied => Ok(supplied),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generates_key_when_missing() {
        let field = RandomKeyField::new();
        let prepared = field.prepare_for_storage(Value::Null).await.unwrap();
        let key = prepared.as_str().unwrap();
        assert_eq!(key.len(), 40);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_keeps_supplied_key() {
        let field = RandomKeyField::with_length(4);
        let prepared = field
            .prepare_for_storage(Value::String("abc".into()))
            .await
            .unwrap();
        assert_eq!(prepared, Value::String("abc".into()));
    }

    #[test]
    fn test_custom_length() {
        assert_eq!(RandomKeyField::with_length(4).generate_code().len(), 8);
    }
}
