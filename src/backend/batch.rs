//! Operation batches
//!
//! A batch is an ordered list of flat operations. Create steps are addressed
//! by placeholder so later steps can refer to keys that do not exist yet.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Object;

/// Field of a create step to overwrite with the key another step produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub path: String,
    pub placeholder: String,
}

/// One step of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum BatchOperation {
    CreateObject {
        collection: String,
        placeholder: String,
        args: Object,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        replace: Vec<Replacement>,
    },
    UpdateObjects {
        collection: String,
        #[serde(rename = "where")]
        where_: Object,
        updates: Object,
    },
    DeleteObjects {
        collection: String,
        #[serde(rename = "where")]
        where_: Object,
    },
}

impl BatchOperation {
    pub fn collection(&self) -> &str {
        match self {
            BatchOperation::CreateObject { collection, .. }
            | BatchOperation::UpdateObjects { collection, .. }
            | BatchOperation::DeleteObjects { collection, .. } => collection,
        }
    }
}

pub type OperationBatch = Vec<BatchOperation>;

/// Object a create step produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStepResult {
    pub object: Object,
}

/// Results of the create steps of a batch, keyed by placeholder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub info: BTreeMap<String, BatchStepResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_batch_wire_format() {
        let batch: OperationBatch = serde_json::from_value(json!([
            {
                "operation": "createObject",
                "collection": "email",
                "placeholder": "joeEmail",
                "args": {"address": "joe@doe.com"},
                "replace": [{"path": "user", "placeholder": "joe"}]
            },
            {
                "operation": "deleteObjects",
                "collection": "user",
                "where": {"displayName": "Jane"}
            }
        ]))
        .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].collection(), "user");
        let BatchOperation::CreateObject { replace, .. } = &batch[0] else {
            panic!("Expected create step");
        };
        assert_eq!(replace[0].path, "user");
    }
}
