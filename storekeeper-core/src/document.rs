// src/document.rs
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// A single document: a store-assigned surrogate `_id` plus free-form fields.
///
/// Field values are carried verbatim as `serde_json::Value` - the maintenance
/// tasks copy and move values between fields without interpreting them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: DocumentId,

    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

/// Surrogate identifier variants.
///
/// Untagged so documents serialize naturally: `{"_id": 2}` or `{"_id": "abc"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum DocumentId {
    Int(i64),
    String(String),
    ObjectId(String),
}

impl DocumentId {
    /// Generate a fresh ObjectId (UUID v4 string form).
    pub fn new_object_id() -> Self {
        DocumentId::ObjectId(Uuid::new_v4().to_string())
    }

    /// Canonical string form of the surrogate id. This is the value the
    /// migration engine writes into business-identifier fields.
    pub fn id_string(&self) -> String {
        match self {
            DocumentId::Int(n) => n.to_string(),
            DocumentId::String(s) | DocumentId::ObjectId(s) => s.clone(),
        }
    }
}

/// Canonical string form of an arbitrary identifier value found in a field.
/// Strings are taken as-is; everything else falls back to its JSON rendering.
pub fn value_id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Document {
    pub fn new(id: DocumentId, fields: HashMap<String, Value>) -> Self {
        Document { id, fields }
    }

    /// Build a document from a JSON object. A missing `_id` gets a fresh
    /// ObjectId assigned, matching store insert semantics.
    pub fn from_value(value: &Value) -> crate::error::Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            crate::error::StoreError::InvalidUpdate("document must be a JSON object".into())
        })?;
        if obj.contains_key("_id") {
            Ok(serde_json::from_value(value.clone())?)
        } else {
            let fields = obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            Ok(Document::new(DocumentId::new_object_id(), fields))
        }
    }

    /// Render as a JSON object including `_id`.
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(
            "_id".to_string(),
            serde_json::to_value(&self.id).unwrap_or(Value::Null),
        );
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }

    /// The `_id` as a JSON value (for query matching).
    pub fn id_value(&self) -> Value {
        serde_json::to_value(&self.id).unwrap_or(Value::Null)
    }

    /// Canonical string form of the surrogate id.
    pub fn id_string(&self) -> String {
        self.id.id_string()
    }

    /// Field lookup with dot-notation paths into nested objects and arrays.
    /// `_id` is held separately and must be read via `id_value()`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        if field.is_empty() {
            return None;
        }
        let mut parts = field.split('.');
        let mut value = self.fields.get(parts.next()?)?;
        for part in parts {
            value = match value {
                Value::Object(map) => map.get(part)?,
                Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(value)
    }

    /// Set a top-level field.
    pub fn set(&mut self, field: String, value: Value) {
        self.fields.insert(field, value);
    }

    /// Remove a top-level field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: DocumentId, fields: Vec<(&str, Value)>) -> Document {
        let map = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Document::new(id, map)
    }

    #[test]
    fn test_id_string_forms() {
        assert_eq!(DocumentId::Int(42).id_string(), "42");
        assert_eq!(DocumentId::String("abc".into()).id_string(), "abc");
        assert_eq!(
            DocumentId::ObjectId("66b1f00a".into()).id_string(),
            "66b1f00a"
        );
    }

    #[test]
    fn test_value_id_string() {
        assert_eq!(value_id_string(&json!("old1")), "old1");
        assert_eq!(value_id_string(&json!(7)), "7");
        assert_eq!(value_id_string(&json!(true)), "true");
    }

    #[test]
    fn test_from_value_preserves_id() {
        let d = Document::from_value(&json!({"_id": "A", "name": "Alice"})).unwrap();
        assert_eq!(d.id, DocumentId::String("A".into()));
        assert_eq!(d.get("name"), Some(&json!("Alice")));
    }

    #[test]
    fn test_from_value_assigns_object_id() {
        let d = Document::from_value(&json!({"name": "Bob"})).unwrap();
        match &d.id {
            DocumentId::ObjectId(s) => assert_eq!(s.len(), 36),
            other => panic!("expected ObjectId, got {:?}", other),
        }
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        assert!(Document::from_value(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_to_value_roundtrip() {
        let original = doc(
            DocumentId::Int(7),
            vec![("tags", json!(["a", "b"])), ("n", json!(3))],
        );
        let value = original.to_value();
        assert_eq!(value["_id"], json!(7));
        let restored = Document::from_value(&value).unwrap();
        assert_eq!(restored.id, original.id);
        assert_eq!(restored.get("tags"), original.get("tags"));
    }

    #[test]
    fn test_get_nested_dot_path() {
        let d = doc(
            DocumentId::Int(1),
            vec![
                ("address", json!({"city": "Pune", "zip": 411001})),
                ("offers", json!([{"id": "o1"}, {"id": "o2"}])),
            ],
        );
        assert_eq!(d.get("address.city"), Some(&json!("Pune")));
        assert_eq!(d.get("offers.1.id"), Some(&json!("o2")));
        assert_eq!(d.get("address.missing"), None);
        assert_eq!(d.get(""), None);
    }

    #[test]
    fn test_set_remove_contains() {
        let mut d = doc(DocumentId::Int(1), vec![]);
        d.set("phone".into(), json!("+1"));
        assert!(d.contains("phone"));
        assert_eq!(d.remove("phone"), Some(json!("+1")));
        assert!(!d.contains("phone"));
    }

    #[test]
    fn test_untagged_id_deserialization() {
        let d: Document = serde_json::from_str(r#"{"_id": 5, "x": 1}"#).unwrap();
        assert_eq!(d.id, DocumentId::Int(5));
        let d: Document = serde_json::from_str(r#"{"_id": "s5", "x": 1}"#).unwrap();
        assert_eq!(d.id, DocumentId::String("s5".into()));
    }
}
