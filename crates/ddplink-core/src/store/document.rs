use std::ops::Index;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding a document's identity.
pub const ID_FIELD: &str = "_id";

static NULL: Value = Value::Null;

/// One record of a collection: a JSON object whose `_id` field is its
/// identity.
///
/// Documents handed out by the client are independent copies; mutating one
/// never affects the mirrored collection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Build a document from an id and the fields sent with it.
    pub fn new(id: Value, fields: Option<&Map<String, Value>>) -> Self {
        let mut map = Map::new();
        map.insert(ID_FIELD.to_owned(), id);
        if let Some(fields) = fields {
            map.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Self(map)
    }

    /// Identity value, `null` if the document has none.
    pub fn id(&self) -> &Value {
        self.0.get(ID_FIELD).unwrap_or(&NULL)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// Overwrite or add each of `fields`.
    pub(crate) fn merge(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub(crate) fn clear_field(&mut self, field: &str) {
        self.0.shift_remove(field);
    }
}

impl Index<&str> for Document {
    type Output = Value;

    /// Field value, `null` when absent.
    fn index(&self, field: &str) -> &Value {
        self.0.get(field).unwrap_or(&NULL)
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc.0)
    }
}

/// Loose identity comparison: a numeric id matches its string spelling.
pub fn same_id(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .zip(n.as_f64())
            .is_some_and(|(parsed, number)| parsed == number),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_comes_first_and_fields_follow() {
        let fields = json!({ "b": 1, "a": 2 });
        let doc = Document::new(json!("x"), fields.as_object());
        let keys: Vec<_> = doc.fields().keys().cloned().collect();
        assert_eq!(keys, vec!["_id", "b", "a"]);
        assert_eq!(doc.id(), &json!("x"));
        assert_eq!(doc["a"], 2);
        assert_eq!(doc["missing"], Value::Null);
    }

    #[test]
    fn merge_and_clear() {
        let mut doc = Document::new(json!(1), None);
        doc.merge(json!({ "v": 1, "w": 2 }).as_object().unwrap_or(&Map::new()));
        doc.clear_field("w");
        assert_eq!(Value::from(doc), json!({ "_id": 1, "v": 1 }));
    }

    #[test]
    fn loose_identity() {
        assert!(same_id(&json!("1"), &json!(1)));
        assert!(same_id(&json!(2), &json!(2.0)));
        assert!(same_id(&json!("a"), &json!("a")));
        assert!(!same_id(&json!("a"), &json!("b")));
        assert!(!same_id(&json!(null), &json!("null")));
    }
}
