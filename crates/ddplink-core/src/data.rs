// ── Bulk import / export ──
//
// Snapshot format: `{ "<collection>": [ { "_id": .., ..fields }, .. ], .. }`.
// Documents may carry their identity as `_id` or `id`; the key used is
// stripped from the imported fields.

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::ClientError;
use crate::store::{Document, ID_FIELD};

/// Input accepted by `import_data`.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportData {
    /// Encoded snapshot, decoded with the client's codec.
    Text(String),
    Raw(Value),
}

impl From<&str> for ImportData {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for ImportData {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Value> for ImportData {
    fn from(value: Value) -> Self {
        Self::Raw(value)
    }
}

impl From<Exported> for ImportData {
    fn from(exported: Exported) -> Self {
        match exported {
            Exported::String(text) => Self::Text(text),
            Exported::Raw(value) => Self::Raw(value),
        }
    }
}

/// Output shape of `export_data`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ExportFormat {
    /// Encoded with the client's codec.
    #[default]
    String,
    Raw,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Exported {
    String(String),
    Raw(Value),
}

impl Exported {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text),
            Self::Raw(_) => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Raw(value) => Some(value),
            Self::String(_) => None,
        }
    }
}

/// One document of a parsed snapshot.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ImportedDocument {
    pub collection: String,
    pub id: Value,
    pub fields: Map<String, Value>,
}

impl ImportedDocument {
    pub(crate) fn to_document(&self) -> Document {
        Document::new(self.id.clone(), Some(&self.fields))
    }
}

/// Split a decoded snapshot into per-document additions.
pub(crate) fn parse_snapshot(value: Value) -> Result<Vec<ImportedDocument>, ClientError> {
    let Value::Object(collections) = value else {
        return Err(invalid("snapshot must be an object of collections"));
    };

    let mut documents = Vec::new();
    for (collection, entries) in collections {
        let Value::Array(entries) = entries else {
            return Err(invalid(format!("collection {collection:?} must be an array")));
        };
        for entry in entries {
            let Value::Object(mut fields) = entry else {
                return Err(invalid(format!("collection {collection:?} holds a non-object document")));
            };
            let id = match fields.shift_remove(ID_FIELD) {
                Some(id) => id,
                None => fields
                    .shift_remove("id")
                    .ok_or_else(|| invalid(format!("document in {collection:?} has no id")))?,
            };
            documents.push(ImportedDocument {
                collection: collection.clone(),
                id,
                fields,
            });
        }
    }
    Ok(documents)
}

/// Render store contents as a snapshot value.
pub(crate) fn snapshot_value(collections: IndexMap<String, Vec<Document>>) -> Value {
    collections
        .into_iter()
        .map(|(name, docs)| {
            let docs = docs.into_iter().map(Value::from).collect();
            (name, Value::Array(docs))
        })
        .collect::<Map<String, Value>>()
        .into()
}

fn invalid(message: impl Into<String>) -> ClientError {
    ClientError::InvalidData {
        message: message.into(),
    }
}
