//! Record types held by collection stores.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Field map of a record, keyed in client convention.
pub type Fields = Map<String, Value>;

/// Identifier of a record.
///
/// Optimistic inserts carry a client-generated `Pending` id until the backend
/// confirms the row and assigns its own id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordId {
    /// Assigned by the backend
    Confirmed(String),
    /// Client-generated placeholder for an insert still in flight
    Pending(String),
}

impl RecordId {
    /// Generate a fresh pending id.
    pub fn pending() -> Self {
        RecordId::Pending(format!("tmp-{}", uuid::Uuid::new_v4()))
    }

    /// The raw id string.
    pub fn as_str(&self) -> &str {
        match self {
            RecordId::Confirmed(id) | RecordId::Pending(id) => id,
        }
    }

    /// Whether the backend has confirmed this id.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, RecordId::Confirmed(_))
    }

    /// Whether this id is a client-side placeholder.
    pub fn is_pending(&self) -> bool {
        matches!(self, RecordId::Pending(_))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<str> for RecordId {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

/// A record in a collection store.
///
/// Serializes as one flat JSON object whose `id` is the raw id string.
/// Deserialized records are always `Confirmed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FlatRecord", into = "FlatRecord")]
pub struct Record {
    /// Unique id within the collection
    pub id: RecordId,
    /// All other fields, in client convention
    pub fields: Fields,
}

impl Record {
    /// Create a record with a confirmed id.
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        let mut fields = fields;
        fields.remove("id");
        Self {
            id: RecordId::Confirmed(id.into()),
            fields,
        }
    }

    /// Create an optimistic record with a fresh pending id.
    pub fn pending(fields: Fields) -> Self {
        let mut fields = fields;
        fields.remove("id");
        Self {
            id: RecordId::pending(),
            fields,
        }
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        if field == "id" {
            return None;
        }
        self.fields.get(field)
    }

    /// Merge a partial field map into this record.
    ///
    /// An `id` key in the patch is ignored; ids only change on confirmation.
    pub fn merge(&mut self, patch: &Fields) {
        for (key, value) in patch {
            if key != "id" {
                self.fields.insert(key.clone(), value.clone());
            }
        }
    }

    /// Decode the record into a typed entity.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.to_object()))?)
    }

    /// Serialize a typed entity into a field map suitable for `insert`.
    pub fn fields_of<T: Serialize>(entity: &T) -> Result<Fields> {
        match serde_json::to_value(entity)? {
            Value::Object(map) => Ok(map),
            other => Err(crate::Error::Serialization(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    /// The flat object form, `id` included.
    pub fn to_object(&self) -> Fields {
        let mut map = self.fields.clone();
        map.insert("id".to_string(), Value::String(self.id.as_str().to_string()));
        map
    }
}

/// Wire shape of a record.
#[derive(Serialize, Deserialize)]
struct FlatRecord {
    id: String,
    #[serde(flatten)]
    fields: Fields,
}

impl From<FlatRecord> for Record {
    fn from(flat: FlatRecord) -> Self {
        Record::new(flat.id, flat.fields)
    }
}

impl From<Record> for FlatRecord {
    fn from(record: Record) -> Self {
        FlatRecord {
            id: record.id.as_str().to_string(),
            fields: record.fields,
        }
    }
}
