//! Wire types of the table-keyed REST API.
//!
//! Shared by [`HttpBackend`](crate::backend::HttpBackend) and the server so
//! both sides agree on paths, parameters and error bodies.

use crate::backend::Row;
use serde::{Deserialize, Serialize};

/// Path prefix of the table routes: `/rest/{table}` and `/rest/{table}/{id}`.
pub const REST_PREFIX: &str = "/rest";

/// Primary key column.
pub const ID_COLUMN: &str = "id";
/// Owner column attached to every written row.
pub const OWNER_COLUMN: &str = "user_id";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Query parameters of `GET /rest/{table}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectParams {
    /// Column to order by
    pub order: Option<String>,
    /// Ascending instead of the default descending order
    pub ascending: Option<bool>,
}

/// Query parameters of `PUT /rest/{table}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertParams {
    /// Column identifying the row to replace
    pub on_conflict: Option<String>,
}

/// Body of `POST /rest/{table}`: one row, or several for a bulk insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InsertBody {
    Many(Vec<Row>),
    One(Row),
}

/// Error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Whether `name` is acceptable as a table name: `[a-z][a-z0-9_]*`, at most
/// 63 bytes (the PostgreSQL identifier limit).
pub fn is_valid_table_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_lowercase() => {}
        _ => return false,
    }
    name.len() <= 63 && bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_names() {
        assert!(is_valid_table_name("tasks"));
        assert!(is_valid_table_name("finance_transactions"));
        assert!(is_valid_table_name("q2_goals"));
        assert!(!is_valid_table_name(""));
        assert!(!is_valid_table_name("2fa"));
        assert!(!is_valid_table_name("_hidden"));
        assert!(!is_valid_table_name("Tasks"));
        assert!(!is_valid_table_name("tasks;drop"));
        assert!(!is_valid_table_name(&"a".repeat(64)));
    }

    #[test]
    fn insert_body_shapes() {
        let one: InsertBody = serde_json::from_value(json!({"title": "a"})).unwrap();
        assert!(matches!(one, InsertBody::One(_)));

        let many: InsertBody =
            serde_json::from_value(json!([{"title": "a"}, {"title": "b"}])).unwrap();
        assert!(matches!(many, InsertBody::Many(ref rows) if rows.len() == 2));
    }

    #[test]
    fn error_body_omits_empty_fields() {
        let body = ErrorBody {
            error: "relation does not exist".into(),
            code: Some("42P01".into()),
            details: None,
            hint: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"error": "relation does not exist", "code": "42P01"})
        );
    }
}
