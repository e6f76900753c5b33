//! Backend boundary.
//!
//! A [`Backend`] persists rows for named tables. Rows travel in backend
//! convention (snake_case keys); translation happens in the store.
//!
//! Two implementations ship with the engine:
//!
//! - [`HttpBackend`]: talks to `tether-server` (or anything speaking the same
//!   REST dialect) over HTTP
//! - [`LocalBackend`]: keeps one JSON array per table in a
//!   [`KeyValueStorage`], for running without a server

mod http;
mod local;
mod storage;

pub use http::HttpBackend;
pub use local::LocalBackend;
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageEvent};

use crate::error::BackendError;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A row in backend convention.
pub type Row = Map<String, Value>;

/// Result type for backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Sort order of a select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Backend column to sort on
    pub field: String,
    pub ascending: bool,
}

impl OrderBy {
    /// Newest first on `field`.
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }
}

/// Persistence for table rows.
///
/// Implementations scope every call to the caller's identity; rows of other
/// users are neither visible nor writable.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// All rows of `table`, sorted.
    async fn select(&self, table: &str, order: &OrderBy) -> BackendResult<Vec<Row>>;

    /// Insert one row and return it as stored, id and timestamps included.
    async fn insert(&self, table: &str, row: Row) -> BackendResult<Row>;

    /// Insert several rows at once.
    async fn insert_many(&self, table: &str, rows: Vec<Row>) -> BackendResult<Vec<Row>> {
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            stored.push(self.insert(table, row).await?);
        }
        Ok(stored)
    }

    /// Merge `patch` into the row with `id`.
    async fn update(&self, table: &str, id: &str, patch: Row) -> BackendResult<()>;

    /// Delete the row with `id`. Deleting a missing row is not an error.
    async fn delete(&self, table: &str, id: &str) -> BackendResult<()>;

    /// Create or replace the row whose `conflict_key` column matches `row`'s.
    async fn upsert(&self, table: &str, row: Row, conflict_key: &str) -> BackendResult<Row>;
}

/// Total order over JSON values used for sorting rows.
///
/// Nulls and missing values sort first; values of different kinds are ordered
/// by kind.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Sort rows in place by `order`. The sort is stable.
pub(crate) fn sort_rows(rows: &mut [Row], order: &OrderBy) {
    rows.sort_by(|a, b| {
        let ord = compare_values(a.get(&order.field), b.get(&order.field));
        if order.ascending {
            ord
        } else {
            ord.reverse()
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn sorts_descending_by_default_constructor() {
        let mut rows = vec![
            row(json!({"id": "a", "created_at": "2026-01-01T00:00:00.000Z"})),
            row(json!({"id": "b", "created_at": "2026-03-01T00:00:00.000Z"})),
            row(json!({"id": "c", "created_at": "2026-02-01T00:00:00.000Z"})),
        ];
        sort_rows(&mut rows, &OrderBy::descending("created_at"));
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
    }

    #[test]
    fn numbers_compare_numerically() {
        let mut rows = vec![
            row(json!({"id": "a", "position": 10})),
            row(json!({"id": "b", "position": 2})),
            row(json!({"id": "c"})),
        ];
        sort_rows(&mut rows, &OrderBy::ascending("position"));
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["c", "b", "a"]);
    }
}
