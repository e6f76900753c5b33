//! Backend over local key-value storage.

use super::storage::{KeyValueStorage, StorageEvent};
use super::{sort_rows, Backend, BackendResult, OrderBy, Row};
use crate::error::BackendError;
use crate::wire::{CREATED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Default key prefix.
pub const DEFAULT_NAMESPACE: &str = "tether:";

const EVENT_CAPACITY: usize = 64;

/// Stores each table as a JSON array under `{namespace}{table}`.
///
/// Used when no server is configured. There is a single local user, so rows
/// are not scoped by owner.
pub struct LocalBackend {
    storage: Arc<dyn KeyValueStorage>,
    namespace: String,
    // Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
    events: broadcast::Sender<StorageEvent>,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl LocalBackend {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self::with_namespace(storage, DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(storage: Arc<dyn KeyValueStorage>, namespace: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            storage,
            namespace: namespace.into(),
            write_lock: Mutex::new(()),
            events,
        }
    }

    /// Change notifications, one per write.
    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    /// Storage key of `table`.
    pub fn key(&self, table: &str) -> String {
        format!("{}{table}", self.namespace)
    }

    async fn read_table(&self, table: &str) -> BackendResult<Vec<Row>> {
        let key = self.key(table);
        let Some(raw) = self.storage.get(&key).await? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw)
            .map_err(|e| BackendError::Storage(format!("corrupt collection under {key}: {e}")))
    }

    async fn write_table(&self, table: &str, rows: &[Row]) -> BackendResult<()> {
        let key = self.key(table);
        let raw = serde_json::to_string(rows)
            .map_err(|e| BackendError::Storage(format!("failed to encode {key}: {e}")))?;
        self.storage.set(&key, &raw).await?;
        let _ = self.events.send(StorageEvent { key });
        Ok(())
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn row_id(row: &Row) -> Option<&str> {
    row.get(ID_COLUMN).and_then(Value::as_str)
}

/// Fill in id and timestamps for a new row.
fn stamp_new(mut row: Row) -> Row {
    let missing_id = !matches!(row.get(ID_COLUMN), Some(Value::String(id)) if !id.is_empty());
    if missing_id {
        row.insert(
            ID_COLUMN.to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }
    let ts = now();
    row.entry(CREATED_AT_COLUMN.to_string())
        .or_insert_with(|| ts.clone());
    row.insert(UPDATED_AT_COLUMN.to_string(), ts);
    row
}

fn apply_patch(row: &mut Row, patch: Row) {
    for (key, value) in patch {
        if key != ID_COLUMN {
            row.insert(key, value);
        }
    }
    row.insert(UPDATED_AT_COLUMN.to_string(), now());
}

#[async_trait]
impl Backend for LocalBackend {
    async fn select(&self, table: &str, order: &OrderBy) -> BackendResult<Vec<Row>> {
        let mut rows = self.read_table(table).await?;
        sort_rows(&mut rows, order);
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Row) -> BackendResult<Row> {
        let mut stored = self.insert_many(table, vec![row]).await?;
        stored
            .pop()
            .ok_or_else(|| BackendError::Storage("insert produced no row".to_string()))
    }

    async fn insert_many(&self, table: &str, rows: Vec<Row>) -> BackendResult<Vec<Row>> {
        let _guard = self.write_lock.lock().await;
        let mut existing = self.read_table(table).await?;
        let stored: Vec<Row> = rows.into_iter().map(stamp_new).collect();
        existing.extend(stored.iter().cloned());
        self.write_table(table, &existing).await?;
        Ok(stored)
    }

    async fn update(&self, table: &str, id: &str, patch: Row) -> BackendResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.read_table(table).await?;
        let row = rows
            .iter_mut()
            .find(|r| row_id(r) == Some(id))
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        apply_patch(row, patch);
        self.write_table(table, &rows).await
    }

    async fn delete(&self, table: &str, id: &str) -> BackendResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.read_table(table).await?;
        let before = rows.len();
        rows.retain(|r| row_id(r) != Some(id));
        if rows.len() == before {
            return Ok(());
        }
        self.write_table(table, &rows).await
    }

    async fn upsert(&self, table: &str, row: Row, conflict_key: &str) -> BackendResult<Row> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.read_table(table).await?;
        let key_value = row.get(conflict_key).cloned();

        let existing = key_value
            .as_ref()
            .and_then(|value| rows.iter().position(|r| r.get(conflict_key) == Some(value)));

        let stored = match existing {
            Some(index) => {
                apply_patch(&mut rows[index], row);
                rows[index].clone()
            }
            None => {
                let stored = stamp_new(row);
                rows.push(stored.clone());
                stored
            }
        };
        self.write_table(table, &rows).await?;
        Ok(stored)
    }
}
