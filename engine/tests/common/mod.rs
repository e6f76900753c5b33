//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tether_engine::{
    AuthHandle, Backend, BackendError, BackendResult, CollectionStore, Fields, Identity, OrderBy,
    Row, StoreOptions, SyncConfig, SyncContext,
};
use tokio::sync::watch;

pub fn fields(value: Value) -> Fields {
    value.as_object().cloned().expect("fixture must be an object")
}

pub fn signed_in() -> AuthHandle {
    AuthHandle::signed_in(Identity::new("user-1", "user-1"))
}

/// Let spawned tasks run.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// In-memory backend with call counters, scripted failures and a gate that
/// holds every call until released.
pub struct ScriptedBackend {
    rows: Mutex<HashMap<String, Vec<Row>>>,
    select_failures: Mutex<VecDeque<BackendError>>,
    write_failure: Mutex<Option<BackendError>>,
    last_patch: Mutex<Option<Row>>,
    gate: watch::Sender<bool>,
    next_id: AtomicUsize,
    active: AtomicUsize,
    pub peak: AtomicUsize,
    pub selects: AtomicUsize,
    pub inserts: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
    pub upserts: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            rows: Mutex::new(HashMap::new()),
            select_failures: Mutex::new(VecDeque::new()),
            write_failure: Mutex::new(None),
            last_patch: Mutex::new(None),
            gate,
            next_id: AtomicUsize::new(1),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            selects: AtomicUsize::new(0),
            inserts: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            upserts: AtomicUsize::new(0),
        })
    }

    /// Seed a table with rows in backend convention.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .map(|row| self.stamp(row.as_object().cloned().unwrap_or_default()))
            .collect();
        self.rows.lock().unwrap().insert(table.to_string(), rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.rows
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_next_select(&self, err: BackendError) {
        self.select_failures.lock().unwrap().push_back(err);
    }

    /// Fail every write until cleared with `None`.
    pub fn fail_writes(&self, err: Option<BackendError>) {
        *self.write_failure.lock().unwrap() = err;
    }

    pub fn last_patch(&self) -> Option<Row> {
        self.last_patch.lock().unwrap().clone()
    }

    /// Hold every call until [`release`](Self::release).
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn stamp(&self, mut row: Row) -> Row {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        row.entry("id").or_insert_with(|| json!(format!("row-{n}")));
        row.entry("created_at")
            .or_insert_with(|| json!(format!("2026-01-01T00:{:02}:{:02}.000Z", n / 60, n % 60)));
        row
    }

    async fn enter(&self, counter: &AtomicUsize) -> CallGuard<'_> {
        counter.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let mut rx = self.gate.subscribe();
        let _ = rx.wait_for(|open| *open).await;
        CallGuard {
            active: &self.active,
        }
    }

    fn write_failure(&self) -> BackendResult<()> {
        match self.write_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct CallGuard<'a> {
    active: &'a AtomicUsize,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn select(&self, table: &str, order: &OrderBy) -> BackendResult<Vec<Row>> {
        let _call = self.enter(&self.selects).await;
        if let Some(err) = self.select_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut rows = self.rows(table);
        rows.sort_by(|a, b| {
            let a = a.get(&order.field).and_then(Value::as_str).unwrap_or("");
            let b = b.get(&order.field).and_then(Value::as_str).unwrap_or("");
            if order.ascending {
                a.cmp(b)
            } else {
                b.cmp(a)
            }
        });
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Row) -> BackendResult<Row> {
        let _call = self.enter(&self.inserts).await;
        self.write_failure()?;
        let row = self.stamp(row);
        self.rows
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, id: &str, patch: Row) -> BackendResult<()> {
        let _call = self.enter(&self.updates).await;
        self.write_failure()?;
        *self.last_patch.lock().unwrap() = Some(patch.clone());
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| r["id"] == json!(id)))
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        row.extend(patch);
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> BackendResult<()> {
        let _call = self.enter(&self.deletes).await;
        self.write_failure()?;
        if let Some(rows) = self.rows.lock().unwrap().get_mut(table) {
            rows.retain(|r| r["id"] != json!(id));
        }
        Ok(())
    }

    async fn upsert(&self, table: &str, row: Row, conflict_key: &str) -> BackendResult<Row> {
        let _call = self.enter(&self.upserts).await;
        self.write_failure()?;
        let mut tables = self.rows.lock().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        if let Some(existing) = rows
            .iter_mut()
            .find(|r| r.get(conflict_key) == row.get(conflict_key))
        {
            existing.extend(row);
            return Ok(existing.clone());
        }
        drop(tables);
        let stored = self.stamp(row);
        self.rows
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }
}

/// Config with short timings for tests that do not pause time.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        retry_backoff: std::time::Duration::from_millis(10),
        ..SyncConfig::default()
    }
}

pub fn context(backend: Arc<ScriptedBackend>) -> SyncContext {
    SyncContext::with_config(backend, signed_in(), fast_config())
}

pub fn store(backend: &Arc<ScriptedBackend>, table: &str) -> CollectionStore {
    CollectionStore::new(
        table,
        StoreOptions::new(table),
        context(Arc::clone(backend)),
    )
}
