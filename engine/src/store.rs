//! Collection store - the reactive, optimistic copy of one backend table.
//!
//! A [`CollectionStore`] holds the records of one table in a watch channel.
//! Reads are synchronous snapshots; writes are applied to the local copy
//! first and reconciled with the backend afterwards:
//!
//! - `insert` prepends a record with a [`RecordId::Pending`] id and swaps in
//!   the confirmed record when the backend answers
//! - `update` merges the patch in place and restores the prior record on
//!   failure
//! - `delete` removes the record and restores the prior array on failure
//!
//! Every backend call goes through the context's
//! [`RequestScheduler`](crate::RequestScheduler), and every status change is
//! reported to the [`SyncRegistry`](crate::SyncRegistry).

use crate::auth::{AuthState, Identity};
use crate::backend::{Backend, BackendResult, OrderBy, Row};
use crate::context::SyncContext;
use crate::error::{BackendError, Error, Result};
use crate::fields::FieldMap;
use crate::logger::{LogCategory, LogLevel};
use crate::record::{Fields, Record, RecordId};
use crate::registry::StoreStatus;
use crate::wire::{CREATED_AT_COLUMN, ID_COLUMN, OWNER_COLUMN};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Options of one collection store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Human-readable name used in logs, notices and the registry
    pub label: String,
    /// Backend column the collection is ordered by, newest first
    pub order_by: String,
    pub field_map: FieldMap,
    /// Local storage key holding pre-backend data to migrate on first load
    pub migration_key: Option<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            label: String::new(),
            order_by: CREATED_AT_COLUMN.to_string(),
            field_map: FieldMap::new(),
            migration_key: None,
        }
    }
}

impl StoreOptions {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = column.into();
        self
    }

    pub fn with_field_map(mut self, field_map: FieldMap) -> Self {
        self.field_map = field_map;
        self
    }

    pub fn with_migration_key(mut self, key: impl Into<String>) -> Self {
        self.migration_key = Some(key.into());
        self
    }
}

/// Observable state of a store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreState {
    /// Records in collection order; optimistic inserts come first
    pub records: Vec<Record>,
    pub status: StoreStatus,
    /// Message of the last failure, cleared by the next operation
    pub error: Option<String>,
    /// Whether a fetch has succeeded since creation or the last reset
    pub loaded: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct FetchState {
    // Session the load was started under, and the load itself.
    in_flight: Option<(u64, Shared<BoxFuture<'static, ()>>)>,
    fetched_at: Option<Instant>,
    migration_checked: bool,
}

struct Inner {
    table: String,
    options: StoreOptions,
    ctx: SyncContext,
    state: watch::Sender<StoreState>,
    fetch: Mutex<FetchState>,
    writes_in_flight: AtomicUsize,
    // Bumped on every status change; a success revert only fires if unchanged.
    status_generation: AtomicU64,
    // Bumped by `reset`. Results of work started under an older session are
    // dropped.
    session: AtomicU64,
}

/// Reactive store of one backend table. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CollectionStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("CollectionStore")
            .field("table", &self.inner.table)
            .field("label", &self.inner.options.label)
            .field("records", &state.records.len())
            .field("status", &state.status)
            .finish()
    }
}

/// Clears the in-flight fetch when the load task ends, panics included.
struct InFlightGuard {
    store: CollectionStore,
    session: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut fetch = self.store.fetch_state();
        if matches!(&fetch.in_flight, Some((session, _)) if *session == self.session) {
            fetch.in_flight = None;
        }
    }
}

impl CollectionStore {
    /// Create a store for `table` and register it with the context's registry.
    ///
    /// An empty label defaults to the table name.
    pub fn new(table: impl Into<String>, options: StoreOptions, ctx: SyncContext) -> Self {
        let table = table.into();
        let mut options = options;
        if options.label.is_empty() {
            options.label = table.clone();
        }
        ctx.registry.register(&table, &options.label);

        let (state, _) = watch::channel(StoreState::default());
        Self {
            inner: Arc::new(Inner {
                table,
                options,
                ctx,
                state,
                fetch: Mutex::new(FetchState::default()),
                writes_in_flight: AtomicUsize::new(0),
                status_generation: AtomicU64::new(0),
                session: AtomicU64::new(0),
            }),
        }
    }

    // ========================================================================
    // Getters
    // ========================================================================

    pub fn table(&self) -> &str {
        &self.inner.table
    }

    pub fn label(&self) -> &str {
        &self.inner.options.label
    }

    /// Snapshot of the records.
    pub fn value(&self) -> Vec<Record> {
        self.inner.state.borrow().records.clone()
    }

    /// Snapshot of one record.
    pub fn get(&self, id: &str) -> Option<Record> {
        self.inner
            .state
            .borrow()
            .records
            .iter()
            .find(|r| r.id == *id)
            .cloned()
    }

    /// Decode every record into a typed entity.
    pub fn values<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.inner
            .state
            .borrow()
            .records
            .iter()
            .map(|record| record.decode())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.borrow().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn loading(&self) -> bool {
        self.status() == StoreStatus::Loading
    }

    pub fn status(&self) -> StoreStatus {
        self.inner.state.borrow().status
    }

    pub fn error_msg(&self) -> Option<String> {
        self.inner.state.borrow().error.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.state.borrow().loaded
    }

    pub fn last_fetched_at(&self) -> Option<DateTime<Utc>> {
        self.inner.state.borrow().last_fetched_at
    }

    /// Snapshot of the whole state.
    pub fn state(&self) -> StoreState {
        self.inner.state.borrow().clone()
    }

    /// Watch the state. Every mutation publishes a new value.
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.inner.state.subscribe()
    }

    // ========================================================================
    // Fetch
    // ========================================================================

    /// Load the whole collection.
    ///
    /// Skipped when `force` is false and data younger than the staleness
    /// window is loaded. Concurrent calls share one backend read. Failures
    /// are reported through [`status`](Self::status) and
    /// [`error_msg`](Self::error_msg), never returned.
    pub async fn fetch(&self, force: bool) {
        let shared = {
            let mut fetch = self.fetch_state();
            let session = self.session();
            let joinable = fetch
                .in_flight
                .as_ref()
                .filter(|(started, _)| *started == session)
                .map(|(_, in_flight)| in_flight.clone());

            if let Some(in_flight) = joinable {
                in_flight
            } else {
                if !force && self.is_fresh(&fetch) {
                    return;
                }
                if !self.inner.ctx.auth.is_authenticated() {
                    return;
                }

                let store = self.clone();
                let handle = tokio::spawn(async move {
                    let guard = InFlightGuard { store, session };
                    guard.store.load(session).await;
                });
                let shared = async move {
                    let _ = handle.await;
                }
                .boxed()
                .shared();
                fetch.in_flight = Some((session, shared.clone()));
                shared
            }
        };
        shared.await;
    }

    /// Wait for the initial load, or for the fetch in flight.
    ///
    /// Every mutation calls this first so optimistic edits land on real data.
    /// Waits for session restoration if the auth handle is still loading.
    pub async fn ensure_initialized(&self) {
        self.inner.ctx.auth.ready().await;
        let busy = self.fetch_state().in_flight.is_some();
        if busy || !self.is_loaded() {
            self.fetch(false).await;
        }
    }

    fn is_fresh(&self, fetch: &FetchState) -> bool {
        match fetch.fetched_at {
            Some(at) => self.is_loaded() && at.elapsed() < self.inner.ctx.config.stale_after,
            None => false,
        }
    }

    async fn load(&self, session: u64) {
        self.set_status(StoreStatus::Loading, None);

        let order = OrderBy::descending(self.inner.options.order_by.clone());
        let attempts = self.inner.ctx.config.fetch_retries + 1;
        let mut attempt = 0;

        let result = loop {
            attempt += 1;
            let backend = self.backend();
            let table = self.inner.table.clone();
            let order = order.clone();
            let result = self
                .call(async move { backend.select(&table, &order).await })
                .await;

            match result {
                Err(err)
                    if attempt < attempts && is_retryable(&err) && self.is_current(session) =>
                {
                    self.inner.ctx.logger.warn(
                        LogCategory::Sync,
                        format!(
                            "Fetch of {} failed (attempt {attempt}/{attempts}), retrying: {err}",
                            self.inner.table
                        ),
                        Some(&self.inner.table),
                    );
                    tokio::time::sleep(self.inner.ctx.config.retry_backoff).await;
                }
                other => break other,
            }
        };

        match result {
            Ok(rows) => {
                let records: Vec<Record> =
                    rows.iter().filter_map(|row| self.record_from_row(row)).collect();
                let count = records.len();
                let now = Utc::now();

                let committed = self.commit(session, |state| {
                    state.records = records;
                    state.status = StoreStatus::Idle;
                    state.error = None;
                    state.loaded = true;
                    state.last_fetched_at = Some(now);
                });
                if !committed {
                    self.log_discarded("fetch");
                    return;
                }
                self.fetch_state().fetched_at = Some(Instant::now());
                self.bump_generation();
                self.report(StoreStatus::Idle, None);
                self.inner.ctx.logger.info(
                    LogCategory::Data,
                    format!("Fetched {count} records from {}", self.inner.table),
                    Some(&self.inner.table),
                );

                let first_load = !std::mem::replace(&mut self.fetch_state().migration_checked, true);
                if first_load && count == 0 {
                    self.migrate_local(session).await;
                }
            }
            Err(_) if !self.is_current(session) => self.log_discarded("fetch"),
            Err(err) => {
                self.log_failure("fetch", &err);
                self.set_status(StoreStatus::Error, Some(err.to_string()));
            }
        }
    }

    /// Move pre-backend data from local storage into an empty collection.
    async fn migrate_local(&self, session: u64) {
        let (Some(key), Some(storage)) = (&self.inner.options.migration_key, &self.inner.ctx.local)
        else {
            return;
        };
        let Some(identity) = self.inner.ctx.auth.identity() else {
            return;
        };
        let table = &self.inner.table;
        let logger = &self.inner.ctx.logger;

        let raw = match storage.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(err) => {
                logger.error(
                    LogCategory::Data,
                    format!("Could not read {key} for migration of {table}: {err}"),
                    Some(table),
                );
                return;
            }
        };

        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                logger.error(
                    LogCategory::Data,
                    format!("Migration data under {key} is not JSON: {err}"),
                    Some(table),
                );
                return;
            }
        };

        match value {
            Value::Array(items) if !items.is_empty() => {
                let rows: Vec<Row> = items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Object(fields) => Some(self.outgoing_row(&fields, Some(&identity))),
                        _ => None,
                    })
                    .collect();
                logger.info(
                    LogCategory::Data,
                    format!("Migrating {} records of {table} from local storage", rows.len()),
                    Some(table),
                );

                let backend = self.backend();
                let table_name = table.clone();
                let result = self
                    .call(async move { backend.insert_many(&table_name, rows).await })
                    .await;
                match result {
                    Ok(stored) => {
                        let records: Vec<Record> = stored
                            .iter()
                            .filter_map(|row| self.record_from_row(row))
                            .collect();
                        let count = records.len();
                        if !self.commit(session, |state| state.records = records) {
                            self.log_discarded("migrate");
                            return;
                        }
                        logger.info(
                            LogCategory::Data,
                            format!("Migrated {count} records into {table}"),
                            Some(table),
                        );
                    }
                    Err(err) => self.log_failure("migrate", &err),
                }
            }
            Value::Object(fields) => {
                if let Err(err) = self.upsert_row(&identity, &fields, session).await {
                    self.log_failure("migrate", &err);
                }
            }
            _ => {}
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert a record.
    ///
    /// The record appears at the front of the collection immediately, under
    /// a pending id. Returns the confirmed record, or `None` when nobody is
    /// signed in.
    pub async fn insert(&self, fields: Fields) -> Result<Option<Record>> {
        let session = self.session();
        let Some(identity) = self.require_identity("insert") else {
            return Ok(None);
        };
        self.ensure_initialized().await;

        let optimistic = Record::pending(fields);
        let pending_id = optimistic.id.clone();
        let row = self.outgoing_row(&optimistic.fields, Some(&identity));
        let client_only = self.client_only_fields(&optimistic.fields);

        if !self.commit(session, |state| state.records.insert(0, optimistic)) {
            self.log_discarded("insert");
            return Ok(None);
        }
        self.begin_write();

        let backend = self.backend();
        let table = self.inner.table.clone();
        let result = self
            .call(async move { backend.insert(&table, row).await })
            .await
            .and_then(|row| {
                self.record_from_row(&row).ok_or_else(|| {
                    Error::Backend(BackendError::InvalidResponse(
                        "inserted row has no id".to_string(),
                    ))
                })
            });

        match result {
            Ok(mut confirmed) => {
                confirmed.merge(&client_only);
                let committed = self.commit(session, |state| {
                    let records = &mut state.records;
                    let pending = records.iter().position(|r| r.id == pending_id);
                    let already_fetched = records.iter().any(|r| r.id == confirmed.id);
                    match (pending, already_fetched) {
                        (Some(index), true) => {
                            records.remove(index);
                        }
                        (Some(index), false) => records[index] = confirmed.clone(),
                        (None, true) => {}
                        (None, false) => records.insert(0, confirmed.clone()),
                    }
                });
                if !committed {
                    self.log_discarded("insert");
                }
                self.finish_write(session);
                Ok(Some(confirmed))
            }
            Err(err) => {
                self.commit(session, |state| state.records.retain(|r| r.id != pending_id));
                Err(self.fail_write("insert", err, session))
            }
        }
    }

    /// Serialize a typed entity and insert it.
    pub async fn insert_entity<T: Serialize>(&self, entity: &T) -> Result<Option<Record>> {
        let mut fields = Record::fields_of(entity)?;
        fields.remove(ID_COLUMN);
        self.insert(fields).await
    }

    /// Merge `patch` into the record with `id`.
    ///
    /// Empty or unknown ids are logged and ignored. A record whose insert is
    /// still pending cannot be updated yet.
    pub async fn update(&self, id: &str, patch: Fields) -> Result<()> {
        let session = self.session();
        if self.require_identity("update").is_none() {
            return Ok(());
        }
        if id.is_empty() {
            self.log_missing_id("update");
            return Ok(());
        }
        self.ensure_initialized().await;
        if !self.is_current(session) {
            self.log_discarded("update");
            return Ok(());
        }

        let mut snapshot = None;
        let mut pending = false;
        self.inner.state.send_if_modified(|state| {
            match state.records.iter_mut().find(|r| r.id == *id) {
                Some(record) if record.id.is_pending() => {
                    pending = true;
                    false
                }
                Some(record) => {
                    snapshot = Some(record.clone());
                    record.merge(&patch);
                    true
                }
                None => false,
            }
        });

        if pending {
            return Err(Error::PendingRecord(id.to_string()));
        }
        let Some(snapshot) = snapshot else {
            self.log_unknown_id("update", id);
            return Ok(());
        };

        let row = self.outgoing_row(&patch, None);
        if row.is_empty() {
            return Ok(());
        }
        self.begin_write();

        let backend = self.backend();
        let table = self.inner.table.clone();
        let row_id = id.to_string();
        let result = self
            .call(async move { backend.update(&table, &row_id, row).await })
            .await;

        match result {
            Ok(()) => {
                self.finish_write(session);
                Ok(())
            }
            Err(err) => {
                self.commit(session, |state| {
                    if let Some(record) = state.records.iter_mut().find(|r| r.id == snapshot.id) {
                        *record = snapshot;
                    }
                });
                Err(self.fail_write("update", err, session))
            }
        }
    }

    /// Delete the record with `id`.
    ///
    /// Empty or unknown ids are logged and ignored. On failure the whole
    /// collection is restored to its state before the call.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let session = self.session();
        if self.require_identity("delete").is_none() {
            return Ok(());
        }
        if id.is_empty() {
            self.log_missing_id("delete");
            return Ok(());
        }
        self.ensure_initialized().await;
        if !self.is_current(session) {
            self.log_discarded("delete");
            return Ok(());
        }

        let mut prior = None;
        let mut pending = false;
        self.inner.state.send_if_modified(|state| {
            match state.records.iter().position(|r| r.id == *id) {
                Some(index) if state.records[index].id.is_pending() => {
                    pending = true;
                    false
                }
                Some(index) => {
                    prior = Some(state.records.clone());
                    state.records.remove(index);
                    true
                }
                None => false,
            }
        });

        if pending {
            return Err(Error::PendingRecord(id.to_string()));
        }
        let Some(prior) = prior else {
            self.log_unknown_id("delete", id);
            return Ok(());
        };
        self.begin_write();

        let backend = self.backend();
        let table = self.inner.table.clone();
        let row_id = id.to_string();
        let result = self
            .call(async move { backend.delete(&table, &row_id).await })
            .await;

        match result {
            Ok(()) => {
                self.finish_write(session);
                Ok(())
            }
            Err(err) => {
                self.commit(session, |state| state.records = prior);
                Err(self.fail_write("delete", err, session))
            }
        }
    }

    /// Create or replace the single record of the signed-in user.
    ///
    /// For collections holding one row per user, such as settings. On success
    /// the collection consists of exactly the returned record.
    pub async fn upsert_single(&self, fields: Fields) -> Result<Option<Record>> {
        let session = self.session();
        let Some(identity) = self.require_identity("upsert") else {
            return Ok(None);
        };
        self.ensure_initialized().await;
        if !self.is_current(session) {
            self.log_discarded("upsert");
            return Ok(None);
        }
        self.upsert_row(&identity, &fields, session).await.map(Some)
    }

    async fn upsert_row(
        &self,
        identity: &Identity,
        fields: &Fields,
        session: u64,
    ) -> Result<Record> {
        let row = self.outgoing_row(fields, Some(identity));
        let client_only = self.client_only_fields(fields);
        self.begin_write();

        let backend = self.backend();
        let table = self.inner.table.clone();
        let result = self
            .call(async move { backend.upsert(&table, row, OWNER_COLUMN).await })
            .await
            .and_then(|row| {
                self.record_from_row(&row).ok_or_else(|| {
                    Error::Backend(BackendError::InvalidResponse(
                        "upserted row has no id".to_string(),
                    ))
                })
            });

        match result {
            Ok(mut record) => {
                record.merge(&client_only);
                if !self.commit(session, |state| state.records = vec![record.clone()]) {
                    self.log_discarded("upsert");
                }
                self.finish_write(session);
                Ok(record)
            }
            Err(err) => Err(self.fail_write("upsert", err, session)),
        }
    }

    /// Follow the auth handle: force a fetch on every sign-in and drop the
    /// records on sign-out.
    ///
    /// The task runs until aborted.
    pub fn watch_auth(&self) -> JoinHandle<()> {
        let store = self.clone();
        let mut rx = self.inner.ctx.auth.subscribe();
        tokio::spawn(async move {
            loop {
                let state = rx.borrow_and_update().clone();
                match state {
                    AuthState::SignedIn(_) => store.fetch(true).await,
                    AuthState::SignedOut => store.reset(),
                    AuthState::Loading => {}
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Drop all records and forget the last fetch.
    ///
    /// Fetches and writes still running finish against the backend, but
    /// their results no longer reach this store.
    pub fn reset(&self) {
        {
            let mut fetch = self.fetch_state();
            fetch.in_flight = None;
            fetch.fetched_at = None;
            fetch.migration_checked = false;
        }
        self.bump_generation();
        self.inner.state.send_modify(|state| {
            self.inner.session.fetch_add(1, Ordering::SeqCst);
            *state = StoreState::default();
        });
        self.report(StoreStatus::Idle, None);
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn fetch_state(&self) -> MutexGuard<'_, FetchState> {
        self.inner
            .fetch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn session(&self) -> u64 {
        self.inner.session.load(Ordering::SeqCst)
    }

    fn is_current(&self, session: u64) -> bool {
        self.session() == session
    }

    /// Apply `change` unless the store was reset after `session` began.
    ///
    /// The check runs under the state lock, which `reset` also takes.
    fn commit(&self, session: u64, change: impl FnOnce(&mut StoreState)) -> bool {
        let mut applied = false;
        self.inner.state.send_if_modified(|state| {
            if self.inner.session.load(Ordering::SeqCst) != session {
                return false;
            }
            change(state);
            applied = true;
            true
        });
        applied
    }

    fn log_discarded(&self, operation: &str) {
        self.inner.ctx.logger.info(
            LogCategory::Sync,
            format!(
                "Discarding {operation} result for {}: store was reset",
                self.inner.table
            ),
            Some(&self.inner.table),
        );
    }

    fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.inner.ctx.backend)
    }

    /// Run a backend call through the scheduler.
    async fn call<T, F>(&self, request: F) -> Result<T>
    where
        F: Future<Output = BackendResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        Ok(self.inner.ctx.scheduler.run(request).await??)
    }

    fn require_identity(&self, operation: &str) -> Option<Identity> {
        let identity = self.inner.ctx.auth.identity();
        if identity.is_none() {
            self.inner.ctx.logger.warn(
                LogCategory::Auth,
                format!("{operation} on {} skipped: not authenticated", self.inner.table),
                Some(&self.inner.table),
            );
        }
        identity
    }

    fn log_missing_id(&self, operation: &str) {
        self.inner.ctx.logger.error(
            LogCategory::Data,
            format!("{operation} on {} called without an id", self.inner.table),
            Some(&self.inner.table),
        );
    }

    fn log_unknown_id(&self, operation: &str, id: &str) {
        self.inner.ctx.logger.error(
            LogCategory::Data,
            format!("{operation} on {}: no record with id {id}", self.inner.table),
            Some(&self.inner.table),
        );
    }

    /// Backend form of client fields, without `id`, optionally owned.
    fn outgoing_row(&self, fields: &Fields, owner: Option<&Identity>) -> Row {
        let mut row = self.inner.options.field_map.to_backend_form(fields);
        row.remove(ID_COLUMN);
        if let Some(identity) = owner {
            row.insert(
                OWNER_COLUMN.to_string(),
                Value::String(identity.user_id.clone()),
            );
        }
        row
    }

    fn client_only_fields(&self, fields: &Fields) -> Fields {
        let field_map = &self.inner.options.field_map;
        fields
            .iter()
            .filter(|(key, _)| field_map.is_excluded(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn record_from_row(&self, row: &Row) -> Option<Record> {
        let mut fields = self.inner.options.field_map.to_client_form(row);
        let id = match fields.remove(ID_COLUMN) {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                self.inner.ctx.logger.error(
                    LogCategory::Data,
                    format!("Discarding row of {} without an id", self.inner.table),
                    Some(&self.inner.table),
                );
                return None;
            }
        };
        Some(Record {
            id: RecordId::Confirmed(id),
            fields,
        })
    }

    fn bump_generation(&self) -> u64 {
        self.inner.status_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn set_status(&self, status: StoreStatus, error: Option<String>) {
        self.bump_generation();
        self.inner.state.send_modify(|state| {
            state.status = status;
            state.error = error.clone();
        });
        self.report(status, error);
    }

    fn report(&self, status: StoreStatus, error: Option<String>) {
        self.inner
            .ctx
            .registry
            .update_status(&self.inner.table, status, error);
    }

    fn begin_write(&self) {
        self.inner.writes_in_flight.fetch_add(1, Ordering::SeqCst);
        self.set_status(StoreStatus::Saving, None);
    }

    fn end_write(&self) -> usize {
        self.inner.writes_in_flight.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Mark a write confirmed. Shows `success` once no write is in flight,
    /// reverting to `idle` after the display window. A success finishing
    /// last also clears an error left by a concurrent write.
    fn finish_write(&self, session: u64) {
        if self.end_write() > 0 || !self.is_current(session) {
            return;
        }
        self.set_status(StoreStatus::Success, None);

        let generation = self.inner.status_generation.load(Ordering::SeqCst);
        let store = self.clone();
        let display = self.inner.ctx.config.success_display;
        tokio::spawn(async move {
            tokio::time::sleep(display).await;
            if store.inner.status_generation.load(Ordering::SeqCst) == generation {
                store.set_status(StoreStatus::Idle, None);
            }
        });
    }

    /// Record a failed write: error status, log entry with hint, notice.
    fn fail_write(&self, operation: &str, err: Error, session: u64) -> Error {
        self.end_write();
        self.log_failure(operation, &err);
        if !self.is_current(session) {
            return err;
        }
        self.set_status(StoreStatus::Error, Some(err.to_string()));
        self.inner.ctx.notifier.error(format!(
            "Could not {operation} {}: {err}",
            self.inner.options.label
        ));
        err
    }

    fn log_failure(&self, operation: &str, err: &Error) {
        let data = match (err.code(), err.hint()) {
            (None, None) => None,
            (code, hint) => Some(json!({ "code": code, "hint": hint })),
        };
        self.inner.ctx.logger.log(
            LogLevel::Error,
            LogCategory::Data,
            format!("{operation} on {} failed: {err}", self.inner.table),
            data,
            Some(&self.inner.table),
        );
    }
}

fn is_retryable(err: &Error) -> bool {
    matches!(err, Error::Backend(e) if e.is_transient())
}
