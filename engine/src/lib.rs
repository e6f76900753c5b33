//! # Tether Engine
//!
//! A reactive collection sync layer for dashboard-style applications.
//!
//! Each feature of an application (tasks, habits, notes, ...) keeps an
//! in-memory copy of one backend table in a [`CollectionStore`]. Stores load
//! lazily, share a bounded request queue, apply writes optimistically and
//! roll them back when the backend refuses them. A [`SyncRegistry`] folds
//! every store's status into one global indicator.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is a JSON field map plus a [`RecordId`]. Ids are either
//! `Confirmed` by the backend or `Pending` while an insert is in flight.
//! Field names use camelCase on the client and snake_case on the backend;
//! the [`fields`] module translates between the two.
//!
//! ### Stores
//!
//! [`CollectionStore::fetch`] loads a table, skipping the call while the data
//! is fresh and sharing one read between concurrent callers. Mutations
//! (`insert`, `update`, `delete`, `upsert_single`) change the local copy
//! first and report success or failure through the store's status.
//!
//! ### Backends
//!
//! The [`Backend`] trait is the persistence boundary:
//! - [`HttpBackend`] - a `tether-server` (or compatible) REST service
//! - [`LocalBackend`] - JSON arrays in a [`KeyValueStorage`]
//!
//! ### Context
//!
//! A [`SyncContext`] bundles the services every store shares: backend,
//! scheduler, registry, logger, auth handle and notifier. Build one per
//! application; tests build a fresh one each.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_engine::{
//!     AuthHandle, CollectionStore, Identity, LocalBackend, MemoryStorage, StoreOptions,
//!     SyncContext,
//! };
//! use serde_json::json;
//!
//! # async fn run() -> tether_engine::Result<()> {
//! // 1. Pick a backend and an identity
//! let backend = Arc::new(LocalBackend::new(Arc::new(MemoryStorage::new())));
//! let auth = AuthHandle::signed_in(Identity::new("user-1", "token"));
//!
//! // 2. Create a store per table
//! let ctx = SyncContext::new(backend, auth);
//! let tasks = CollectionStore::new("tasks", StoreOptions::new("Tasks"), ctx.clone());
//!
//! // 3. Write optimistically
//! let fields = json!({"title": "Buy milk", "dueDate": "2026-01-05"});
//! let created = tasks.insert(fields.as_object().cloned().unwrap_or_default()).await?;
//! assert!(created.is_some());
//!
//! // 4. Read
//! tasks.fetch(false).await;
//! assert_eq!(tasks.value().len(), 1);
//! assert_eq!(ctx.registry.global_status(), tether_engine::GlobalStatus::Stable);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod fields;
pub mod logger;
pub mod notify;
pub mod record;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod wire;

// Re-export main types at crate root
pub use auth::{AuthHandle, AuthState, Identity};
pub use backend::{
    Backend, BackendResult, FileStorage, HttpBackend, KeyValueStorage, LocalBackend,
    MemoryStorage, OrderBy, Row, StorageEvent,
};
pub use config::{ConfigError, SyncConfig};
pub use context::SyncContext;
pub use error::{BackendError, Error, Result};
pub use fields::FieldMap;
pub use logger::{LogCategory, LogEntry, LogLevel, Logger};
pub use notify::{Notice, NoticeKind, Notifier};
pub use record::{Fields, Record, RecordId};
pub use registry::{GlobalStatus, RegistryEntry, StoreStatus, SyncRegistry};
pub use scheduler::RequestScheduler;
pub use store::{CollectionStore, StoreOptions, StoreState};
