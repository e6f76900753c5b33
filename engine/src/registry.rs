//! Sync registry: one status entry per collection store.
//!
//! Every [`CollectionStore`](crate::CollectionStore) registers itself here and
//! reports each status transition. The registry reduces all entries to a
//! single [`GlobalStatus`] for a shell-level "syncing / stable / error"
//! indicator.

use crate::logger::{LogCategory, Logger};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Status of a single collection store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    #[default]
    Idle,
    Loading,
    Saving,
    Error,
    Success,
}

impl StoreStatus {
    /// Whether a backend call is in progress.
    pub fn is_busy(self) -> bool {
        matches!(self, StoreStatus::Loading | StoreStatus::Saving)
    }
}

/// Status of the whole sync layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalStatus {
    Stable,
    Syncing,
    Error,
}

impl GlobalStatus {
    /// Reduce store statuses: any error wins, then any busy store, else stable.
    pub fn reduce<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = StoreStatus>,
    {
        let mut syncing = false;
        for status in statuses {
            match status {
                StoreStatus::Error => return GlobalStatus::Error,
                s if s.is_busy() => syncing = true,
                _ => {}
            }
        }
        if syncing {
            GlobalStatus::Syncing
        } else {
            GlobalStatus::Stable
        }
    }
}

/// Registry entry for one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub id: String,
    pub table_name: String,
    pub label: String,
    pub status: StoreStatus,
    pub error: Option<String>,
    pub last_sync: DateTime<Utc>,
}

/// Process-wide registry of store statuses.
///
/// Construct one per [`SyncContext`](crate::SyncContext); tests get a fresh
/// registry simply by building a fresh context.
#[derive(Debug)]
pub struct SyncRegistry {
    entries: DashMap<String, RegistryEntry>,
    global: watch::Sender<GlobalStatus>,
    logger: Arc<Logger>,
}

impl SyncRegistry {
    /// Create an empty registry.
    pub fn new(logger: Arc<Logger>) -> Self {
        let (global, _) = watch::channel(GlobalStatus::Stable);
        Self {
            entries: DashMap::new(),
            global,
            logger,
        }
    }

    /// Create a new registry wrapped in Arc for sharing.
    pub fn new_shared(logger: Arc<Logger>) -> Arc<Self> {
        Arc::new(Self::new(logger))
    }

    /// Register a store. Re-registering an id resets its entry.
    pub fn register(&self, id: &str, label: &str) {
        self.entries.insert(
            id.to_string(),
            RegistryEntry {
                id: id.to_string(),
                table_name: id.to_string(),
                label: label.to_string(),
                status: StoreStatus::Idle,
                error: None,
                last_sync: Utc::now(),
            },
        );
        self.logger
            .info(LogCategory::Sync, format!("Registered store: {label}"), Some(id));
        self.publish();
    }

    /// Record a status change. Unknown ids are ignored.
    pub fn update_status(&self, id: &str, status: StoreStatus, error: Option<String>) {
        let table_name = {
            let Some(mut entry) = self.entries.get_mut(id) else {
                return;
            };
            entry.status = status;
            entry.error = error.clone();
            entry.last_sync = Utc::now();
            entry.table_name.clone()
        };

        if status == StoreStatus::Error {
            self.logger.error(
                LogCategory::Data,
                format!(
                    "Store {table_name} reported error: {}",
                    error.as_deref().unwrap_or("unknown error")
                ),
                Some(id),
            );
        }
        self.publish();
    }

    /// Snapshot of all entries, ordered by id.
    pub fn registry(&self) -> BTreeMap<String, RegistryEntry> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Snapshot of one entry.
    pub fn entry(&self, id: &str) -> Option<RegistryEntry> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    /// Current global status, recomputed from every entry.
    pub fn global_status(&self) -> GlobalStatus {
        GlobalStatus::reduce(self.entries.iter().map(|e| e.value().status))
    }

    pub fn is_syncing(&self) -> bool {
        self.global_status() == GlobalStatus::Syncing
    }

    pub fn has_error(&self) -> bool {
        self.global_status() == GlobalStatus::Error
    }

    /// Watch the global status; a new value is published whenever it changes.
    pub fn subscribe(&self) -> watch::Receiver<GlobalStatus> {
        self.global.subscribe()
    }

    fn publish(&self) {
        self.global.send_if_modified(|current| {
            let next = self.global_status();
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;

    fn registry() -> SyncRegistry {
        SyncRegistry::new(Arc::new(Logger::new()))
    }

    #[test]
    fn register_creates_idle_entry() {
        let registry = registry();
        registry.register("tasks", "Tasks");

        let entry = registry.entry("tasks").unwrap();
        assert_eq!(entry.label, "Tasks");
        assert_eq!(entry.table_name, "tasks");
        assert_eq!(entry.status, StoreStatus::Idle);
        assert_eq!(entry.error, None);
        assert_eq!(registry.global_status(), GlobalStatus::Stable);
    }

    #[test]
    fn status_transitions_drive_global_status() {
        let registry = registry();
        registry.register("smoke", "Smoke Test Table");

        registry.update_status("smoke", StoreStatus::Saving, None);
        assert_eq!(registry.global_status(), GlobalStatus::Syncing);
        assert!(registry.is_syncing());

        registry.update_status("smoke", StoreStatus::Error, Some("Simulated Error".into()));
        assert_eq!(registry.global_status(), GlobalStatus::Error);
        assert!(registry.has_error());
        assert_eq!(
            registry.entry("smoke").unwrap().error.as_deref(),
            Some("Simulated Error")
        );

        registry.update_status("smoke", StoreStatus::Idle, None);
        assert_eq!(registry.global_status(), GlobalStatus::Stable);
    }

    #[test]
    fn one_error_among_five_stores() {
        let registry = registry();
        for table in ["tasks", "habits", "notes", "goals", "journal"] {
            registry.register(table, table);
        }
        registry.update_status("notes", StoreStatus::Error, Some("boom".into()));
        assert_eq!(registry.global_status(), GlobalStatus::Error);
    }

    #[test]
    fn update_stamps_last_sync() {
        let registry = registry();
        registry.register("tasks", "Tasks");
        let before = registry.entry("tasks").unwrap().last_sync;
        registry.update_status("tasks", StoreStatus::Loading, None);
        assert!(registry.entry("tasks").unwrap().last_sync >= before);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let registry = registry();
        registry.update_status("ghost", StoreStatus::Error, Some("x".into()));
        assert!(registry.registry().is_empty());
        assert_eq!(registry.global_status(), GlobalStatus::Stable);
    }

    #[test]
    fn errors_are_logged() {
        let logger = Arc::new(Logger::new());
        let registry = SyncRegistry::new(Arc::clone(&logger));
        registry.register("tasks", "Tasks");
        registry.update_status("tasks", StoreStatus::Error, Some("table missing".into()));

        let last = logger.history().pop().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert!(last.message.contains("table missing"));
        assert_eq!(last.context.as_deref(), Some("tasks"));
    }

    #[test]
    fn subscribers_see_changes() {
        let registry = registry();
        let mut rx = registry.subscribe();
        registry.register("tasks", "Tasks");
        assert!(!rx.has_changed().unwrap());

        registry.update_status("tasks", StoreStatus::Loading, None);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), GlobalStatus::Syncing);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_status() -> impl Strategy<Value = StoreStatus> {
            prop_oneof![
                Just(StoreStatus::Idle),
                Just(StoreStatus::Loading),
                Just(StoreStatus::Saving),
                Just(StoreStatus::Error),
                Just(StoreStatus::Success),
            ]
        }

        proptest! {
            #[test]
            fn prop_global_status_reduction(statuses in proptest::collection::vec(arb_status(), 0..12)) {
                let registry = registry();
                for (i, status) in statuses.iter().enumerate() {
                    let id = format!("store_{i}");
                    registry.register(&id, &id);
                    registry.update_status(&id, *status, None);
                }

                let expected = if statuses.contains(&StoreStatus::Error) {
                    GlobalStatus::Error
                } else if statuses.iter().any(|s| s.is_busy()) {
                    GlobalStatus::Syncing
                } else {
                    GlobalStatus::Stable
                };
                prop_assert_eq!(registry.global_status(), expected);
            }
        }
    }
}
