//! Shared services of a set of collection stores.

use crate::auth::AuthHandle;
use crate::backend::{Backend, KeyValueStorage};
use crate::config::SyncConfig;
use crate::logger::Logger;
use crate::notify::Notifier;
use crate::registry::SyncRegistry;
use crate::scheduler::RequestScheduler;
use std::sync::Arc;

/// Everything a [`CollectionStore`](crate::CollectionStore) needs besides its
/// own options.
///
/// Build one per application (or per test) and hand clones to each store.
/// Stores built from clones of the same context share the scheduler,
/// registry, logger and notifier.
#[derive(Clone)]
pub struct SyncContext {
    pub backend: Arc<dyn Backend>,
    pub scheduler: RequestScheduler,
    pub registry: Arc<SyncRegistry>,
    pub logger: Arc<Logger>,
    pub auth: AuthHandle,
    pub notifier: Notifier,
    pub config: SyncConfig,
    /// Source of pre-backend data for local migration
    pub local: Option<Arc<dyn KeyValueStorage>>,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("scheduler", &self.scheduler)
            .field("auth", &self.auth.state())
            .field("config", &self.config)
            .field("local", &self.local.is_some())
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Create a context with default configuration.
    pub fn new(backend: Arc<dyn Backend>, auth: AuthHandle) -> Self {
        Self::with_config(backend, auth, SyncConfig::default())
    }

    /// Create a context with explicit configuration.
    pub fn with_config(backend: Arc<dyn Backend>, auth: AuthHandle, config: SyncConfig) -> Self {
        let logger = Arc::new(Logger::new());
        Self {
            backend,
            scheduler: RequestScheduler::new(config.max_concurrent_requests),
            registry: SyncRegistry::new_shared(Arc::clone(&logger)),
            logger,
            auth,
            notifier: Notifier::new(),
            config,
            local: None,
        }
    }

    /// Read migration data from `storage`.
    pub fn with_local_storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.local = Some(storage);
        self
    }

    /// Use an existing logger. The registry is rebuilt around it.
    pub fn with_logger(mut self, logger: Arc<Logger>) -> Self {
        self.registry = SyncRegistry::new_shared(Arc::clone(&logger));
        self.logger = logger;
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }
}
