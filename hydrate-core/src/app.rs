//! Dependency root.
//!
//! Built once at process start and passed by reference. Every component
//! shares the same store, backend handle and signal bus.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{CacheNamespace, DiskCache};
use crate::config::HydrateConfig;
use crate::error::HydrateResult;
use crate::fetcher::Fetcher;
use crate::identity::{AuthState, IdentityReconciler};
use crate::intake::IntakeQueue;
use crate::linking::AccountLinker;
use crate::reachability::Reachability;
use crate::remote::http::HttpBackend;
use crate::remote::session::SessionFile;
use crate::remote::{Remote, RemoteBackend};
use crate::signal::SignalBus;
use crate::store::{FileStore, Store};
use crate::sync::{EventSync, RetryPolicy};

pub struct Hydrate {
    pub config: HydrateConfig,
    pub store: Store,
    pub remote: Remote,
    pub signals: SignalBus,
    pub reachability: Reachability,
    pub fetcher: Fetcher,
    pub sync: EventSync,
    pub identity: IdentityReconciler,
    pub intake: IntakeQueue,
}

impl Hydrate {
    /// Wire everything against the configured HTTP backend.
    pub fn open(config: HydrateConfig) -> HydrateResult<Self> {
        let session = SessionFile::new(config.session_path());
        let backend = HttpBackend::new(&config.backend_url, session)?;
        Self::with_backend(config, Arc::new(backend))
    }

    pub fn with_backend(
        config: HydrateConfig,
        backend: Arc<dyn RemoteBackend>,
    ) -> HydrateResult<Self> {
        let remote = Remote::new(backend).with_timeout(config.request_timeout()?);
        let store = Store::new(FileStore::open(config.store_path())?);
        let signals = SignalBus::new();

        let cache = DiskCache::new(config.cache_path());
        let fetcher =
            Fetcher::new(remote.clone(), cache, store.clone()).with_prewarm(config.prewarm);
        let sync = EventSync::new(store.clone(), remote.clone()).with_retry(RetryPolicy {
            attempts: config.logout_retry_attempts.max(1),
            backoff: config.logout_retry_backoff()?,
        });
        let linker = AccountLinker::new(store.clone(), remote.clone(), signals.clone());
        let identity = IdentityReconciler::new(
            store.clone(),
            remote.clone(),
            sync.clone(),
            fetcher.clone(),
            linker,
        );

        debug!(data_dir = %config.data_path().display(), "hydrate opened");
        Ok(Hydrate {
            intake: IntakeQueue::new(config.intake_path()),
            config,
            store,
            remote,
            signals,
            reachability: Reachability::new(),
            fetcher,
            sync,
            identity,
        })
    }

    /// Restore the current user and drain pending quick adds into it.
    pub async fn start(&self) -> HydrateResult<AuthState> {
        let state = self.identity.restore().await;
        self.reachability
            .set_online(!matches!(self.remote.health().await, Err(e) if e.is_connectivity()));

        if let Err(e) = self.sync.ingest_intake(&self.intake, state.user()).await {
            warn!(error = %e, "failed to ingest quick adds");
        }
        Ok(state)
    }

    /// Cache namespace of the current user.
    pub fn namespace(&self) -> CacheNamespace {
        CacheNamespace::for_user(self.identity.current_user().as_ref())
    }

    /// Configured time zone, or UTC.
    pub fn time_zone(&self) -> String {
        self.config
            .time_zone
            .clone()
            .unwrap_or_else(|| "UTC".to_string())
    }
}
