//! Best-effort event synchronization.
//!
//! Local writes always complete first. Pushes to the backend run in the
//! background and their failures are only logged: the local store stays
//! authoritative and a later [`EventSync::full_resync`] reconciles.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{HydrateError, HydrateResult};
use crate::event::Event;
use crate::intake::IntakeQueue;
use crate::remote::Remote;
use crate::store::{ChangeSet, Store};
use crate::user::User;

/// Bounded retry for local cleanup on logout.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Handle to a background push. Dropping it does not cancel the push.
#[must_use]
pub struct PendingPush(Option<JoinHandle<()>>);

impl PendingPush {
    fn local_only() -> Self {
        PendingPush(None)
    }

    /// True when nothing was sent to the backend (no authenticated account).
    pub fn is_local_only(&self) -> bool {
        self.0.is_none()
    }

    /// Wait for the push to finish. Push errors were already logged.
    pub async fn wait(self) {
        if let Some(handle) = self.0 {
            let _ = handle.await;
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Unowned local events that were assigned to the account.
    pub adopted: usize,
    pub pushed: usize,
    pub pulled: usize,
}

#[derive(Clone)]
pub struct EventSync {
    store: Store,
    remote: Remote,
    retry: RetryPolicy,
}

/// The account a user's events are pushed to. Guests have none.
fn account_of(user: Option<&User>) -> Option<Uuid> {
    user.filter(|u| !u.is_guest()).map(|u| u.id)
}

impl EventSync {
    pub fn new(store: Store, remote: Remote) -> Self {
        EventSync {
            store,
            remote,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn push_upsert(&self, account: Uuid, event: Event) -> PendingPush {
        let remote = self.remote.clone();
        PendingPush(Some(tokio::spawn(async move {
            match remote.upsert_event(account, &event).await {
                Ok(()) => debug!(event_id = %event.id, "event pushed"),
                Err(e) => warn!(event_id = %event.id, error = %e, "event push failed"),
            }
        })))
    }

    fn push_delete(&self, account: Uuid, event_id: Uuid) -> PendingPush {
        let remote = self.remote.clone();
        PendingPush(Some(tokio::spawn(async move {
            match remote.delete_event(account, event_id).await {
                Ok(()) => debug!(%event_id, "event deletion pushed"),
                Err(e) => warn!(%event_id, error = %e, "event deletion push failed"),
            }
        })))
    }

    /// Save a new event locally, then push it if the user has an account.
    /// Guest events stay unowned until the account is linked.
    pub async fn add_event(
        &self,
        user: Option<&User>,
        mut event: Event,
    ) -> HydrateResult<PendingPush> {
        let account = account_of(user);
        if let Some(account) = account
            && event.owner_id.is_none()
        {
            event.owner_id = Some(account);
        }

        self.store.save(ChangeSet::new().put_event(event.clone())).await?;

        Ok(match account {
            Some(account) => self.push_upsert(account, event),
            None => PendingPush::local_only(),
        })
    }

    pub async fn update_event(
        &self,
        user: Option<&User>,
        event: Event,
    ) -> HydrateResult<PendingPush> {
        if self.store.event(event.id).await?.is_none() {
            return Err(HydrateError::NotFound(format!("event {}", event.id)));
        }
        self.add_event(user, event).await
    }

    pub async fn delete_event(
        &self,
        user: Option<&User>,
        event_id: Uuid,
    ) -> HydrateResult<PendingPush> {
        self.store.save(ChangeSet::new().delete_event(event_id)).await?;

        Ok(match account_of(user) {
            Some(account) => self.push_delete(account, event_id),
            None => PendingPush::local_only(),
        })
    }

    /// Reconcile local and remote events for an authenticated user.
    ///
    /// Unowned local events are assigned to the account, every local event is
    /// pushed in one batch, and the remote set is upserted locally by id.
    pub async fn full_resync(&self, user: &User) -> HydrateResult<SyncReport> {
        let account = account_of(Some(user)).ok_or(HydrateError::NoSession)?;

        let local = self.store.events(|e| e.is_visible_to(account)).await?;
        let adopted: Vec<Event> = local
            .iter()
            .filter(|e| e.owner_id.is_none())
            .cloned()
            .map(|e| e.owned_by(account))
            .collect();
        if !adopted.is_empty() {
            self.store
                .save(ChangeSet::new().put_events(adopted.iter().cloned()))
                .await?;
        }

        let outgoing: Vec<Event> = local.into_iter().map(|e| e.owned_by(account)).collect();
        self.remote.batch_upsert_events(account, &outgoing).await?;

        let incoming = self.remote.fetch_events(account).await?;
        let pulled = incoming.len();
        self.store
            .save(ChangeSet::new().put_events(incoming.into_iter().map(|e| e.owned_by(account))))
            .await?;

        let report = SyncReport {
            adopted: adopted.len(),
            pushed: outgoing.len(),
            pulled,
        };
        info!(user_id = %account, ?report, "full resync finished");
        Ok(report)
    }

    /// Final flush before logout, then remove everything scoped to `user`.
    ///
    /// The flush is best effort. The cleanup is retried with a fixed backoff
    /// and the last error is returned once attempts run out.
    pub async fn flush_and_clear(&self, user: &User) -> HydrateResult<()> {
        if let Some(account) = account_of(Some(user)) {
            let owned = self.store.events(|e| e.owner_id == Some(account)).await?;
            if let Err(e) = self.remote.batch_upsert_events(account, &owned).await {
                warn!(user_id = %account, error = %e, "final flush failed");
            }
        }

        let user_id = user.id;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.clear_user(user_id).await;
            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retry.attempts => {
                    debug!(%user_id, attempt, error = %e, "local cleanup failed, retrying");
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(e) => {
                    warn!(%user_id, attempt, error = %e, "local cleanup gave up");
                    return Err(e);
                }
            }
        }
    }

    async fn clear_user(&self, user_id: Uuid) -> HydrateResult<()> {
        let mut store = self.store.lock().await;
        let events = store.fetch_events(&|e: &Event| e.is_visible_to(user_id))?;
        let changes = events
            .iter()
            .fold(ChangeSet::new(), |changes, e| changes.delete_event(e.id))
            .delete_user(user_id);
        store.save(changes)
    }

    /// Ingest every pending quick add as a new event. Returns how many were
    /// ingested.
    pub async fn ingest_intake(
        &self,
        queue: &IntakeQueue,
        user: Option<&User>,
    ) -> HydrateResult<usize> {
        let items = queue.drain()?;
        let count = items.len();
        let mut pushes = Vec::with_capacity(count);
        for item in items {
            pushes.push(self.add_event(user, item.into_event()).await?.wait());
        }
        futures::future::join_all(pushes).await;

        if count > 0 {
            info!(count, "ingested quick adds");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Quality;
    use crate::intake::QuickAdd;
    use crate::remote::RemoteBackend;
    use crate::remote::memory::MemoryBackend;
    use crate::remote::protocol::Credentials;
    use crate::store::{FileStore, LocalStore};
    use crate::user::IdentityKind;
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Arc<MemoryBackend>, Store, EventSync, User) {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let session = backend
            .sign_up(&Credentials::Email {
                email: "s@example.com".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();
        let store = Store::new(FileStore::open(dir.path().join("store.json")).unwrap());
        let sync = EventSync::new(store.clone(), Remote::new(backend.clone()));
        let user = User::authenticated(session.user_id, IdentityKind::Email, session.email);
        store.save(ChangeSet::new().put_user(user.clone())).await.unwrap();
        (dir, backend, store, sync, user)
    }

    #[tokio::test]
    async fn test_add_event_writes_locally_then_pushes() {
        let (_dir, backend, store, sync, user) = setup().await;
        let event = Event::new(Utc::now(), Quality::Good);

        let push = sync.add_event(Some(&user), event.clone()).await.unwrap();
        assert!(store.event(event.id).await.unwrap().is_some());
        push.wait().await;

        let remote = backend.events_of(user.id);
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].owner_id, Some(user.id));
    }

    #[tokio::test]
    async fn test_push_failure_keeps_local_write() {
        let (_dir, backend, store, sync, user) = setup().await;
        backend.set_offline(true);
        let event = Event::new(Utc::now(), Quality::Poor);

        sync.add_event(Some(&user), event.clone()).await.unwrap().wait().await;

        assert!(store.event(event.id).await.unwrap().is_some());
        assert!(backend.events_of(user.id).is_empty());
    }

    #[tokio::test]
    async fn test_guest_events_are_not_pushed() {
        let (_dir, backend, _store, sync, _user) = setup().await;
        let guest = User::guest();

        let push = sync
            .add_event(Some(&guest), Event::new(Utc::now(), Quality::Good))
            .await
            .unwrap();
        assert!(push.is_local_only());
        assert!(backend.upserted_ids().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_event_is_not_found() {
        let (_dir, _backend, _store, sync, user) = setup().await;
        let result = sync
            .update_event(Some(&user), Event::new(Utc::now(), Quality::Good))
            .await;
        assert!(matches!(result, Err(HydrateError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_event_pushes_deletion() {
        let (_dir, backend, store, sync, user) = setup().await;
        let event = Event::new(Utc::now(), Quality::Good);
        sync.add_event(Some(&user), event.clone()).await.unwrap().wait().await;

        sync.delete_event(Some(&user), event.id).await.unwrap().wait().await;

        assert!(store.event(event.id).await.unwrap().is_none());
        assert_eq!(backend.deleted_ids(), vec![event.id]);
        assert!(backend.events_of(user.id).is_empty());
    }

    #[tokio::test]
    async fn test_full_resync_assigns_owner_and_merges() {
        let (_dir, backend, store, sync, user) = setup().await;
        let local = Event::new(Utc::now(), Quality::Good);
        store.save(ChangeSet::new().put_event(local.clone())).await.unwrap();
        let remote_only = Event::new(Utc::now(), Quality::Great).owned_by(user.id);
        backend.seed_events(user.id, [remote_only.clone()]);

        let report = sync.full_resync(&user).await.unwrap();
        assert_eq!(report, SyncReport { adopted: 1, pushed: 1, pulled: 2 });

        let events = store.events(|_| true).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.owner_id == Some(user.id)));
    }

    #[tokio::test]
    async fn test_full_resync_rejects_guest() {
        let (_dir, _backend, _store, sync, _user) = setup().await;
        assert!(matches!(
            sync.full_resync(&User::guest()).await,
            Err(HydrateError::NoSession)
        ));
    }

    #[tokio::test]
    async fn test_flush_and_clear_removes_user_scope() {
        let (_dir, backend, store, sync, user) = setup().await;
        let mine = Event::new(Utc::now(), Quality::Good).owned_by(user.id);
        let theirs = Event::new(Utc::now(), Quality::Good).owned_by(Uuid::new_v4());
        store
            .save(ChangeSet::new().put_event(mine.clone()).put_event(theirs.clone()))
            .await
            .unwrap();

        sync.flush_and_clear(&user).await.unwrap();

        assert!(store.users().await.unwrap().is_empty());
        let left = store.events(|_| true).await.unwrap();
        assert_eq!(left, vec![theirs]);
        assert_eq!(backend.upserted_ids(), vec![mine.id]);
    }

    struct FlakyStore {
        failures_left: u32,
        saves: Arc<std::sync::atomic::AtomicU32>,
    }

    impl LocalStore for FlakyStore {
        fn fetch_users(&self, _: &dyn Fn(&User) -> bool) -> HydrateResult<Vec<User>> {
            Ok(Vec::new())
        }

        fn fetch_events(&self, _: &dyn Fn(&Event) -> bool) -> HydrateResult<Vec<Event>> {
            Ok(Vec::new())
        }

        fn save(&mut self, _: ChangeSet) -> HydrateResult<()> {
            self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(HydrateError::Store("busy".into()));
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_retries_then_gives_up() {
        let backend = Arc::new(MemoryBackend::new());
        let saves = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let store = Store::new(FlakyStore {
            failures_left: 10,
            saves: saves.clone(),
        });
        let sync = EventSync::new(store, Remote::new(backend)).with_retry(RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(50),
        });

        let result = sync.flush_and_clear(&User::guest()).await;
        assert!(matches!(result, Err(HydrateError::Store(_))));
        assert_eq!(saves.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_survives_transient_failure() {
        let backend = Arc::new(MemoryBackend::new());
        let saves = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let store = Store::new(FlakyStore {
            failures_left: 1,
            saves: saves.clone(),
        });
        let sync = EventSync::new(store, Remote::new(backend));

        sync.flush_and_clear(&User::guest()).await.unwrap();
        assert_eq!(saves.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ingest_intake() {
        let (dir, backend, store, sync, user) = setup().await;
        let queue = IntakeQueue::new(dir.path().join("intake"));
        let item = QuickAdd::new(Utc::now(), Quality::Good);
        queue.enqueue(&item).unwrap();

        assert_eq!(sync.ingest_intake(&queue, Some(&user)).await.unwrap(), 1);
        assert!(store.event(item.id).await.unwrap().is_some());
        assert_eq!(backend.upserted_ids(), vec![item.id]);
        assert_eq!(sync.ingest_intake(&queue, Some(&user)).await.unwrap(), 0);
    }
}
