//! One-time guest to account linking.
//!
//! When a guest with local events authenticates, the user picks one of two
//! resolutions:
//!
//! - **Merge**: upload the guest's events and profile, then replace the local
//!   events with the account's canonical remote set.
//! - **Skip**: discard the guest's events and adopt the account's remote
//!   profile and events as local truth.
//!
//! Both end with a single local store replacement bracketed by reset signals.
//! Each link is keyed by the id of the sign-in that created it: one decision
//! runs at a time, and a finished link is never re-run.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{HydrateError, HydrateResult};
use crate::event::Event;
use crate::remote::Remote;
use crate::remote::protocol::RemoteSession;
use crate::signal::SignalBus;
use crate::store::{ChangeSet, Store};
use crate::user::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDecision {
    Merge,
    Skip,
}

impl fmt::Display for LinkDecision {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LinkDecision::Merge => write!(f, "merge"),
            LinkDecision::Skip => write!(f, "skip"),
        }
    }
}

/// A sign-in waiting for the user's merge/skip decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLink {
    /// Id of the sign-in that produced this link.
    pub id: Uuid,
    pub guest: User,
    pub session: RemoteSession,
    /// Guest events that would be merged.
    pub guest_events: usize,
}

impl PendingLink {
    pub fn account_id(&self) -> Uuid {
        self.session.user_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome {
    Linked(User),
    /// The link had already finished; nothing was re-run.
    AlreadyResolved(User),
}

impl LinkOutcome {
    pub fn user(&self) -> &User {
        match self {
            LinkOutcome::Linked(user) | LinkOutcome::AlreadyResolved(user) => user,
        }
    }
}

enum LinkStatus {
    Pending,
    InProgress,
    Done(User),
}

pub struct AccountLinker {
    store: Store,
    remote: Remote,
    signals: SignalBus,
    links: Mutex<HashMap<Uuid, LinkStatus>>,
}

impl AccountLinker {
    pub fn new(store: Store, remote: Remote, signals: SignalBus) -> Self {
        AccountLinker {
            store,
            remote,
            signals,
            links: Mutex::new(HashMap::new()),
        }
    }

    fn with_links<R>(&self, f: impl FnOnce(&mut HashMap<Uuid, LinkStatus>) -> R) -> R {
        let mut guard = match self.links.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Local events a guest would bring into an account.
    pub async fn guest_events(&self, guest: &User) -> HydrateResult<Vec<Event>> {
        self.store.events(|e| e.is_visible_to(guest.id)).await
    }

    /// Whether signing `guest` into an account needs a merge/skip decision.
    pub async fn needs_link(&self, guest: &User) -> HydrateResult<bool> {
        Ok(guest.is_guest() && !self.guest_events(guest).await?.is_empty())
    }

    /// Register a link for a fresh sign-in.
    pub async fn begin(&self, guest: User, session: RemoteSession) -> HydrateResult<PendingLink> {
        let guest_events = self.guest_events(&guest).await?.len();
        let link = PendingLink {
            id: Uuid::new_v4(),
            guest,
            session,
            guest_events,
        };
        self.with_links(|links| links.insert(link.id, LinkStatus::Pending));
        debug!(link_id = %link.id, guest_events, "account link pending");
        Ok(link)
    }

    /// Run `decision` for `link`.
    ///
    /// Fails with [`HydrateError::LinkInProgress`] while another decision for
    /// the same link is running, and with [`HydrateError::UnknownLink`] for a
    /// link that was never begun or has been abandoned. On any other failure
    /// the link goes back to pending and may be retried or abandoned.
    pub async fn resolve(
        &self,
        link: &PendingLink,
        decision: LinkDecision,
    ) -> HydrateResult<LinkOutcome> {
        let claimed = self.with_links(|links| {
            let Some(status) = links.get_mut(&link.id) else {
                return Err(HydrateError::UnknownLink(link.id));
            };
            match status {
                LinkStatus::InProgress => Err(HydrateError::LinkInProgress),
                LinkStatus::Done(user) => Ok(Some(user.clone())),
                LinkStatus::Pending => {
                    *status = LinkStatus::InProgress;
                    Ok(None)
                }
            }
        })?;
        if let Some(user) = claimed {
            return Ok(LinkOutcome::AlreadyResolved(user));
        }

        let result = match decision {
            LinkDecision::Merge => self.merge(link).await,
            LinkDecision::Skip => self.skip(link).await,
        };

        self.with_links(|links| {
            let status = match &result {
                Ok(user) => LinkStatus::Done(user.clone()),
                Err(_) => LinkStatus::Pending,
            };
            links.insert(link.id, status);
        });

        let user = result?;
        info!(link_id = %link.id, %decision, user_id = %user.id, "account linked");
        Ok(LinkOutcome::Linked(user))
    }

    /// Drop a pending link. Fails if a decision is running.
    pub fn abandon(&self, link: &PendingLink) -> HydrateResult<()> {
        self.with_links(|links| match links.get(&link.id) {
            Some(LinkStatus::InProgress) => Err(HydrateError::LinkInProgress),
            _ => {
                links.remove(&link.id);
                Ok(())
            }
        })
    }

    async fn merge(&self, link: &PendingLink) -> HydrateResult<User> {
        let account = link.account_id();

        let outgoing: Vec<Event> = self
            .guest_events(&link.guest)
            .await?
            .into_iter()
            .map(|e| e.owned_by(account))
            .collect();
        self.remote.batch_upsert_events(account, &outgoing).await?;

        let profile = link
            .guest
            .adopted_by(account, link.session.kind, link.session.email.clone());
        self.remote.put_profile(&profile).await?;

        let canonical = self.remote.fetch_events(account).await?;
        debug!(
            uploaded = outgoing.len(),
            canonical = canonical.len(),
            "merge fetched canonical events"
        );
        self.replace_local(link, profile, canonical).await
    }

    async fn skip(&self, link: &PendingLink) -> HydrateResult<User> {
        let account = link.account_id();

        let profile = match self.remote.fetch_profile(account).await? {
            Some(profile) => profile,
            None => {
                let baseline =
                    User::authenticated(account, link.session.kind, link.session.email.clone());
                self.remote.put_profile(&baseline).await?;
                baseline
            }
        };

        let canonical = self.remote.fetch_events(account).await?;
        self.replace_local(link, profile, canonical).await
    }

    /// Swap the local events and user for the account's, in one save.
    async fn replace_local(
        &self,
        link: &PendingLink,
        profile: User,
        canonical: Vec<Event>,
    ) -> HydrateResult<User> {
        let account = link.account_id();
        let changes = ChangeSet::new()
            .delete_all_events()
            .put_events(canonical.into_iter().map(|e| e.owned_by(account)))
            .delete_user(link.guest.id)
            .put_user(profile.clone());

        let reset = self.signals.begin_reset();
        self.store.save(changes).await?;
        reset.finish();
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Quality;
    use crate::remote::RemoteBackend;
    use crate::remote::memory::{Failure, MemoryBackend};
    use crate::remote::protocol::Credentials;
    use crate::signal::Signal;
    use crate::store::FileStore;
    use chrono::Utc;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        backend: Arc<MemoryBackend>,
        store: Store,
        signals: SignalBus,
        linker: AccountLinker,
        guest: User,
        session: RemoteSession,
    }

    async fn harness(guest_events: usize) -> Harness {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(MemoryBackend::new());
        let store = Store::new(FileStore::open(dir.path().join("store.json")).unwrap());
        let signals = SignalBus::new();
        let linker =
            AccountLinker::new(store.clone(), Remote::new(backend.clone()), signals.clone());

        let guest = User::guest();
        let events = (0..guest_events).map(|_| Event::new(Utc::now(), Quality::Good));
        store
            .save(ChangeSet::new().put_user(guest.clone()).put_events(events))
            .await
            .unwrap();

        let session = backend
            .sign_up(&Credentials::Email {
                email: "l@example.com".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();

        Harness {
            _dir: dir,
            backend,
            store,
            signals,
            linker,
            guest,
            session,
        }
    }

    async fn local_ids(store: &Store) -> BTreeSet<Uuid> {
        store.events(|_| true).await.unwrap().into_iter().map(|e| e.id).collect()
    }

    #[tokio::test]
    async fn test_needs_link_only_with_guest_events() {
        let h = harness(0).await;
        assert!(!h.linker.needs_link(&h.guest).await.unwrap());

        let h = harness(2).await;
        assert!(h.linker.needs_link(&h.guest).await.unwrap());
    }

    #[tokio::test]
    async fn test_merge_uploads_and_mirrors_remote() {
        let h = harness(3).await;
        let existing = Event::new(Utc::now(), Quality::Great).owned_by(h.session.user_id);
        h.backend.seed_events(h.session.user_id, [existing.clone()]);
        let guest_ids = local_ids(&h.store).await;

        let link = h.linker.begin(h.guest.clone(), h.session.clone()).await.unwrap();
        assert_eq!(link.guest_events, 3);
        let outcome = h.linker.resolve(&link, LinkDecision::Merge).await.unwrap();

        let user = outcome.user();
        assert_eq!(user.id, h.session.user_id);
        assert!(!user.is_guest());
        assert_eq!(h.backend.upserted_ids().into_iter().collect::<BTreeSet<_>>(), guest_ids);

        let mut expected = guest_ids.clone();
        expected.insert(existing.id);
        assert_eq!(local_ids(&h.store).await, expected);

        let users = h.store.users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, h.session.user_id);
    }

    #[tokio::test]
    async fn test_skip_discards_guest_events() {
        let h = harness(2).await;
        let existing = Event::new(Utc::now(), Quality::Poor).owned_by(h.session.user_id);
        h.backend.seed_events(h.session.user_id, [existing.clone()]);

        let link = h.linker.begin(h.guest.clone(), h.session.clone()).await.unwrap();
        h.linker.resolve(&link, LinkDecision::Skip).await.unwrap();

        assert!(h.backend.upserted_ids().is_empty());
        assert_eq!(local_ids(&h.store).await, BTreeSet::from([existing.id]));
        assert!(h.backend.profile_of(h.session.user_id).is_some());
    }

    #[tokio::test]
    async fn test_resolved_link_is_not_rerun() {
        let h = harness(1).await;
        let link = h.linker.begin(h.guest.clone(), h.session.clone()).await.unwrap();
        h.linker.resolve(&link, LinkDecision::Merge).await.unwrap();

        let again = h.linker.resolve(&link, LinkDecision::Skip).await.unwrap();
        assert!(matches!(again, LinkOutcome::AlreadyResolved(_)));
        assert_eq!(h.backend.upserted_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_link_cannot_be_resolved() {
        let h = harness(1).await;
        let link = h.linker.begin(h.guest.clone(), h.session.clone()).await.unwrap();
        h.linker.abandon(&link).unwrap();

        let result = h.linker.resolve(&link, LinkDecision::Merge).await;
        assert!(matches!(result, Err(HydrateError::UnknownLink(id)) if id == link.id));
        assert!(h.backend.upserted_ids().is_empty());
        assert!(h.store.users().await.unwrap().iter().any(|u| u.id == h.guest.id));
    }

    #[tokio::test]
    async fn test_link_never_begun_is_rejected() {
        let h = harness(1).await;
        let link = PendingLink {
            id: Uuid::new_v4(),
            guest: h.guest.clone(),
            session: h.session.clone(),
            guest_events: 1,
        };

        let result = h.linker.resolve(&link, LinkDecision::Skip).await;
        assert!(matches!(result, Err(HydrateError::UnknownLink(_))));
        assert_eq!(local_ids(&h.store).await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_decision_is_rejected() {
        let h = harness(1).await;
        h.backend.set_latency(Some(std::time::Duration::from_millis(50)));
        let link = h.linker.begin(h.guest.clone(), h.session.clone()).await.unwrap();

        let (first, second) = tokio::join!(
            h.linker.resolve(&link, LinkDecision::Merge),
            h.linker.resolve(&link, LinkDecision::Skip),
        );
        assert!(first.is_ok());
        assert!(matches!(second, Err(HydrateError::LinkInProgress)));
    }

    #[tokio::test]
    async fn test_failed_merge_commits_nothing_and_can_retry() {
        let h = harness(2).await;
        let before = local_ids(&h.store).await;
        let mut rx = h.signals.subscribe();
        let link = h.linker.begin(h.guest.clone(), h.session.clone()).await.unwrap();

        h.backend.set_failure(Some(Failure::ServerError));
        assert!(h.linker.resolve(&link, LinkDecision::Merge).await.is_err());
        assert_eq!(local_ids(&h.store).await, before);
        assert!(rx.try_recv().is_err());

        h.backend.set_failure(None);
        let outcome = h.linker.resolve(&link, LinkDecision::Merge).await.unwrap();
        assert!(matches!(outcome, LinkOutcome::Linked(_)));
        assert_eq!(local_ids(&h.store).await, before);
        assert_eq!(rx.try_recv().unwrap(), Signal::StoreWillReset);
    }
}
