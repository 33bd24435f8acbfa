//! The current-user state machine.
//!
//! Every transition runs behind one async mutex, so transitions never
//! interleave. Session signals are stamped with the epoch current when they
//! were observed; sign-out bumps the epoch, so a signal observed before or
//! during a sign-out can never bring the removed user back.
//!
//! A session check that fails only because the backend is unreachable never
//! downgrades an authenticated user.
//!
//! A pending account link is part of the state: while one waits for its
//! decision, session checks leave the state alone, the decision runs under the
//! transition lock, and sign-out abandons it.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::cache::CacheNamespace;
use crate::error::{HydrateError, HydrateResult};
use crate::fetcher::Fetcher;
use crate::linking::{AccountLinker, LinkDecision, LinkOutcome, PendingLink};
use crate::remote::Remote;
use crate::remote::protocol::{Credentials, RemoteSession};
use crate::store::{ChangeSet, Store};
use crate::sync::EventSync;
use crate::user::{self, User};

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Unauthenticated,
    /// A sign-in is running, or waiting for a link decision.
    Authenticating,
    Authenticated(User),
    Guest(User),
    Error(String),
}

impl AuthState {
    pub fn user(&self) -> Option<&User> {
        match self {
            AuthState::Authenticated(user) | AuthState::Guest(user) => Some(user),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }

    fn for_local_user(user: User) -> Self {
        if user.is_guest() {
            AuthState::Guest(user)
        } else {
            AuthState::Authenticated(user)
        }
    }
}

/// A "session changed" notification from the backend.
#[derive(Debug, Clone)]
pub struct SessionSignal {
    epoch: u64,
    pub session: Option<RemoteSession>,
}

impl SessionSignal {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[derive(Debug)]
pub enum SignInOutcome {
    Authenticated(User),
    /// The guest has local events; call [`IdentityReconciler::resolve_link`].
    NeedsLink(PendingLink),
}

pub struct IdentityReconciler {
    store: Store,
    remote: Remote,
    sync: EventSync,
    fetcher: Fetcher,
    linker: AccountLinker,
    transition: Mutex<()>,
    epoch: AtomicU64,
    state: watch::Sender<AuthState>,
    pending: StdMutex<Option<PendingLink>>,
}

impl IdentityReconciler {
    pub fn new(
        store: Store,
        remote: Remote,
        sync: EventSync,
        fetcher: Fetcher,
        linker: AccountLinker,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::Unauthenticated);
        IdentityReconciler {
            store,
            remote,
            sync,
            fetcher,
            linker,
            transition: Mutex::new(()),
            epoch: AtomicU64::new(0),
            state,
            pending: StdMutex::new(None),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().user().cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub fn linker(&self) -> &AccountLinker {
        &self.linker
    }

    /// The link waiting for a merge/skip decision, if any.
    pub fn pending_link(&self) -> Option<PendingLink> {
        self.with_pending(|pending| pending.clone())
    }

    fn with_pending<R>(&self, f: impl FnOnce(&mut Option<PendingLink>) -> R) -> R {
        let mut guard = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn is_pending(&self, link: &PendingLink) -> bool {
        self.with_pending(|pending| pending.as_ref().is_some_and(|p| p.id == link.id))
    }

    fn set_state(&self, next: AuthState) {
        debug!(state = ?next, "auth state");
        self.state.send_replace(next);
    }

    /// Resolve the current user at start-up or on foreground.
    pub async fn restore(&self) -> AuthState {
        let _transition = self.transition.lock().await;
        self.check_session_locked().await
    }

    /// Re-check the backend session.
    pub async fn check_session(&self) -> AuthState {
        let _transition = self.transition.lock().await;
        self.check_session_locked().await
    }

    async fn check_session_locked(&self) -> AuthState {
        let current = self.state();
        if current == AuthState::Authenticating && self.pending_link().is_some() {
            debug!("account link pending, keeping state");
            return current;
        }

        let next = match self.remote.current_session().await {
            Ok(Some(session)) => match self.reopen_link(&session).await {
                Ok(Some(link)) => {
                    self.with_pending(|pending| *pending = Some(link));
                    AuthState::Authenticating
                }
                Ok(None) => AuthState::Authenticated(self.local_profile(&session).await),
                Err(e) => {
                    warn!(error = %e, "failed to inspect local users for a pending link");
                    AuthState::Error(e.to_string())
                }
            },
            Ok(None) => self.local_fallback().await,
            Err(e) if e.is_connectivity() && current.is_authenticated() => {
                debug!(error = %e, "session check offline, keeping current user");
                current
            }
            Err(e) if e.is_connectivity() => self.local_fallback().await,
            Err(e) if current.is_authenticated() => {
                warn!(error = %e, "session check failed, keeping current user");
                current
            }
            Err(e) => {
                warn!(error = %e, "session check failed");
                match self.local_fallback().await {
                    AuthState::Unauthenticated => AuthState::Error(e.to_string()),
                    resolved => resolved,
                }
            }
        };
        self.set_state(next.clone());
        next
    }

    /// The most recently updated local user, or unauthenticated.
    async fn local_fallback(&self) -> AuthState {
        match self.store.users().await {
            Ok(users) => user::most_recent(users)
                .map(AuthState::for_local_user)
                .unwrap_or(AuthState::Unauthenticated),
            Err(e) => AuthState::Error(e.to_string()),
        }
    }

    /// A link for a restored session whose account has no local record while
    /// a guest still holds local events. Adopting the session directly would
    /// hand the guest's events to the account without a decision.
    async fn reopen_link(&self, session: &RemoteSession) -> HydrateResult<Option<PendingLink>> {
        let users = self.store.users().await?;
        if users.iter().any(|u| u.id == session.user_id) {
            return Ok(None);
        }
        let Some(guest) = user::most_recent(users.into_iter().filter(User::is_guest)) else {
            return Ok(None);
        };
        if !self.linker.needs_link(&guest).await? {
            return Ok(None);
        }

        let link = self.linker.begin(guest, session.clone()).await?;
        info!(link_id = %link.id, "restored session needs an account link decision");
        Ok(Some(link))
    }

    /// The local record for a session's account, or a baseline profile.
    async fn local_profile(&self, session: &RemoteSession) -> User {
        let local = self
            .store
            .users()
            .await
            .ok()
            .and_then(|users| users.into_iter().find(|u| u.id == session.user_id));
        local.unwrap_or_else(|| {
            User::authenticated(session.user_id, session.kind, session.email.clone())
        })
    }

    /// Stamp a session observation with the current epoch. The backend is
    /// asked after stamping, so a sign-out that starts while the request is in
    /// flight invalidates the signal.
    pub async fn observe_session(&self) -> HydrateResult<SessionSignal> {
        let epoch = self.epoch();
        let session = self.remote.current_session().await?;
        Ok(SessionSignal { epoch, session })
    }

    /// A signal for a session reported by some other channel.
    pub fn session_signal(&self, session: Option<RemoteSession>) -> SessionSignal {
        SessionSignal {
            epoch: self.epoch(),
            session,
        }
    }

    /// Apply a session signal. Returns whether it was accepted.
    ///
    /// Signals from an earlier epoch are dropped. An absent session never
    /// downgrades the current state on its own; [`Self::check_session`]
    /// decides that.
    pub async fn deliver(&self, signal: SessionSignal) -> bool {
        let _transition = self.transition.lock().await;

        let epoch = self.epoch();
        if signal.epoch != epoch {
            debug!(signal_epoch = signal.epoch, epoch, "dropping stale session signal");
            return false;
        }

        let Some(session) = signal.session else {
            return true;
        };
        match self.state() {
            AuthState::Authenticated(user) if user.id == session.user_id => {}
            AuthState::Authenticating => {}
            _ => {
                let user = self.local_profile(&session).await;
                self.set_state(AuthState::Authenticated(user));
            }
        }
        true
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> HydrateResult<SignInOutcome> {
        let _transition = self.transition.lock().await;
        let previous = self.sign_in_origin();
        self.set_state(AuthState::Authenticating);

        match self.remote.sign_in(credentials).await {
            Ok(session) => self.establish(session, previous, false).await,
            Err(e) => Err(self.sign_in_failed(previous, e)),
        }
    }

    pub async fn sign_up(&self, credentials: &Credentials) -> HydrateResult<SignInOutcome> {
        let _transition = self.transition.lock().await;
        let previous = self.sign_in_origin();
        self.set_state(AuthState::Authenticating);

        match self.remote.sign_up(credentials).await {
            Ok(session) => self.establish(session, previous, true).await,
            Err(e) => Err(self.sign_in_failed(previous, e)),
        }
    }

    /// The state a new sign-in starts from. A pending link is dropped and its
    /// guest is the starting point again, so the new sign-in asks for its own
    /// decision.
    fn sign_in_origin(&self) -> AuthState {
        match self.with_pending(Option::take) {
            Some(link) => {
                if let Err(e) = self.linker.abandon(&link) {
                    warn!(link_id = %link.id, error = %e, "failed to drop pending link");
                }
                AuthState::Guest(link.guest)
            }
            None => self.state(),
        }
    }

    fn sign_in_failed(&self, previous: AuthState, e: HydrateError) -> HydrateError {
        if e.is_connectivity() {
            self.set_state(previous);
        } else {
            self.set_state(AuthState::Error(e.to_string()));
        }
        e
    }

    async fn establish(
        &self,
        session: RemoteSession,
        previous: AuthState,
        created: bool,
    ) -> HydrateResult<SignInOutcome> {
        if let AuthState::Guest(guest) = &previous {
            if self.linker.needs_link(guest).await? {
                let link = self.linker.begin(guest.clone(), session).await?;
                info!(link_id = %link.id, "guest has local events, waiting for link decision");
                self.with_pending(|pending| *pending = Some(link.clone()));
                return Ok(SignInOutcome::NeedsLink(link));
            }
            self.store.save(ChangeSet::new().delete_user(guest.id)).await?;
        }

        let mut user = self.local_profile(&session).await;
        match self.remote.fetch_profile(session.user_id).await {
            Ok(Some(remote)) => user = remote,
            Ok(None) if created => {
                if let Err(e) = self.remote.put_profile(&user).await {
                    warn!(error = %e, "failed to push baseline profile");
                }
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "profile fetch failed, using local profile"),
        }
        self.store.save(ChangeSet::new().put_user(user.clone())).await?;

        if let Err(e) = self.sync.full_resync(&user).await {
            warn!(error = %e, "resync after sign-in failed");
        }

        info!(user_id = %user.id, "signed in");
        self.set_state(AuthState::Authenticated(user.clone()));
        Ok(SignInOutcome::Authenticated(user))
    }

    /// Run the user's decision for a pending link and finish the sign-in.
    ///
    /// The decision holds the transition lock, so a sign-out waits for it and
    /// then clears what it committed. On failure the state stays
    /// [`AuthState::Authenticating`]; retry or call [`Self::abandon_link`].
    /// A link that is no longer pending resolves only to the account it
    /// already produced.
    pub async fn resolve_link(
        &self,
        link: &PendingLink,
        decision: LinkDecision,
    ) -> HydrateResult<User> {
        let _transition = self.transition.lock().await;
        if !self.is_pending(link) {
            return match self.state() {
                AuthState::Authenticated(user) if user.id == link.account_id() => Ok(user),
                _ => {
                    debug!(link_id = %link.id, "link is no longer pending");
                    Err(HydrateError::UnknownLink(link.id))
                }
            };
        }

        let outcome = self.linker.resolve(link, decision).await?;
        self.with_pending(|pending| *pending = None);
        let user = outcome.user().clone();
        if let LinkOutcome::Linked(_) = outcome {
            self.fetcher.invalidate(&CacheNamespace::Guest(link.guest.id));
        }
        self.set_state(AuthState::Authenticated(user.clone()));
        Ok(user)
    }

    /// Give up on a pending link: end the remote session and return to the
    /// guest.
    pub async fn abandon_link(&self, link: &PendingLink) -> HydrateResult<()> {
        let _transition = self.transition.lock().await;
        if !self.is_pending(link) {
            return Err(HydrateError::UnknownLink(link.id));
        }
        self.linker.abandon(link)?;
        self.with_pending(|pending| *pending = None);
        if let Err(e) = self.remote.sign_out().await {
            warn!(error = %e, "remote sign-out failed while abandoning link");
        }
        self.set_state(AuthState::Guest(link.guest.clone()));
        Ok(())
    }

    /// Adopt the existing local guest, or create one. A pending link is
    /// abandoned.
    pub async fn continue_as_guest(&self) -> HydrateResult<User> {
        let _transition = self.transition.lock().await;
        if let Some(link) = self.with_pending(Option::take) {
            self.linker.abandon(&link)?;
            if let Err(e) = self.remote.sign_out().await {
                warn!(error = %e, "remote sign-out failed while abandoning link");
            }
            self.set_state(AuthState::Guest(link.guest.clone()));
            return Ok(link.guest);
        }
        if let AuthState::Guest(guest) = self.state() {
            return Ok(guest);
        }

        let existing = self.store.users().await?.into_iter().filter(User::is_guest);
        let guest = match user::most_recent(existing) {
            Some(guest) => guest,
            None => {
                let guest = User::guest();
                self.store.save(ChangeSet::new().put_user(guest.clone())).await?;
                guest
            }
        };
        self.set_state(AuthState::Guest(guest.clone()));
        Ok(guest)
    }

    /// Sign out.
    ///
    /// The epoch is bumped and the in-memory user cleared before anything
    /// touches the network. Local cleanup is retried; its final error is
    /// returned, but the user stays signed out either way.
    ///
    /// A pending link is abandoned. Nothing of its account was committed
    /// locally, so the guest and its events stay for the next restore.
    pub async fn sign_out(&self) -> HydrateResult<()> {
        let _transition = self.transition.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);

        if let Some(link) = self.with_pending(Option::take) {
            info!(link_id = %link.id, "sign-out abandons pending account link");
            if let Err(e) = self.linker.abandon(&link) {
                warn!(link_id = %link.id, error = %e, "failed to drop pending link");
            }
        }

        let previous = self.state.send_replace(AuthState::Unauthenticated);
        let cleanup = match previous.user() {
            Some(user) => {
                self.fetcher.invalidate(&CacheNamespace::for_user(Some(user)));
                self.sync.flush_and_clear(user).await
            }
            None => Ok(()),
        };

        if let Err(e) = self.remote.sign_out().await {
            warn!(error = %e, "remote sign-out failed");
        }

        info!("signed out");
        cleanup
    }
}
