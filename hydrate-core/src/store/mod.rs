//! Local store for users and events.
//!
//! The local store is authoritative: UI mutations land here first and the
//! backend is updated afterwards. Every [`LocalStore::save`] applies a whole
//! [`ChangeSet`] or nothing.

mod file;

pub use file::FileStore;

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::HydrateResult;
use crate::event::Event;
use crate::user::User;

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Insert or replace by id.
    PutUser(User),
    DeleteUser(Uuid),
    /// Insert or replace by id. Never creates a second record for the same id.
    PutEvent(Event),
    DeleteEvent(Uuid),
    DeleteAllEvents,
}

/// An ordered batch of changes, applied atomically by [`LocalStore::save`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_user(mut self, user: User) -> Self {
        self.changes.push(Change::PutUser(user));
        self
    }

    pub fn delete_user(mut self, id: Uuid) -> Self {
        self.changes.push(Change::DeleteUser(id));
        self
    }

    pub fn put_event(mut self, event: Event) -> Self {
        self.changes.push(Change::PutEvent(event));
        self
    }

    pub fn put_events(mut self, events: impl IntoIterator<Item = Event>) -> Self {
        self.changes.extend(events.into_iter().map(Change::PutEvent));
        self
    }

    pub fn delete_event(mut self, id: Uuid) -> Self {
        self.changes.push(Change::DeleteEvent(id));
        self
    }

    pub fn delete_all_events(mut self) -> Self {
        self.changes.push(Change::DeleteAllEvents);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }
}

/// Transactional object store.
pub trait LocalStore: Send {
    fn fetch_users(&self, predicate: &dyn Fn(&User) -> bool) -> HydrateResult<Vec<User>>;

    fn fetch_events(&self, predicate: &dyn Fn(&Event) -> bool) -> HydrateResult<Vec<Event>>;

    /// Apply every change or none of them.
    fn save(&mut self, changes: ChangeSet) -> HydrateResult<()>;
}

/// Shared handle to the single local store.
///
/// The mutex is the serialization domain for local reads and writes: a
/// read-modify-write done while holding [`Store::lock`] cannot interleave with
/// another one.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Box<dyn LocalStore>>>,
}

impl Store {
    pub fn new(store: impl LocalStore + 'static) -> Self {
        Store {
            inner: Arc::new(Mutex::new(Box::new(store))),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn LocalStore>> {
        self.inner.lock().await
    }

    pub async fn users(&self) -> HydrateResult<Vec<User>> {
        self.lock().await.fetch_users(&|_| true)
    }

    pub async fn events(&self, predicate: impl Fn(&Event) -> bool) -> HydrateResult<Vec<Event>> {
        self.lock().await.fetch_events(&predicate)
    }

    pub async fn event(&self, id: Uuid) -> HydrateResult<Option<Event>> {
        let mut found = self.lock().await.fetch_events(&|e| e.id == id)?;
        Ok(found.pop())
    }

    pub async fn save(&self, changes: ChangeSet) -> HydrateResult<()> {
        self.lock().await.save(changes)
    }
}
