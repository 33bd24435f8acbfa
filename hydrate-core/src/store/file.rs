//! JSON snapshot implementation of the local store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{Change, ChangeSet, LocalStore};
use crate::error::{HydrateError, HydrateResult};
use crate::event::Event;
use crate::user::User;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    users: BTreeMap<Uuid, User>,
    #[serde(default)]
    events: BTreeMap<Uuid, Event>,
}

impl StoreData {
    fn apply(&mut self, change: Change) {
        match change {
            Change::PutUser(user) => {
                self.users.insert(user.id, user);
            }
            Change::DeleteUser(id) => {
                self.users.remove(&id);
            }
            Change::PutEvent(event) => {
                self.events.insert(event.id, event);
            }
            Change::DeleteEvent(id) => {
                self.events.remove(&id);
            }
            Change::DeleteAllEvents => self.events.clear(),
        }
    }
}

/// The whole store lives in one JSON file. Each save writes a temp file and
/// renames it over the old one, so a crash leaves either the previous or the
/// new snapshot on disk.
pub struct FileStore {
    path: PathBuf,
    data: StoreData,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> HydrateResult<Self> {
        let path = path.into();

        let data = if path.exists() {
            let content = std::fs::read(&path)?;
            serde_json::from_slice(&content).map_err(|e| {
                HydrateError::Store(format!("Failed to parse {}: {e}", path.display()))
            })?
        } else {
            StoreData::default()
        };

        Ok(FileStore { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, data: &StoreData) -> HydrateResult<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let temp = self.path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(data)?;
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl LocalStore for FileStore {
    fn fetch_users(&self, predicate: &dyn Fn(&User) -> bool) -> HydrateResult<Vec<User>> {
        Ok(self.data.users.values().filter(|u| predicate(u)).cloned().collect())
    }

    fn fetch_events(&self, predicate: &dyn Fn(&Event) -> bool) -> HydrateResult<Vec<Event>> {
        let mut events: Vec<Event> = self
            .data
            .events
            .values()
            .filter(|e| predicate(e))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    fn save(&mut self, changes: ChangeSet) -> HydrateResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let count = changes.changes().len();
        let mut next = self.data.clone();
        for change in changes.changes().iter().cloned() {
            next.apply(change);
        }

        self.write(&next)?;
        self.data = next;

        debug!(changes = count, path = %self.path.display(), "local store saved");
        Ok(())
    }
}
