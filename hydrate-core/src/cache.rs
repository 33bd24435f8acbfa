//! Per-identity snapshot cache for aggregate reads.
//!
//! Layout: `<root>/<namespace>/<section>/<range key>.json`. Entries never
//! expire; a successful remote fetch for the same key replaces the file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::HydrateResult;
use crate::period::PeriodRange;
use crate::section::Section;
use crate::user::User;

/// Which identity a cache entry belongs to. Buckets are never shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    /// No current user at all.
    Anonymous,
    Guest(Uuid),
    User(Uuid),
}

impl CacheNamespace {
    pub fn for_user(user: Option<&User>) -> Self {
        match user {
            None => CacheNamespace::Anonymous,
            Some(u) if u.is_guest() => CacheNamespace::Guest(u.id),
            Some(u) => CacheNamespace::User(u.id),
        }
    }

    /// The user whose events feed this namespace's local derivations.
    pub fn owner_id(&self) -> Option<Uuid> {
        match self {
            CacheNamespace::Anonymous => None,
            CacheNamespace::Guest(id) | CacheNamespace::User(id) => Some(*id),
        }
    }

    fn dir_name(&self) -> String {
        match self {
            CacheNamespace::Anonymous => "anonymous".to_string(),
            CacheNamespace::Guest(id) => format!("guest-{id}"),
            CacheNamespace::User(id) => format!("user-{id}"),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Snapshot<T> {
    saved_at: DateTime<Utc>,
    data: T,
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DiskCache { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, ns: &CacheNamespace, section: Section, range: &PeriodRange) -> PathBuf {
        self.root
            .join(ns.dir_name())
            .join(section.as_str())
            .join(format!("{}.json", range.cache_key()))
    }

    /// Replace the entry for this key. Readers see either the old or the new
    /// file, never a partial one.
    pub fn save<T: Serialize>(
        &self,
        ns: &CacheNamespace,
        section: Section,
        range: &PeriodRange,
        value: &T,
    ) -> HydrateResult<()> {
        let path = self.path_for(ns, section, range);
        let Some(dir) = path.parent() else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)?;

        let snapshot = Snapshot {
            saved_at: Utc::now(),
            data: value,
        };
        let content = serde_json::to_vec(&snapshot)?;

        let temp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        std::fs::write(&temp, content)?;
        if let Err(e) = std::fs::rename(&temp, &path) {
            let _ = std::fs::remove_file(&temp);
            return Err(e.into());
        }

        debug!(namespace = %ns.dir_name(), %section, key = %range.cache_key(), "cache entry saved");
        Ok(())
    }

    /// Read the entry for this key. Missing and undecodable files are both `None`.
    pub fn load<T: DeserializeOwned>(
        &self,
        ns: &CacheNamespace,
        section: Section,
        range: &PeriodRange,
    ) -> Option<T> {
        let path = self.path_for(ns, section, range);
        let content = std::fs::read(&path).ok()?;

        match serde_json::from_slice::<Snapshot<T>>(&content) {
            Ok(snapshot) => Some(snapshot.data),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt cache entry");
                None
            }
        }
    }

    /// Drop every entry of one identity.
    pub fn clear_namespace(&self, ns: &CacheNamespace) -> HydrateResult<()> {
        let dir = self.root.join(ns.dir_name());
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}
