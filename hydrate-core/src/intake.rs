//! Cross-process quick-add queue.
//!
//! A companion process drops one JSON file per pending event into the intake
//! directory. The core drains the directory once at start-up.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::HydrateResult;
use crate::event::{Event, Quality};

/// A pending event recorded outside the main process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickAdd {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_quality")]
    pub quality: Quality,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

fn default_quality() -> Quality {
    Quality::DEFAULT
}

impl QuickAdd {
    pub fn new(timestamp: DateTime<Utc>, quality: Quality) -> Self {
        QuickAdd {
            id: Uuid::new_v4(),
            timestamp,
            quality,
            note: None,
        }
    }

    /// The event keeps the quick-add id, so ingesting twice is an upsert.
    pub fn into_event(self) -> Event {
        let mut event = Event::new(self.timestamp, self.quality);
        event.id = self.id;
        event.note = self.note;
        event
    }
}

pub struct IntakeQueue {
    dir: PathBuf,
}

impl IntakeQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        IntakeQueue { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn enqueue(&self, item: &QuickAdd) -> HydrateResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        // Names sort in enqueue order.
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.9f");
        let path = self.dir.join(format!("{stamp}-{}.json", item.id));
        let temp = self.dir.join(format!(".{}.tmp", item.id));

        std::fs::write(&temp, serde_json::to_vec(item)?)?;
        std::fs::rename(&temp, &path)?;
        debug!(id = %item.id, "quick add enqueued");
        Ok(path)
    }

    /// Take every pending item and clear the queue.
    ///
    /// Each file is claimed by renaming before it is read, so two drains
    /// never return the same item. Unreadable files are dropped.
    pub fn drain(&self) -> HydrateResult<Vec<QuickAdd>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut pending: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        pending.sort();

        let mut items = Vec::with_capacity(pending.len());
        for path in pending {
            let claimed = path.with_extension("claimed");
            if std::fs::rename(&path, &claimed).is_err() {
                continue;
            }

            let parsed = std::fs::read(&claimed)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<QuickAdd>(&bytes).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(item) => items.push(item),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "dropping unreadable quick add")
                }
            }
            std::fs::remove_file(&claimed)?;
        }

        Ok(items)
    }
}
