//! Persists the backend session between runs.

use std::path::{Path, PathBuf};

use crate::error::{HydrateError, HydrateResult};
use crate::remote::protocol::RemoteSession;

pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SessionFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> HydrateResult<Option<RemoteSession>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&self.path)?;
        let session = toml::from_str(&contents).map_err(|e| {
            HydrateError::Decode(format!(
                "Failed to parse session from {}: {e}",
                self.path.display()
            ))
        })?;

        Ok(Some(session))
    }

    pub fn save(&self, session: &RemoteSession) -> HydrateResult<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let contents = toml::to_string_pretty(session)
            .map_err(|e| HydrateError::Serialization(e.to_string()))?;

        let temp = self.path.with_extension("toml.tmp");
        std::fs::write(&temp, contents)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }

    pub fn clear(&self) -> HydrateResult<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}
