//! Storage for the desired-topic set across restarts.
//!
//! The set is stored as a JSON array under [`STORAGE_KEY`]; on disk that is
//! `<state_dir>/selected_topics.json`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub const STORAGE_KEY: &str = "selected_topics";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO: {0}")]
    Io(#[from] io::Error),
    #[error("corrupt stored topics: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub trait TopicPersistence {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<Vec<String>>, PersistError>;
    fn save(&mut self, topics: &[String]) -> Result<(), PersistError>;
}

/// File-backed storage under a state directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(state_dir: &Path) -> Self {
        FileStore { path: state_dir.join(format!("{STORAGE_KEY}.json")) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TopicPersistence for FileStore {
    fn load(&self) -> Result<Option<Vec<String>>, PersistError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&mut self, topics: &[String]) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // readers never observe a partially written file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(topics)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Process-local storage, used when no state directory is configured.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    raw: Option<String>,
}

impl MemoryStore {
    /// Start with a raw stored value, as if read back from storage.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        MemoryStore { raw: Some(raw.into()) }
    }
}

impl TopicPersistence for MemoryStore {
    fn load(&self) -> Result<Option<Vec<String>>, PersistError> {
        match &self.raw {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    fn save(&mut self, topics: &[String]) -> Result<(), PersistError> {
        self.raw = Some(serde_json::to_string(topics)?);
        Ok(())
    }
}
