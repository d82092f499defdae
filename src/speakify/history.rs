use super::store::{read_json, write_json_atomic, StoreError};
use super::types::HistoryEntry;

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

pub const HISTORY_FILE: &str = "speakify_tts_history.json";

/// Ordered list of past generations, newest first. Every mutation is written
/// through to disk before it becomes visible.
#[derive(Debug, Default)]
pub struct HistoryStore {
    path: Option<PathBuf>,
    entries: Vec<HistoryEntry>,
}

impl HistoryStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads `{data_dir}/speakify_tts_history.json`. Entries that no longer
    /// parse are skipped one by one; an unreadable document is logged and
    /// replaced by an empty history. Either way the original file is copied to
    /// a `.bak` sibling before anything overwrites it.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join(HISTORY_FILE);
        let entries = match read_json::<Vec<serde_json::Value>>(&path) {
            Ok(Some(values)) => {
                let total = values.len();
                let entries: Vec<HistoryEntry> = values
                    .into_iter()
                    .filter_map(|value| match serde_json::from_value(value) {
                        Ok(entry) => Some(entry),
                        Err(e) => {
                            warn!(error = %e, "skipping unreadable history entry");
                            None
                        }
                    })
                    .collect();
                if entries.len() != total {
                    back_up(&path);
                }
                entries
            }
            Ok(None) => Vec::new(),
            Err(StoreError::Json(e)) => {
                warn!(path = %path.display(), error = %e, "failed to parse history, starting empty");
                back_up(&path);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        debug!(count = entries.len(), "history loaded");

        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add(&mut self, entry: HistoryEntry) -> Result<(), StoreError> {
        let mut next = Vec::with_capacity(self.entries.len() + 1);
        next.push(entry);
        next.extend(self.entries.iter().cloned());
        self.commit(next)
    }

    /// Removes one entry. Returns whether it existed.
    pub fn delete(&mut self, id: Uuid) -> Result<bool, StoreError> {
        if !self.entries.iter().any(|e| e.id == id) {
            return Ok(false);
        }
        let next = self.entries.iter().filter(|e| e.id != id).cloned().collect();
        self.commit(next)?;
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.commit(Vec::new())
    }

    fn commit(&mut self, next: Vec<HistoryEntry>) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            write_json_atomic(path, &next)?;
            debug!(count = next.len(), "history written");
        }
        self.entries = next;
        Ok(())
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".bak");
    PathBuf::from(backup)
}

fn back_up(path: &Path) {
    let backup = backup_path(path);
    match fs::copy(path, &backup) {
        Ok(_) => warn!(backup = %backup.display(), "kept a copy of the previous history file"),
        Err(e) => warn!(error = %e, "failed to back up history file"),
    }
}
