//! Durable store for finished sessions.
//!
//! The sync boundary: a completed or ended session plus its trial log is
//! submitted once and persisted as one JSON file per session under the app
//! data dir. Duplicate submissions of the same session id are rejected.
//! Listing paginates newest-first from an in-memory index rebuilt from disk at
//! startup.

use std::collections::HashMap;
use std::fs;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use nback::session::SessionSummary;
use nback::stimulus::{StimulusPacket, UserResponse};

use crate::paths::AppPaths;

/// A finished session plus its full trial log, as submitted for storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub summary: SessionSummary,
    pub stimuli: Vec<StimulusPacket>,
    pub responses: Vec<UserResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("session already synced: {0}")]
    AlreadySynced(String),

    #[error("session {0} is not finished; only terminal sessions can be synced")]
    NotFinished(String),

    #[error("storage failure: {0}")]
    Io(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::AlreadySynced(_) => "session_exists",
            StoreError::NotFinished(_) => "validation_error",
            StoreError::Io(_) => "storage_error",
        }
    }
}

#[derive(Debug)]
pub struct SessionStore {
    paths: AppPaths,
    records: HashMap<String, SessionRecord>,
}

impl SessionStore {
    /// Rebuilds the index from whatever record files already exist.
    pub fn open(paths: AppPaths) -> Result<Self, StoreError> {
        let dir = paths.sessions_dir();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io(e.to_string()))?;

        let mut records = HashMap::new();
        let entries = fs::read_dir(&dir).map_err(|e| StoreError::Io(e.to_string()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str::<SessionRecord>(&s).map_err(|e| e.to_string()))
            {
                Ok(record) => {
                    records.insert(record.summary.session_id.clone(), record);
                }
                Err(e) => {
                    // One corrupt file must not take the store down.
                    warn!("Skipping unreadable session record {:?}: {}", path, e);
                }
            }
        }

        info!("Session store opened with {} records", records.len());
        Ok(Self { paths, records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.records.contains_key(session_id)
    }

    /// Accepts a record exactly once per session id.
    pub fn submit(&mut self, record: SessionRecord) -> Result<(), StoreError> {
        let id = record.summary.session_id.clone();
        if !record.summary.state.is_terminal() {
            return Err(StoreError::NotFinished(id));
        }
        if self.records.contains_key(&id) {
            return Err(StoreError::AlreadySynced(id));
        }

        let path = self.paths.sessions_dir().join(format!("{}.json", id));
        let json =
            serde_json::to_string_pretty(&record).map_err(|e| StoreError::Io(e.to_string()))?;
        fs::write(&path, json).map_err(|e| StoreError::Io(e.to_string()))?;

        info!("Synced session {} ({} trials)", id, record.responses.len());
        self.records.insert(id, record);
        Ok(())
    }

    /// Newest-first page of records; `page` is 1-based.
    pub fn list(&self, page: u32, limit: u32) -> (Vec<SessionRecord>, u32) {
        let mut all: Vec<&SessionRecord> = self.records.values().collect();
        all.sort_by(|a, b| b.summary.started_at_ms.cmp(&a.summary.started_at_ms));

        let total = all.len() as u32;
        let page = page.max(1);
        let limit = limit.clamp(1, 100) as usize;
        let start = (page as usize - 1) * limit;

        let records = all
            .into_iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect();
        (records, total)
    }
}
