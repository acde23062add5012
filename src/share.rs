//! Expiring store of shared code snippets
//!
//! A snippet is kept for a fixed time after it was shared. Expired entries are
//! dropped when read and by a periodic sweep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Payload handed back to the editor when a share link is opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedCode {
    pub message: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub filename: Option<String>,
    pub code: String,
}

impl SharedCode {
    pub fn new(code: String, filename: Option<String>) -> Self {
        Self {
            message: true,
            kind: "default".to_string(),
            filename,
            code,
        }
    }
}

pub struct ShareStore {
    ttl: Duration,
    entries: Mutex<HashMap<Uuid, (Instant, SharedCode)>>,
}

impl ShareStore {
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Store a snippet under a fresh id
    pub fn insert(&self, shared: SharedCode) -> Uuid {
        let id = Uuid::new_v4();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, (Instant::now() + self.ttl, shared));
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<SharedCode> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(id) {
            Some((expires_at, shared)) if *expires_at > Instant::now() => Some(shared.clone()),
            Some(_) => {
                entries.remove(id);
                None
            }
            None => None,
        }
    }

    /// Drop every expired snippet, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, (expires_at, _)| *expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Purge expired snippets every `interval` until the task is aborted
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!("Purged {} expired shares", purged);
                }
            }
        })
    }
}
