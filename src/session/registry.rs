//! Session registry - owns every live session of the server
//!
//! Sessions are inserted when a connection opens and removed when their task
//! ends. On shutdown every session is told to stop and awaited, so no program
//! or artifact outlives the server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Session, SessionContext};
use crate::protocol::ServerMessage;

/// Frames a client may queue before the session catches up
const INBOUND_CAPACITY: usize = 64;

/// Messages queued for a client that is not reading before the session waits
pub(crate) const OUTBOUND_CAPACITY: usize = 256;

/// Client-side ends of a freshly opened session
pub struct SessionChannel {
    pub id: Uuid,
    /// Raw text frames from the client; drop it to close the session
    pub inbound: mpsc::Sender<String>,
    /// Messages for the client, closed once the session has ended
    pub outbound: mpsc::Receiver<ServerMessage>,
}

pub struct SessionRegistry {
    ctx: Arc<SessionContext>,
    sessions: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl SessionRegistry {
    pub fn new(ctx: Arc<SessionContext>) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            ctx,
            sessions: Mutex::new(HashMap::new()),
            shutdown_tx,
        })
    }

    #[cfg(test)]
    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Start a new session. Returns None once shutdown has begun.
    pub fn open(self: &Arc<Self>) -> Option<SessionChannel> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if *self.shutdown_tx.borrow() {
            return None;
        }

        let id = Uuid::new_v4();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        let session = Session::new(
            id,
            Arc::clone(&self.ctx),
            outbound_tx,
            self.shutdown_tx.subscribe(),
        );
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            session.run(inbound_rx).await;
            registry.remove(id);
        });
        sessions.insert(id, handle);

        Some(SessionChannel {
            id,
            inbound: inbound_tx,
            outbound: outbound_rx,
        })
    }

    /// Number of sessions whose task has not finished yet
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn remove(&self, id: Uuid) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Stop every session and wait for their cleanup; refuse new ones
    pub async fn shutdown_all(&self) {
        let handles: Vec<(Uuid, JoinHandle<()>)> = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            self.shutdown_tx.send_replace(true);
            sessions.drain().collect()
        };

        info!("Shutting down {} sessions", handles.len());
        for (id, handle) in handles {
            if let Err(e) = handle.await {
                warn!("Session {} ended abnormally: {}", id, e);
            }
        }
    }
}
