//! In-memory registry of open remote sessions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};

use super::connection::RemoteSession;
use crate::protocol::ServerFrame;
use crate::relay::RelayHandle;

/// Thread-safe registry of open sessions, keyed by session id.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<RemoteSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open a session for a new connection.
    pub async fn register(
        &self,
        relay: RelayHandle,
        outbound: mpsc::Sender<ServerFrame>,
    ) -> Arc<RemoteSession> {
        let session = Arc::new(RemoteSession::new(relay, outbound));
        self.sessions
            .write()
            .await
            .insert(session.id().to_string(), Arc::clone(&session));
        info!(session = %session.id(), "Session registered");
        session
    }

    /// Remove a session and release its subscriptions.
    pub async fn unregister(&self, session_id: &str) -> Option<Arc<RemoteSession>> {
        let session = self.sessions.write().await.remove(session_id);
        match &session {
            Some(s) => {
                s.disconnect();
            }
            None => warn!(session = %session_id, "Tried to unregister unknown session"),
        }
        session
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close every session. Returns the number of subscriptions released.
    pub async fn disconnect_all(&self) -> usize {
        let sessions: Vec<_> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        let released: usize = sessions.iter().map(|s| s.disconnect()).sum();
        info!(sessions = sessions.len(), released, "All sessions closed");
        released
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
