//! Per-sender conversation sessions with explicit expiry.
//!
//! Nothing sweeps in the background. Callers invoke [`SessionStore::sweep`]
//! (the router does so at the start of every request).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Sender handle the session is keyed by.
    pub id: String,
    /// Campaign the sender is currently reviewing.
    pub active_campaign: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Session {
    fn new(id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            active_campaign: None,
            created_at: now,
            last_seen: now,
        }
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: chrono::Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365)),
        }
    }

    /// Fetch or open a session and mark it seen.
    pub async fn touch(&self, id: &str, now: DateTime<Utc>) -> Session {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id, now));
        session.last_seen = now;
        session.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn set_campaign(&self, id: &str, campaign_id: Option<Uuid>) {
        if let Some(session) = self.sessions.write().await.get_mut(id) {
            session.active_campaign = campaign_id;
        }
    }

    /// Drop sessions idle longer than the TTL. Returns how many went.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| now - s.last_seen < self.ttl);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, remaining = sessions.len(), "Swept idle conversation sessions");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
