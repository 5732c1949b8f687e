//! Bearer session registry
//!
//! Tokens are opaque random UUIDs. Only their SHA-256 digest is kept.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Who a verified bearer token belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone)]
struct Session {
    identity: Identity,
    expires_at: DateTime<Utc>,
}

pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Issue a new token for the identity
    pub async fn issue(&self, identity: Identity) -> String {
        let token = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let session = Session {
            identity,
            expires_at: now + self.ttl,
        };

        let mut sessions = self.sessions.write().await;
        // Drop expired sessions nobody will present again
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(token_digest(&token), session);
        token
    }

    /// Resolve a token; expired sessions are evicted on sight
    pub async fn resolve(&self, token: &str) -> Option<Identity> {
        let digest = token_digest(token);

        {
            let sessions = self.sessions.read().await;
            match sessions.get(&digest) {
                None => return None,
                Some(session) if session.expires_at > Utc::now() => {
                    return Some(session.identity.clone());
                }
                Some(_) => {}
            }
        }

        let mut sessions = self.sessions.write().await;
        sessions.remove(&digest);
        None
    }

    pub async fn revoke(&self, token: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&token_digest(token)).is_some()
    }
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
