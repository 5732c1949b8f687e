//! Identity provider
//!
//! Registration, login and bearer-token verification. The ledger trusts the
//! `Identity` this module resolves when attributing comments.

pub mod password;
pub mod session;

pub use session::{Identity, SessionRegistry};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{PublicUser, User};
use crate::state::{Store, UserStore};
use crate::Result;

const MIN_PASSWORD_LEN: usize = 6;
const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: PublicUser,
}

pub struct AuthService {
    store: Arc<dyn Store>,
    sessions: SessionRegistry,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, session_ttl: Duration) -> Self {
        Self {
            store,
            sessions: SessionRegistry::new(session_ttl),
        }
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<PublicUser> {
        let username = username.trim();
        let email = normalize_email(email);

        if username.is_empty() || email.is_empty() || password.is_empty() {
            return Err(LedgerError::InvalidInput(
                "Username, email and password are required".to_string(),
            ));
        }
        if !email.contains('@') {
            return Err(LedgerError::InvalidInput(format!("Invalid email: {}", email)));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(LedgerError::InvalidInput(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        // Cheap pre-check; the store still enforces uniqueness
        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(LedgerError::Conflict(format!(
                "Email already registered: {}",
                email
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email,
            password_hash: password::hash_password(password)?,
            created_at: Utc::now(),
        };

        let user = self.store.insert_user(user).await?;
        info!(user_id = %user.id, "User registered");

        Ok(PublicUser::from(&user))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let email = normalize_email(email);

        let Some(user) = self.store.find_user_by_email(&email).await? else {
            warn!("Login attempt for unknown email");
            return Err(LedgerError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        };

        if !password::verify_password(password, &user.password_hash) {
            warn!(user_id = %user.id, "Login attempt with wrong password");
            return Err(LedgerError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }

        let public = PublicUser::from(&user);
        let token = self
            .sessions
            .issue(Identity {
                user_id: user.id,
                username: user.username.clone(),
            })
            .await;

        info!(user_id = %user.id, "User logged in");
        Ok(LoginResponse { token, user: public })
    }

    /// Resolve a bearer token to the identity it was issued for
    pub async fn authenticate(&self, token: &str) -> Result<Identity> {
        self.sessions
            .resolve(token)
            .await
            .ok_or_else(|| LedgerError::Unauthorized("Invalid or expired token".to_string()))
    }

    pub async fn logout(&self, token: &str) -> bool {
        self.sessions.revoke(token).await
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
