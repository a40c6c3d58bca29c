//! Request authentication: bearer session token to actor.
//!
//! Credentials are verified elsewhere; this crate only resolves an issued
//! session token into a user id and a server-side role.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ring::digest;

use crate::domain::Actor;
use crate::error::GatewayError;
use crate::persistence::{Store, StoreError};

/// Authentication failure.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown, expired or revoked token.
    #[error("invalid or expired session")]
    InvalidSession,

    /// The account behind the session is suspended.
    #[error("account is suspended")]
    Suspended,

    /// The lookup itself failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidSession => Self::Unauthorized(err.to_string()),
            AuthError::Suspended => Self::Forbidden(err.to_string()),
            AuthError::Store(store) => store.into(),
        }
    }
}

/// Resolves a bearer token to the acting user and role.
#[async_trait]
pub trait AuthProvider: Send + Sync + fmt::Debug {
    /// Authenticates `token`.
    async fn authenticate(&self, token: &str) -> Result<Actor, AuthError>;
}

/// Hex SHA-256 of a session token, as stored in `sessions.token_hash`.
#[must_use]
pub fn hash_token(token: &str) -> String {
    hex::encode(digest::digest(&digest::SHA256, token.as_bytes()))
}

/// Looks sessions up in the shared store. Revocation applies on the next
/// request.
#[derive(Debug, Clone)]
pub struct SessionAuthProvider {
    store: Arc<dyn Store>,
}

impl SessionAuthProvider {
    /// Creates a provider over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AuthProvider for SessionAuthProvider {
    async fn authenticate(&self, token: &str) -> Result<Actor, AuthError> {
        let now = Utc::now();
        let session = self
            .store
            .find_session(&hash_token(token))
            .await?
            .filter(|session| session.is_active(now))
            .ok_or(AuthError::InvalidSession)?;
        let user = self
            .store
            .get_user(session.user_id)
            .await?
            .ok_or(AuthError::InvalidSession)?;
        let suspended = self
            .store
            .get_account_flags(user.id)
            .await?
            .is_some_and(|flags| flags.is_suspended);
        if suspended {
            tracing::debug!(user_id = %user.id, "suspended account rejected");
            return Err(AuthError::Suspended);
        }
        Ok(Actor {
            user_id: user.id,
            role: user.role,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::domain::{Role, Session, User, UserId};
    use crate::persistence::InMemoryStore;

    async fn seeded(role: Role, expires_in: Duration) -> (InMemoryStore, UserId) {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let user = User {
            id: UserId::new(),
            email: "owner@example.com".to_string(),
            role,
            created_at: now,
        };
        let id = user.id;
        store.insert_user(user).await;
        store
            .insert_session(Session {
                token_hash: hash_token("tok"),
                user_id: id,
                expires_at: now + expires_in,
                revoked_at: None,
                created_at: now,
            })
            .await;
        (store, id)
    }

    #[tokio::test]
    async fn active_session_resolves_role() {
        let (store, id) = seeded(Role::SuperAdmin, Duration::hours(1)).await;
        let provider = SessionAuthProvider::new(Arc::new(store));
        let Ok(actor) = provider.authenticate("tok").await else {
            panic!("should authenticate");
        };
        assert_eq!(actor.user_id, id);
        assert!(actor.is_super_admin());
    }

    #[tokio::test]
    async fn unknown_and_expired_tokens_are_rejected() {
        let (store, _) = seeded(Role::User, Duration::hours(-1)).await;
        let provider = SessionAuthProvider::new(Arc::new(store));
        assert!(matches!(
            provider.authenticate("tok").await,
            Err(AuthError::InvalidSession)
        ));
        assert!(matches!(
            provider.authenticate("other").await,
            Err(AuthError::InvalidSession)
        ));
    }

    #[test]
    fn token_hash_is_sha256_hex() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
