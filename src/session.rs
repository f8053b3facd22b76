//! Process-wide auth session and the auth providers that feed it.
//!
//! The session lives in one `watch` channel. Services receive the
//! `SessionContext` explicitly and either read the current state or
//! `subscribe()` to be told when it changes; there is exactly one source.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;

use crate::cache::LocalCache;
use crate::error::{Result, SyncError};
use crate::models::User;
use crate::store::{object, Query, RemoteStore, USERS};

const SESSION_KEY: &str = "session";

/// Who is acting: decides which favorite backend applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Anonymous,
    User(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Init,
    Active(Option<User>),
    Disposed,
}

#[derive(Clone)]
pub struct SessionContext {
    tx: Arc<watch::Sender<SessionState>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Init);
        Self { tx: Arc::new(tx) }
    }

    /// Seeds the session from whatever the provider restored.
    pub fn bind(&self, auth: &dyn AuthProvider) {
        self.activate(auth.current_user());
    }

    pub fn state(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// Publishes a sign-in (`Some`) or sign-out (`None`). Ignored once disposed.
    pub fn activate(&self, user: Option<User>) {
        self.tx.send_if_modified(|state| {
            if *state == SessionState::Disposed {
                return false;
            }
            let next = SessionState::Active(user);
            if *state == next {
                return false;
            }
            log::debug!("session -> {:?}", next);
            *state = next;
            true
        });
    }

    pub fn dispose(&self) {
        self.tx.send_replace(SessionState::Disposed);
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    pub fn current_user(&self) -> Option<User> {
        match &*self.tx.borrow() {
            SessionState::Active(user) => user.clone(),
            _ => None,
        }
    }

    pub fn actor(&self) -> Actor {
        match self.current_user() {
            Some(user) => Actor::User(user.id),
            None => Actor::Anonymous,
        }
    }

    /// Application tracking has no anonymous mode.
    pub fn require_user(&self) -> Result<User> {
        self.current_user().ok_or(SyncError::Unauthenticated)
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<User>;
    async fn sign_out(&self) -> Result<()>;
    /// The user restored from the durable cache, if any.
    fn current_user(&self) -> Option<User>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub user: User,
    #[serde(default)]
    pub access_token: Option<String>,
}

pub fn load_session(cache: &dyn LocalCache) -> Option<StoredSession> {
    let raw = cache.get(SESSION_KEY)?;
    serde_json::from_str::<Option<StoredSession>>(&raw).ok().flatten()
}

fn save_session(cache: &dyn LocalCache, session: Option<&StoredSession>) {
    match serde_json::to_string(&session) {
        Ok(raw) => cache.set(SESSION_KEY, raw),
        Err(e) => log::warn!("failed to encode session: {}", e),
    }
}

fn check_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((name, domain)) if !name.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(SyncError::ValidationFailure(format!(
            "'{}' is not an email address",
            email
        ))),
    }
}

/// Sign-in against the local store: the first sign-in for an email creates
/// its `users` row. No credentials are checked.
pub struct LocalAuth {
    store: Arc<dyn RemoteStore>,
    cache: Arc<dyn LocalCache>,
}

impl LocalAuth {
    pub fn new(store: Arc<dyn RemoteStore>, cache: Arc<dyn LocalCache>) -> Self {
        Self { store, cache }
    }
}

#[async_trait]
impl AuthProvider for LocalAuth {
    async fn sign_in(&self, email: &str, _password: &str) -> Result<User> {
        let email = check_email(email)?;
        let existing = self
            .store
            .select(Query::from(USERS).eq("email", email.clone()).limit(1))
            .await?;
        let row = match existing.into_iter().next() {
            Some(row) => row,
            None => {
                self.store
                    .insert_one(USERS, object(json!({ "email": email })))
                    .await?
            }
        };
        let user: User = serde_json::from_value(serde_json::Value::Object(row))
            .map_err(|e| SyncError::ValidationFailure(format!("malformed user row: {}", e)))?;

        save_session(
            self.cache.as_ref(),
            Some(&StoredSession {
                user: user.clone(),
                access_token: None,
            }),
        );
        log::info!("signed in locally as {}", user.email);
        Ok(user)
    }

    async fn sign_out(&self) -> Result<()> {
        save_session(self.cache.as_ref(), None);
        Ok(())
    }

    fn current_user(&self) -> Option<User> {
        load_session(self.cache.as_ref()).map(|s| s.user)
    }
}

/// GoTrue password sign-in for the hosted backend.
pub struct SupabaseAuth {
    base_url: String,
    anon_key: String,
    client: Client,
    cache: Arc<dyn LocalCache>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: User,
}

#[derive(Debug, Deserialize)]
struct AuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

impl SupabaseAuth {
    pub fn new(url: &str, anon_key: &str, cache: Arc<dyn LocalCache>) -> Self {
        Self {
            base_url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            client: Client::new(),
            cache,
        }
    }

    pub fn access_token(&self) -> Option<String> {
        load_session(self.cache.as_ref()).and_then(|s| s.access_token)
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        let email = check_email(email)?;
        if password.is_empty() {
            return Err(SyncError::ValidationFailure("password is required".to_string()));
        }

        let response = self
            .client
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| SyncError::BackendUnavailable {
                code: "NETWORK".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed = serde_json::from_str::<AuthErrorBody>(&body).ok();
            let message = parsed
                .as_ref()
                .and_then(|b| b.error_description.clone().or_else(|| b.msg.clone()))
                .unwrap_or(body);
            if parsed.and_then(|b| b.error).as_deref() == Some("invalid_grant") {
                return Err(SyncError::ValidationFailure(message));
            }
            return Err(SyncError::BackendUnavailable {
                code: status.as_u16().to_string(),
                message,
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            SyncError::BackendUnavailable {
                code: "PARSE".to_string(),
                message: e.to_string(),
            }
        })?;

        save_session(
            self.cache.as_ref(),
            Some(&StoredSession {
                user: token.user.clone(),
                access_token: Some(token.access_token),
            }),
        );
        log::info!("signed in as {}", token.user.email);
        Ok(token.user)
    }

    async fn sign_out(&self) -> Result<()> {
        if let Some(token) = self.access_token() {
            let result = self
                .client
                .post(format!("{}/auth/v1/logout", self.base_url))
                .header("apikey", &self.anon_key)
                .bearer_auth(token)
                .send()
                .await;
            if let Err(e) = result {
                log::warn!("remote sign-out failed, clearing local session anyway: {}", e);
            }
        }
        save_session(self.cache.as_ref(), None);
        Ok(())
    }

    fn current_user(&self) -> Option<User> {
        load_session(self.cache.as_ref()).map(|s| s.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::SqliteStore;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            email: format!("{}@school.edu", id),
        }
    }

    #[test]
    fn test_lifecycle_and_actor() {
        let session = SessionContext::new();
        assert_eq!(session.state(), SessionState::Init);
        assert_eq!(session.actor(), Actor::Anonymous);
        assert!(matches!(session.require_user(), Err(SyncError::Unauthenticated)));

        session.activate(Some(user("u1")));
        assert_eq!(session.actor(), Actor::User("u1".to_string()));

        session.activate(None);
        assert_eq!(session.state(), SessionState::Active(None));

        session.dispose();
        session.activate(Some(user("u2")));
        assert_eq!(session.state(), SessionState::Disposed);
        assert_eq!(session.actor(), Actor::Anonymous);
    }

    #[tokio::test]
    async fn test_subscribers_share_one_channel() {
        let session = SessionContext::new();
        let mut first = session.subscribe();
        let mut second = session.clone().subscribe();

        session.activate(Some(user("u1")));
        first.changed().await.unwrap();
        second.changed().await.unwrap();
        assert_eq!(*first.borrow(), SessionState::Active(Some(user("u1"))));
        assert_eq!(*second.borrow(), SessionState::Active(Some(user("u1"))));

        // Re-publishing the same user is not a change.
        session.activate(Some(user("u1")));
        assert!(!first.has_changed().unwrap());

        let mut late = session.subscribe();
        assert!(!late.has_changed().unwrap());
        session.dispose();
        assert!(late.has_changed().unwrap());
        assert_eq!(*late.borrow_and_update(), SessionState::Disposed);
    }

    #[tokio::test]
    async fn test_local_auth_creates_user_once_and_restores() {
        let store: Arc<dyn RemoteStore> = Arc::new(SqliteStore::open_in_memory());
        let cache: Arc<dyn LocalCache> = Arc::new(MemoryCache::default());
        let auth = LocalAuth::new(store.clone(), cache.clone());

        let first = auth.sign_in("Student@School.edu", "").await.unwrap();
        let second = auth.sign_in("student@school.edu", "").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.email, "student@school.edu");

        let restored = LocalAuth::new(store, cache.clone());
        assert_eq!(restored.current_user(), Some(first.clone()));

        let session = SessionContext::new();
        session.bind(&restored);
        assert_eq!(session.current_user(), Some(first));

        restored.sign_out().await.unwrap();
        assert_eq!(restored.current_user(), None);
    }

    #[tokio::test]
    async fn test_local_auth_rejects_malformed_email() {
        let store: Arc<dyn RemoteStore> = Arc::new(SqliteStore::open_in_memory());
        let auth = LocalAuth::new(store, Arc::new(MemoryCache::default()));
        let err = auth.sign_in("not-an-email", "").await.unwrap_err();
        assert!(matches!(err, SyncError::ValidationFailure(_)));
    }
}
