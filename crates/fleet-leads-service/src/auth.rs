//! Advisor authentication: a static API key plus in-memory bearer sessions.
//!
//! Sessions are never persisted, so a restart logs everyone out.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use fleet_leads_core::{Actor, Role};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;

pub const API_KEY_HEADER: &str = "x-advisor-key";
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(8 * 60 * 60);

const API_KEY_IDENTITY: &str = "api-key";
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub id: String,
    pub username: String,
    pub password: String,
    pub role: Role,
}

impl DirectoryUser {
    #[must_use]
    pub fn new(id: &str, username: &str, password: &str, role: Role) -> Self {
        Self {
            id: id.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            role,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    ApiKey,
    Session,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub role: Role,
}

/// The caller behind an authenticated request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub auth_type: AuthType,
}

impl Identity {
    #[must_use]
    pub fn actor(&self) -> Actor {
        Actor::user(self.username.clone(), self.role)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginGrant {
    pub token: String,
    pub user: PublicUser,
    pub expires_in_ms: u64,
}

#[derive(Debug, Clone)]
struct Session {
    user: PublicUser,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct AuthManager {
    api_key: String,
    users: Vec<DirectoryUser>,
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl AuthManager {
    #[must_use]
    pub fn new(api_key: impl Into<String>, users: Vec<DirectoryUser>, ttl: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            users,
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn login(&self, username: &str, password: &str) -> Option<LoginGrant> {
        self.login_at(username, password, Instant::now())
    }

    pub fn login_at(&self, username: &str, password: &str, now: Instant) -> Option<LoginGrant> {
        let user = self
            .users
            .iter()
            .find(|user| user.username == username && user.password == password)?;
        let public = PublicUser {
            id: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
        };

        let token = new_token();
        self.sessions().insert(
            token.clone(),
            Session {
                user: public.clone(),
                expires_at: now + self.ttl,
            },
        );

        Some(LoginGrant {
            token,
            user: public,
            expires_in_ms: u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Returns whether a session was removed. Unknown tokens are not an error.
    pub fn logout(&self, token: &str) -> bool {
        self.sessions().remove(token).is_some()
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Option<Identity> {
        self.authenticate_at(api_key(headers), bearer_token(headers), Instant::now())
    }

    /// The API key wins over a bearer token. Expired sessions are evicted on
    /// sight.
    pub fn authenticate_at(
        &self,
        api_key: Option<&str>,
        bearer: Option<&str>,
        now: Instant,
    ) -> Option<Identity> {
        if api_key.is_some_and(|key| !self.api_key.is_empty() && key == self.api_key) {
            return Some(Identity {
                id: API_KEY_IDENTITY.to_string(),
                username: API_KEY_IDENTITY.to_string(),
                role: Role::Admin,
                auth_type: AuthType::ApiKey,
            });
        }

        let token = bearer?;
        let mut sessions = self.sessions();
        let session = sessions.get(token)?;
        if now > session.expires_at {
            sessions.remove(token);
            return None;
        }

        Some(Identity {
            id: session.user.id.clone(),
            username: session.user.username.clone(),
            role: session.user.role,
            auth_type: AuthType::Session,
        })
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions().len()
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn new_token() -> String {
    let mut bytes = [0_u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[must_use]
pub fn api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
