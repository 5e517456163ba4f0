//! Bearer-token sessions for the admin and agent APIs.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;

use crate::api::AppState;
use crate::error::ProblemDetails;

/// Prefix of every session token.
const TOKEN_PREFIX: &str = "kls_";

/// Who a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Agent,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub role: Role,
    /// Set for agent sessions.
    pub agent_id: Option<String>,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// In-memory session table keyed by token.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    fn generate_token() -> String {
        let random_bytes: [u8; 32] = rand::rng().random();
        format!(
            "{}{}",
            TOKEN_PREFIX,
            base64_simd::URL_SAFE_NO_PAD.encode_to_string(random_bytes)
        )
    }

    /// Open a session and return its token.
    pub fn issue(&self, role: Role, agent_id: Option<String>, username: &str) -> (String, Session) {
        let token = Self::generate_token();
        let session = Session {
            role,
            agent_id,
            username: username.to_string(),
            expires_at: Utc::now() + self.ttl,
        };
        self.sessions.insert(token.clone(), session.clone());
        (token, session)
    }

    /// Look up a live session. An expired one is removed.
    pub fn get(&self, token: &str) -> Option<Session> {
        let now = Utc::now();
        let session = self.sessions.get(token).map(|s| s.value().clone())?;
        if session.expires_at <= now {
            self.sessions.remove(token);
            return None;
        }
        Some(session)
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drop every session of an agent, e.g. after a ban or deletion.
    pub fn revoke_agent(&self, agent_id: &str) {
        self.sessions
            .retain(|_, s| s.agent_id.as_deref() != Some(agent_id));
    }

    /// Remove expired sessions and return how many were dropped.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut dropped = 0;
        self.sessions.retain(|_, s| {
            let live = s.expires_at > now;
            if !live {
                dropped += 1;
            }
            live
        });
        dropped
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Any authenticated caller.
pub struct CurrentSession {
    pub token: String,
    pub session: Session,
}

impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = ProblemDetails;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ProblemDetails::unauthorized("missing bearer token"))?;
        let session = state
            .sessions
            .get(token)
            .ok_or_else(|| ProblemDetails::unauthorized("session is invalid or expired"))?;
        Ok(Self {
            token: token.to_string(),
            session,
        })
    }
}

/// Caller holding an admin session.
pub struct AdminSession;

impl FromRequestParts<AppState> for AdminSession {
    type Rejection = ProblemDetails;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let current = CurrentSession::from_request_parts(parts, state).await?;
        match current.session.role {
            Role::Admin => Ok(Self),
            Role::Agent => Err(ProblemDetails::forbidden("admin access required")),
        }
    }
}

/// Caller holding an agent session.
pub struct AgentSession {
    pub agent_id: String,
}

impl FromRequestParts<AppState> for AgentSession {
    type Rejection = ProblemDetails;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let current = CurrentSession::from_request_parts(parts, state).await?;
        match (current.session.role, current.session.agent_id) {
            (Role::Agent, Some(agent_id)) => Ok(Self { agent_id }),
            _ => Err(ProblemDetails::forbidden("agent access required")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_get() {
        let store = SessionStore::new(Duration::hours(1));
        let (token, _) = store.issue(Role::Agent, Some("agent_1".into()), "alice");
        assert!(token.starts_with(TOKEN_PREFIX));
        let session = store.get(&token).unwrap();
        assert_eq!(session.role, Role::Agent);
        assert_eq!(session.agent_id.as_deref(), Some("agent_1"));
        assert!(store.get("kls_unknown").is_none());
    }

    #[test]
    fn test_tokens_are_unique() {
        let store = SessionStore::new(Duration::hours(1));
        let (a, _) = store.issue(Role::Admin, None, "admin");
        let (b, _) = store.issue(Role::Admin, None, "admin");
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_expired_session_is_removed_on_access() {
        let store = SessionStore::new(Duration::seconds(-1));
        let (token, _) = store.issue(Role::Admin, None, "admin");
        assert!(store.get(&token).is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_prune_and_revoke() {
        let store = SessionStore::new(Duration::hours(1));
        let (admin, _) = store.issue(Role::Admin, None, "admin");
        store.issue(Role::Agent, Some("agent_1".into()), "alice");
        store.issue(Role::Agent, Some("agent_1".into()), "alice");

        assert_eq!(store.prune(Utc::now()), 0);
        store.revoke_agent("agent_1");
        assert_eq!(store.len(), 1);
        assert_eq!(store.prune(Utc::now() + Duration::hours(2)), 1);
        assert!(!store.revoke(&admin));
    }

    #[test]
    fn test_prune_counts_only_removed_sessions_during_logins() {
        let store = SessionStore::new(Duration::hours(1));
        for _ in 0..50 {
            store.issue(Role::Admin, None, "admin");
        }
        let later = Utc::now() + Duration::hours(2);

        let pruned = std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..200 {
                    store.issue(Role::Agent, Some("agent_1".into()), "alice");
                }
            });
            store.prune(later)
        });

        assert!(pruned >= 50);
        let rest = store.prune(later);
        assert_eq!(pruned + rest, 250);
        assert!(store.is_empty());
    }
}
