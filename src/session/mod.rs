/// Server-side sessions
///
/// The browser holds an opaque random id in the `sessionid` cookie; only its
/// SHA-256 is stored. Each session carries a small key/value map, which is
/// where the captcha gate keeps its expected answer.
use crate::{
    auth::cookies::cookie_value,
    config::ServerConfig,
    context::AppContext,
    db::models::WebSession,
    error::{PortalError, PortalResult},
    tokens::generate_secret,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "sessionid";

/// Session-scoped key/value data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionData(Map<String, Value>);

impl SessionData {
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Raw stored value, for callers that compare textual forms
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert<T: Serialize>(&mut self, key: &str, value: T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.0.insert(key.to_string(), value);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// A loaded (or freshly created) session
#[derive(Debug, Clone)]
pub struct Session {
    /// Raw id as sent in the cookie
    pub id: String,
    pub account_id: Option<i64>,
    pub data: SessionData,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn fresh(ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: generate_secret(),
            account_id: None,
            data: SessionData::default(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.account_id.is_some()
    }
}

fn hash_session_id(id: &str) -> String {
    hex::encode(Sha256::digest(id.as_bytes()))
}

/// Session persistence
#[derive(Clone)]
pub struct SessionStore {
    db: SqlitePool,
    config: Arc<ServerConfig>,
}

impl SessionStore {
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        Self { db, config }
    }

    fn ttl(&self) -> Duration {
        Duration::seconds(self.config.authentication.session_ttl_seconds)
    }

    /// Load the session named by the cookie, or start a new unsaved one
    pub async fn load(&self, id: Option<&str>) -> PortalResult<Session> {
        let Some(id) = id.filter(|id| !id.is_empty()) else {
            return Ok(Session::fresh(self.ttl()));
        };

        let row = sqlx::query_as::<_, WebSession>(
            "SELECT id, account_id, data, created_at, expires_at FROM web_session WHERE id = ?1",
        )
        .bind(hash_session_id(id))
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) if row.expires_at > Utc::now() => {
                let data = serde_json::from_str(&row.data).unwrap_or_else(|e| {
                    tracing::warn!("Discarding unreadable session data: {}", e);
                    SessionData::default()
                });
                Ok(Session {
                    id: id.to_string(),
                    account_id: row.account_id,
                    data,
                    created_at: row.created_at,
                    expires_at: row.expires_at,
                })
            }
            Some(_) => {
                // Expired: drop it and start over
                self.delete(id).await?;
                Ok(Session::fresh(self.ttl()))
            }
            None => Ok(Session::fresh(self.ttl())),
        }
    }

    /// Persist the session, sliding its expiry forward
    pub async fn save(&self, session: &mut Session) -> PortalResult<()> {
        session.expires_at = Utc::now() + self.ttl();
        let data = serde_json::to_string(&session.data)
            .map_err(|e| PortalError::Internal(format!("Failed to encode session: {}", e)))?;

        sqlx::query(
            "INSERT INTO web_session (id, account_id, data, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                account_id = excluded.account_id,
                data = excluded.data,
                expires_at = excluded.expires_at",
        )
        .bind(hash_session_id(&session.id))
        .bind(session.account_id)
        .bind(data)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Bind the session to an account under a new id; the old id stops working
    pub async fn login(&self, session: &mut Session, account_id: i64) -> PortalResult<()> {
        self.delete(&session.id).await?;
        session.id = generate_secret();
        session.account_id = Some(account_id);
        session.created_at = Utc::now();
        self.save(session).await
    }

    /// Remove the session entirely
    pub async fn destroy(&self, session: &mut Session) -> PortalResult<()> {
        self.delete(&session.id).await?;
        session.account_id = None;
        session.data.clear();
        Ok(())
    }

    async fn delete(&self, id: &str) -> PortalResult<()> {
        sqlx::query("DELETE FROM web_session WHERE id = ?1")
            .bind(hash_session_id(id))
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Drop every session of an account inside the caller's transaction
    pub async fn delete_for_account_in(
        conn: &mut SqliteConnection,
        account_id: i64,
    ) -> PortalResult<u64> {
        let deleted = sqlx::query("DELETE FROM web_session WHERE account_id = ?1")
            .bind(account_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        Ok(deleted)
    }
}

/// The caller's session, loaded from the `sessionid` cookie
///
/// Handlers that change it must call `SessionStore::save` and send the
/// session cookie back.
pub struct CurrentSession(pub Session);

#[async_trait]
impl FromRequestParts<AppContext> for CurrentSession {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let id = cookie_value(&parts.headers, SESSION_COOKIE);
        let session = state.sessions.load(id.as_deref()).await?;
        Ok(CurrentSession(session))
    }
}
