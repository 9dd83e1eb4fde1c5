/// Single-use activation and password reset tokens
///
/// A token is a random URL-safe secret that travels once by email. Only
/// `SHA-256(secret || server_secret)` is stored, and at most one unused token
/// exists per account and purpose.
use crate::{
    config::ServerConfig,
    db::models::TokenRecord,
    error::{PortalError, PortalResult},
    metrics,
    validation::normalize_email,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::fmt;
use std::sync::Arc;

/// Bytes of entropy in every secret
pub const SECRET_BYTES: usize = 32;

/// What a token authorizes. Each purpose has its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Activation,
    PasswordReset,
}

impl TokenPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenPurpose::Activation => "activation",
            TokenPurpose::PasswordReset => "password_reset",
        }
    }

    fn table(self) -> &'static str {
        match self {
            TokenPurpose::Activation => "activation_token",
            TokenPurpose::PasswordReset => "password_reset_token",
        }
    }
}

/// Why a presented token was refused. Logged, never shown to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    NotFound,
    AlreadyUsed,
    Expired,
}

impl TokenRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenRejection::NotFound => "not_found",
            TokenRejection::AlreadyUsed => "already_used",
            TokenRejection::Expired => "expired",
        }
    }
}

/// The account a link claims to belong to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    pub email: String,
    pub category_id: Option<i64>,
}

impl AccountIdentity {
    pub fn new(email: &str, category_id: Option<i64>) -> Self {
        Self {
            email: normalize_email(email),
            category_id,
        }
    }
}

/// A freshly issued token: the raw secret for the email and the stored row
pub struct IssuedToken {
    pub secret: String,
    pub record: TokenRecord,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("secret", &"<redacted>")
            .field("record", &self.record)
            .finish()
    }
}

/// Generate a URL-safe secret from the OS RNG
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hex SHA-256 of the secret followed by the server secret
pub fn hash_secret(secret: &str, server_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(server_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Token issuer and validator
#[derive(Clone)]
pub struct TokenStore {
    db: SqlitePool,
    config: Arc<ServerConfig>,
}

impl TokenStore {
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        Self { db, config }
    }

    /// Configured lifetime for a purpose
    pub fn ttl(&self, purpose: TokenPurpose) -> Duration {
        match purpose {
            TokenPurpose::Activation => {
                Duration::hours(self.config.authentication.activation_ttl_hours)
            }
            TokenPurpose::PasswordReset => {
                Duration::hours(self.config.authentication.reset_ttl_hours)
            }
        }
    }

    pub fn hash(&self, secret: &str) -> String {
        hash_secret(secret, &self.config.authentication.secret_key)
    }

    /// Issue a token in its own transaction
    pub async fn issue(
        &self,
        account_id: i64,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> PortalResult<IssuedToken> {
        let mut tx = self.db.begin().await?;
        let issued = self.issue_in(&mut tx, account_id, purpose, ttl).await?;
        tx.commit().await?;
        Ok(issued)
    }

    /// Issue a token inside the caller's transaction
    ///
    /// Prior unused tokens for the same account and purpose are marked used
    /// first. That UPDATE takes the SQLite write lock, so two concurrent
    /// issuers for one account serialize and the later one retires the
    /// earlier one's token.
    pub async fn issue_in(
        &self,
        conn: &mut SqliteConnection,
        account_id: i64,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> PortalResult<IssuedToken> {
        let secret = generate_secret();
        let token_hash = self.hash(&secret);
        let created_at = Utc::now();
        let expires_at = created_at + ttl;

        let retired = sqlx::query(&format!(
            "UPDATE {} SET used = 1 WHERE account_id = ?1 AND used = 0",
            purpose.table()
        ))
        .bind(account_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        let id: i64 = sqlx::query_scalar(&format!(
            "INSERT INTO {} (account_id, token_hash, created_at, expires_at, used)
             VALUES (?1, ?2, ?3, ?4, 0)
             RETURNING id",
            purpose.table()
        ))
        .bind(account_id)
        .bind(&token_hash)
        .bind(created_at)
        .bind(expires_at)
        .fetch_one(&mut *conn)
        .await?;

        tracing::debug!(
            account_id,
            purpose = purpose.as_str(),
            retired,
            "issued token"
        );

        Ok(IssuedToken {
            secret,
            record: TokenRecord {
                id,
                account_id,
                token_hash,
                created_at,
                expires_at,
                used: false,
            },
        })
    }

    /// Validate a presented secret
    pub async fn validate(
        &self,
        purpose: TokenPurpose,
        secret: &str,
        identity: Option<&AccountIdentity>,
    ) -> PortalResult<TokenRecord> {
        let mut conn = self.db.acquire().await?;
        self.validate_in(&mut conn, purpose, secret, identity).await
    }

    /// Validate a presented secret inside the caller's transaction
    ///
    /// Read-only. Flows that consume the token use `claim_in` instead.
    pub async fn validate_in(
        &self,
        conn: &mut SqliteConnection,
        purpose: TokenPurpose,
        secret: &str,
        identity: Option<&AccountIdentity>,
    ) -> PortalResult<TokenRecord> {
        let record = self
            .lookup_in(conn, purpose, &self.hash(secret.trim()), identity)
            .await?;
        check_record(purpose, &record, Utc::now())?;
        Ok(record)
    }

    /// Consume a presented secret inside the caller's transaction
    ///
    /// The guarded UPDATE is the transaction's first statement, so the write
    /// lock is taken before anything is read and a concurrent claimer waits on
    /// the busy timeout instead of failing to upgrade. Identity and expiry are
    /// checked after the claim; on rejection the caller's rollback leaves the
    /// token unused.
    pub async fn claim_in(
        &self,
        conn: &mut SqliteConnection,
        purpose: TokenPurpose,
        secret: &str,
        identity: Option<&AccountIdentity>,
    ) -> PortalResult<TokenRecord> {
        let token_hash = self.hash(secret.trim());

        let claimed = sqlx::query(&format!(
            "UPDATE {} SET used = 1 WHERE token_hash = ?1 AND used = 0",
            purpose.table()
        ))
        .bind(&token_hash)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if claimed == 0 {
            // Unknown, foreign or already used: let validation name the reason
            self.validate_in(conn, purpose, secret, identity).await?;
            return Err(reject(purpose, TokenRejection::AlreadyUsed));
        }

        let record = self.lookup_in(conn, purpose, &token_hash, identity).await?;
        if record.expires_at <= Utc::now() {
            return Err(reject(purpose, TokenRejection::Expired));
        }
        Ok(record)
    }

    /// Find a token by hash. When an identity is given the token must belong
    /// to that account, otherwise it counts as not found.
    async fn lookup_in(
        &self,
        conn: &mut SqliteConnection,
        purpose: TokenPurpose,
        token_hash: &str,
        identity: Option<&AccountIdentity>,
    ) -> PortalResult<TokenRecord> {
        let row = sqlx::query(&format!(
            "SELECT t.id, t.account_id, t.token_hash, t.created_at, t.expires_at, t.used,
                    a.email, a.category_id
             FROM {} t JOIN account a ON a.id = t.account_id
             WHERE t.token_hash = ?1",
            purpose.table()
        ))
        .bind(token_hash)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Err(reject(purpose, TokenRejection::NotFound));
        };

        if let Some(identity) = identity {
            let email: String = row.try_get("email")?;
            let category_id: i64 = row.try_get("category_id")?;
            let category_matches = identity.category_id.map_or(true, |id| id == category_id);
            if email != identity.email || !category_matches {
                return Err(reject(purpose, TokenRejection::NotFound));
            }
        }

        Ok(TokenRecord {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            token_hash: row.try_get("token_hash")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            used: row.try_get("used")?,
        })
    }

    /// Number of unused tokens an account holds for a purpose
    pub async fn live_count(&self, account_id: i64, purpose: TokenPurpose) -> PortalResult<i64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE account_id = ?1 AND used = 0",
            purpose.table()
        ))
        .bind(account_id)
        .fetch_one(&self.db)
        .await?;
        Ok(count)
    }
}

/// Used wins over expired so a consumed link reports as consumed
fn check_record(
    purpose: TokenPurpose,
    record: &TokenRecord,
    now: DateTime<Utc>,
) -> PortalResult<()> {
    if record.used {
        return Err(reject(purpose, TokenRejection::AlreadyUsed));
    }
    if record.expires_at <= now {
        return Err(reject(purpose, TokenRejection::Expired));
    }
    Ok(())
}

fn reject(purpose: TokenPurpose, reason: TokenRejection) -> PortalError {
    tracing::warn!(
        purpose = purpose.as_str(),
        reason = reason.as_str(),
        "token rejected"
    );
    metrics::TOKEN_REJECTIONS_TOTAL
        .with_label_values(&[purpose.as_str(), reason.as_str()])
        .inc();
    PortalError::TokenInvalid(reason)
}
