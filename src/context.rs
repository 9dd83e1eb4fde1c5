/// Application context and dependency injection
use crate::{
    account::AccountManager,
    config::ServerConfig,
    db,
    documents::DocumentStore,
    error::{PortalError, PortalResult},
    mailer::Mailer,
    rate_limit::RateLimiter,
    session::SessionStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub account_db: SqlitePool,
    pub account_manager: Arc<AccountManager>,
    pub sessions: SessionStore,
    pub documents: DocumentStore,
    pub rate_limiter: Arc<RateLimiter>,
    pub mailer: Mailer,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> PortalResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let account_db =
            db::create_pool(&config.storage.account_db, db::DatabaseOptions::default()).await?;
        db::run_migrations(&account_db).await?;
        db::test_connection(&account_db).await?;

        let mailer = Mailer::new(config.email.as_ref(), &config.service.public_url)?;
        if !mailer.is_configured() {
            tracing::warn!("PORTAL_EMAIL_SMTP_URL not set; activation and reset mail will be skipped");
        }

        let ctx = Self::assemble(config, account_db, mailer);
        ctx.account_manager
            .seed_categories(&ctx.config.categories)
            .await?;

        Ok(ctx)
    }

    /// Wire services over an existing pool and mailer
    pub fn assemble(config: ServerConfig, account_db: SqlitePool, mailer: Mailer) -> Self {
        let config = Arc::new(config);
        let account_manager = Arc::new(AccountManager::new(
            account_db.clone(),
            config.clone(),
            mailer.clone(),
        ));
        let sessions = SessionStore::new(account_db.clone(), config.clone());
        let documents = DocumentStore::new(account_db.clone(), config.clone());
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        Self {
            config,
            account_db,
            account_manager,
            sessions,
            documents,
            rate_limiter,
            mailer,
        }
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> PortalResult<()> {
        for dir in [
            &config.storage.data_directory,
            &config.storage.upload_directory,
        ] {
            if !dir.exists() {
                tokio::fs::create_dir_all(dir).await.map_err(|e| {
                    PortalError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
                })?;
            }
        }
        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> &str {
        &self.config.service.public_url
    }
}
