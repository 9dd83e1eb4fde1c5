/// Account manager implementation using runtime queries
use crate::{
    account::{
        ActivationOutcome, Registration, ResendOutcome, ResetLink, ResetPasswordForm,
        DUPLICATE_EMAIL_MESSAGE, DUPLICATE_IN_CATEGORY_MESSAGE, INACTIVE_ACCOUNT_MESSAGE,
        INVALID_CREDENTIALS_MESSAGE,
    },
    auth::password::{dummy_verify, hash_password, verify_password},
    config::{CategorySeed, ServerConfig},
    db::{
        is_unique_violation,
        models::{Account, Category},
    },
    error::{PortalError, PortalResult},
    mailer::Mailer,
    metrics,
    session::SessionStore,
    tokens::{AccountIdentity, TokenPurpose, TokenStore},
    validation::{
        normalize_email, parse_category_id, passwords_match, validate_gmail,
        validate_password_strength, FieldError, RegistrationForm, CATEGORY_MESSAGE,
        NON_FIELD_ERRORS,
    },
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinHandle;

const ACCOUNT_COLUMNS: &str = "id, email, password_hash, category_id, first_name, last_name, \
                               is_active, is_staff, is_superuser, date_joined";

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
    config: Arc<ServerConfig>,
    tokens: TokenStore,
    mailer: Mailer,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>, mailer: Mailer) -> Self {
        let tokens = TokenStore::new(db.clone(), config.clone());
        Self {
            db,
            config,
            tokens,
            mailer,
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    // ========== Categories ==========

    /// Insert missing categories; existing names or slugs are left alone
    pub async fn seed_categories(&self, seeds: &[CategorySeed]) -> PortalResult<u64> {
        let mut inserted = 0;
        for seed in seeds {
            inserted += sqlx::query("INSERT OR IGNORE INTO category (name, slug) VALUES (?1, ?2)")
                .bind(&seed.name)
                .bind(&seed.slug)
                .execute(&self.db)
                .await?
                .rows_affected();
        }
        if inserted > 0 {
            tracing::info!("Seeded {} categories", inserted);
        }
        Ok(inserted)
    }

    pub async fn list_categories(&self) -> PortalResult<Vec<Category>> {
        let categories =
            sqlx::query_as::<_, Category>("SELECT id, name, slug FROM category ORDER BY name")
                .fetch_all(&self.db)
                .await?;
        Ok(categories)
    }

    pub async fn get_category(&self, id: i64) -> PortalResult<Option<Category>> {
        let category =
            sqlx::query_as::<_, Category>("SELECT id, name, slug FROM category WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.db)
                .await?;
        Ok(category)
    }

    // ========== Lookups ==========

    pub async fn get_account(&self, id: i64) -> PortalResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(account)
    }

    /// Case-insensitive email lookup
    pub async fn find_by_email(&self, email: &str) -> PortalResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account WHERE email = ?1"
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.db)
        .await?;
        Ok(account)
    }

    async fn find_in_category(&self, email: &str, category_id: i64) -> PortalResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account WHERE email = ?1 AND category_id = ?2"
        ))
        .bind(normalize_email(email))
        .bind(category_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(account)
    }

    // ========== Registration and activation ==========

    /// Create an inactive account, issue its activation token and mail the link
    ///
    /// Every failing check is reported together, the captcha result included.
    pub async fn register(
        &self,
        form: &RegistrationForm,
        captcha: Result<(), FieldError>,
    ) -> PortalResult<Registration> {
        let cleaned = form.clean();
        let mut errors = cleaned.as_ref().err().cloned().unwrap_or_default();
        errors.check(captcha);

        let category = match parse_category_id(&form.category) {
            Ok(id) => self.get_category(id).await?,
            Err(_) => None,
        };
        if category.is_none() && !errors.contains("category") {
            errors.add("category", CATEGORY_MESSAGE);
        }

        if let (Ok(email), Some(category)) = (validate_gmail(&form.email), &category) {
            if let Some(existing) = self.find_by_email(&email).await? {
                if existing.category_id == category.id {
                    errors.add(NON_FIELD_ERRORS, DUPLICATE_IN_CATEGORY_MESSAGE);
                } else {
                    errors.add("email", DUPLICATE_EMAIL_MESSAGE);
                }
            }
        }

        let (cleaned, category) = match (cleaned, category) {
            (Ok(cleaned), Some(category)) if errors.is_empty() => (cleaned, category),
            _ => {
                tracing::info!("Registration failed: {}", errors);
                return Err(PortalError::Validation(errors));
            }
        };

        let password_hash = hash_password(&cleaned.password)?;
        let ttl = self.tokens.ttl(TokenPurpose::Activation);

        let mut tx = self.db.begin().await?;
        let inserted = sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO account (email, password_hash, category_id, first_name, last_name,
                                  is_active, is_staff, is_superuser, date_joined)
             VALUES (?1, ?2, ?3, '', '', 0, 0, 0, ?4)
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(&cleaned.email)
        .bind(&password_hash)
        .bind(category.id)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await;

        let account = match inserted {
            Ok(account) => account,
            // Lost a race with a concurrent registration of the same address
            Err(e) if is_unique_violation(&e) => {
                return Err(PortalError::field("email", DUPLICATE_EMAIL_MESSAGE));
            }
            Err(e) => return Err(e.into()),
        };

        let issued = self
            .tokens
            .issue_in(&mut tx, account.id, TokenPurpose::Activation, ttl)
            .await?;
        tx.commit().await?;

        self.mailer
            .send_activation_email(
                &account,
                &issued.secret,
                self.config.authentication.activation_ttl_hours,
            )
            .await?;

        metrics::ACCOUNT_REGISTRATIONS_TOTAL
            .with_label_values(&[&category.slug])
            .inc();
        tracing::info!(
            account_id = account.id,
            category = %category.slug,
            "Registration success for {}",
            account.email
        );

        Ok(Registration {
            account,
            token: issued.record,
        })
    }

    /// Activate the account an activation link belongs to
    ///
    /// The token claim comes first so the transaction holds the write lock
    /// from its first statement. Concurrent uses of one link wait on each
    /// other and all but one see `AlreadyUsed`. An account that is already
    /// active still consumes the token and reports `AlreadyActive`.
    pub async fn activate(
        &self,
        secret: &str,
        email: &str,
        category_id: i64,
    ) -> PortalResult<ActivationOutcome> {
        let identity = AccountIdentity::new(email, Some(category_id));

        let mut tx = self.db.begin().await?;
        let record = self
            .tokens
            .claim_in(&mut tx, TokenPurpose::Activation, secret, Some(&identity))
            .await?;

        let flipped = sqlx::query("UPDATE account SET is_active = 1 WHERE id = ?1 AND is_active = 0")
            .bind(record.account_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        let outcome = if flipped == 1 {
            ActivationOutcome::Activated
        } else {
            ActivationOutcome::AlreadyActive
        };

        metrics::ACCOUNT_ACTIVATIONS_TOTAL
            .with_label_values(&[outcome.as_str()])
            .inc();
        tracing::info!(
            account_id = record.account_id,
            outcome = outcome.as_str(),
            "Activation link used"
        );
        Ok(outcome)
    }

    /// Issue and mail a fresh activation link, retiring the previous one
    pub async fn resend_activation(
        &self,
        email: &str,
        category: &str,
    ) -> PortalResult<ResendOutcome> {
        let Ok(category_id) = parse_category_id(category) else {
            return Ok(ResendOutcome::NotFound);
        };

        let Some(account) = self.find_in_category(email, category_id).await? else {
            tracing::debug!("Resend requested for unknown email/category");
            return Ok(ResendOutcome::NotFound);
        };

        if account.is_active {
            return Ok(ResendOutcome::AlreadyActive);
        }

        let issued = self
            .tokens
            .issue(
                account.id,
                TokenPurpose::Activation,
                self.tokens.ttl(TokenPurpose::Activation),
            )
            .await?;

        self.mailer
            .send_activation_email(
                &account,
                &issued.secret,
                self.config.authentication.activation_ttl_hours,
            )
            .await?;

        tracing::info!(account_id = account.id, "Activation link re-sent");
        Ok(ResendOutcome::Sent)
    }

    // ========== Login ==========

    /// Check email and password
    ///
    /// Bad credentials and an inactive account get different messages. The
    /// inactive message is only reachable with the correct password.
    pub async fn authenticate(&self, email: &str, password: &str) -> PortalResult<Account> {
        let Some(account) = self.find_by_email(email).await? else {
            dummy_verify(password);
            return Err(login_failure("unknown", INVALID_CREDENTIALS_MESSAGE));
        };

        if !verify_password(password, &account.password_hash) {
            return Err(login_failure("bad_password", INVALID_CREDENTIALS_MESSAGE));
        }

        if !account.is_active {
            return Err(login_failure("inactive", INACTIVE_ACCOUNT_MESSAGE));
        }

        metrics::LOGIN_ATTEMPTS_TOTAL
            .with_label_values(&["success"])
            .inc();
        tracing::info!(account_id = account.id, "Login succeeded");
        Ok(account)
    }

    // ========== Password reset ==========

    /// Start a password reset
    ///
    /// Only the account lookup runs before returning. Issuing the token and
    /// sending the mail happen in a background task whose failures are only
    /// logged, so the caller sees the same work whether or not the account
    /// exists. The handle is returned for callers that want to wait.
    pub async fn request_password_reset(
        &self,
        email: &str,
    ) -> PortalResult<Option<JoinHandle<()>>> {
        metrics::PASSWORD_RESET_REQUESTS_TOTAL.inc();

        let account = self
            .find_by_email(email)
            .await?
            .filter(|account| account.is_active);
        let Some(account) = account else {
            tracing::debug!("Password reset requested for unknown or inactive email");
            return Ok(None);
        };

        let tokens = self.tokens.clone();
        let mailer = self.mailer.clone();
        let expires_hours = self.config.authentication.reset_ttl_hours;
        let handle = tokio::spawn(async move {
            let ttl = tokens.ttl(TokenPurpose::PasswordReset);
            let issued = match tokens.issue(account.id, TokenPurpose::PasswordReset, ttl).await {
                Ok(issued) => issued,
                Err(e) => {
                    tracing::error!(account_id = account.id, "Password reset token issue failed: {}", e);
                    return;
                }
            };
            tracing::info!(account_id = account.id, "Password reset token issued");

            if let Err(e) = mailer
                .send_password_reset_email(&account, &issued.secret, expires_hours)
                .await
            {
                tracing::error!(account_id = account.id, "Password reset email failed: {}", e);
            }
        });

        Ok(Some(handle))
    }

    /// Check a reset link before showing the new-password form
    pub async fn check_reset_link(&self, secret: &str, email: &str) -> PortalResult<ResetLink> {
        let identity = AccountIdentity::new(email, None);
        self.tokens
            .validate(TokenPurpose::PasswordReset, secret, Some(&identity))
            .await?;
        Ok(ResetLink {
            email: identity.email,
            token: secret.to_string(),
        })
    }

    /// Set a new password with a reset token
    ///
    /// The password is hashed before the transaction opens. Inside it the
    /// token claim comes first, then the hash update and removal of the
    /// account's sessions, all committed together. Token errors win over a
    /// weak password, and a rejected attempt leaves the token unused.
    pub async fn complete_password_reset(&self, form: &ResetPasswordForm) -> PortalResult<()> {
        passwords_match(&form.password, &form.confirm_password)?;

        let new_hash = match validate_password_strength(&form.password) {
            Ok(()) => Ok(hash_password(&form.password)?),
            Err(e) => Err(e),
        };

        let identity = AccountIdentity::new(&form.email, None);
        let mut tx = self.db.begin().await?;
        let record = self
            .tokens
            .claim_in(&mut tx, TokenPurpose::PasswordReset, &form.token, Some(&identity))
            .await?;
        let password_hash = match new_hash {
            Ok(hash) => hash,
            Err(e) => {
                tx.rollback().await?;
                return Err(e.into());
            }
        };

        sqlx::query("UPDATE account SET password_hash = ?1 WHERE id = ?2")
            .bind(&password_hash)
            .bind(record.account_id)
            .execute(&mut *tx)
            .await?;

        let sessions = SessionStore::delete_for_account_in(&mut tx, record.account_id).await?;
        tx.commit().await?;

        metrics::PASSWORD_RESETS_COMPLETED_TOTAL.inc();
        tracing::info!(
            account_id = record.account_id,
            sessions_removed = sessions,
            "Password reset completed"
        );
        Ok(())
    }
}

fn login_failure(outcome: &str, message: &str) -> PortalError {
    metrics::LOGIN_ATTEMPTS_TOTAL
        .with_label_values(&[outcome])
        .inc();
    tracing::info!(outcome, "Login rejected");
    PortalError::Authentication(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        mailer::{token_from_body, RecordingTransport},
        tokens::TokenRejection,
        validation::{FormErrors, CAPTCHA_MESSAGE, GMAIL_MESSAGE, PASSWORD_MESSAGE},
    };
    use chrono::{DateTime, Duration};
    use tempfile::TempDir;

    struct Harness {
        manager: Arc<AccountManager>,
        recorder: Arc<RecordingTransport>,
        pool: SqlitePool,
    }

    async fn harness() -> Harness {
        harness_on(db::migrated_memory_pool().await.unwrap()).await
    }

    /// File-backed database so several connections contend for the write lock
    async fn file_harness() -> (Harness, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = db::create_pool(&dir.path().join("portal.db"), db::DatabaseOptions::default())
            .await
            .unwrap();
        db::run_migrations(&pool).await.unwrap();
        (harness_on(pool).await, dir)
    }

    async fn harness_on(pool: SqlitePool) -> Harness {
        let config = Arc::new(ServerConfig::for_tests());
        let recorder = Arc::new(RecordingTransport::new());
        let mailer = Mailer::with_transport(recorder.clone(), &config.service.public_url);
        let manager = AccountManager::new(pool.clone(), config, mailer);
        manager
            .seed_categories(&[
                CategorySeed { name: "Student".into(), slug: "student".into() },
                CategorySeed { name: "Faculty".into(), slug: "faculty".into() },
            ])
            .await
            .unwrap();
        Harness { manager: Arc::new(manager), recorder, pool }
    }

    fn form(email: &str, category: i64) -> RegistrationForm {
        RegistrationForm {
            email: email.to_string(),
            password: "Abc123!@".to_string(),
            confirm_password: "Abc123!@".to_string(),
            category: category.to_string(),
            terms: Some("on".to_string()),
            captcha: String::new(),
        }
    }

    fn form_errors(err: &PortalError) -> Option<&FormErrors> {
        match err {
            PortalError::Validation(errors) => Some(errors),
            _ => None,
        }
    }

    fn rejection(err: PortalError) -> TokenRejection {
        match err {
            PortalError::TokenInvalid(reason) => reason,
            other => panic!("expected token rejection, got {:?}", other),
        }
    }

    async fn student_id(h: &Harness) -> i64 {
        h.manager
            .list_categories()
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.slug == "student")
            .unwrap()
            .id
    }

    async fn register_and_secret(h: &Harness, email: &str, category: i64) -> (Account, String) {
        let registration = h.manager.register(&form(email, category), Ok(())).await.unwrap();
        let mail = h.recorder.last_to(email).unwrap();
        (registration.account, token_from_body(&mail.body).unwrap())
    }

    #[tokio::test]
    async fn test_register_creates_inactive_account_with_one_token() {
        let h = harness().await;
        let cat = student_id(&h).await;
        let before = Utc::now();
        let registration = h.manager.register(&form("a@gmail.com", cat), Ok(())).await.unwrap();

        assert!(!registration.account.is_active);
        assert_eq!(registration.account.email, "a@gmail.com");
        assert_eq!(registration.account.category_id, cat);
        assert_eq!(
            h.manager
                .tokens()
                .live_count(registration.account.id, TokenPurpose::Activation)
                .await
                .unwrap(),
            1
        );

        let expected = before + Duration::hours(24);
        let drift = (registration.token.expires_at - expected).num_seconds().abs();
        assert!(drift <= 5, "expiry off by {}s", drift);

        let mail = h.recorder.last_to("a@gmail.com").unwrap();
        assert!(mail.body.contains(&format!("category={}", cat)));
    }

    #[tokio::test]
    async fn test_register_reports_all_errors_together() {
        let h = harness().await;
        let mut bad = form("a@yahoo.com", 1);
        bad.password = "weak".to_string();
        bad.confirm_password = "other".to_string();
        bad.terms = None;

        let err = h
            .manager
            .register(&bad, Err(FieldError::new("captcha", CAPTCHA_MESSAGE)))
            .await
            .unwrap_err();
        let errors = form_errors(&err).unwrap();
        assert_eq!(errors.get("email"), [GMAIL_MESSAGE.to_string()]);
        assert_eq!(errors.get("password"), [PASSWORD_MESSAGE.to_string()]);
        assert!(errors.contains("confirm_password"));
        assert!(errors.contains("terms"));
        assert_eq!(errors.get("captcha"), [CAPTCHA_MESSAGE.to_string()]);
        assert!(h.recorder.sent().is_empty());
    }

    #[tokio::test]
    async fn test_register_rejects_unknown_category() {
        let h = harness().await;
        let err = h.manager.register(&form("a@gmail.com", 99), Ok(())).await.unwrap_err();
        assert_eq!(form_errors(&err).unwrap().get("category"), [CATEGORY_MESSAGE.to_string()]);
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let h = harness().await;
        let cat = student_id(&h).await;
        let other = if cat == 1 { 2 } else { 1 };
        h.manager.register(&form("a@gmail.com", cat), Ok(())).await.unwrap();

        let same = h.manager.register(&form("A@gmail.com", cat), Ok(())).await.unwrap_err();
        assert_eq!(
            form_errors(&same).unwrap().get(NON_FIELD_ERRORS),
            [DUPLICATE_IN_CATEGORY_MESSAGE.to_string()]
        );

        let cross = h.manager.register(&form("a@gmail.com", other), Ok(())).await.unwrap_err();
        assert_eq!(
            form_errors(&cross).unwrap().get("email"),
            [DUPLICATE_EMAIL_MESSAGE.to_string()]
        );
    }

    #[tokio::test]
    async fn test_activation_is_single_use() {
        let h = harness().await;
        let cat = student_id(&h).await;
        let (account, secret) = register_and_secret(&h, "a@gmail.com", cat).await;

        let outcome = h.manager.activate(&secret, "a@gmail.com", cat).await.unwrap();
        assert_eq!(outcome, ActivationOutcome::Activated);
        assert!(h.manager.get_account(account.id).await.unwrap().unwrap().is_active);

        let err = h.manager.activate(&secret, "a@gmail.com", cat).await.unwrap_err();
        assert_eq!(rejection(err), TokenRejection::AlreadyUsed);
    }

    #[tokio::test]
    async fn test_activation_requires_matching_identity() {
        let h = harness().await;
        let cat = student_id(&h).await;
        let (account, secret) = register_and_secret(&h, "a@gmail.com", cat).await;

        assert!(h.manager.activate(&secret, "b@gmail.com", cat).await.is_err());
        assert!(h.manager.activate(&secret, "a@gmail.com", cat + 100).await.is_err());
        assert!(!h.manager.get_account(account.id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_activating_active_account_is_noop_success() {
        let h = harness().await;
        let cat = student_id(&h).await;
        let (account, _) = register_and_secret(&h, "a@gmail.com", cat).await;

        sqlx::query("UPDATE account SET is_active = 1 WHERE id = ?1")
            .bind(account.id)
            .execute(&h.pool)
            .await
            .unwrap();
        let issued = h
            .manager
            .tokens()
            .issue(account.id, TokenPurpose::Activation, Duration::hours(24))
            .await
            .unwrap();

        let outcome = h.manager.activate(&issued.secret, "a@gmail.com", cat).await.unwrap();
        assert_eq!(outcome, ActivationOutcome::AlreadyActive);
    }

    #[tokio::test]
    async fn test_expired_activation_link() {
        let h = harness().await;
        let cat = student_id(&h).await;
        let (account, _) = register_and_secret(&h, "a@gmail.com", cat).await;
        let issued = h
            .manager
            .tokens()
            .issue(account.id, TokenPurpose::Activation, Duration::seconds(-1))
            .await
            .unwrap();

        let err = h.manager.activate(&issued.secret, "a@gmail.com", cat).await.unwrap_err();
        assert_eq!(rejection(err), TokenRejection::Expired);
    }

    #[tokio::test]
    async fn test_resend_activation() {
        let h = harness().await;
        let cat = student_id(&h).await;
        let (_, first) = register_and_secret(&h, "a@gmail.com", cat).await;

        assert_eq!(
            h.manager.resend_activation("nobody@gmail.com", &cat.to_string()).await.unwrap(),
            ResendOutcome::NotFound
        );
        assert_eq!(
            h.manager.resend_activation("a@gmail.com", "abc").await.unwrap(),
            ResendOutcome::NotFound
        );

        assert_eq!(
            h.manager.resend_activation("A@Gmail.com", &cat.to_string()).await.unwrap(),
            ResendOutcome::Sent
        );
        let second = token_from_body(&h.recorder.last_to("a@gmail.com").unwrap().body).unwrap();
        assert_ne!(first, second);

        let err = h.manager.activate(&first, "a@gmail.com", cat).await.unwrap_err();
        assert_eq!(rejection(err), TokenRejection::AlreadyUsed);
        h.manager.activate(&second, "a@gmail.com", cat).await.unwrap();

        assert_eq!(
            h.manager.resend_activation("a@gmail.com", &cat.to_string()).await.unwrap(),
            ResendOutcome::AlreadyActive
        );
    }

    #[tokio::test]
    async fn test_login_messages_stay_distinct() {
        let h = harness().await;
        let cat = student_id(&h).await;
        let (_, secret) = register_and_secret(&h, "a@gmail.com", cat).await;

        let message = |err: PortalError| match err {
            PortalError::Authentication(message) => message,
            other => panic!("expected authentication failure, got {:?}", other),
        };

        let unknown = h.manager.authenticate("x@gmail.com", "Abc123!@").await.unwrap_err();
        assert_eq!(message(unknown), INVALID_CREDENTIALS_MESSAGE);

        let inactive = h.manager.authenticate("a@gmail.com", "Abc123!@").await.unwrap_err();
        assert_eq!(message(inactive), INACTIVE_ACCOUNT_MESSAGE);

        let wrong = h.manager.authenticate("a@gmail.com", "Wrong123!").await.unwrap_err();
        assert_eq!(message(wrong), INVALID_CREDENTIALS_MESSAGE);

        h.manager.activate(&secret, "a@gmail.com", cat).await.unwrap();
        let account = h.manager.authenticate("A@GMAIL.com", "Abc123!@").await.unwrap();
        assert_eq!(account.email, "a@gmail.com");
    }

    #[tokio::test]
    async fn test_activation_races_have_one_winner() {
        let (h, _dir) = file_harness().await;
        let cat = student_id(&h).await;
        let (account, secret) = register_and_secret(&h, "a@gmail.com", cat).await;

        for round in 0..5 {
            let secret = if round == 0 {
                secret.clone()
            } else {
                h.manager
                    .tokens()
                    .issue(account.id, TokenPurpose::Activation, Duration::hours(24))
                    .await
                    .unwrap()
                    .secret
            };

            let attempts: Vec<_> = (0..4)
                .map(|_| {
                    let manager = h.manager.clone();
                    let secret = secret.clone();
                    tokio::spawn(async move { manager.activate(&secret, "a@gmail.com", cat).await })
                })
                .collect();

            let mut winners = Vec::new();
            for attempt in attempts {
                match attempt.await.unwrap() {
                    Ok(outcome) => winners.push(outcome),
                    Err(PortalError::TokenInvalid(TokenRejection::AlreadyUsed)) => {}
                    Err(other) => panic!("round {}: unexpected error {:?}", round, other),
                }
            }

            let expected = if round == 0 {
                ActivationOutcome::Activated
            } else {
                ActivationOutcome::AlreadyActive
            };
            assert_eq!(winners, vec![expected], "round {}", round);
        }

        assert!(h.manager.get_account(account.id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_reset_request_only_for_active_accounts() {
        let h = harness().await;
        let cat = student_id(&h).await;
        let (account, secret) = register_and_secret(&h, "a@gmail.com", cat).await;

        assert!(h.manager.request_password_reset("nobody@gmail.com").await.unwrap().is_none());
        assert!(h.manager.request_password_reset("a@gmail.com").await.unwrap().is_none());

        h.manager.activate(&secret, "a@gmail.com", cat).await.unwrap();
        for _ in 0..2 {
            h.manager
                .request_password_reset("a@gmail.com")
                .await
                .unwrap()
                .unwrap()
                .await
                .unwrap();
        }

        assert_eq!(
            h.manager
                .tokens()
                .live_count(account.id, TokenPurpose::PasswordReset)
                .await
                .unwrap(),
            1
        );
        let (created_at, expires_at): (DateTime<Utc>, DateTime<Utc>) = sqlx::query_as(
            "SELECT created_at, expires_at FROM password_reset_token WHERE used = 0",
        )
        .fetch_one(&h.pool)
        .await
        .unwrap();
        assert_eq!(expires_at - created_at, Duration::hours(1));

        let resets = h
            .recorder
            .sent()
            .into_iter()
            .filter(|mail| mail.subject.contains("Reset"))
            .count();
        assert_eq!(resets, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reset_request_returns_before_token_is_written() {
        let (h, _dir) = file_harness().await;
        let cat = student_id(&h).await;
        let (account, secret) = register_and_secret(&h, "a@gmail.com", cat).await;
        h.manager.activate(&secret, "a@gmail.com", cat).await.unwrap();

        // Hold the write lock so issuing cannot finish
        let mut writer = h.pool.begin().await.unwrap();
        sqlx::query("UPDATE category SET name = name WHERE id = ?1")
            .bind(cat)
            .execute(&mut *writer)
            .await
            .unwrap();

        let handle = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            h.manager.request_password_reset("a@gmail.com"),
        )
        .await
        .expect("reset request waited on the token write")
        .unwrap()
        .unwrap();
        assert_eq!(
            h.manager
                .tokens()
                .live_count(account.id, TokenPurpose::PasswordReset)
                .await
                .unwrap(),
            0
        );

        writer.commit().await.unwrap();
        handle.await.unwrap();

        assert_eq!(
            h.manager
                .tokens()
                .live_count(account.id, TokenPurpose::PasswordReset)
                .await
                .unwrap(),
            1
        );
        let mail = h.recorder.last_to("a@gmail.com").unwrap();
        assert!(mail.subject.contains("Reset"));
    }

    async fn active_with_reset(h: &Harness) -> (Account, String) {
        let cat = student_id(h).await;
        let (account, secret) = register_and_secret(h, "a@gmail.com", cat).await;
        h.manager.activate(&secret, "a@gmail.com", cat).await.unwrap();
        let issued = h
            .manager
            .tokens()
            .issue(account.id, TokenPurpose::PasswordReset, Duration::hours(1))
            .await
            .unwrap();
        (account, issued.secret)
    }

    fn reset_form(token: &str, password: &str, confirm: &str) -> ResetPasswordForm {
        ResetPasswordForm {
            token: token.to_string(),
            email: "a@gmail.com".to_string(),
            password: password.to_string(),
            confirm_password: confirm.to_string(),
        }
    }

    #[tokio::test]
    async fn test_complete_reset_changes_password_once() {
        let h = harness().await;
        let (account, token) = active_with_reset(&h).await;

        sqlx::query(
            "INSERT INTO web_session (id, account_id, data, created_at, expires_at)
             VALUES ('h', ?1, '{}', ?2, ?2)",
        )
        .bind(account.id)
        .bind(Utc::now() + Duration::hours(1))
        .execute(&h.pool)
        .await
        .unwrap();

        let link = h.manager.check_reset_link(&token, "A@gmail.com").await.unwrap();
        assert_eq!(link.email, "a@gmail.com");

        h.manager
            .complete_password_reset(&reset_form(&token, "Newpass1!", "Newpass1!"))
            .await
            .unwrap();

        assert!(h.manager.authenticate("a@gmail.com", "Newpass1!").await.is_ok());
        assert!(h.manager.authenticate("a@gmail.com", "Abc123!@").await.is_err());

        let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM web_session")
            .fetch_one(&h.pool)
            .await
            .unwrap();
        assert_eq!(sessions, 0);

        let err = h
            .manager
            .complete_password_reset(&reset_form(&token, "Other12!x", "Other12!x"))
            .await
            .unwrap_err();
        assert_eq!(rejection(err), TokenRejection::AlreadyUsed);
    }

    #[tokio::test]
    async fn test_complete_reset_rejects_mismatch_and_weak_password() {
        let h = harness().await;
        let (_, token) = active_with_reset(&h).await;

        let mismatch = h
            .manager
            .complete_password_reset(&reset_form(&token, "Newpass1!", "Newpass1?"))
            .await
            .unwrap_err();
        assert!(form_errors(&mismatch).unwrap().contains("confirm_password"));

        let weak = h
            .manager
            .complete_password_reset(&reset_form(&token, "newpass", "newpass"))
            .await
            .unwrap_err();
        assert_eq!(form_errors(&weak).unwrap().get("password"), [PASSWORD_MESSAGE.to_string()]);

        // Nothing was consumed by the failed attempts
        assert!(h.manager.check_reset_link(&token, "a@gmail.com").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reset_completion_consumes_token_once() {
        let (h, _dir) = file_harness().await;
        let (_, token) = active_with_reset(&h).await;

        let attempts: Vec<_> = ["Newpass1!", "Newpass2!", "Newpass3!"]
            .into_iter()
            .map(|password| {
                let manager = h.manager.clone();
                let form = reset_form(&token, password, password);
                tokio::spawn(async move { manager.complete_password_reset(&form).await })
            })
            .collect();

        let mut succeeded = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(()) => succeeded += 1,
                Err(PortalError::TokenInvalid(TokenRejection::AlreadyUsed)) => {}
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
        assert_eq!(succeeded, 1);
    }

    #[tokio::test]
    async fn test_reset_link_bound_to_email() {
        let h = harness().await;
        let (_, token) = active_with_reset(&h).await;
        let err = h.manager.check_reset_link(&token, "b@gmail.com").await.unwrap_err();
        assert_eq!(rejection(err), TokenRejection::NotFound);
    }
}
