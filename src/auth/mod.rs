/// Authentication extractors and utilities
pub mod cookies;
pub mod jwt;
pub mod password;

use crate::{
    config::ServerConfig,
    context::AppContext,
    db::models::Account,
    error::PortalError,
    session::{CurrentSession, Session, SESSION_COOKIE},
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use cookies::{build_cookie, cookie_value, expire_cookie, ACCESS_COOKIE, REFRESH_COOKIE};
use jwt::{Claims, TokenPair, TokenType};

/// Cookie carrying the server session id
pub fn session_cookie(config: &ServerConfig, session: &Session) -> String {
    build_cookie(
        SESSION_COOKIE,
        &session.id,
        config.authentication.session_ttl_seconds,
        config.secure_cookies(),
    )
}

/// Cookies set on a successful login: session, access and refresh
pub fn login_cookies(config: &ServerConfig, session: &Session, pair: &TokenPair) -> Vec<String> {
    let secure = config.secure_cookies();
    vec![
        session_cookie(config, session),
        build_cookie(
            ACCESS_COOKIE,
            &pair.access,
            config.authentication.access_ttl_seconds,
            secure,
        ),
        build_cookie(
            REFRESH_COOKIE,
            &pair.refresh,
            config.authentication.refresh_ttl_seconds,
            secure,
        ),
    ]
}

/// Logout only drops the session cookie; JWT cookies expire on their own
pub fn logout_cookies(config: &ServerConfig) -> Vec<String> {
    vec![expire_cookie(SESSION_COOKIE, config.secure_cookies())]
}

/// Caller authenticated by an access JWT, from `Authorization: Bearer` or
/// the `access` cookie
#[derive(Debug, Clone)]
pub struct BearerAuth {
    pub claims: Claims,
    pub account: Account,
}

#[async_trait]
impl FromRequestParts<AppContext> for BearerAuth {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .typed_get::<Authorization<Bearer>>()
            .map(|auth| auth.token().to_string())
            .or_else(|| cookie_value(&parts.headers, ACCESS_COOKIE))
            .ok_or_else(|| {
                PortalError::Authentication(
                    "Authentication credentials were not provided.".to_string(),
                )
            })?;

        let claims = jwt::verify(&state.config, &token, TokenType::Access)?;
        let account = state
            .account_manager
            .get_account(claims.account_id()?)
            .await?
            .filter(|account| account.is_active)
            .ok_or_else(|| PortalError::Authentication("Invalid token".to_string()))?;

        Ok(BearerAuth { claims, account })
    }
}

/// Caller logged in through a server session
#[derive(Debug, Clone)]
pub struct SessionAuth {
    pub session: Session,
    pub account: Account,
}

#[async_trait]
impl FromRequestParts<AppContext> for SessionAuth {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let CurrentSession(session) = CurrentSession::from_request_parts(parts, state).await?;
        let account_id = session
            .account_id
            .ok_or_else(|| PortalError::Authentication("Login required.".to_string()))?;

        let account = state
            .account_manager
            .get_account(account_id)
            .await?
            .filter(|account| account.is_active)
            .ok_or_else(|| PortalError::Authentication("Login required.".to_string()))?;

        Ok(SessionAuth { session, account })
    }
}
