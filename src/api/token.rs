/// Bearer-token API endpoints
use crate::{
    account::AccountProfile,
    auth::{
        cookies::{build_cookie, cookie_value, set_cookie_headers, ACCESS_COOKIE, REFRESH_COOKIE},
        jwt::{self, TokenType},
        BearerAuth,
    },
    context::AppContext,
    error::{PortalError, PortalResult},
};
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/me", get(me))
        .route("/api/token/refresh", post(refresh))
}

async fn me(auth: BearerAuth) -> Json<AccountProfile> {
    Json(AccountProfile::from(&auth.account))
}

#[derive(Debug, Default, Deserialize)]
struct RefreshRequest {
    refresh: Option<String>,
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    access: String,
}

/// Mint a new access token from a refresh token in the `refresh` cookie or
/// the JSON body
async fn refresh(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> PortalResult<Response> {
    let token = cookie_value(&headers, REFRESH_COOKIE)
        .or_else(|| body.and_then(|Json(body)| body.refresh))
        .ok_or_else(|| {
            PortalError::Authentication("Refresh token was not provided.".to_string())
        })?;

    let claims = jwt::verify(&ctx.config, &token, TokenType::Refresh)?;
    let account = ctx
        .account_manager
        .get_account(claims.account_id()?)
        .await?
        .filter(|account| account.is_active)
        .ok_or_else(|| PortalError::Authentication("Invalid token".to_string()))?;

    let access = jwt::mint(&ctx.config, account.id, &account.email, TokenType::Access)?;
    let cookies = set_cookie_headers([build_cookie(
        ACCESS_COOKIE,
        &access,
        ctx.config.authentication.access_ttl_seconds,
        ctx.config.secure_cookies(),
    )]);

    tracing::debug!(account_id = account.id, "Access token refreshed");
    Ok((cookies, Json(RefreshResponse { access })).into_response())
}
