/// Login, logout and the logged-in landing page
use crate::{
    account::{AccountProfile, LoginForm},
    auth::{cookies::set_cookie_headers, jwt, login_cookies, logout_cookies, SessionAuth},
    context::AppContext,
    error::PortalResult,
    session::CurrentSession,
};
use axum::{
    extract::State,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Form, Json, Router,
};
use serde_json::json;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/login", get(login_form).post(login))
        .route("/logout", get(logout).post(logout))
        .route("/home", get(home))
}

async fn login_form() -> Json<serde_json::Value> {
    Json(json!({ "fields": ["email", "password"] }))
}

/// Check credentials, rotate the session onto the account and set the
/// session, access and refresh cookies
async fn login(
    State(ctx): State<AppContext>,
    CurrentSession(mut session): CurrentSession,
    Form(form): Form<LoginForm>,
) -> PortalResult<Response> {
    let account = ctx
        .account_manager
        .authenticate(&form.email, &form.password)
        .await?;

    ctx.sessions.login(&mut session, account.id).await?;
    let pair = jwt::mint_pair(&ctx.config, account.id, &account.email)?;
    let cookies = set_cookie_headers(login_cookies(&ctx.config, &session, &pair));

    Ok((cookies, Redirect::to("/home")).into_response())
}

/// Drop the server session. Access and refresh tokens stay valid until
/// they expire.
async fn logout(
    State(ctx): State<AppContext>,
    CurrentSession(mut session): CurrentSession,
) -> PortalResult<Response> {
    let account_id = session.account_id;
    ctx.sessions.destroy(&mut session).await?;
    if let Some(account_id) = account_id {
        tracing::info!(account_id, "Logged out");
    }

    let cookies = set_cookie_headers(logout_cookies(&ctx.config));
    Ok((cookies, Redirect::to("/login")).into_response())
}

async fn home(auth: SessionAuth) -> Json<AccountProfile> {
    Json(AccountProfile::from(&auth.account))
}
