/// API routes and handlers
pub mod documents;
pub mod health;
pub mod login;
pub mod password;
pub mod register;
pub mod token;

use crate::{
    auth::{cookies::set_cookie_headers, session_cookie},
    context::AppContext,
    error::PortalResult,
    session::Session,
};
use axum::{http::HeaderMap, Router};
use serde::{Deserialize, Serialize};

/// Body of every plain success response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Save the session and return the cookie that points at it
pub(crate) async fn persist_session(
    ctx: &AppContext,
    session: &mut Session,
) -> PortalResult<HeaderMap> {
    ctx.sessions.save(session).await?;
    Ok(set_cookie_headers([session_cookie(&ctx.config, session)]))
}

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(register::routes())
        .merge(login::routes())
        .merge(password::routes())
        .merge(documents::routes())
        .merge(token::routes())
}
