/// Forgot/reset password endpoints
use crate::{
    account::{
        ForgotPasswordForm, ResetLink, ResetLinkQuery, ResetPasswordForm,
        RESET_COMPLETE_MESSAGE, RESET_REQUESTED_MESSAGE,
    },
    api::{persist_session, MessageResponse},
    captcha,
    context::AppContext,
    error::{PortalError, PortalResult},
    session::CurrentSession,
};
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use serde_json::json;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route(
            "/forgot-password",
            get(forgot_password_form).post(forgot_password),
        )
        .route("/reset-password", get(reset_password_form).post(reset_password))
}

async fn forgot_password_form(
    State(ctx): State<AppContext>,
    CurrentSession(mut session): CurrentSession,
) -> PortalResult<Response> {
    let captcha_question = captcha::issue(&mut session.data);
    let cookies = persist_session(&ctx, &mut session).await?;
    Ok((cookies, Json(json!({ "captcha_question": captcha_question }))).into_response())
}

/// Request a reset link
///
/// After the captcha the body is the same whether or not an active account
/// exists for the email.
async fn forgot_password(
    State(ctx): State<AppContext>,
    CurrentSession(mut session): CurrentSession,
    Form(form): Form<ForgotPasswordForm>,
) -> PortalResult<Response> {
    let captcha_result = captcha::verify(&session.data, &form.captcha);
    captcha::issue(&mut session.data);
    let cookies = persist_session(&ctx, &mut session).await?;

    if let Err(e) = captcha_result {
        return Ok((cookies, PortalError::from(e)).into_response());
    }

    ctx.account_manager
        .request_password_reset(&form.email)
        .await?;

    Ok((cookies, Json(MessageResponse::new(RESET_REQUESTED_MESSAGE))).into_response())
}

async fn reset_password_form(
    State(ctx): State<AppContext>,
    Query(query): Query<ResetLinkQuery>,
) -> PortalResult<Json<ResetLink>> {
    let link = ctx
        .account_manager
        .check_reset_link(&query.token, &query.email)
        .await?;
    Ok(Json(link))
}

async fn reset_password(
    State(ctx): State<AppContext>,
    Form(form): Form<ResetPasswordForm>,
) -> PortalResult<Json<MessageResponse>> {
    ctx.account_manager.complete_password_reset(&form).await?;
    Ok(Json(MessageResponse::new(RESET_COMPLETE_MESSAGE)))
}
