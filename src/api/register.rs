/// Registration and activation endpoints
use crate::{
    account::{
        registered_message, ActivationQuery, ResendActivationForm,
        INVALID_ACTIVATION_LINK_MESSAGE, RESEND_INSTRUCTIONS_MESSAGE,
    },
    api::{persist_session, MessageResponse},
    captcha,
    context::AppContext,
    db::models::Category,
    error::{PortalError, PortalResult},
    session::CurrentSession,
    validation::{parse_category_id, RegistrationForm, NON_FIELD_ERRORS},
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Form, Json, Router,
};
use serde::Serialize;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/register", get(register_form).post(register))
        .route("/activate", get(activate))
        .route(
            "/resend-activation",
            get(resend_instructions).post(resend_activation),
        )
}

#[derive(Debug, Serialize)]
struct RegisterFormResponse {
    captcha_question: String,
    categories: Vec<Category>,
}

/// Issue a captcha and list the categories to choose from
async fn register_form(
    State(ctx): State<AppContext>,
    CurrentSession(mut session): CurrentSession,
) -> PortalResult<Response> {
    let captcha_question = captcha::issue(&mut session.data);
    let cookies = persist_session(&ctx, &mut session).await?;
    let categories = ctx.account_manager.list_categories().await?;

    Ok((
        cookies,
        Json(RegisterFormResponse {
            captcha_question,
            categories,
        }),
    )
        .into_response())
}

/// Create an inactive account
///
/// The captcha is checked against the session, then rotated whatever the
/// outcome, so one answer cannot be replayed.
async fn register(
    State(ctx): State<AppContext>,
    CurrentSession(mut session): CurrentSession,
    Form(form): Form<RegistrationForm>,
) -> PortalResult<Response> {
    let captcha_result = captcha::verify(&session.data, &form.captcha);
    captcha::issue(&mut session.data);
    let cookies = persist_session(&ctx, &mut session).await?;

    match ctx.account_manager.register(&form, captcha_result).await {
        Ok(_) => Ok((
            StatusCode::CREATED,
            cookies,
            Json(MessageResponse::new(registered_message(
                ctx.config.authentication.activation_ttl_hours,
            ))),
        )
            .into_response()),
        Err(err) => Ok((cookies, err).into_response()),
    }
}

fn invalid_activation_link() -> PortalError {
    PortalError::field(NON_FIELD_ERRORS, INVALID_ACTIVATION_LINK_MESSAGE)
}

async fn activate(
    State(ctx): State<AppContext>,
    Query(query): Query<ActivationQuery>,
) -> PortalResult<Json<MessageResponse>> {
    let (Some(token), Some(email), Some(category)) = (
        query.token.filter(|v| !v.is_empty()),
        query.email.filter(|v| !v.is_empty()),
        query.category.filter(|v| !v.is_empty()),
    ) else {
        return Err(invalid_activation_link());
    };
    let category_id = parse_category_id(&category).map_err(|_| invalid_activation_link())?;

    let outcome = ctx
        .account_manager
        .activate(&token, &email, category_id)
        .await?;
    Ok(Json(MessageResponse::new(outcome.message())))
}

async fn resend_instructions() -> Json<MessageResponse> {
    Json(MessageResponse::new(RESEND_INSTRUCTIONS_MESSAGE))
}

async fn resend_activation(
    State(ctx): State<AppContext>,
    Form(form): Form<ResendActivationForm>,
) -> PortalResult<Json<MessageResponse>> {
    let outcome = ctx
        .account_manager
        .resend_activation(&form.email, &form.category)
        .await?;
    Ok(Json(MessageResponse::new(outcome.message())))
}
