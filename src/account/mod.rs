/// Account management system
///
/// Registration, activation, login checks and password reset, plus the
/// category reference data every account points at.

mod manager;

pub use manager::AccountManager;

use crate::db::models::{Account, TokenRecord};
use serde::{Deserialize, Serialize};

pub const ACTIVATED_MESSAGE: &str = "Account activated. You can now log in.";
pub const ALREADY_ACTIVE_MESSAGE: &str = "Account is already active. Please login.";
pub const INVALID_ACTIVATION_LINK_MESSAGE: &str = "Invalid activation link.";
pub const RESEND_INSTRUCTIONS_MESSAGE: &str =
    "Send POST request with email and category id to resend activation.";
pub const RESEND_SENT_MESSAGE: &str = "New activation link sent to your email.";
pub const RESEND_NOT_FOUND_MESSAGE: &str = "No inactive account found for this email and category.";
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid credentials";
pub const INACTIVE_ACCOUNT_MESSAGE: &str = "Account inactive. Activate via email.";
pub const DUPLICATE_IN_CATEGORY_MESSAGE: &str =
    "This email is already registered for the selected category.";
pub const DUPLICATE_EMAIL_MESSAGE: &str = "This email is already registered.";
pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists for the provided email, a password reset link has been sent.";
pub const RESET_COMPLETE_MESSAGE: &str = "Password has been reset. You can now login.";

pub fn registered_message(ttl_hours: i64) -> String {
    format!(
        "Registration successful. Check your Gmail for activation link (expires in {} hours).",
        ttl_hours
    )
}

/// A newly created, inactive account and its activation token
#[derive(Debug)]
pub struct Registration {
    pub account: Account,
    pub token: TokenRecord,
}

/// Both outcomes are successes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    Activated,
    AlreadyActive,
}

impl ActivationOutcome {
    pub fn message(self) -> &'static str {
        match self {
            ActivationOutcome::Activated => ACTIVATED_MESSAGE,
            ActivationOutcome::AlreadyActive => ALREADY_ACTIVE_MESSAGE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActivationOutcome::Activated => "activated",
            ActivationOutcome::AlreadyActive => "already_active",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendOutcome {
    Sent,
    AlreadyActive,
    NotFound,
}

impl ResendOutcome {
    pub fn message(self) -> &'static str {
        match self {
            ResendOutcome::Sent => RESEND_SENT_MESSAGE,
            ResendOutcome::AlreadyActive => ALREADY_ACTIVE_MESSAGE,
            ResendOutcome::NotFound => RESEND_NOT_FOUND_MESSAGE,
        }
    }
}

/// Query string of an activation link
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivationQuery {
    pub token: Option<String>,
    pub email: Option<String>,
    pub category: Option<String>,
}

/// Resend-activation form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResendActivationForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub category: String,
}

/// Login form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Forgot-password form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForgotPasswordForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub captcha: String,
}

/// Query string of a reset link
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetLinkQuery {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub email: String,
}

/// Reset completion form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetPasswordForm {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
}

/// Echoed back so the client can render the new-password form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetLink {
    pub email: String,
    pub token: String,
}

/// Public view of an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountProfile {
    pub id: i64,
    pub email: String,
    pub category_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub date_joined: chrono::DateTime<chrono::Utc>,
}

impl From<&Account> for AccountProfile {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
            category_id: account.category_id,
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            is_active: account.is_active,
            is_staff: account.is_staff,
            date_joined: account.date_joined,
        }
    }
}
