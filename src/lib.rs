//! Account portal
//!
//! Category-scoped registration with emailed activation links, password
//! reset, and session plus JWT cookie login.

pub mod account;
pub mod api;
pub mod auth;
pub mod captcha;
pub mod config;
pub mod context;
pub mod db;
pub mod documents;
pub mod error;
pub mod mailer;
pub mod metrics;
pub mod rate_limit;
pub mod server;
pub mod session;
pub mod tokens;
pub mod validation;
