/// Arithmetic captcha bound to the caller's session
use crate::{
    session::SessionData,
    validation::{FieldError, CAPTCHA_MESSAGE},
};
use chrono::Utc;
use rand::{rngs::OsRng, Rng};
use serde_json::Value;

const ANSWER_KEY: &str = "captcha_answer";
const ISSUED_AT_KEY: &str = "captcha_ts";

/// Issue a fresh `a + b` challenge, replacing any previous one, and return
/// the question to show
pub fn issue(data: &mut SessionData) -> String {
    let a: i64 = OsRng.gen_range(1..=9);
    let b: i64 = OsRng.gen_range(1..=9);
    data.insert(ANSWER_KEY, a + b);
    data.insert(ISSUED_AT_KEY, Utc::now().timestamp_millis() as f64 / 1000.0);
    format!("{} + {} = ?", a, b)
}

/// Expected answer rendered as text; empty when no challenge was issued
fn expected(data: &SessionData) -> String {
    match data.get_value(ANSWER_KEY) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Compare the posted answer against the stored one as strings
pub fn verify(data: &SessionData, posted: &str) -> Result<(), FieldError> {
    if posted.trim() == expected(data) {
        Ok(())
    } else {
        Err(FieldError::new("captcha", CAPTCHA_MESSAGE))
    }
}

/// Stored answer, for tests that need to solve the challenge
pub fn stored_answer(data: &SessionData) -> Option<i64> {
    data.get(ANSWER_KEY)
}
