/// Form validation
///
/// Every check is an explicit function returning `Ok(value)` or a
/// `FieldError`. Forms collect failures into `FormErrors` so a client can
/// show all of them at once.
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key for errors that belong to the whole form rather than one field
pub const NON_FIELD_ERRORS: &str = "__all__";

pub const GMAIL_MESSAGE: &str = "Email must be a valid Gmail address (example@gmail.com).";
pub const PASSWORD_MESSAGE: &str =
    "Password must be min 8 chars and include uppercase, lowercase, digit and special char.";
pub const MISMATCH_MESSAGE: &str = "Passwords do not match.";
pub const CAPTCHA_MESSAGE: &str = "Captcha is incorrect.";
pub const TERMS_MESSAGE: &str = "You must accept the terms.";
pub const CATEGORY_MESSAGE: &str =
    "Select a valid choice. That choice is not one of the available choices.";
pub const DOCUMENT_MESSAGE: &str = "Only PDF or CSV files are allowed.";

/// Characters that satisfy the "special char" rule
const PASSWORD_SPECIALS: &str = "!@#$%^&*";

lazy_static! {
    static ref GMAIL_REGEX: Regex = Regex::new(r"^[a-z0-9._%+-]+@gmail\.com$").unwrap();
}

/// A single failed check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Accumulated form errors, field name -> messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn push(&mut self, error: FieldError) {
        self.add(error.field, error.message);
    }

    /// Record the error side of a check and pass the value through
    pub fn check<T>(&mut self, result: Result<T, FieldError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.push(error);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn first_message(&self) -> Option<&str> {
        self.0
            .values()
            .flat_map(|messages| messages.iter())
            .next()
            .map(String::as_str)
    }

    pub fn into_map(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }
}

impl From<FieldError> for FormErrors {
    fn from(error: FieldError) -> Self {
        FormErrors::single(error.field, error.message)
    }
}

impl fmt::Display for FormErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(" ")))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Case-normalize an email address for lookup and storage
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Accept only Gmail addresses; returns the normalized address
pub fn validate_gmail(email: &str) -> Result<String, FieldError> {
    let email = normalize_email(email);
    if GMAIL_REGEX.is_match(&email) {
        Ok(email)
    } else {
        Err(FieldError::new("email", GMAIL_MESSAGE))
    }
}

/// Min 8 chars with lower, upper, digit and one of `!@#$%^&*`
pub fn validate_password_strength(password: &str) -> Result<(), FieldError> {
    let long_enough = password.chars().count() >= 8;
    let single_line = !password.contains(['\n', '\r']);
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| PASSWORD_SPECIALS.contains(c));

    if long_enough && single_line && has_lower && has_upper && has_digit && has_special {
        Ok(())
    } else {
        Err(FieldError::new("password", PASSWORD_MESSAGE))
    }
}

pub fn passwords_match(password: &str, confirm: &str) -> Result<(), FieldError> {
    if password == confirm {
        Ok(())
    } else {
        Err(FieldError::new("confirm_password", MISMATCH_MESSAGE))
    }
}

/// HTML checkboxes post "on" when ticked and nothing otherwise
pub fn require_terms(terms: Option<&str>) -> Result<(), FieldError> {
    match terms.map(str::trim) {
        Some(value) if !value.is_empty() && value != "false" && value != "0" => Ok(()),
        _ => Err(FieldError::new("terms", TERMS_MESSAGE)),
    }
}

pub fn parse_category_id(raw: &str) -> Result<i64, FieldError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| FieldError::new("category", CATEGORY_MESSAGE))
}

/// Uploaded documents must be PDF or CSV; returns the extension
pub fn validate_document_name(file_name: &str) -> Result<&'static str, FieldError> {
    if file_name.ends_with(".pdf") {
        Ok("pdf")
    } else if file_name.ends_with(".csv") {
        Ok("csv")
    } else {
        Err(FieldError::new("file", DOCUMENT_MESSAGE))
    }
}

/// Raw registration form as posted
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub terms: Option<String>,
    #[serde(default)]
    pub captcha: String,
}

/// Registration input that passed every field-level check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedRegistration {
    pub email: String,
    pub password: String,
    pub category_id: i64,
}

impl RegistrationForm {
    /// Field-level checks. Lookups that need the store (category existence,
    /// duplicate email) happen in the account manager.
    pub fn clean(&self) -> Result<CleanedRegistration, FormErrors> {
        let mut errors = FormErrors::new();

        let email = errors.check(validate_gmail(&self.email));
        let strong = errors.check(validate_password_strength(&self.password));
        errors.check(passwords_match(&self.password, &self.confirm_password));
        let category_id = errors.check(parse_category_id(&self.category));
        errors.check(require_terms(self.terms.as_deref()));

        match (email, strong, category_id) {
            (Some(email), Some(()), Some(category_id)) if errors.is_empty() => {
                Ok(CleanedRegistration {
                    email,
                    password: self.password.clone(),
                    category_id,
                })
            }
            _ => Err(errors),
        }
    }
}
