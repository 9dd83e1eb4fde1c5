/// Configuration management for the account portal
use crate::error::{PortalError, PortalResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub email: Option<EmailConfig>,
    pub categories: Vec<CategorySeed>,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Deployment environment; production turns on the cookie Secure flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> PortalResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "debug" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(PortalError::Internal(format!(
                "Unknown PORTAL_ENVIRONMENT: {}",
                other
            ))),
        }
    }
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Base URL used in emailed links
    pub public_url: String,
    pub environment: Environment,
    pub max_upload_bytes: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub account_db: PathBuf,
    pub upload_directory: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Server secret: salt for token hashes and HS256 key for JWTs
    pub secret_key: String,
    pub activation_ttl_hours: i64,
    pub reset_ttl_hours: i64,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Category reference data inserted at startup when missing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySeed {
    pub name: String,
    pub slug: String,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests per second allowed on the auth form endpoints
    pub form_rps: u32,
    pub burst_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse `Name:slug,Name:slug`; a bare name gets a slug derived from it
pub fn parse_category_seeds(raw: &str) -> Vec<CategorySeed> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((name, slug)) => CategorySeed {
                name: name.trim().to_string(),
                slug: slug.trim().to_string(),
            },
            None => CategorySeed {
                name: entry.to_string(),
                slug: slugify(entry),
            },
        })
        .collect()
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> PortalResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("PORTAL_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORTAL_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|_| PortalError::Internal("Invalid port number".to_string()))?;
        let public_url = env::var("PORTAL_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", hostname, port));
        let environment = Environment::parse(
            &env::var("PORTAL_ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        )?;
        let max_upload_bytes = env_or("PORTAL_MAX_UPLOAD_BYTES", 10 * 1024 * 1024);

        let data_directory: PathBuf = env::var("PORTAL_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let account_db = env::var("PORTAL_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("portal.sqlite"));
        let upload_directory = env::var("PORTAL_UPLOAD_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("documents"));

        let secret_key = env::var("PORTAL_SECRET_KEY")
            .map_err(|_| PortalError::Internal("PORTAL_SECRET_KEY required".to_string()))?;

        let email = if let Ok(smtp_url) = env::var("PORTAL_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("PORTAL_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("noreply@{}", hostname)),
            })
        } else {
            None
        };

        let categories = env::var("PORTAL_SEED_CATEGORIES")
            .map(|raw| parse_category_seeds(&raw))
            .unwrap_or_default();

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let log_json = env::var("PORTAL_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                public_url: public_url.trim_end_matches('/').to_string(),
                environment,
                max_upload_bytes,
            },
            storage: StorageConfig {
                data_directory,
                account_db,
                upload_directory,
            },
            authentication: AuthConfig {
                secret_key,
                activation_ttl_hours: env_or("PORTAL_ACTIVATION_TTL_HOURS", 24),
                reset_ttl_hours: env_or("PORTAL_RESET_TTL_HOURS", 1),
                access_ttl_seconds: env_or("PORTAL_ACCESS_TTL_SECONDS", 15 * 60),
                refresh_ttl_seconds: env_or("PORTAL_REFRESH_TTL_SECONDS", 7 * 24 * 3600),
                session_ttl_seconds: env_or("PORTAL_SESSION_TTL_SECONDS", 14 * 24 * 3600),
            },
            email,
            categories,
            rate_limit: RateLimitConfig {
                enabled: env_or("PORTAL_RATE_LIMITS_ENABLED", true),
                form_rps: env_or("PORTAL_RATE_LIMIT_FORM_RPS", 5),
                burst_size: env_or("PORTAL_RATE_LIMIT_BURST", 10),
            },
            logging: LoggingConfig {
                level: log_level,
                json: log_json,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> PortalResult<()> {
        if self.service.hostname.is_empty() {
            return Err(PortalError::Internal("Hostname cannot be empty".to_string()));
        }

        if self.authentication.secret_key.len() < 32 {
            return Err(PortalError::Internal(
                "Secret key must be at least 32 characters".to_string(),
            ));
        }

        let auth = &self.authentication;
        if auth.activation_ttl_hours <= 0
            || auth.reset_ttl_hours <= 0
            || auth.access_ttl_seconds <= 0
            || auth.refresh_ttl_seconds <= 0
            || auth.session_ttl_seconds <= 0
        {
            return Err(PortalError::Internal(
                "Token and session lifetimes must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether cookies carry the Secure attribute
    pub fn secure_cookies(&self) -> bool {
        self.service.environment == Environment::Production
    }

    /// Configuration for tests: in-memory database, no SMTP
    pub fn for_tests() -> Self {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 8000,
                public_url: "http://localhost:8000".to_string(),
                environment: Environment::Development,
                max_upload_bytes: 1024 * 1024,
            },
            storage: StorageConfig {
                data_directory: PathBuf::from("./data"),
                account_db: PathBuf::from(":memory:"),
                upload_directory: std::env::temp_dir().join("account-portal-test-uploads"),
            },
            authentication: AuthConfig {
                secret_key: "test-secret-key-for-testing-only-0123456789".to_string(),
                activation_ttl_hours: 24,
                reset_ttl_hours: 1,
                access_ttl_seconds: 15 * 60,
                refresh_ttl_seconds: 7 * 24 * 3600,
                session_ttl_seconds: 14 * 24 * 3600,
            },
            email: None,
            categories: vec![],
            rate_limit: RateLimitConfig {
                enabled: false,
                form_rps: 5,
                burst_size: 10,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_category_seeds() {
        let seeds = parse_category_seeds("Student:student, Faculty Staff , ,Admin:admin");
        assert_eq!(
            seeds,
            vec![
                CategorySeed { name: "Student".into(), slug: "student".into() },
                CategorySeed { name: "Faculty Staff".into(), slug: "faculty-staff".into() },
                CategorySeed { name: "Admin".into(), slug: "admin".into() },
            ]
        );
    }

    #[test]
    fn test_validate_rejects_short_secret() {
        let mut config = ServerConfig::for_tests();
        assert!(config.validate().is_ok());
        config.authentication.secret_key = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config = ServerConfig::for_tests();
        config.authentication.reset_ttl_hours = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secure_cookies_follow_environment() {
        let mut config = ServerConfig::for_tests();
        assert!(!config.secure_cookies());
        config.service.environment = Environment::Production;
        assert!(config.secure_cookies());
    }
}
