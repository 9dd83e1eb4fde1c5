/// Access and refresh JWTs (HS256)
use crate::{
    config::ServerConfig,
    error::{PortalError, PortalResult},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account id
    pub sub: String,
    pub email: String,
    pub token_type: TokenType,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn account_id(&self) -> PortalResult<i64> {
        self.sub
            .parse()
            .map_err(|_| PortalError::Authentication("Invalid token subject".to_string()))
    }
}

/// A freshly minted access/refresh pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

fn lifetime(config: &ServerConfig, token_type: TokenType) -> i64 {
    match token_type {
        TokenType::Access => config.authentication.access_ttl_seconds,
        TokenType::Refresh => config.authentication.refresh_ttl_seconds,
    }
}

/// Mint one token
pub fn mint(
    config: &ServerConfig,
    account_id: i64,
    email: &str,
    token_type: TokenType,
) -> PortalResult<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: account_id.to_string(),
        email: email.to_string(),
        token_type,
        jti: Uuid::new_v4().to_string(),
        iat: now,
        exp: now + lifetime(config, token_type),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.authentication.secret_key.as_bytes()),
    )
    .map_err(|e| PortalError::Jwt(format!("Failed to generate token: {}", e)))
}

pub fn mint_pair(config: &ServerConfig, account_id: i64, email: &str) -> PortalResult<TokenPair> {
    Ok(TokenPair {
        access: mint(config, account_id, email, TokenType::Access)?,
        refresh: mint(config, account_id, email, TokenType::Refresh)?,
    })
}

/// Verify signature, expiry and the expected token type
pub fn verify(config: &ServerConfig, token: &str, expected: TokenType) -> PortalResult<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 30;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.authentication.secret_key.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::warn!("JWT verification failed: {}", e);
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                PortalError::Authentication("Token has expired".to_string())
            }
            _ => PortalError::Authentication("Invalid token".to_string()),
        }
    })?;

    if data.claims.token_type != expected {
        tracing::warn!(
            expected = ?expected,
            presented = ?data.claims.token_type,
            "JWT presented with the wrong type"
        );
        return Err(PortalError::Authentication("Invalid token".to_string()));
    }

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_verifies_by_type() {
        let config = ServerConfig::for_tests();
        let pair = mint_pair(&config, 42, "a@gmail.com").unwrap();

        let access = verify(&config, &pair.access, TokenType::Access).unwrap();
        assert_eq!(access.account_id().unwrap(), 42);
        assert_eq!(access.email, "a@gmail.com");
        assert_eq!(access.exp - access.iat, 15 * 60);

        let refresh = verify(&config, &pair.refresh, TokenType::Refresh).unwrap();
        assert_eq!(refresh.exp - refresh.iat, 7 * 24 * 3600);
        assert_ne!(access.jti, refresh.jti);
    }

    #[test]
    fn test_type_confusion_rejected() {
        let config = ServerConfig::for_tests();
        let pair = mint_pair(&config, 1, "a@gmail.com").unwrap();
        assert!(verify(&config, &pair.access, TokenType::Refresh).is_err());
        assert!(verify(&config, &pair.refresh, TokenType::Access).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let config = ServerConfig::for_tests();
        let token = mint(&config, 1, "a@gmail.com", TokenType::Access).unwrap();

        let mut other = ServerConfig::for_tests();
        other.authentication.secret_key = "another-secret-key-that-is-long-enough-xx".to_string();
        assert!(matches!(
            verify(&other, &token, TokenType::Access),
            Err(PortalError::Authentication(_))
        ));
    }

    #[test]
    fn test_expired_rejected() {
        let mut config = ServerConfig::for_tests();
        config.authentication.access_ttl_seconds = -120;
        let token = mint(&config, 1, "a@gmail.com", TokenType::Access).unwrap();
        assert!(verify(&config, &token, TokenType::Access).is_err());
    }
}
