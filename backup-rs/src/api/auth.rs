//! JWT Authentication for the REST API

use crate::security::Role;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (admin username)
    pub sub: String,
    /// Role name at token creation time
    pub role: String,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    pub iat: u64,
}

impl Claims {
    /// Role carried by the token. Unknown values fall back to the least
    /// privileged role.
    pub fn role(&self) -> Role {
        Role::from_str(&self.role).unwrap_or(Role::Viewer)
    }
}

/// JWT configuration
pub struct JwtConfig {
    secret: String,
    expiration: Duration,
}

impl JwtConfig {
    pub fn new(secret: String, expiration_hours: u64) -> Self {
        Self {
            secret,
            expiration: Duration::from_secs(expiration_hours * 3600),
        }
    }

    /// Create a signed token for an admin account
    pub fn create_token(
        &self,
        username: &str,
        role: Role,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let claims = Claims {
            sub: username.to_string(),
            role: role.as_str().to_string(),
            exp: now + self.expiration.as_secs(),
            iat: now,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }

    /// Validate a token and extract its claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_validate_token() {
        let config = JwtConfig::new("test-secret".to_string(), 1);

        let token = config.create_token("admin", Role::SuperAdmin).unwrap();
        assert!(!token.is_empty());

        let claims = config.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "admin");
        assert_eq!(claims.role(), Role::SuperAdmin);
    }

    #[test]
    fn test_invalid_token() {
        let config = JwtConfig::new("test-secret".to_string(), 1);
        assert!(config.validate_token("invalid-token").is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let config = JwtConfig::new("test-secret".to_string(), 1);
        let other = JwtConfig::new("other-secret".to_string(), 1);

        let token = config.create_token("admin", Role::Viewer).unwrap();
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn test_unknown_role_falls_back_to_viewer() {
        let claims = Claims {
            sub: "admin".to_string(),
            role: "owner".to_string(),
            exp: 0,
            iat: 0,
        };
        assert_eq!(claims.role(), Role::Viewer);
    }
}
