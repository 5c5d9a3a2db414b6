/// Signed session tokens (JWT, HS256)
///
/// A session carries the user's organization, role and the credential version
/// it was issued against. Verification here covers signature, issuer and time
/// bounds only; the freshness check against the stored credential version
/// lives in [`SessionIssuer`](crate::services::sessions::SessionIssuer).
///
/// # Claims
///
/// - `sub`: User ID (UUID)
/// - `iss`: Issuer, from configuration
/// - `iat` / `nbf` / `exp`: Unix timestamps
/// - `organization_id`: Organization UUID
/// - `account_id`: 16-digit organization account id
/// - `role`: owner, maintainer or member
/// - `token_version`: Credential version at issue time
///
/// # Example
///
/// ```
/// use chrono::Duration;
/// use tenantry_core::auth::jwt::{SessionClaims, SessionKeys};
/// use tenantry_core::models::Role;
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let keys = SessionKeys::from_secret(b"an-example-secret-of-32-bytes-min", "tenantry", Duration::hours(24))?;
/// let claims = keys.claims(Uuid::new_v4(), Uuid::new_v4(), "1100000000000001", Role::Owner, 1)?;
/// let token = keys.sign(&claims)?;
/// assert_eq!(keys.decode(&token)?, claims);
/// # Ok(())
/// # }
/// ```

use crate::models::Role;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Smallest accepted signing secret, in bytes
pub const MIN_SECRET_BYTES: usize = 32;

/// Default session validity
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24;

/// Error type for session token operations
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to sign
    #[error("Failed to create token: {0}")]
    CreateError(String),

    /// Signing secret below the minimum length
    #[error("Session secret must be at least {min} bytes")]
    WeakSecret { min: usize },

    /// Signature, format or time bound rejected
    #[error("Failed to validate token: {0}")]
    ValidationError(String),

    /// Past `exp`
    #[error("Token has expired")]
    Expired,

    /// Issued by someone else
    #[error("Invalid issuer")]
    InvalidIssuer,
}

/// Claims embedded in every session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User ID
    pub sub: Uuid,

    pub iss: String,

    pub iat: i64,

    pub exp: i64,

    pub nbf: i64,

    pub organization_id: Uuid,

    pub account_id: String,

    pub role: Role,

    /// Must equal the user's stored version for the session to be fresh
    pub token_version: i32,
}

impl SessionClaims {
    pub fn user_id(&self) -> Uuid {
        self.sub
    }
}

/// Signing material, loaded once from configuration
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("ttl_seconds", &self.ttl.num_seconds())
            .finish()
    }
}

impl SessionKeys {
    /// Builds keys from a shared secret of at least [`MIN_SECRET_BYTES`]
    pub fn from_secret(secret: &[u8], issuer: &str, ttl: Duration) -> Result<Self, JwtError> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(JwtError::WeakSecret {
                min: MIN_SECRET_BYTES,
            });
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            ttl,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Claims for a session starting now
    ///
    /// Fails with `CreateError` when the configured ttl pushes `exp` out of range.
    pub fn claims(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        account_id: &str,
        role: Role,
        token_version: i32,
    ) -> Result<SessionClaims, JwtError> {
        let now = Utc::now();
        let exp = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| JwtError::CreateError("Session expiry out of range".to_string()))?;

        Ok(SessionClaims {
            sub: user_id,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            nbf: now.timestamp(),
            organization_id,
            account_id: account_id.to_string(),
            role,
            token_version,
        })
    }

    pub fn sign(&self, claims: &SessionClaims) -> Result<String, JwtError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| JwtError::CreateError(format!("Token encoding failed: {}", e)))
    }

    /// Checks signature, issuer, `exp` and `nbf`
    pub fn decode(&self, token: &str) -> Result<SessionClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.validate_exp = true;
        validation.validate_nbf = true;

        let token_data = decode::<SessionClaims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => JwtError::InvalidIssuer,
                _ => JwtError::ValidationError(format!("Token validation failed: {}", e)),
            }
        })?;

        Ok(token_data.claims)
    }
}
