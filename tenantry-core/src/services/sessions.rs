/// Login and session verification
///
/// Sessions are HS256 tokens stamped with the user's `token_version`. A
/// session stays valid only while that stamp matches the stored version and
/// the user stays active, so rotating a credential or suspending a user
/// revokes every earlier session without any session table.

use super::{IdentityContext, REDACTED};
use crate::auth::{authorize, SessionClaims, SessionKeys};
use crate::db::TxMode;
use crate::deadline::Deadline;
use crate::error::{IdentityError, IdentityResult};
use crate::models::{normalize_email, Role, User};
use chrono::Utc;
use serde::Deserialize;
use std::fmt;

/// One message for every login failure so callers cannot probe accounts
const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Login request
#[derive(Clone, Deserialize)]
pub struct LoginRequest {
    pub account_id: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("account_id", &self.account_id)
            .field("email", &self.email)
            .field("password", &REDACTED)
            .finish()
    }
}

impl LoginRequest {
    pub fn new(account_id: &str, email: &str, password: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }
}

/// Successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// Signed session token
    pub token: String,

    pub claims: SessionClaims,

    pub user: User,
}

/// Issues and checks sessions
#[derive(Clone)]
pub struct SessionIssuer {
    ctx: IdentityContext,
    keys: SessionKeys,
}

impl SessionIssuer {
    pub fn new(ctx: IdentityContext, keys: SessionKeys) -> Self {
        Self { ctx, keys }
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Authenticates with account id, email and password
    ///
    /// Unknown account, unknown user, inactive user and wrong password all
    /// fail with the same `Unauthorized` error.
    pub async fn login(&self, request: LoginRequest, deadline: &Deadline) -> IdentityResult<LoginOutcome> {
        let account_id = request.account_id.trim().to_string();
        let email = normalize_email(&request.email);

        let outcome = deadline
            .run(async {
                let (user, account_id) = self.load_login_target(&account_id, &email).await?;

                let valid = self
                    .ctx
                    .credentials
                    .verify_blocking(&request.password, &user.password_hash)
                    .await?;
                if !valid {
                    return Err(IdentityError::Unauthorized(INVALID_CREDENTIALS.to_string()));
                }

                if matches!(self.ctx.credentials.needs_rehash(&user.password_hash), Ok(true)) {
                    if let Err(e) = self.upgrade_hash(&user, &request.password).await {
                        tracing::warn!(user_id = %user.id, error = %e, "Password rehash failed");
                    }
                }

                let claims = self.keys.claims(
                    user.id,
                    user.organization_id,
                    &account_id,
                    user.role,
                    user.token_version,
                )?;
                let token = self.keys.sign(&claims)?;
                Ok(LoginOutcome { token, claims, user })
            })
            .await
            .map_err(|e| {
                tracing::warn!(account_id = %account_id, error = %e, "Login rejected");
                e
            })?;

        tracing::info!(
            user_id = %outcome.user.id,
            account_id = %outcome.claims.account_id,
            role = %outcome.user.role,
            "User logged in"
        );
        Ok(outcome)
    }

    async fn load_login_target(&self, account_id: &str, email: &str) -> IdentityResult<(User, String)> {
        let unauthorized = || IdentityError::Unauthorized(INVALID_CREDENTIALS.to_string());

        let mut tx = self.ctx.begin(TxMode::ReadOnly).await?;
        let organization = tx
            .organization_by_account_id(account_id)
            .await?
            .ok_or_else(unauthorized)?;
        let user = tx
            .user_by_email(organization.id, email)
            .await?
            .filter(User::is_active)
            .ok_or_else(unauthorized)?;
        tx.commit().await?;

        Ok((user, organization.account_id))
    }

    /// Re-hashes a credential stored with outdated Argon2 costs
    ///
    /// The swap applies only while the stored hash is still the one that just
    /// verified. It leaves `token_version` alone, so sessions survive it.
    async fn upgrade_hash(&self, user: &User, password: &str) -> IdentityResult<()> {
        let hash = self.ctx.credentials.hash_unchecked_blocking(password).await?;

        let mut tx = self.ctx.begin(TxMode::ReadWrite).await?;
        let Some(mut current) = tx.user_by_id(user.id).await? else {
            return Ok(());
        };
        if current.password_hash != user.password_hash {
            return Ok(());
        }
        current.password_hash = hash;
        current.updated_at = Utc::now();
        tx.update_user(&current).await?;
        tx.commit().await?;

        tracing::debug!(user_id = %user.id, "Password hash upgraded");
        Ok(())
    }

    /// Checks a raw session against the signing key and the stored user
    ///
    /// # Errors
    ///
    /// `Unauthorized` when the signature, issuer or expiry is bad, when the
    /// user is gone or not active, when the credential changed since the
    /// session was issued, or when the user moved organization.
    pub async fn verify(&self, raw_session: &str, deadline: &Deadline) -> IdentityResult<SessionClaims> {
        let claims = self.keys.decode(raw_session.trim())?;

        let user = deadline
            .run(async {
                let mut tx = self.ctx.begin(TxMode::ReadOnly).await?;
                let user = tx.user_by_id(claims.sub).await?;
                tx.commit().await?;
                Ok(user)
            })
            .await?;

        let user = match user {
            Some(user) if user.is_active() => user,
            _ => {
                tracing::warn!(user_id = %claims.sub, "Session for deactivated user");
                return Err(IdentityError::Unauthorized("Account is deactivated".to_string()));
            }
        };

        if user.token_version != claims.token_version {
            tracing::debug!(
                user_id = %user.id,
                session_version = claims.token_version,
                current_version = user.token_version,
                "Stale session"
            );
            return Err(IdentityError::Unauthorized("Session is stale".to_string()));
        }

        if user.organization_id != claims.organization_id {
            return Err(IdentityError::Unauthorized("Invalid session".to_string()));
        }

        Ok(claims)
    }

    /// [`verify`](Self::verify) followed by a role check
    pub async fn authenticate(
        &self,
        raw_session: &str,
        allowed: &[Role],
        deadline: &Deadline,
    ) -> IdentityResult<SessionClaims> {
        let claims = self.verify(raw_session, deadline).await?;
        authorize(&claims, allowed)?;
        Ok(claims)
    }
}
