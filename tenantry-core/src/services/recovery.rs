/// Password reset family
///
/// - forgot password: issues a reset token into the user's token pair and
///   mails a reset link
/// - reset by token: redeems that token for a new password
/// - authenticated reset: changes the password of a logged-in user
///
/// Every successful reset rotates the credential, which revokes all sessions
/// issued before it.

use super::registry::activate_organization;
use super::{expiry_out_of_range, IdentityContext};
use crate::auth::{tokens::generate_token, CredentialManager, PasswordPurpose, SessionClaims};
use crate::db::TxMode;
use crate::deadline::Deadline;
use crate::error::{IdentityError, IdentityResult};
use crate::models::{normalize_email, Role, User, UserStatus};
use crate::notify::messages::password_reset_mail;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Receipt of a forgot-password request; the token only travels by mail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordResetIssued {
    pub user_id: Uuid,
    pub email: String,
    pub account_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CredentialRecovery {
    ctx: IdentityContext,
}

impl CredentialRecovery {
    pub fn new(ctx: IdentityContext) -> Self {
        Self { ctx }
    }

    /// Issues a reset token to an active user and mails the reset link
    ///
    /// A later request replaces an earlier, still-live token.
    pub async fn forgot_password(
        &self,
        account_id: &str,
        email: &str,
        deadline: &Deadline,
    ) -> IdentityResult<PasswordResetIssued> {
        let account_id = account_id.trim();
        let email = normalize_email(email);

        let (user, token, expires_at) = deadline
            .run(async {
                let mut tx = self.ctx.begin(TxMode::ReadWrite).await?;

                let not_found = || {
                    IdentityError::NotFound(
                        "User not registered or inactive in this organization".to_string(),
                    )
                };
                let organization = tx
                    .organization_by_account_id(account_id)
                    .await?
                    .ok_or_else(not_found)?;
                let mut user = tx
                    .user_by_email(organization.id, &email)
                    .await?
                    .filter(User::is_active)
                    .ok_or_else(not_found)?;

                let now = Utc::now();
                let token = generate_token();
                let expires_at = user
                    .issue_token(token.clone(), self.ctx.lifetimes.password_reset, now)
                    .ok_or_else(expiry_out_of_range)?;
                tx.update_user(&user).await?;
                tx.commit().await?;

                Ok((user, token, expires_at))
            })
            .await?;

        let link = self.ctx.links.password_reset(&token);
        self.ctx
            .mail
            .enqueue(password_reset_mail(&user.email, &user.name, &link, expires_at));

        tracing::info!(user_id = %user.id, account_id = %account_id, "Password reset issued");

        Ok(PasswordResetIssued {
            user_id: user.id,
            email: user.email,
            account_id: account_id.to_string(),
            expires_at,
        })
    }

    /// Redeems a reset token for a new password
    ///
    /// Rotates the credential and clears the token. A pending user becomes
    /// active, and a pending owner's organization with it.
    ///
    /// # Errors
    ///
    /// - `WeakInput`: password below the reset minimum, checked first
    /// - `InvalidToken`: no user holds `token`
    /// - `Expired`: the reset window has passed
    /// - `Forbidden`: the user is suspended
    pub async fn reset_password_by_token(
        &self,
        token: &str,
        new_password: &str,
        deadline: &Deadline,
    ) -> IdentityResult<User> {
        let token = token.trim();
        if token.is_empty() {
            return Err(IdentityError::InvalidToken);
        }

        let user = deadline
            .run(async {
                // Argon2 runs before the write transaction opens
                let password_hash = self
                    .ctx
                    .credentials
                    .hash_blocking(new_password, PasswordPurpose::Legacy)
                    .await?;

                let mut tx = self.ctx.begin(TxMode::ReadWrite).await?;

                let mut user = tx
                    .user_by_token(token)
                    .await?
                    .ok_or(IdentityError::InvalidToken)?;

                let now = Utc::now();
                if user.token_expired(now) {
                    return Err(IdentityError::Expired("Reset link has expired".to_string()));
                }
                if user.status == UserStatus::Suspended {
                    return Err(IdentityError::Forbidden("Account is suspended".to_string()));
                }

                CredentialManager::apply_rotation(&mut user, password_hash);

                let was_pending = user.status == UserStatus::Pending;
                user.activate(now);
                tx.update_user(&user).await?;

                if was_pending && user.role == Role::Owner {
                    activate_organization(&mut *tx, user.organization_id, now).await?;
                }

                tx.commit().await?;
                Ok(user)
            })
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Password reset by token rejected");
                e
            })?;

        tracing::info!(
            user_id = %user.id,
            token_version = user.token_version,
            "Password reset by token"
        );
        Ok(user)
    }

    /// Changes the password of the session's user
    ///
    /// The session must be fresh and the old password must verify; both
    /// failures are `Unauthorized`. Hashing happens between a read and a
    /// short write transaction, and the write re-checks the credential
    /// version so a concurrent change wins.
    pub async fn reset_password_authenticated(
        &self,
        claims: &SessionClaims,
        old_password: &str,
        new_password: &str,
        deadline: &Deadline,
    ) -> IdentityResult<User> {
        self.ctx
            .credentials
            .check_length(new_password, PasswordPurpose::Legacy)?;

        let user = deadline
            .run(async {
                let mut tx = self.ctx.begin(TxMode::ReadOnly).await?;
                let current = session_user(tx.user_by_id(claims.sub).await?, claims)?;
                tx.commit().await?;

                let valid = self
                    .ctx
                    .credentials
                    .verify_blocking(old_password, &current.password_hash)
                    .await?;
                if !valid {
                    return Err(IdentityError::Unauthorized(
                        "Old password is incorrect".to_string(),
                    ));
                }
                let password_hash = self
                    .ctx
                    .credentials
                    .hash_blocking(new_password, PasswordPurpose::Legacy)
                    .await?;

                // Another credential change may have landed while hashing
                let mut tx = self.ctx.begin(TxMode::ReadWrite).await?;
                let mut user = session_user(tx.user_by_id(claims.sub).await?, claims)?;
                CredentialManager::apply_rotation(&mut user, password_hash);
                tx.update_user(&user).await?;
                tx.commit().await?;
                Ok(user)
            })
            .await
            .map_err(|e| {
                tracing::warn!(user_id = %claims.sub, error = %e, "Password change rejected");
                e
            })?;

        tracing::info!(
            user_id = %user.id,
            token_version = user.token_version,
            "Password changed"
        );
        Ok(user)
    }
}

/// The session's user, provided it is still active and the session fresh
fn session_user(user: Option<User>, claims: &SessionClaims) -> IdentityResult<User> {
    let user = user
        .filter(|u| u.is_active() && u.organization_id == claims.organization_id)
        .ok_or_else(|| IdentityError::Unauthorized("User is not active".to_string()))?;
    if user.token_version != claims.token_version {
        return Err(IdentityError::Unauthorized("Session is stale".to_string()));
    }
    Ok(user)
}
