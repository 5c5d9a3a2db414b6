/// Organization sign-up and account verification
///
/// Sign-up creates an organization and its owner together, both pending,
/// and mails the owner a verification link. Verification activates the
/// owner and, through it, the organization.

use super::{expiry_out_of_range, IdentityContext, REDACTED};
use crate::auth::{tokens::generate_token, PasswordPurpose};
use crate::db::TxMode;
use crate::deadline::Deadline;
use crate::error::{IdentityError, IdentityResult};
use crate::models::{normalize_email, Organization, Role, User, UserStatus};
use crate::notify::messages::verification_mail;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use validator::Validate;

/// Sign-up request
#[derive(Clone, Deserialize, Validate)]
pub struct SignUpRequest {
    #[validate(length(min = 1, max = 255, message = "Organization name must be 1-255 characters"))]
    pub organization_name: String,

    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub owner_name: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Length is checked by the password policy, not here
    pub password: String,
}

impl fmt::Debug for SignUpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignUpRequest")
            .field("organization_name", &self.organization_name)
            .field("owner_name", &self.owner_name)
            .field("email", &self.email)
            .field("password", &REDACTED)
            .finish()
    }
}

impl SignUpRequest {
    pub fn new(organization_name: &str, owner_name: &str, email: &str, password: &str) -> Self {
        Self {
            organization_name: organization_name.to_string(),
            owner_name: owner_name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    fn normalized(mut self) -> Self {
        self.organization_name = self.organization_name.trim().to_string();
        self.owner_name = self.owner_name.trim().to_string();
        self.email = normalize_email(&self.email);
        self
    }
}

/// Result of a successful sign-up
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub organization: Organization,
    pub owner: User,

    /// Raw verification token, also carried by the queued mail
    pub verification_token: String,

    pub expires_at: DateTime<Utc>,
}

/// Provisions organizations and verifies their owners
#[derive(Clone)]
pub struct AccountRegistry {
    ctx: IdentityContext,
}

impl AccountRegistry {
    pub fn new(ctx: IdentityContext) -> Self {
        Self { ctx }
    }

    /// Creates a pending organization and its pending owner
    ///
    /// Everything is written in one read-write transaction; a failure at any
    /// step leaves neither row behind. The verification mail is queued after
    /// commit.
    ///
    /// # Errors
    ///
    /// - `Validation`: empty names or malformed email
    /// - `WeakInput`: password shorter than the sign-up minimum
    /// - `Conflict`: organization name taken, email already owns an
    ///   organization, or a concurrent sign-up won the race
    pub async fn sign_up(
        &self,
        request: SignUpRequest,
        deadline: &Deadline,
    ) -> IdentityResult<SignUpOutcome> {
        let request = request.normalized();
        request.validate()?;
        self.ctx
            .credentials
            .check_length(&request.password, PasswordPurpose::Initial)?;

        let outcome = deadline
            .run(async {
                // Hash before taking any store lock
                let password_hash = self
                    .ctx
                    .credentials
                    .hash_blocking(&request.password, PasswordPurpose::Initial)
                    .await?;
                self.provision(&request, password_hash).await
            })
            .await
            .map_err(|e| {
                tracing::warn!(
                    organization = %request.organization_name,
                    error = %e,
                    "Sign-up rejected"
                );
                e
            })?;

        let link = self
            .ctx
            .links
            .verification(&outcome.verification_token, &outcome.organization.account_id);
        self.ctx.mail.enqueue(verification_mail(
            &outcome.owner.email,
            &outcome.owner.name,
            &outcome.organization.name,
            &outcome.organization.account_id,
            &link,
            outcome.expires_at,
        ));

        tracing::info!(
            organization_id = %outcome.organization.id,
            account_id = %outcome.organization.account_id,
            user_id = %outcome.owner.id,
            "Organization signed up"
        );

        Ok(outcome)
    }

    async fn provision(
        &self,
        request: &SignUpRequest,
        password_hash: String,
    ) -> IdentityResult<SignUpOutcome> {
        let mut tx = self.ctx.begin(TxMode::ReadWrite).await?;

        if tx
            .organization_by_name(&request.organization_name)
            .await?
            .is_some()
        {
            return Err(IdentityError::Conflict(
                "Organization with this name already exists".to_string(),
            ));
        }

        let account_id = tx.allocate_account_id().await?;
        let mut organization = Organization::new(&request.organization_name, account_id);
        tx.insert_organization(&organization).await?;

        let now = Utc::now();
        let token = generate_token();
        let mut owner = User::new(
            organization.id,
            &request.owner_name,
            &request.email,
            password_hash,
            Role::Owner,
            UserStatus::Pending,
            None,
        );
        let expires_at = owner
            .issue_token(token.clone(), self.ctx.lifetimes.verification, now)
            .ok_or_else(expiry_out_of_range)?;
        tx.insert_user(&owner).await?;

        organization.created_by = Some(owner.id);
        organization.updated_at = now;
        tx.update_organization(&organization).await?;

        tx.commit().await?;

        Ok(SignUpOutcome {
            organization,
            owner,
            verification_token: token,
            expires_at,
        })
    }

    /// Completes the transition gated by `token` and activates the user
    ///
    /// Activating an owner activates its organization in the same
    /// transaction. A token that already completed its transition reports
    /// `AlreadyVerified` rather than `InvalidToken`.
    pub async fn verify_account(&self, token: &str, deadline: &Deadline) -> IdentityResult<User> {
        let token = token.trim();
        if token.is_empty() {
            return Err(IdentityError::InvalidToken);
        }

        let user = deadline.run(self.activate_by_token(token)).await?;

        tracing::info!(
            user_id = %user.id,
            organization_id = %user.organization_id,
            role = %user.role,
            "Account verified"
        );
        Ok(user)
    }

    async fn activate_by_token(&self, token: &str) -> IdentityResult<User> {
        let mut tx = self.ctx.begin(TxMode::ReadWrite).await?;

        let mut user = match tx.user_by_token(token).await? {
            Some(user) => user,
            None => {
                return match tx.user_by_consumed_token(token).await? {
                    Some(user) if user.is_active() => Err(IdentityError::AlreadyVerified),
                    _ => Err(IdentityError::InvalidToken),
                };
            }
        };

        match user.status {
            UserStatus::Active => return Err(IdentityError::AlreadyVerified),
            UserStatus::Suspended => {
                return Err(IdentityError::Forbidden("Account is suspended".to_string()))
            }
            UserStatus::Pending => {}
        }

        let now = Utc::now();
        if user.token_expired(now) {
            return Err(IdentityError::Expired(
                "Verification token has expired".to_string(),
            ));
        }

        user.activate(now);
        tx.update_user(&user).await?;

        if user.role == Role::Owner {
            activate_organization(&mut *tx, user.organization_id, now).await?;
        }

        tx.commit().await?;
        Ok(user)
    }
}

/// Marks the organization active; missing rows are an internal inconsistency
pub(crate) async fn activate_organization(
    tx: &mut dyn crate::db::StoreTransaction,
    organization_id: uuid::Uuid,
    now: DateTime<Utc>,
) -> IdentityResult<()> {
    let mut organization = tx
        .organization_by_id(organization_id)
        .await?
        .ok_or_else(|| {
            IdentityError::Internal(format!("organization {} missing", organization_id))
        })?;
    organization.activate(now);
    tx.update_organization(&organization).await?;
    Ok(())
}
