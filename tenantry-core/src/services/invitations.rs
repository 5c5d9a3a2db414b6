/// Invitations into an existing organization
///
/// An invite creates a pending user holding a temporary credential nobody
/// knows and a token valid for the invitation window. Acceptance replaces the
/// credential with the invitee's own password and activates the user.
///
/// Who may invite whom follows [`Role::invitable_roles`].

use super::{expiry_out_of_range, IdentityContext, REDACTED};
use crate::auth::{
    tokens::{generate_temporary_password, generate_token},
    PasswordPurpose, SessionClaims,
};
use crate::db::{StoreTransaction, TxMode};
use crate::deadline::Deadline;
use crate::error::{IdentityError, IdentityResult};
use crate::models::{normalize_email, Organization, Role, User, UserStatus};
use crate::notify::messages::{invitation_mail, verification_mail};
use crate::notify::MailKind;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Invite request, issued by an authenticated user
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InviteRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub role: Role,

    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,
}

impl InviteRequest {
    pub fn new(email: &str, role: Role, name: &str) -> Self {
        Self {
            email: email.to_string(),
            role,
            name: name.to_string(),
        }
    }

    fn normalized(mut self) -> Self {
        self.email = normalize_email(&self.email);
        self.name = self.name.trim().to_string();
        self
    }
}

/// Invite acceptance request, coming from the invitation link
#[derive(Clone, Deserialize, Validate)]
pub struct AcceptInviteRequest {
    pub token: String,

    pub account_id: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,

    pub password: String,
}

impl fmt::Debug for AcceptInviteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptInviteRequest")
            .field("token", &REDACTED)
            .field("account_id", &self.account_id)
            .field("email", &self.email)
            .field("name", &self.name)
            .field("password", &REDACTED)
            .finish()
    }
}

impl AcceptInviteRequest {
    pub fn new(token: &str, account_id: &str, email: &str, name: &str, password: &str) -> Self {
        Self {
            token: token.to_string(),
            account_id: account_id.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            password: password.to_string(),
        }
    }

    fn normalized(mut self) -> Self {
        self.token = self.token.trim().to_string();
        self.account_id = self.account_id.trim().to_string();
        self.email = normalize_email(&self.email);
        self.name = self.name.trim().to_string();
        self
    }
}

/// Issued invitation
#[derive(Debug, Clone)]
pub struct Invitation {
    pub user: User,

    /// Raw invite token, also carried by the queued mail
    pub token: String,

    pub expires_at: DateTime<Utc>,

    pub invite_link: String,

    pub account_id: String,
}

/// Result of a resend request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResendOutcome {
    pub user_id: Uuid,
    pub email: String,

    /// True when a fresh token replaced a missing or expired one
    pub reissued: bool,

    pub expires_at: DateTime<Utc>,

    /// Which mail went out
    pub kind: MailKind,
}

/// Issues and redeems invitations
#[derive(Clone)]
pub struct InvitationEngine {
    ctx: IdentityContext,
}

impl InvitationEngine {
    pub fn new(ctx: IdentityContext) -> Self {
        Self { ctx }
    }

    /// Invites a new user into the inviter's organization
    ///
    /// # Errors
    ///
    /// - `Forbidden`: the inviter's role may not grant `request.role`
    /// - `Conflict`: the email already belongs to a pending or active user of
    ///   the organization
    /// - `Unauthorized`: the inviter no longer exists or is not active
    pub async fn invite(
        &self,
        inviter: &SessionClaims,
        request: InviteRequest,
        deadline: &Deadline,
    ) -> IdentityResult<Invitation> {
        let request = request.normalized();
        request.validate()?;

        if !inviter.role.can_manage(request.role) {
            tracing::warn!(
                user_id = %inviter.sub,
                inviter_role = %inviter.role,
                requested_role = %request.role,
                "Invite rejected by role table"
            );
            return Err(match inviter.role {
                Role::Member => IdentityError::Forbidden("Members cannot invite users".to_string()),
                role => IdentityError::Forbidden(format!("{} cannot invite {}", role, request.role)),
            });
        }

        let (invitation, inviter_name, organization) = deadline
            .run(async {
                // Nobody ever learns this credential; acceptance replaces it
                let temporary_hash = self
                    .ctx
                    .credentials
                    .hash_unchecked_blocking(&generate_temporary_password())
                    .await?;
                self.create_invitee(inviter, &request, temporary_hash).await
            })
            .await?;

        self.ctx.mail.enqueue(invitation_mail(
            &invitation.user.email,
            &invitation.user.name,
            &inviter_name,
            &organization.name,
            &organization.account_id,
            &invitation.invite_link,
            invitation.expires_at,
        ));

        tracing::info!(
            user_id = %invitation.user.id,
            invited_by = %inviter.sub,
            organization_id = %organization.id,
            role = %invitation.user.role,
            "User invited"
        );

        Ok(invitation)
    }

    async fn create_invitee(
        &self,
        inviter: &SessionClaims,
        request: &InviteRequest,
        temporary_hash: String,
    ) -> IdentityResult<(Invitation, String, Organization)> {
        let mut tx = self.ctx.begin(TxMode::ReadWrite).await?;

        let inviter_user = tx
            .user_by_id(inviter.sub)
            .await?
            .filter(|u| u.is_active() && u.organization_id == inviter.organization_id)
            .ok_or_else(|| IdentityError::Unauthorized("Inviter is not active".to_string()))?;

        let organization = tx
            .organization_by_id(inviter.organization_id)
            .await?
            .ok_or_else(|| IdentityError::NotFound("Organization not found".to_string()))?;

        if let Some(existing) = tx.user_by_email(organization.id, &request.email).await? {
            return Err(IdentityError::Conflict(match existing.status {
                UserStatus::Pending => "User has already been invited".to_string(),
                _ => "User is already a member of this organization".to_string(),
            }));
        }

        let now = Utc::now();
        let token = generate_token();
        let mut user = User::new(
            organization.id,
            &request.name,
            &request.email,
            temporary_hash,
            request.role,
            UserStatus::Pending,
            Some(inviter_user.id),
        );
        let expires_at = user
            .issue_token(token.clone(), self.ctx.lifetimes.invitation, now)
            .ok_or_else(expiry_out_of_range)?;
        tx.insert_user(&user).await?;

        tx.commit().await?;

        let invite_link = self.ctx.links.invitation(&token, &organization.account_id);
        let invitation = Invitation {
            user,
            token,
            expires_at,
            invite_link,
            account_id: organization.account_id.clone(),
        };
        Ok((invitation, inviter_user.name, organization))
    }

    /// Redeems an invitation and activates the invitee
    ///
    /// The lookup is scoped by account id, email and token together.
    ///
    /// # Errors
    ///
    /// - `InvalidToken`: unknown account, unknown email, or token mismatch
    /// - `Conflict`: the invitee is already active
    /// - `Expired`: the invitation window has passed
    /// - `WeakInput`: password shorter than the minimum
    pub async fn accept_invite(
        &self,
        request: AcceptInviteRequest,
        deadline: &Deadline,
    ) -> IdentityResult<User> {
        let request = request.normalized();
        request.validate()?;
        if request.token.is_empty() || request.account_id.is_empty() {
            return Err(IdentityError::InvalidToken);
        }

        let user = deadline
            .run(async {
                // Short passwords are reported after the token checks
                let password_hash = match self
                    .ctx
                    .credentials
                    .check_length(&request.password, PasswordPurpose::Initial)
                {
                    Ok(()) => Ok(self
                        .ctx
                        .credentials
                        .hash_blocking(&request.password, PasswordPurpose::Initial)
                        .await?),
                    Err(e) => Err(e),
                };
                self.redeem(&request, password_hash).await
            })
            .await
            .map_err(|e| {
                tracing::warn!(account_id = %request.account_id, error = %e, "Invite acceptance rejected");
                e
            })?;

        tracing::info!(
            user_id = %user.id,
            organization_id = %user.organization_id,
            role = %user.role,
            "Invitation accepted"
        );
        Ok(user)
    }

    async fn redeem(
        &self,
        request: &AcceptInviteRequest,
        password_hash: Result<String, crate::auth::PasswordError>,
    ) -> IdentityResult<User> {
        let mut tx = self.ctx.begin(TxMode::ReadWrite).await?;

        let organization = tx
            .organization_by_account_id(&request.account_id)
            .await?
            .ok_or(IdentityError::InvalidToken)?;

        let mut user = tx
            .user_by_email(organization.id, &request.email)
            .await?
            .filter(|u| u.role != Role::Owner)
            .ok_or(IdentityError::InvalidToken)?;

        if user.status == UserStatus::Active {
            return Err(IdentityError::Conflict(
                "Invitation has already been accepted".to_string(),
            ));
        }
        if user.status != UserStatus::Pending
            || user.invite_token.as_deref() != Some(request.token.as_str())
        {
            return Err(IdentityError::InvalidToken);
        }

        let now = Utc::now();
        if user.token_expired(now) {
            return Err(IdentityError::Expired("Invitation has expired".to_string()));
        }

        user.password_hash = password_hash?;
        user.name = request.name.clone();
        user.activate(now);
        tx.update_user(&user).await?;

        tx.commit().await?;
        Ok(user)
    }

    /// Re-sends the pending user's verification or invitation mail
    ///
    /// A missing or expired token is replaced; a live one is reused. Owners
    /// get the verification mail and window, invitees the invitation mail and
    /// window.
    pub async fn resend_verification(
        &self,
        account_id: &str,
        email: &str,
        deadline: &Deadline,
    ) -> IdentityResult<ResendOutcome> {
        let account_id = account_id.trim();
        let email = normalize_email(email);

        let refreshed = deadline.run(self.refresh_token(account_id, &email)).await?;
        let outcome = refreshed.outcome;
        let organization = refreshed.organization;

        let mail = match outcome.kind {
            MailKind::Verification => verification_mail(
                &outcome.email,
                &refreshed.user_name,
                &organization.name,
                &organization.account_id,
                &self.ctx.links.verification(&refreshed.token, &organization.account_id),
                outcome.expires_at,
            ),
            _ => invitation_mail(
                &outcome.email,
                &refreshed.user_name,
                &refreshed.inviter_name,
                &organization.name,
                &organization.account_id,
                &self.ctx.links.invitation(&refreshed.token, &organization.account_id),
                outcome.expires_at,
            ),
        };
        self.ctx.mail.enqueue(mail);

        tracing::info!(
            user_id = %outcome.user_id,
            account_id = %organization.account_id,
            reissued = outcome.reissued,
            kind = outcome.kind.as_str(),
            "Verification mail re-sent"
        );
        Ok(outcome)
    }

    async fn refresh_token(
        &self,
        account_id: &str,
        email: &str,
    ) -> IdentityResult<RefreshedToken> {
        let mut tx = self.ctx.begin(TxMode::ReadWrite).await?;

        let organization = tx
            .organization_by_account_id(account_id)
            .await?
            .ok_or_else(|| {
                IdentityError::NotFound("Organization not found for this account ID".to_string())
            })?;

        let mut user = tx
            .user_by_email(organization.id, email)
            .await?
            .filter(|u| u.status == UserStatus::Pending)
            .ok_or_else(|| {
                IdentityError::NotFound(
                    "No pending user found with this email for the given account".to_string(),
                )
            })?;

        let (kind, ttl) = if user.role == Role::Owner {
            (MailKind::Verification, self.ctx.lifetimes.verification)
        } else {
            (MailKind::Invitation, self.ctx.lifetimes.invitation)
        };

        let now = Utc::now();
        let reissued = !user.has_live_token(now);
        if reissued {
            user
                .issue_token(generate_token(), ttl, now)
                .ok_or_else(expiry_out_of_range)?;
            tx.update_user(&user).await?;
        }

        let inviter_name = match user.invited_by {
            Some(inviter_id) => lookup_inviter_name(&mut *tx, inviter_id, &organization.name).await?,
            None => organization.name.clone(),
        };

        tx.commit().await?;

        let (token, expires_at) = match (user.invite_token.clone(), user.expires_at) {
            (Some(token), Some(expires_at)) => (token, expires_at),
            _ => {
                return Err(IdentityError::Internal(
                    "pending user lost its token".to_string(),
                ))
            }
        };

        Ok(RefreshedToken {
            outcome: ResendOutcome {
                user_id: user.id,
                email: user.email,
                reissued,
                expires_at,
                kind,
            },
            token,
            organization,
            user_name: user.name,
            inviter_name,
        })
    }
}

struct RefreshedToken {
    outcome: ResendOutcome,
    token: String,
    organization: Organization,
    user_name: String,
    inviter_name: String,
}

async fn lookup_inviter_name(
    tx: &mut dyn StoreTransaction,
    inviter_id: Uuid,
    fallback: &str,
) -> IdentityResult<String> {
    Ok(tx
        .user_by_id(inviter_id)
        .await?
        .map(|u| u.name)
        .unwrap_or_else(|| fallback.to_string()))
}
