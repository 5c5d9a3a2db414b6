/// Organization details and member management
///
/// Management follows the invitation role table: a manager may suspend,
/// reactivate or remove exactly the roles it could have invited. Nobody
/// manages themselves, and users of other organizations are invisible.

use super::IdentityContext;
use crate::auth::authorization::{require_can_manage, require_not_self, MANAGER_ROLES};
use crate::auth::{authorize, SessionClaims};
use crate::db::{StoreTransaction, TxMode};
use crate::deadline::Deadline;
use crate::error::{IdentityError, IdentityResult};
use crate::models::{OrganizationStatus, Role, User, UserStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Organization as seen by one of its users
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizationDetails {
    pub id: Uuid,
    pub name: String,
    pub account_id: String,
    pub status: OrganizationStatus,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub created_by_name: Option<String>,

    /// Non-deleted users; hidden from members
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_users: Option<usize>,

    /// Hidden from members
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberAction {
    Suspend,
    Reactivate,
    Remove,
}

impl MemberAction {
    fn as_str(&self) -> &'static str {
        match self {
            MemberAction::Suspend => "suspend",
            MemberAction::Reactivate => "reactivate",
            MemberAction::Remove => "remove",
        }
    }
}

#[derive(Clone)]
pub struct MemberDirectory {
    ctx: IdentityContext,
}

impl MemberDirectory {
    pub fn new(ctx: IdentityContext) -> Self {
        Self { ctx }
    }

    /// Details of the caller's organization
    ///
    /// Owners and maintainers also see the user count and owner email.
    pub async fn organization_details(
        &self,
        claims: &SessionClaims,
        deadline: &Deadline,
    ) -> IdentityResult<OrganizationDetails> {
        deadline
            .run(async {
                let mut tx = self.ctx.begin(TxMode::ReadOnly).await?;

                let organization = tx
                    .organization_by_id(claims.organization_id)
                    .await?
                    .ok_or_else(|| IdentityError::NotFound("Organization not found".to_string()))?;

                let creator = match organization.created_by {
                    Some(id) => tx.user_by_id(id).await?,
                    None => None,
                };

                let (total_users, owner_email) = if claims.role.can_view_organization_details() {
                    let users = tx.users_in_organization(organization.id).await?;
                    let owner_email = users
                        .iter()
                        .find(|u| u.role == Role::Owner)
                        .map(|u| u.email.clone());
                    (Some(users.len()), owner_email)
                } else {
                    (None, None)
                };

                tx.commit().await?;

                Ok(OrganizationDetails {
                    id: organization.id,
                    name: organization.name,
                    account_id: organization.account_id,
                    status: organization.status,
                    created_at: organization.created_at,
                    created_by: organization.created_by,
                    created_by_name: creator.map(|u| u.name),
                    total_users,
                    owner_email,
                })
            })
            .await
    }

    /// Non-deleted users of the caller's organization, oldest first
    pub async fn list_members(
        &self,
        claims: &SessionClaims,
        deadline: &Deadline,
    ) -> IdentityResult<Vec<User>> {
        let users = deadline
            .run(async {
                let mut tx = self.ctx.begin(TxMode::ReadOnly).await?;
                let users = tx.users_in_organization(claims.organization_id).await?;
                tx.commit().await?;
                Ok(users)
            })
            .await?;

        tracing::debug!(
            organization_id = %claims.organization_id,
            count = users.len(),
            "Listed members"
        );
        Ok(users)
    }

    /// Suspends an active member; their sessions stop verifying at once
    pub async fn suspend_member(
        &self,
        claims: &SessionClaims,
        user_id: Uuid,
        deadline: &Deadline,
    ) -> IdentityResult<User> {
        self.apply(claims, user_id, MemberAction::Suspend, deadline).await
    }

    /// Lifts a suspension; sessions issued before it stay valid again only
    /// if the credential was not rotated meanwhile
    pub async fn reactivate_member(
        &self,
        claims: &SessionClaims,
        user_id: Uuid,
        deadline: &Deadline,
    ) -> IdentityResult<User> {
        self.apply(claims, user_id, MemberAction::Reactivate, deadline).await
    }

    /// Soft-deletes a member; terminal
    ///
    /// The credential version is bumped so no earlier session survives even
    /// if the row were ever restored by hand.
    pub async fn remove_member(
        &self,
        claims: &SessionClaims,
        user_id: Uuid,
        deadline: &Deadline,
    ) -> IdentityResult<User> {
        self.apply(claims, user_id, MemberAction::Remove, deadline).await
    }

    async fn apply(
        &self,
        claims: &SessionClaims,
        user_id: Uuid,
        action: MemberAction,
        deadline: &Deadline,
    ) -> IdentityResult<User> {
        authorize(claims, MANAGER_ROLES)?;
        require_not_self(claims, user_id)?;

        let user = deadline
            .run(async {
                let mut tx = self.ctx.begin(TxMode::ReadWrite).await?;
                let user = change_member(&mut *tx, claims, user_id, action).await?;
                tx.commit().await?;
                Ok(user)
            })
            .await
            .map_err(|e| {
                tracing::warn!(
                    actor_id = %claims.sub,
                    target_id = %user_id,
                    action = action.as_str(),
                    error = %e,
                    "Member change rejected"
                );
                e
            })?;

        tracing::info!(
            actor_id = %claims.sub,
            user_id = %user.id,
            action = action.as_str(),
            "Member changed"
        );
        Ok(user)
    }
}

async fn change_member(
    tx: &mut dyn StoreTransaction,
    claims: &SessionClaims,
    user_id: Uuid,
    action: MemberAction,
) -> IdentityResult<User> {
    let mut user = tx
        .user_by_id(user_id)
        .await?
        .filter(|u| u.organization_id == claims.organization_id)
        .ok_or_else(|| IdentityError::NotFound("User not found".to_string()))?;

    require_can_manage(claims.role, user.role)?;

    let now = Utc::now();
    match action {
        MemberAction::Suspend => {
            if user.status != UserStatus::Active {
                return Err(IdentityError::Conflict("Only active users can be suspended".to_string()));
            }
            user.status = UserStatus::Suspended;
        }
        MemberAction::Reactivate => {
            if user.status != UserStatus::Suspended {
                return Err(IdentityError::Conflict(
                    "Only suspended users can be reactivated".to_string(),
                ));
            }
            user.status = UserStatus::Active;
            user.reactivated_at = Some(now);
        }
        MemberAction::Remove => {
            user.is_deleted = true;
            user.deleted_at = Some(now);
            user.deleted_by = Some(claims.sub);
            user.token_version += 1;
            user.clear_token();
        }
    }
    user.updated_at = now;

    tx.update_user(&user).await?;
    Ok(user)
}
