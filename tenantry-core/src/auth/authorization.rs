/// Role-based access decisions over verified session claims
///
/// Everything here is stateless: callers pass claims that have already been
/// verified by [`SessionIssuer`](crate::services::sessions::SessionIssuer).
///
/// # Rules
///
/// - An operation lists the roles allowed to call it; any other role is refused
/// - Managing another user (inviting, suspending, reactivating, removing)
///   follows the escalation table: owner manages maintainer and member,
///   maintainer manages member, member manages nobody
/// - Nobody manages themselves
///
/// # Example
///
/// ```
/// use tenantry_core::auth::authorization::{authorize, require_can_manage};
/// use tenantry_core::models::Role;
///
/// assert!(require_can_manage(Role::Owner, Role::Member).is_ok());
/// assert!(require_can_manage(Role::Maintainer, Role::Maintainer).is_err());
/// ```

use crate::auth::jwt::SessionClaims;
use crate::models::Role;
use uuid::Uuid;

/// Roles allowed to invite and manage members
pub const MANAGER_ROLES: &[Role] = &[Role::Owner, Role::Maintainer];

/// Every role
pub const ALL_ROLES: &[Role] = &[Role::Owner, Role::Maintainer, Role::Member];

/// Authorization error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
    /// Caller's role is not in the allowed set
    #[error("Role {actual} is not allowed for this operation")]
    RoleNotAllowed { actual: Role },

    /// Escalation table forbids acting on the target's role
    #[error("Role {actor} cannot manage role {target}")]
    CannotManage { actor: Role, target: Role },

    /// Actor targeted their own account
    #[error("Cannot perform this operation on your own account")]
    SelfTarget,
}

/// Allows iff the claims' role is one of `allowed`
pub fn authorize(claims: &SessionClaims, allowed: &[Role]) -> Result<(), AuthzError> {
    if allowed.contains(&claims.role) {
        Ok(())
    } else {
        tracing::warn!(
            user_id = %claims.sub,
            role = %claims.role,
            "Role not allowed for operation"
        );
        Err(AuthzError::RoleNotAllowed {
            actual: claims.role,
        })
    }
}

/// Applies the escalation table
pub fn require_can_manage(actor: Role, target: Role) -> Result<(), AuthzError> {
    if actor.can_manage(target) {
        Ok(())
    } else {
        Err(AuthzError::CannotManage { actor, target })
    }
}

/// Refuses operations aimed at the caller's own account
pub fn require_not_self(claims: &SessionClaims, target_user_id: Uuid) -> Result<(), AuthzError> {
    if claims.sub == target_user_id {
        Err(AuthzError::SelfTarget)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: Role) -> SessionClaims {
        SessionClaims {
            sub: Uuid::new_v4(),
            iss: "tenantry".to_string(),
            iat: 0,
            exp: i64::MAX,
            nbf: 0,
            organization_id: Uuid::new_v4(),
            account_id: "1100000000000001".to_string(),
            role,
            token_version: 1,
        }
    }

    #[test]
    fn test_authorize_allows_listed_roles() {
        assert!(authorize(&claims(Role::Owner), MANAGER_ROLES).is_ok());
        assert!(authorize(&claims(Role::Maintainer), MANAGER_ROLES).is_ok());
        assert!(authorize(&claims(Role::Member), ALL_ROLES).is_ok());
    }

    #[test]
    fn test_authorize_rejects_unlisted_roles() {
        assert_eq!(
            authorize(&claims(Role::Member), MANAGER_ROLES),
            Err(AuthzError::RoleNotAllowed {
                actual: Role::Member
            })
        );
        assert!(authorize(&claims(Role::Owner), &[]).is_err());
    }

    #[test]
    fn test_escalation_table() {
        assert!(require_can_manage(Role::Owner, Role::Maintainer).is_ok());
        assert!(require_can_manage(Role::Owner, Role::Member).is_ok());
        assert!(require_can_manage(Role::Maintainer, Role::Member).is_ok());

        assert!(require_can_manage(Role::Owner, Role::Owner).is_err());
        assert!(require_can_manage(Role::Maintainer, Role::Maintainer).is_err());
        assert!(require_can_manage(Role::Maintainer, Role::Owner).is_err());
        assert!(require_can_manage(Role::Member, Role::Member).is_err());
    }

    #[test]
    fn test_self_target() {
        let claims = claims(Role::Owner);
        assert_eq!(require_not_self(&claims, claims.sub), Err(AuthzError::SelfTarget));
        assert!(require_not_self(&claims, Uuid::new_v4()).is_ok());
    }
}
