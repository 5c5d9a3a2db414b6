/// Integration tests for invitations, acceptance and resend

mod common;

use common::{link_param, TestContext, PASSWORD};
use tenantry_core::error::{ErrorKind, IdentityError};
use tenantry_core::models::{Role, UserStatus};
use tenantry_core::notify::MailKind;
use tenantry_core::services::{AcceptInviteRequest, InviteRequest};

#[tokio::test]
async fn test_invite_role_table() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (_, owner) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let maintainer = ctx
        .active_member(&owner.claims, "mia@acme.com", Role::Maintainer, "Mia")
        .await?;
    let member = ctx
        .active_member(&maintainer.claims, "max@acme.com", Role::Member, "Max")
        .await?;

    let invitations = &ctx.identity.invitations;
    let cases = [
        (&owner.claims, Role::Owner, false),
        (&owner.claims, Role::Maintainer, true),
        (&owner.claims, Role::Member, true),
        (&maintainer.claims, Role::Owner, false),
        (&maintainer.claims, Role::Maintainer, false),
        (&maintainer.claims, Role::Member, true),
        (&member.claims, Role::Owner, false),
        (&member.claims, Role::Maintainer, false),
        (&member.claims, Role::Member, false),
    ];

    for (i, (inviter, role, allowed)) in cases.into_iter().enumerate() {
        let email = format!("case{}@acme.com", i);
        let result = invitations
            .invite(inviter, InviteRequest::new(&email, role, "Invitee"), &ctx.deadline())
            .await;
        match result {
            Ok(invitation) => {
                assert!(allowed, "{} should not invite {}", inviter.role, role);
                assert_eq!(invitation.user.role, role);
            }
            Err(err) => {
                assert!(!allowed, "{} should invite {}: {}", inviter.role, role, err);
                assert_eq!(err.kind(), ErrorKind::Forbidden);
            }
        }
    }

    // Only the allowed invites produced users
    let users = ctx.store.users().await;
    assert_eq!(users.iter().filter(|u| u.email.starts_with("case")).count(), 3);

    Ok(())
}

#[tokio::test]
async fn test_invited_user_joins_after_acceptance() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (signed_up, owner) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let account_id = signed_up.organization.account_id.clone();

    let invitation = ctx
        .identity
        .invitations
        .invite(
            &owner.claims,
            InviteRequest::new("Bob@Acme.com", Role::Member, "Bob"),
            &ctx.deadline(),
        )
        .await?;

    assert_eq!(invitation.user.email, "bob@acme.com");
    assert_eq!(invitation.user.status, UserStatus::Pending);
    assert_eq!(invitation.user.invited_by, Some(owner.user.id));
    assert_eq!(invitation.account_id, account_id);
    assert!(invitation.invite_link.starts_with("https://app.example.com/accept-invite?"));
    assert!(invitation.invite_link.contains(&invitation.token));

    let mails = ctx.drain_mail();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].kind, MailKind::Invitation);
    assert_eq!(mails[0].to, "bob@acme.com");
    assert!(mails[0].html_body.contains("Alice has invited you"));
    assert_eq!(
        link_param(&mails[0].html_body, "token").as_deref(),
        Some(invitation.token.as_str())
    );

    // Pending users cannot log in, not even with the right password
    let err = ctx.login(&account_id, "bob@acme.com", PASSWORD).await.unwrap_err();
    let err = err.downcast::<IdentityError>()?;
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    let bob = ctx
        .identity
        .invitations
        .accept_invite(
            AcceptInviteRequest::new(&invitation.token, &account_id, "bob@acme.com", "Bobby", "bobs-password"),
            &ctx.deadline(),
        )
        .await?;
    assert_eq!(bob.status, UserStatus::Active);
    assert_eq!(bob.name, "Bobby");
    assert!(bob.invite_token.is_none());
    assert_eq!(bob.token_version, 1);

    let session = ctx.login(&account_id, "bob@acme.com", "bobs-password").await?;
    assert_eq!(session.claims.role, Role::Member);
    assert_eq!(session.claims.organization_id, owner.claims.organization_id);

    Ok(())
}

#[tokio::test]
async fn test_accepting_twice_conflicts() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (_, owner) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let invitation = ctx
        .identity
        .invitations
        .invite(&owner.claims, InviteRequest::new("bob@acme.com", Role::Member, "Bob"), &ctx.deadline())
        .await?;

    let request = AcceptInviteRequest::new(
        &invitation.token,
        &invitation.account_id,
        "bob@acme.com",
        "Bob",
        PASSWORD,
    );
    ctx.identity
        .invitations
        .accept_invite(request.clone(), &ctx.deadline())
        .await?;

    let err = ctx
        .identity
        .invitations
        .accept_invite(request, &ctx.deadline())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    Ok(())
}

#[tokio::test]
async fn test_accept_with_wrong_coordinates() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (signed_up, owner) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let (other, _) = ctx.active_owner("Globex", "Hank", "hank@globex.com").await?;
    let invitation = ctx
        .identity
        .invitations
        .invite(&owner.claims, InviteRequest::new("bob@acme.com", Role::Member, "Bob"), &ctx.deadline())
        .await?;
    let account_id = signed_up.organization.account_id.as_str();
    let invitations = &ctx.identity.invitations;

    let attempts = [
        AcceptInviteRequest::new(&"f".repeat(64), account_id, "bob@acme.com", "Bob", PASSWORD),
        AcceptInviteRequest::new(&invitation.token, &other.organization.account_id, "bob@acme.com", "Bob", PASSWORD),
        AcceptInviteRequest::new(&invitation.token, "9999999999999999", "bob@acme.com", "Bob", PASSWORD),
        AcceptInviteRequest::new(&invitation.token, account_id, "carol@acme.com", "Bob", PASSWORD),
        AcceptInviteRequest::new("", account_id, "bob@acme.com", "Bob", PASSWORD),
    ];

    for request in attempts {
        let err = invitations.accept_invite(request, &ctx.deadline()).await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidToken), "unexpected {:?}", err);
    }

    // Still pending and redeemable
    let bob = ctx.stored_user(invitation.user.id).await;
    assert_eq!(bob.status, UserStatus::Pending);
    assert_eq!(bob.invite_token.as_deref(), Some(invitation.token.as_str()));

    Ok(())
}

#[tokio::test]
async fn test_owner_cannot_accept_with_verification_token() -> anyhow::Result<()> {
    let ctx = TestContext::new();
    let outcome = ctx.sign_up("Acme", "Alice", "alice@acme.com").await?;

    let err = ctx
        .identity
        .invitations
        .accept_invite(
            AcceptInviteRequest::new(
                &outcome.verification_token,
                &outcome.organization.account_id,
                "alice@acme.com",
                "Alice",
                PASSWORD,
            ),
            &ctx.deadline(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::InvalidToken));

    Ok(())
}

#[tokio::test]
async fn test_accept_expired_invitation() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (_, owner) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let invitation = ctx
        .identity
        .invitations
        .invite(&owner.claims, InviteRequest::new("bob@acme.com", Role::Member, "Bob"), &ctx.deadline())
        .await?;
    ctx.expire_token(invitation.user.id).await?;

    let err = ctx
        .identity
        .invitations
        .accept_invite(
            AcceptInviteRequest::new(&invitation.token, &invitation.account_id, "bob@acme.com", "Bob", PASSWORD),
            &ctx.deadline(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Expired);
    assert_eq!(ctx.stored_user(invitation.user.id).await.status, UserStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn test_accept_short_password() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (_, owner) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let invitation = ctx
        .identity
        .invitations
        .invite(&owner.claims, InviteRequest::new("bob@acme.com", Role::Member, "Bob"), &ctx.deadline())
        .await?;
    let invitations = &ctx.identity.invitations;

    // Token problems are reported before password problems
    let err = invitations
        .accept_invite(
            AcceptInviteRequest::new(&"a".repeat(64), &invitation.account_id, "bob@acme.com", "Bob", "short"),
            &ctx.deadline(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::InvalidToken));

    let err = invitations
        .accept_invite(
            AcceptInviteRequest::new(&invitation.token, &invitation.account_id, "bob@acme.com", "Bob", "short"),
            &ctx.deadline(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::WeakInput { min: 8 }));
    assert_eq!(ctx.stored_user(invitation.user.id).await.status, UserStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn test_reinviting_conflicts() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (_, owner) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    ctx.active_member(&owner.claims, "mia@acme.com", Role::Maintainer, "Mia")
        .await?;
    ctx.identity
        .invitations
        .invite(&owner.claims, InviteRequest::new("bob@acme.com", Role::Member, "Bob"), &ctx.deadline())
        .await?;
    let invitations = &ctx.identity.invitations;

    let err = invitations
        .invite(&owner.claims, InviteRequest::new("BOB@acme.com", Role::Member, "Bob"), &ctx.deadline())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.to_string(), "Conflict: User has already been invited");

    let err = invitations
        .invite(&owner.claims, InviteRequest::new("mia@acme.com", Role::Member, "Mia"), &ctx.deadline())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Conflict: User is already a member of this organization");

    // The owner is a member too
    let err = invitations
        .invite(&owner.claims, InviteRequest::new("alice@acme.com", Role::Member, "Alice"), &ctx.deadline())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    Ok(())
}

#[tokio::test]
async fn test_same_email_in_two_organizations() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (_, acme) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let (_, globex) = ctx.active_owner("Globex", "Hank", "hank@globex.com").await?;

    let first = ctx
        .active_member(&acme.claims, "bob@example.com", Role::Member, "Bob")
        .await?;
    let second = ctx
        .active_member(&globex.claims, "bob@example.com", Role::Maintainer, "Bob")
        .await?;

    assert_ne!(first.user.id, second.user.id);
    assert_ne!(first.claims.account_id, second.claims.account_id);

    Ok(())
}

#[tokio::test]
async fn test_suspended_inviter_is_refused() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (_, owner) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let maintainer = ctx
        .active_member(&owner.claims, "mia@acme.com", Role::Maintainer, "Mia")
        .await?;
    ctx.identity
        .members
        .suspend_member(&owner.claims, maintainer.user.id, &ctx.deadline())
        .await?;

    let err = ctx
        .identity
        .invitations
        .invite(&maintainer.claims, InviteRequest::new("bob@acme.com", Role::Member, "Bob"), &ctx.deadline())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);
    assert!(ctx.drain_mail().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_resend_reuses_live_token() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (_, owner) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let invitation = ctx
        .identity
        .invitations
        .invite(&owner.claims, InviteRequest::new("bob@acme.com", Role::Member, "Bob"), &ctx.deadline())
        .await?;
    ctx.drain_mail();

    let resent = ctx
        .identity
        .invitations
        .resend_verification(&invitation.account_id, "bob@acme.com", &ctx.deadline())
        .await?;
    assert!(!resent.reissued);
    assert_eq!(resent.kind, MailKind::Invitation);
    assert_eq!(resent.user_id, invitation.user.id);
    assert_eq!(resent.expires_at, invitation.expires_at);

    let mails = ctx.drain_mail();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].kind, MailKind::Invitation);
    assert!(mails[0].html_body.contains("Hi Bob"));
    assert!(mails[0].html_body.contains("Alice has invited you"));
    assert_eq!(
        link_param(&mails[0].html_body, "token").as_deref(),
        Some(invitation.token.as_str())
    );

    Ok(())
}

#[tokio::test]
async fn test_resend_reissues_expired_token() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (_, owner) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let invitation = ctx
        .identity
        .invitations
        .invite(&owner.claims, InviteRequest::new("bob@acme.com", Role::Member, "Bob"), &ctx.deadline())
        .await?;
    ctx.expire_token(invitation.user.id).await?;
    ctx.drain_mail();

    let resent = ctx
        .identity
        .invitations
        .resend_verification(&invitation.account_id, "bob@acme.com", &ctx.deadline())
        .await?;
    assert!(resent.reissued);
    assert!(resent.expires_at > chrono::Utc::now() + chrono::Duration::hours(47));

    let stored = ctx.stored_user(invitation.user.id).await;
    let fresh = stored.invite_token.clone().expect("token reissued");
    assert_ne!(fresh, invitation.token);

    // The old token is dead, the new one works
    let invitations = &ctx.identity.invitations;
    let err = invitations
        .accept_invite(
            AcceptInviteRequest::new(&invitation.token, &invitation.account_id, "bob@acme.com", "Bob", PASSWORD),
            &ctx.deadline(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IdentityError::InvalidToken));

    invitations
        .accept_invite(
            AcceptInviteRequest::new(&fresh, &invitation.account_id, "bob@acme.com", "Bob", PASSWORD),
            &ctx.deadline(),
        )
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_resend_for_pending_owner_sends_verification() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let outcome = ctx.sign_up("Acme", "Alice", "alice@acme.com").await?;
    ctx.drain_mail();

    let resent = ctx
        .identity
        .invitations
        .resend_verification(&outcome.organization.account_id, "alice@acme.com", &ctx.deadline())
        .await?;
    assert!(!resent.reissued);
    assert_eq!(resent.kind, MailKind::Verification);

    let mails = ctx.drain_mail();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].kind, MailKind::Verification);
    assert!(mails[0].html_body.contains("verify-account"));

    Ok(())
}

#[tokio::test]
async fn test_resend_without_pending_user() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (signed_up, _) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let account_id = signed_up.organization.account_id.as_str();
    let invitations = &ctx.identity.invitations;

    // Active owner
    let err = invitations
        .resend_verification(account_id, "alice@acme.com", &ctx.deadline())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = invitations
        .resend_verification(account_id, "nobody@acme.com", &ctx.deadline())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = invitations
        .resend_verification("9999999999999999", "alice@acme.com", &ctx.deadline())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert!(ctx.drain_mail().is_empty());
    Ok(())
}
