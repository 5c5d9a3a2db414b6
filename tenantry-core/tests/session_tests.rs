/// Integration tests for login and session verification

mod common;

use common::{TestContext, PASSWORD, SESSION_SECRET};
use tenantry_core::auth::authorization::{ALL_ROLES, MANAGER_ROLES};
use tenantry_core::auth::{HashParams, SessionKeys};
use tenantry_core::error::{ErrorKind, IdentityError};
use tenantry_core::models::Role;
use tenantry_core::services::LoginRequest;

#[tokio::test]
async fn test_login_issues_versioned_session() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (signed_up, session) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;

    let claims = &session.claims;
    assert_eq!(claims.sub, signed_up.owner.id);
    assert_eq!(claims.organization_id, signed_up.organization.id);
    assert_eq!(claims.account_id, signed_up.organization.account_id);
    assert_eq!(claims.role, Role::Owner);
    assert_eq!(claims.token_version, 1);
    assert_eq!(claims.iss, "tenantry");
    assert_eq!(claims.exp - claims.iat, 24 * 3600);

    let verified = ctx
        .identity
        .sessions
        .verify(&session.token, &ctx.deadline())
        .await?;
    assert_eq!(&verified, claims);

    Ok(())
}

#[tokio::test]
async fn test_login_normalizes_input() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (signed_up, _) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;

    let session = ctx
        .login(
            &format!(" {} ", signed_up.organization.account_id),
            "  ALICE@acme.com",
            PASSWORD,
        )
        .await?;
    assert_eq!(session.user.id, signed_up.owner.id);

    Ok(())
}

#[tokio::test]
async fn test_login_failures_share_one_message() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (signed_up, owner) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let account_id = signed_up.organization.account_id.clone();

    // A pending invitee and a suspended member
    ctx.identity
        .invitations
        .invite(
            &owner.claims,
            tenantry_core::services::InviteRequest::new("bob@acme.com", Role::Member, "Bob"),
            &ctx.deadline(),
        )
        .await?;
    let carol = ctx
        .active_member(&owner.claims, "carol@acme.com", Role::Member, "Carol")
        .await?;
    ctx.identity
        .members
        .suspend_member(&owner.claims, carol.user.id, &ctx.deadline())
        .await?;

    let attempts = [
        (account_id.as_str(), "alice@acme.com", "wrong-password"),
        (account_id.as_str(), "nobody@acme.com", PASSWORD),
        ("9999999999999999", "alice@acme.com", PASSWORD),
        (account_id.as_str(), "bob@acme.com", PASSWORD),
        (account_id.as_str(), "carol@acme.com", PASSWORD),
    ];

    for (account, email, password) in attempts {
        let err = ctx
            .login(account, email, password)
            .await
            .unwrap_err()
            .downcast::<IdentityError>()?;
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(err.to_string(), "Unauthorized: Invalid credentials");
    }

    Ok(())
}

#[tokio::test]
async fn test_password_change_revokes_earlier_sessions() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (signed_up, first) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let account_id = signed_up.organization.account_id.as_str();
    let second = ctx.login(account_id, "alice@acme.com", PASSWORD).await?;

    let user = ctx
        .identity
        .recovery
        .reset_password_authenticated(&first.claims, PASSWORD, "a-brand-new-one", &ctx.deadline())
        .await?;
    assert_eq!(user.token_version, 2);

    for stale in [&first.token, &second.token] {
        let err = ctx
            .identity
            .sessions
            .verify(stale, &ctx.deadline())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(err.to_string(), "Unauthorized: Session is stale");
    }

    let fresh = ctx.login(account_id, "alice@acme.com", "a-brand-new-one").await?;
    assert_eq!(fresh.claims.token_version, 2);
    ctx.identity
        .sessions
        .verify(&fresh.token, &ctx.deadline())
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_tampered_and_foreign_sessions_rejected() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (_, session) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let sessions = &ctx.identity.sessions;

    // Swap the first signature character
    let (unsigned, signature) = session.token.rsplit_once('.').expect("three segments");
    let first = if signature.starts_with('A') { 'B' } else { 'A' };
    let tampered = format!("{}.{}{}", unsigned, first, &signature[1..]);

    let foreign_keys = SessionKeys::from_secret(
        b"another-secret-that-is-32-bytes-or-more",
        "tenantry",
        chrono::Duration::hours(1),
    )?;
    let foreign = foreign_keys.sign(&session.claims)?;

    let other_issuer = SessionKeys::from_secret(SESSION_SECRET, "someone-else", chrono::Duration::hours(1))?;
    let mut claims = session.claims.clone();
    claims.iss = "someone-else".to_string();
    let wrong_issuer = other_issuer.sign(&claims)?;

    for raw in [tampered.as_str(), foreign.as_str(), wrong_issuer.as_str(), "not-a-jwt", ""] {
        let err = sessions.verify(raw, &ctx.deadline()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized, "{:?} accepted", raw);
    }

    Ok(())
}

#[tokio::test]
async fn test_expired_session_rejected() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (signed_up, _) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;

    let past = SessionKeys::from_secret(SESSION_SECRET, "tenantry", chrono::Duration::hours(-2))?;
    let claims = past.claims(
        signed_up.owner.id,
        signed_up.organization.id,
        &signed_up.organization.account_id,
        Role::Owner,
        1,
    )?;
    let raw = past.sign(&claims)?;

    let err = ctx
        .identity
        .sessions
        .verify(&raw, &ctx.deadline())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    Ok(())
}

#[tokio::test]
async fn test_authenticate_checks_role() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (_, owner) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let member = ctx
        .active_member(&owner.claims, "max@acme.com", Role::Member, "Max")
        .await?;
    let sessions = &ctx.identity.sessions;

    let claims = sessions
        .authenticate(&owner.token, MANAGER_ROLES, &ctx.deadline())
        .await?;
    assert_eq!(claims.role, Role::Owner);

    sessions
        .authenticate(&member.token, ALL_ROLES, &ctx.deadline())
        .await?;

    let err = sessions
        .authenticate(&member.token, MANAGER_ROLES, &ctx.deadline())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    Ok(())
}

#[tokio::test]
async fn test_suspension_blocks_sessions_until_reactivated() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (_, owner) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let member = ctx
        .active_member(&owner.claims, "max@acme.com", Role::Member, "Max")
        .await?;
    let members = &ctx.identity.members;
    let sessions = &ctx.identity.sessions;

    members
        .suspend_member(&owner.claims, member.user.id, &ctx.deadline())
        .await?;
    let err = sessions.verify(&member.token, &ctx.deadline()).await.unwrap_err();
    assert_eq!(err.to_string(), "Unauthorized: Account is deactivated");

    // Suspension leaves the credential version alone
    members
        .reactivate_member(&owner.claims, member.user.id, &ctx.deadline())
        .await?;
    let claims = sessions.verify(&member.token, &ctx.deadline()).await?;
    assert_eq!(claims.sub, member.user.id);

    Ok(())
}

#[tokio::test]
async fn test_removed_user_session_rejected() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (_, owner) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let member = ctx
        .active_member(&owner.claims, "max@acme.com", Role::Member, "Max")
        .await?;

    ctx.identity
        .members
        .remove_member(&owner.claims, member.user.id, &ctx.deadline())
        .await?;

    let err = ctx
        .identity
        .sessions
        .verify(&member.token, &ctx.deadline())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    Ok(())
}

#[tokio::test]
async fn test_login_upgrades_outdated_hash() -> anyhow::Result<()> {
    let mut ctx = TestContext::new();
    let (signed_up, session) = ctx.active_owner("Acme", "Alice", "alice@acme.com").await?;
    let account_id = signed_up.organization.account_id.as_str();
    let before = ctx.stored_user(signed_up.owner.id).await;
    assert!(before.password_hash.contains("m=1024"));

    let upgraded = ctx.identity_with_params(HashParams {
        memory_kib: 2048,
        iterations: 1,
        lanes: 1,
    });
    upgraded
        .sessions
        .login(LoginRequest::new(account_id, "alice@acme.com", PASSWORD), &ctx.deadline())
        .await?;

    let after = ctx.stored_user(signed_up.owner.id).await;
    assert!(after.password_hash.contains("m=2048"));
    assert_eq!(after.token_version, before.token_version);

    // Sessions survive the upgrade and the password still works
    ctx.identity.sessions.verify(&session.token, &ctx.deadline()).await?;
    ctx.login(account_id, "alice@acme.com", PASSWORD).await?;

    // A failed login leaves the stored hash alone
    let current = ctx.stored_user(signed_up.owner.id).await.password_hash;
    assert!(upgraded
        .sessions
        .login(LoginRequest::new(account_id, "alice@acme.com", "wrong-password"), &ctx.deadline())
        .await
        .is_err());
    assert_eq!(ctx.stored_user(signed_up.owner.id).await.password_hash, current);

    Ok(())
}
