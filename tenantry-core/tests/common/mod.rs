//! Common test utilities for integration tests
//!
//! This module provides shared infrastructure for integration tests:
//! - An identity stack on the in-memory store with cheap Argon2 costs
//! - Captured outbound mail
//! - Helpers that walk users through sign-up, verification and invitation

#![allow(dead_code)]

use std::sync::Arc;
use tenantry_core::auth::{CredentialManager, HashParams, PasswordPolicy, SessionClaims, SessionKeys};
use tenantry_core::db::{IdentityStore, MemoryStore, StoreTransaction, TxMode};
use tenantry_core::deadline::Deadline;
use tenantry_core::models::{Role, User};
use tenantry_core::notify::{mail_channel, LinkBuilder, MailMessage, MailReceiver};
use tenantry_core::services::{
    AcceptInviteRequest, Identity, IdentityContext, InviteRequest, LoginOutcome, LoginRequest,
    SignUpOutcome, SignUpRequest, TokenLifetimes,
};

/// Password used by every helper-created user
pub const PASSWORD: &str = "correct-horse-1";

pub const SESSION_SECRET: &[u8] = b"test-secret-key-at-least-32-bytes-long";

pub const FRONTEND: &str = "https://app.example.com";

/// Test context containing all necessary resources
pub struct TestContext {
    pub store: MemoryStore,
    pub identity: Identity,
    pub mail: MailReceiver,
    pub keys: SessionKeys,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_lifetimes(TokenLifetimes::default())
    }

    /// Negative lifetimes produce tokens that are already expired
    pub fn with_lifetimes(lifetimes: TokenLifetimes) -> Self {
        Self::build(lifetimes, HashParams::light())
    }

    /// Custom Argon2 costs, e.g. production costs for timing-sensitive tests
    pub fn with_hash_params(params: HashParams) -> Self {
        Self::build(TokenLifetimes::default(), params)
    }

    fn build(lifetimes: TokenLifetimes, params: HashParams) -> Self {
        tenantry_core::telemetry::init_test_tracing();

        let store = MemoryStore::new();
        let (queue, mail) = mail_channel(256);
        let ctx = IdentityContext::new(
            Arc::new(store.clone()),
            CredentialManager::new(PasswordPolicy::default(), params),
            queue,
            LinkBuilder::new(FRONTEND).expect("valid frontend URL"),
            lifetimes,
        );
        let keys = SessionKeys::from_secret(SESSION_SECRET, "tenantry", chrono::Duration::hours(24))
            .expect("valid session keys");

        Self {
            store,
            identity: Identity::new(ctx, keys.clone()),
            mail,
            keys,
        }
    }

    /// A second identity stack over the same store, hashing with other costs
    pub fn identity_with_params(&self, params: HashParams) -> Identity {
        let (queue, _mail) = mail_channel(16);
        let ctx = IdentityContext::new(
            Arc::new(self.store.clone()),
            CredentialManager::new(PasswordPolicy::default(), params),
            queue,
            LinkBuilder::new(FRONTEND).expect("valid frontend URL"),
            TokenLifetimes::default(),
        );
        Identity::new(ctx, self.keys.clone())
    }

    pub fn deadline(&self) -> Deadline {
        Deadline::after(std::time::Duration::from_secs(10))
    }

    /// Takes every mail queued so far
    pub fn drain_mail(&mut self) -> Vec<MailMessage> {
        let mut mails = Vec::new();
        while let Some(mail) = self.mail.try_recv() {
            mails.push(mail);
        }
        mails
    }

    /// Current committed row, including soft-deleted users
    pub async fn stored_user(&self, id: uuid::Uuid) -> User {
        self.store
            .users()
            .await
            .into_iter()
            .find(|u| u.id == id)
            .expect("user should be stored")
    }

    /// Moves the user's token expiry into the past
    pub async fn expire_token(&self, id: uuid::Uuid) -> anyhow::Result<()> {
        let mut tx = self.store.begin(TxMode::ReadWrite).await?;
        let mut user = tx.user_by_id(id).await?.expect("user should be stored");
        user.expires_at = Some(chrono::Utc::now() - chrono::Duration::minutes(1));
        tx.update_user(&user).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn sign_up(&self, organization: &str, name: &str, email: &str) -> anyhow::Result<SignUpOutcome> {
        Ok(self
            .identity
            .registry
            .sign_up(SignUpRequest::new(organization, name, email, PASSWORD), &self.deadline())
            .await?)
    }

    pub async fn login(&self, account_id: &str, email: &str, password: &str) -> anyhow::Result<LoginOutcome> {
        Ok(self
            .identity
            .sessions
            .login(LoginRequest::new(account_id, email, password), &self.deadline())
            .await?)
    }

    /// Signs up, verifies and logs in an owner
    pub async fn active_owner(
        &mut self,
        organization: &str,
        name: &str,
        email: &str,
    ) -> anyhow::Result<(SignUpOutcome, LoginOutcome)> {
        let outcome = self.sign_up(organization, name, email).await?;
        self.identity
            .registry
            .verify_account(&outcome.verification_token, &self.deadline())
            .await?;
        let session = self.login(&outcome.organization.account_id, email, PASSWORD).await?;
        self.drain_mail();
        Ok((outcome, session))
    }

    /// Invites, accepts and logs in a new user
    pub async fn active_member(
        &mut self,
        inviter: &SessionClaims,
        email: &str,
        role: Role,
        name: &str,
    ) -> anyhow::Result<LoginOutcome> {
        let invitation = self
            .identity
            .invitations
            .invite(inviter, InviteRequest::new(email, role, name), &self.deadline())
            .await?;
        self.identity
            .invitations
            .accept_invite(
                AcceptInviteRequest::new(&invitation.token, &invitation.account_id, email, name, PASSWORD),
                &self.deadline(),
            )
            .await?;
        let session = self.login(&invitation.account_id, email, PASSWORD).await?;
        self.drain_mail();
        Ok(session)
    }
}

/// Lifetimes whose tokens are expired as soon as they are issued
pub fn expired_lifetimes() -> TokenLifetimes {
    TokenLifetimes {
        verification: chrono::Duration::seconds(-1),
        invitation: chrono::Duration::seconds(-1),
        password_reset: chrono::Duration::seconds(-1),
    }
}

/// Value of a query parameter in a mailed link
pub fn link_param(body: &str, name: &str) -> Option<String> {
    let needle = format!("{}=", name);
    let start = body.find(&needle)? + needle.len();
    let rest = &body[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(rest.len());
    Some(rest[..end].to_string())
}
