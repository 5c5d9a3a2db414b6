/// Mail bodies and frontend links
///
/// Links point at the frontend, which collects whatever else the transition
/// needs (email, name, new password) and calls back into the services.
///
/// - verification: `{base}/verify-account?token=..&account_id=..`
/// - invitation: `{base}/accept-invite?token=..&account_id=..`
/// - password reset: `{base}/reset-password?token=..`

use super::NotifyError;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;

/// What a mail is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MailKind {
    Verification,
    Invitation,
    PasswordReset,
}

impl MailKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailKind::Verification => "verification",
            MailKind::Invitation => "invitation",
            MailKind::PasswordReset => "password_reset",
        }
    }
}

/// One outbound mail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub kind: MailKind,
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Builds frontend links from the configured base URL
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    base: String,
}

impl LinkBuilder {
    /// Fails when `base_url` is not an absolute URL
    pub fn new(base_url: &str) -> Result<Self, NotifyError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| NotifyError::Config(format!("invalid frontend base URL: {}", e)))?;
        Ok(Self {
            base: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn link(&self, path: &str, params: &[(&str, &str)]) -> String {
        let raw = format!("{}/{}", self.base, path);
        match Url::parse_with_params(&raw, params) {
            Ok(url) => url.to_string(),
            // base was validated in new(); a bare join is the only fallback left
            Err(_) => raw,
        }
    }

    pub fn verification(&self, token: &str, account_id: &str) -> String {
        self.link("verify-account", &[("token", token), ("account_id", account_id)])
    }

    pub fn invitation(&self, token: &str, account_id: &str) -> String {
        self.link("accept-invite", &[("token", token), ("account_id", account_id)])
    }

    pub fn password_reset(&self, token: &str) -> String {
        self.link("reset-password", &[("token", token)])
    }
}

/// Escapes text for inclusion in HTML bodies
pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn validity(expires_at: DateTime<Utc>) -> String {
    let hours = (expires_at - Utc::now()).num_minutes().max(0) as f64 / 60.0;
    let hours = hours.round() as i64;
    if hours <= 1 {
        "1 hour".to_string()
    } else {
        format!("{} hours", hours)
    }
}

fn button(link: &str, label: &str) -> String {
    format!(
        r#"<a href="{}" style="background:#4F46E5;color:white;padding:10px 20px;border-radius:6px;text-decoration:none;">{}</a>"#,
        escape_html(link),
        label
    )
}

/// Mail asking a new owner to verify their account
pub fn verification_mail(
    to: &str,
    owner_name: &str,
    organization_name: &str,
    account_id: &str,
    link: &str,
    expires_at: DateTime<Utc>,
) -> MailMessage {
    let html_body = format!(
        "<h2>Welcome to {org}!</h2>\n\
         <p>Hi {name},</p>\n\
         <p>Please verify your account to activate your organization.</p>\n\
         {button}\n\
         <p>This link will expire in {validity}.</p>\n\
         <p>Your account ID is <code>{account_id}</code>. You will need it to log in.</p>",
        org = escape_html(organization_name),
        name = escape_html(owner_name),
        button = button(link, "Verify Account"),
        validity = validity(expires_at),
        account_id = escape_html(account_id),
    );

    MailMessage {
        kind: MailKind::Verification,
        to: to.to_string(),
        subject: "Verify Your Account".to_string(),
        html_body,
    }
}

/// Mail inviting a user into an organization
pub fn invitation_mail(
    to: &str,
    invitee_name: &str,
    inviter_name: &str,
    organization_name: &str,
    account_id: &str,
    link: &str,
    expires_at: DateTime<Utc>,
) -> MailMessage {
    let html_body = format!(
        "<h2>You're invited to join {org}!</h2>\n\
         <p>Hi {name},</p>\n\
         <p>{inviter} has invited you to join the organization <strong>{org}</strong>.</p>\n\
         <p>Click the button below to accept the invitation and set your password:</p>\n\
         {button}\n\
         <p>This link will expire in {validity}.</p>\n\
         <p><strong>Note:</strong> When logging in, please use the following account ID: <code>{account_id}</code></p>",
        org = escape_html(organization_name),
        name = escape_html(invitee_name),
        inviter = escape_html(inviter_name),
        button = button(link, "Accept Invitation"),
        validity = validity(expires_at),
        account_id = escape_html(account_id),
    );

    MailMessage {
        kind: MailKind::Invitation,
        to: to.to_string(),
        subject: format!("You're invited to join {}", organization_name),
        html_body,
    }
}

/// Mail carrying a password reset link
pub fn password_reset_mail(to: &str, name: &str, link: &str, expires_at: DateTime<Utc>) -> MailMessage {
    let html_body = format!(
        "<h2>Password Reset Request</h2>\n\
         <p>Hi {name},</p>\n\
         <p>We received a request to reset your password. Click the button below to choose a new one:</p>\n\
         {button}\n\
         <p>This link will expire in {validity}. If you did not request a reset, you can ignore this mail.</p>",
        name = escape_html(name),
        button = button(link, "Reset Password"),
        validity = validity(expires_at),
    );

    MailMessage {
        kind: MailKind::PasswordReset,
        to: to.to_string(),
        subject: "Reset Your Password".to_string(),
        html_body,
    }
}
