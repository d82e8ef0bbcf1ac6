//! Sharing keys with other users
//!
//! A grant is recorded in `key_permissions` first; the invitation email is
//! best-effort afterwards. A failed email after a recorded grant is reported
//! as a partial success, never rolled back.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;

use tapkey_core::prelude::*;
use tapkey_core::{KeyPermission, KeyRecord, NewPermission, Notice, PermissionLevel};

use crate::store::RemoteStore;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Email regex pattern is valid")
});

/// Trim and lowercase `email`, rejecting anything that is not an address
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    if !EMAIL_PATTERN.is_match(&email) {
        return Err(Error::InvalidEmail { email });
    }
    Ok(email)
}

/// An outgoing email
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Failure reported by the email side channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct MailError(pub String);

/// Email delivery; success or failure only, no retries
#[trait_variant::make(Mailer: Send)]
pub trait LocalMailer {
    async fn send(&self, message: EmailMessage) -> std::result::Result<(), MailError>;
}

/// Mailer that only logs, for headless use
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    async fn send(&self, message: EmailMessage) -> std::result::Result<(), MailError> {
        info!("invitation email to {}: {}", message.to, message.subject);
        Ok(())
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Build the invitation sent to a new key recipient
pub fn invitation_email(
    recipient: &str,
    inviter: &str,
    key_name: &str,
    level: PermissionLevel,
) -> EmailMessage {
    EmailMessage {
        to: recipient.to_string(),
        subject: format!("{} shared \"{}\" with you", inviter, key_name),
        html: format!(
            "<p>{} gave you <strong>{}</strong> access to <strong>{}</strong>.</p>\
             <p>Sign in to tapkey with this email address to use it.</p>",
            escape_html(inviter),
            level,
            escape_html(key_name),
        ),
    }
}

/// Delivery result of the invitation email
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvitationStatus {
    Sent,
    Failed { message: String },
}

/// Result of a successful grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantOutcome {
    pub permission: KeyPermission,
    pub invitation: InvitationStatus,
}

impl GrantOutcome {
    pub fn notice(&self) -> Notice {
        match &self.invitation {
            InvitationStatus::Sent => {
                Notice::info(format!("Access shared with {}", self.permission.recipient_email))
            }
            InvitationStatus::Failed { .. } => Notice::warning(format!(
                "Access granted to {}, but the invitation email could not be sent",
                self.permission.recipient_email
            )),
        }
    }
}

/// Grants, lists and revokes key permissions
pub struct AccessManager<S, M> {
    store: Arc<S>,
    mailer: Arc<M>,
}

impl<S: RemoteStore, M: Mailer> AccessManager<S, M> {
    pub fn new(store: Arc<S>, mailer: Arc<M>) -> Self {
        Self { store, mailer }
    }

    pub async fn grant_access(
        &self,
        key: &KeyRecord,
        granted_by: &str,
        recipient_email: &str,
        level: PermissionLevel,
    ) -> Result<GrantOutcome> {
        let recipient = normalize_email(recipient_email)?;

        let permission = self
            .store
            .insert_permission(NewPermission {
                key_id: key.id.clone(),
                granted_by: granted_by.to_string(),
                recipient_email: recipient.clone(),
                level,
            })
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    Error::duplicate_access(&recipient)
                } else {
                    e.into_write_error()
                }
            })?;
        info!("granted {} access on key {} to {}", level, key.id, recipient);

        let inviter = match self.store.fetch_profile(granted_by).await {
            Ok(Some(profile)) => profile.label().to_string(),
            Ok(None) => "A tapkey user".to_string(),
            Err(e) => {
                debug!("inviter profile unavailable: {}", e);
                "A tapkey user".to_string()
            }
        };

        let message = invitation_email(&recipient, &inviter, &key.name, level);
        let invitation = match self.mailer.send(message).await {
            Ok(()) => InvitationStatus::Sent,
            Err(e) => {
                warn!("invitation email to {} failed: {}", recipient, e);
                InvitationStatus::Failed { message: e.0 }
            }
        };

        Ok(GrantOutcome {
            permission,
            invitation,
        })
    }

    pub async fn revoke_access(&self, permission_id: &str) -> Result<()> {
        self.store
            .delete_permission(permission_id)
            .await
            .map_err(|e| e.into_write_error())?;
        info!("revoked permission {}", permission_id);
        Ok(())
    }

    pub async fn list_access(&self, key_id: &str) -> Result<Vec<KeyPermission>> {
        self.store
            .list_permissions(key_id)
            .await
            .map_err(|e| e.into_read_error())
    }
}
