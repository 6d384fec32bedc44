//! Audit trail for callout decisions.
//!
//! Every exchange ends in exactly one event, emitted via `tracing::info!`
//! with the serialized event in the `audit` field.
//!
//! | Event | When |
//! |-------|------|
//! | `callout.authorized` | A credential was issued and the reply sent |
//! | `callout.rejected` | An error reply was sent |
//! | `callout.reply_failed` | The reply could not be signed, sealed or sent |
//!
//! Tokens and credentials are never part of an event.

use serde::Serialize;

use super::CalloutErrorKind;
use crate::ids::UserId;

/// Structured audit event for one callout exchange.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g. `"callout.authorized"`).
    pub event: &'static str,
    /// Broker server that raised the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    /// Connection nkey the credential is bound to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_nkey: Option<String>,
    /// Identity issuer from the verified token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Identity subject from the verified token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Resolved internal user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<UserId>,
    /// Failure kind for rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    /// Human-readable reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Whether the request arrived sealed.
    pub encrypted: bool,
}

impl AuditEvent {
    fn base(event: &'static str, encrypted: bool) -> Self {
        Self {
            event,
            server_id: None,
            user_nkey: None,
            issuer: None,
            subject: None,
            uid: None,
            kind: None,
            reason: None,
            encrypted,
        }
    }

    /// A `callout.authorized` event.
    #[must_use]
    pub fn authorized(uid: UserId, encrypted: bool) -> Self {
        Self {
            uid: Some(uid),
            ..Self::base("callout.authorized", encrypted)
        }
    }

    /// A `callout.rejected` event.
    #[must_use]
    pub fn rejected(kind: CalloutErrorKind, reason: impl Into<String>, encrypted: bool) -> Self {
        Self {
            kind: Some(kind.as_str()),
            reason: Some(reason.into()),
            ..Self::base("callout.rejected", encrypted)
        }
    }

    /// A `callout.reply_failed` event.
    #[must_use]
    pub fn reply_failed(reason: impl Into<String>, encrypted: bool) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::base("callout.reply_failed", encrypted)
        }
    }

    /// Attach the request's server id and connection nkey.
    #[must_use]
    pub fn with_connection(mut self, server_id: &str, user_nkey: &str) -> Self {
        self.server_id = Some(server_id.to_string()).filter(|s| !s.is_empty());
        self.user_nkey = Some(user_nkey.to_string()).filter(|s| !s.is_empty());
        self
    }

    /// Attach the verified identity.
    #[must_use]
    pub fn with_identity(mut self, issuer: &str, subject: &str) -> Self {
        self.issuer = Some(issuer.to_string());
        self.subject = Some(subject.to_string());
        self
    }
}

/// Emit an audit event via `tracing::info!`.
///
/// ```text
/// INFO amble_auth::callout::audit audit={"event":"callout.authorized",...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "callout audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
