//! Calendar/directory gateway boundary.
//!
//! The scheduling core talks to the directory and calendar only through
//! [`CalendarGateway`]. Authentication, token refresh and connection policy
//! belong to the implementation, not to callers.
//!
//! Modules:
//! - rest: Bitrix24-style REST implementation over reqwest
//! - fake: in-memory gateway for tests

pub mod rest;

#[cfg(test)]
pub mod fake;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::types::{AccountId, MeetingRequest};

pub use rest::RestGateway;

// ============================================================================
// Wire types
// ============================================================================

/// Entry returned by a directory user lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub id: AccountId,
    pub name: String,
    pub last_name: String,
}

impl DirectoryUser {
    /// "Name LastName", trimmed.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name, self.last_name).trim().to_string()
    }
}

/// Record from the secondary bulk lookup that also covers guest accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUser {
    pub id: AccountId,
    pub name: String,
    pub email: Option<String>,
    pub external_auth_id: Option<String>,
}

/// Guest accounts created by email invitation carry this external-auth provider.
pub const EMAIL_AUTH_PROVIDER: &str = "email";

impl ChatUser {
    pub fn is_email_guest(&self) -> bool {
        self.external_auth_id.as_deref() == Some(EMAIL_AUTH_PROVIDER)
            && self.email.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// One accessibility record as reported by the gateway.
///
/// Timestamps are local wall-clock strings tagged with a raw offset in
/// seconds; they are kept unparsed so a single malformed slot can be
/// skipped without failing the whole response.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AccessibilitySlot {
    #[serde(rename = "ACCESSIBILITY", default)]
    pub accessibility: Option<String>,
    #[serde(rename = "DATE_FROM", default)]
    pub date_from: String,
    #[serde(rename = "DATE_TO", default)]
    pub date_to: String,
    #[serde(rename = "~USER_OFFSET_FROM", default)]
    pub offset_from: serde_json::Value,
    #[serde(rename = "~USER_OFFSET_TO", default)]
    pub offset_to: serde_json::Value,
}

impl AccessibilitySlot {
    /// Anything other than an explicit "free" counts as busy, including a missing value.
    pub fn is_busy(&self) -> bool {
        self.accessibility.as_deref() != Some("free")
    }
}

/// Per-account accessibility records for a date range.
pub type AccessibilityMap = HashMap<AccountId, Vec<AccessibilitySlot>>;

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid gateway endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("API error ({method}): {code}: {description}")]
    Api {
        method: String,
        code: String,
        description: String,
    },
    #[error("API error ({method}): HTTP {status}")]
    Status { method: String, status: u16 },
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed response ({method}): {reason}")]
    MalformedResponse { method: String, reason: String },
}

// ============================================================================
// Boundary trait
// ============================================================================

#[async_trait]
pub trait CalendarGateway: Send + Sync {
    /// Directory lookup filtered on a single field (`userLookup`).
    async fn find_users(&self, field: &str, value: &str)
        -> Result<Vec<DirectoryUser>, GatewayError>;

    /// Total number of regular (directory-visible) accounts.
    async fn count_users(&self) -> Result<u64, GatewayError>;

    /// Secondary bulk lookup by id; ids with no account are simply absent.
    async fn list_chat_users(&self, ids: &[AccountId]) -> Result<Vec<ChatUser>, GatewayError>;

    /// One round trip covering every account over `[from, to]` (`bulkAccessibility`).
    async fn accessibility(
        &self,
        ids: &[AccountId],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AccessibilityMap, GatewayError>;

    /// Create the event on behalf of the acting account (`eventCreate`).
    ///
    /// The gateway resolves the owner itself and marks the event as a
    /// notifying meeting only when `request.attendee_ids` is non-empty.
    /// Returns the external event id.
    async fn create_event(
        &self,
        request: &MeetingRequest,
        timezone: &str,
    ) -> Result<String, GatewayError>;
}
