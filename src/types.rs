//! Shared data model for the scheduling pipeline.
//!
//! A [`Command`] lives only for the duration of one inbound trigger. Nothing
//! here is persisted; the only process-wide state is the guest cache in
//! `resolver`.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Canonical directory/calendar account identifier.
pub type AccountId = u64;

/// Title used when the command carries no quoted/replied context.
pub const DEFAULT_MEETING_TITLE: &str = "Встреча";

/// Maximum number of characters of context copied into the meeting title.
pub const TITLE_MAX_CHARS: usize = 80;

// ============================================================================
// Transport boundary
// ============================================================================

/// A chat message delivered by the messaging transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub chat_id: i64,
    pub sender_id: i64,
    #[serde(default)]
    pub raw_text: String,
    /// Text of the message this one replies to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied_to_text: Option<String>,
}

/// Reply handed back to the transport for a given chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundReply {
    pub chat_id: i64,
    pub text: String,
}

/// Which command surface an inbound message matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    CreateMeeting,
    FindTime,
}

// ============================================================================
// Command
// ============================================================================

/// A parsed "create meeting" command.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub raw_text: String,
    pub target: NaiveDateTime,
    /// Nicknames without the leading `@`, in input order.
    pub nicknames: Vec<String>,
    /// Email tokens, in input order.
    pub emails: Vec<String>,
    pub context_text: Option<String>,
}

impl Command {
    /// Meeting title: the first 80 characters of the context, or the fallback literal.
    pub fn title(&self) -> String {
        match self.context_text.as_deref() {
            Some(ctx) if !ctx.is_empty() => ctx.chars().take(TITLE_MAX_CHARS).collect(),
            _ => DEFAULT_MEETING_TITLE.to_string(),
        }
    }
}

// ============================================================================
// Attendees
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Nickname,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionStatus {
    Resolved,
    NotFound,
    Error,
}

/// One attendee token and the outcome of resolving it.
///
/// Built only through the constructors below so that an account id is
/// present exactly when the status is `Resolved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeReference {
    pub token: String,
    pub kind: TokenKind,
    account_id: Option<AccountId>,
    display_name: Option<String>,
    status: ResolutionStatus,
}

impl AttendeeReference {
    pub fn resolved(
        token: impl Into<String>,
        kind: TokenKind,
        account_id: AccountId,
        display_name: Option<String>,
    ) -> Self {
        Self {
            token: token.into(),
            kind,
            account_id: Some(account_id),
            display_name: display_name.filter(|n| !n.trim().is_empty()),
            status: ResolutionStatus::Resolved,
        }
    }

    pub fn not_found(token: impl Into<String>, kind: TokenKind) -> Self {
        Self {
            token: token.into(),
            kind,
            account_id: None,
            display_name: None,
            status: ResolutionStatus::NotFound,
        }
    }

    pub fn failed(token: impl Into<String>, kind: TokenKind) -> Self {
        Self {
            token: token.into(),
            kind,
            account_id: None,
            display_name: None,
            status: ResolutionStatus::Error,
        }
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.account_id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn status(&self) -> ResolutionStatus {
        self.status
    }

    pub fn is_resolved(&self) -> bool {
        self.status == ResolutionStatus::Resolved
    }

    /// How the token is echoed back in replies (`@nick` or the bare email).
    pub fn mention(&self) -> String {
        match self.kind {
            TokenKind::Nickname => format!("@{}", self.token),
            TokenKind::Email => self.token.clone(),
        }
    }
}

// ============================================================================
// Time ranges
// ============================================================================

/// Half-open time range `[start, end)` in the reference time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Interval {
    /// Returns `None` unless `start < end`.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Busy period reported for one account, already clipped to a working window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyInterval {
    pub account_id: AccountId,
    pub interval: Interval,
}

/// A bookable gap of at least the minimum slot length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSlot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl FreeSlot {
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Free slots for one weekday of the horizon. An empty `free` list is valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub window: Interval,
    pub free: Vec<FreeSlot>,
}

impl DayAvailability {
    /// A slot covering the whole working window is shown as "all day".
    pub fn is_all_day(&self, slot: &FreeSlot) -> bool {
        slot.start == self.window.start && slot.end == self.window.end
    }
}

// ============================================================================
// Meetings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingRequest {
    pub title: String,
    pub description: String,
    pub start: NaiveDateTime,
    pub duration_minutes: i64,
    pub attendee_ids: Vec<AccountId>,
}

impl MeetingRequest {
    pub fn end(&self) -> NaiveDateTime {
        self.start + chrono::Duration::minutes(self.duration_minutes)
    }
}

/// Outcome of a successful creation, echoing how every attendee token fared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingResult {
    pub event_id: String,
    pub start: NaiveDateTime,
    pub resolved: Vec<AttendeeReference>,
    pub unresolved: Vec<AttendeeReference>,
}
