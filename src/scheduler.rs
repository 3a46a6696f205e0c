//! Scheduling orchestrator: one inbound command in, one reply out.
//!
//! Create meeting: parse → resolve attendees → create event → confirm.
//! Find time: resolve nicknames → aggregate availability → list free slots.
//!
//! Every failure is turned into a reply here. Resolution misses are soft and
//! listed in the reply; a gateway failure while creating the event or
//! fetching availability ends the command with an error reply.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;

use crate::availability::{format_day, AvailabilityAggregator, WorkdayPolicy};
use crate::config::Config;
use crate::error::{ErrorClass, SchedulerError};
use crate::gateway::CalendarGateway;
use crate::parser::{extract_attendees, match_trigger, parse_command};
use crate::resolver::IdentityResolver;
use crate::types::{
    AccountId, AttendeeReference, Command, DayAvailability, InboundMessage, MeetingRequest,
    MeetingResult, OutboundReply, TokenKind, Trigger,
};

const MANUAL_INVITE_NOTE: &str = "Пригласить по email: ";

pub struct Scheduler {
    gateway: Arc<dyn CalendarGateway>,
    resolver: IdentityResolver,
    aggregator: AvailabilityAggregator,
    timezone: Tz,
    meeting_duration_minutes: i64,
}

impl Scheduler {
    pub fn new(config: &Config, gateway: Arc<dyn CalendarGateway>) -> Self {
        Self {
            resolver: IdentityResolver::new(gateway.clone(), config),
            aggregator: AvailabilityAggregator::new(
                gateway.clone(),
                WorkdayPolicy::from_config(config),
            ),
            gateway,
            timezone: config.tz(),
            meeting_duration_minutes: config.meeting_duration_minutes,
        }
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Wall-clock time in the configured zone.
    pub fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.timezone).naive_local()
    }

    /// Dispatch an inbound message. Messages without a trigger get no reply.
    pub async fn handle(&self, message: &InboundMessage) -> Option<OutboundReply> {
        if message.raw_text.trim().is_empty() {
            return None;
        }
        let trigger = match_trigger(&message.raw_text)?;
        log::info!(
            "Trigger {:?} in chat={} from sender={}",
            trigger,
            message.chat_id,
            message.sender_id
        );

        let now = self.now();
        let text = match trigger {
            Trigger::CreateMeeting => self.create_meeting_reply(message, now).await,
            Trigger::FindTime => self.find_time_reply(message, now.date()).await,
        };
        log::info!("Reply to chat={}: {}", message.chat_id, text);

        Some(OutboundReply {
            chat_id: message.chat_id,
            text,
        })
    }

    // ------------------------------------------------------------------
    // Create meeting
    // ------------------------------------------------------------------

    pub async fn create_meeting_reply(&self, message: &InboundMessage, now: NaiveDateTime) -> String {
        let result = async {
            let command = parse_command(
                &message.raw_text,
                message.replied_to_text.as_deref(),
                now,
            )?;
            let meeting = self.schedule(&command).await?;
            Ok::<_, SchedulerError>((command, meeting))
        }
        .await;

        match result {
            Ok((command, meeting)) => {
                compose_confirmation(&meeting, command.context_text.as_deref())
            }
            Err(e) => match e.class() {
                ErrorClass::Guidance => e.to_string(),
                ErrorClass::Fatal => {
                    log::error!("Failed to create meeting: {}", e);
                    format!("❌ Не удалось создать встречу: {}", e)
                }
            },
        }
    }

    /// Resolve every attendee token and create the event with whatever resolved.
    pub async fn schedule(&self, command: &Command) -> Result<MeetingResult, SchedulerError> {
        let (nick_refs, email_refs) = tokio::join!(
            self.resolver.resolve_nicknames(&command.nicknames),
            self.resolver.resolve_emails(&command.emails),
        );

        let (resolved, unresolved): (Vec<_>, Vec<_>) = nick_refs
            .into_iter()
            .chain(email_refs)
            .partition(AttendeeReference::is_resolved);

        let invite_emails: Vec<String> = unresolved
            .iter()
            .filter(|r| r.kind == TokenKind::Email)
            .map(|r| r.token.clone())
            .collect();

        let request = MeetingRequest {
            title: command.title(),
            description: build_description(command.context_text.as_deref(), &invite_emails),
            start: command.target,
            duration_minutes: self.meeting_duration_minutes,
            attendee_ids: unique_ids(resolved.iter().filter_map(|r| r.account_id())),
        };

        let event_id = self
            .gateway
            .create_event(&request, self.timezone.name())
            .await?;

        Ok(MeetingResult {
            event_id,
            start: request.start,
            resolved,
            unresolved,
        })
    }

    // ------------------------------------------------------------------
    // Find time
    // ------------------------------------------------------------------

    pub async fn find_time_reply(&self, message: &InboundMessage, today: NaiveDate) -> String {
        let (nicknames, _) = extract_attendees(&message.raw_text);
        if nicknames.is_empty() {
            return "Укажи участников: Найди время @nick1 @nick2".to_string();
        }

        let refs = self.resolver.resolve_nicknames(&nicknames).await;
        let (found, missing): (Vec<_>, Vec<_>) =
            refs.into_iter().partition(AttendeeReference::is_resolved);
        let not_found: Vec<String> = missing.iter().map(AttendeeReference::mention).collect();

        if found.is_empty() {
            let mut msg = "❌ Никого не удалось найти".to_string();
            if !not_found.is_empty() {
                msg.push_str(&format!("\n⚠️ Не найден: {}", not_found.join(", ")));
            }
            return msg;
        }

        let ids = unique_ids(found.iter().filter_map(|r| r.account_id()));
        match self.aggregator.free_windows(&ids, today).await {
            Ok(days) => {
                let names: Vec<String> = found.iter().map(AttendeeReference::mention).collect();
                render_free_time(&names, &not_found, &days)
            }
            Err(e) => {
                log::error!("Failed to find free time: {}", e);
                format!("❌ Не удалось найти свободное время: {}", e)
            }
        }
    }
}

/// Keep first occurrence order; two tokens may resolve to the same account.
fn unique_ids(ids: impl Iterator<Item = AccountId>) -> Vec<AccountId> {
    let mut out: Vec<AccountId> = Vec::new();
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Context text, plus a note listing emails that must be invited by hand.
pub fn build_description(context: Option<&str>, invite_emails: &[String]) -> String {
    let mut description = context.unwrap_or_default().to_string();
    if !invite_emails.is_empty() {
        description.push_str("\n\n");
        description.push_str(MANUAL_INVITE_NOTE);
        description.push_str(&invite_emails.join(", "));
    }
    description
}

/// Multi-line confirmation; each section appears only when it has content.
pub fn compose_confirmation(result: &MeetingResult, context: Option<&str>) -> String {
    let mut reply = format!(
        "✅ Встреча создана: {} в {} (id: {})",
        result.start.format("%d.%m.%Y"),
        result.start.format("%H:%M"),
        result.event_id
    );

    let participants: Vec<String> = result
        .resolved
        .iter()
        .filter(|r| r.kind == TokenKind::Nickname)
        .map(|r| r.display_name().unwrap_or(&r.token).to_string())
        .collect();
    let by_email: Vec<String> = result
        .resolved
        .iter()
        .filter(|r| r.kind == TokenKind::Email)
        .map(|r| match r.display_name() {
            Some(name) => format!("{} ({})", name, r.token),
            None => r.token.clone(),
        })
        .collect();
    let invite_manually: Vec<String> = result
        .unresolved
        .iter()
        .filter(|r| r.kind == TokenKind::Email)
        .map(|r| r.token.clone())
        .collect();
    let not_found: Vec<String> = result
        .unresolved
        .iter()
        .filter(|r| r.kind == TokenKind::Nickname)
        .map(AttendeeReference::mention)
        .collect();

    if !participants.is_empty() {
        reply.push_str(&format!("\n👥 Участники: {}", participants.join(", ")));
    }
    if !by_email.is_empty() {
        reply.push_str(&format!("\n👥 По email: {}", by_email.join(", ")));
    }
    if !invite_manually.is_empty() {
        reply.push_str(&format!(
            "\n📧 В описании (пригласить вручную): {}",
            invite_manually.join(", ")
        ));
    }
    if !not_found.is_empty() {
        reply.push_str(&format!("\n⚠️ Не найден: {}", not_found.join(", ")));
    }
    if let Some(ctx) = context.filter(|c| !c.is_empty()) {
        reply.push_str(&format!("\n📝 {}", ctx));
    }
    reply
}

pub fn render_free_time(names: &[String], not_found: &[String], days: &[DayAvailability]) -> String {
    let mut lines = vec![format!("📅 Свободные слоты для {}:", names.join(", "))];
    if !not_found.is_empty() {
        lines.push(format!("⚠️ Не найден: {}", not_found.join(", ")));
    }
    lines.push(String::new());

    for day in days {
        lines.extend(format_day(day));
        lines.push(String::new());
    }
    lines.join("\n").trim_end().to_string()
}
