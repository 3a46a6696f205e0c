//! Identity resolution: chat nicknames and email addresses to directory accounts.
//!
//! Nicknames live in a custom profile field and are stored both with and
//! without the leading `@`, so both spellings are tried. Emails are looked up
//! in the regular directory first; on a miss, a guest-account cache is
//! consulted. Guest accounts (invited by email) are invisible to the regular
//! lookup and only discoverable through the bulk id-range API, so the cache is
//! built by a one-time scan and never invalidated.
//!
//! Resolution is advisory: misses and per-token gateway failures come back as
//! [`AttendeeReference`] values, never as errors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::gateway::{CalendarGateway, GatewayError};
use crate::types::{AccountId, AttendeeReference, TokenKind};

/// Directory field holding the primary email.
const EMAIL_FIELD: &str = "EMAIL";

/// Marker some profiles store in front of the nickname.
const NICKNAME_MARKER: char = '@';

/// A successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryMatch {
    pub id: AccountId,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestAccount {
    pub id: AccountId,
    pub name: String,
}

/// Bounds of the one-time guest scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestScanPolicy {
    pub batch_size: u64,
    pub floor: u64,
    pub multiplier: u64,
}

impl Default for GuestScanPolicy {
    fn default() -> Self {
        Self {
            batch_size: 100,
            floor: 2000,
            multiplier: 3,
        }
    }
}

impl GuestScanPolicy {
    /// Guest ids sit above regular ones; scan to 3x the regular total, at least 2000.
    pub fn max_id(&self, regular_total: u64) -> u64 {
        regular_total.saturating_mul(self.multiplier).max(self.floor)
    }
}

/// Email → guest account, built at most once.
///
/// `OnceCell` serializes initialization: concurrent callers await the same
/// scan instead of starting their own. A failed scan (the regular-account
/// count could not be read) leaves the cell empty so a later call may try again.
#[derive(Default)]
pub struct GuestCache {
    entries: OnceCell<HashMap<String, GuestAccount>>,
    scans: AtomicUsize,
}

impl GuestCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.entries.initialized()
    }

    /// Number of completed scans; at most one per process.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub async fn ensure_loaded(
        &self,
        gateway: &dyn CalendarGateway,
        policy: &GuestScanPolicy,
    ) -> Result<&HashMap<String, GuestAccount>, GatewayError> {
        self.entries
            .get_or_try_init(|| async {
                let guests = scan_guests(gateway, policy).await?;
                self.scans.fetch_add(1, Ordering::SeqCst);
                Ok::<_, GatewayError>(guests)
            })
            .await
    }

    pub async fn lookup(
        &self,
        gateway: &dyn CalendarGateway,
        policy: &GuestScanPolicy,
        email: &str,
    ) -> Result<Option<GuestAccount>, GatewayError> {
        let guests = self.ensure_loaded(gateway, policy).await?;
        Ok(guests.get(&email.to_lowercase()).cloned())
    }
}

/// Walk the whole id range in fixed-size batches, keeping email guests.
///
/// A batch that errors is skipped and the scan continues.
async fn scan_guests(
    gateway: &dyn CalendarGateway,
    policy: &GuestScanPolicy,
) -> Result<HashMap<String, GuestAccount>, GatewayError> {
    let regular_total = gateway.count_users().await?;
    let max_id = policy.max_id(regular_total);
    let batch = policy.batch_size.max(1);

    let mut guests = HashMap::new();
    let mut skipped = 0usize;
    let mut start: AccountId = 1;
    while start <= max_id {
        let end = start.saturating_add(batch - 1).min(max_id);
        let ids: Vec<AccountId> = (start..=end).collect();
        match gateway.list_chat_users(&ids).await {
            Ok(users) => {
                for user in users.into_iter().filter(|u| u.is_email_guest()) {
                    if let Some(email) = user.email {
                        guests.insert(
                            email.to_lowercase(),
                            GuestAccount {
                                id: user.id,
                                name: user.name,
                            },
                        );
                    }
                }
            }
            Err(e) => {
                skipped += 1;
                log::debug!("Guest batch {}..={} skipped: {}", start, end, e);
            }
        }
        start = end + 1;
    }

    log::info!(
        "Loaded {} email guests (scanned ids 1..={}, {} batches skipped)",
        guests.len(),
        max_id,
        skipped
    );
    Ok(guests)
}

pub struct IdentityResolver {
    gateway: Arc<dyn CalendarGateway>,
    nickname_field: String,
    policy: GuestScanPolicy,
    guests: GuestCache,
}

impl IdentityResolver {
    pub fn new(gateway: Arc<dyn CalendarGateway>, config: &Config) -> Self {
        Self {
            gateway,
            nickname_field: config.nickname_field.clone(),
            policy: GuestScanPolicy {
                batch_size: config.guest_batch_size,
                floor: config.guest_scan_floor,
                multiplier: config.guest_scan_multiplier,
            },
            guests: GuestCache::new(),
        }
    }

    pub fn guest_cache(&self) -> &GuestCache {
        &self.guests
    }

    /// Try the bare nickname, then the `@`-prefixed form.
    pub async fn find_by_nickname(
        &self,
        nickname: &str,
    ) -> Result<Option<DirectoryMatch>, GatewayError> {
        let clean = nickname.trim_start_matches(NICKNAME_MARKER);
        for variant in [clean.to_string(), format!("{}{}", NICKNAME_MARKER, clean)] {
            let users = self
                .gateway
                .find_users(&self.nickname_field, &variant)
                .await?;
            if let Some(user) = users.first() {
                return Ok(Some(DirectoryMatch {
                    id: user.id,
                    display_name: user.full_name(),
                }));
            }
        }
        Ok(None)
    }

    /// Regular directory lookup on the primary email.
    pub async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<DirectoryMatch>, GatewayError> {
        let users = self.gateway.find_users(EMAIL_FIELD, email).await?;
        Ok(users.first().map(|user| {
            log::info!(
                "User found by EMAIL={}: id={} name={}",
                email,
                user.id,
                user.full_name()
            );
            DirectoryMatch {
                id: user.id,
                display_name: user.full_name(),
            }
        }))
    }

    /// Directory first, then the guest cache (scanning it on first use).
    pub async fn resolve_email(
        &self,
        email: &str,
    ) -> Result<Option<DirectoryMatch>, GatewayError> {
        if let Some(found) = self.find_by_email(email).await? {
            return Ok(Some(found));
        }

        let guest = self
            .guests
            .lookup(self.gateway.as_ref(), &self.policy, email)
            .await?;
        Ok(guest.map(|g| {
            log::info!("Email guest found: id={} email={} name={}", g.id, email, g.name);
            DirectoryMatch {
                id: g.id,
                display_name: g.name,
            }
        }))
    }

    pub async fn resolve_nickname_ref(&self, nickname: &str) -> AttendeeReference {
        match self.find_by_nickname(nickname).await {
            Ok(Some(m)) => AttendeeReference::resolved(
                nickname,
                TokenKind::Nickname,
                m.id,
                Some(m.display_name),
            ),
            Ok(None) => AttendeeReference::not_found(nickname, TokenKind::Nickname),
            Err(e) => {
                log::error!("Failed to find user by nickname {}: {}", nickname, e);
                AttendeeReference::failed(nickname, TokenKind::Nickname)
            }
        }
    }

    pub async fn resolve_email_ref(&self, email: &str) -> AttendeeReference {
        match self.resolve_email(email).await {
            Ok(Some(m)) => {
                AttendeeReference::resolved(email, TokenKind::Email, m.id, Some(m.display_name))
            }
            Ok(None) => AttendeeReference::not_found(email, TokenKind::Email),
            Err(e) => {
                log::error!("Failed to find user by email {}: {}", email, e);
                AttendeeReference::failed(email, TokenKind::Email)
            }
        }
    }

    /// Resolve every nickname independently; results keep input order.
    pub async fn resolve_nicknames(&self, nicknames: &[String]) -> Vec<AttendeeReference> {
        join_all(nicknames.iter().map(|n| self.resolve_nickname_ref(n))).await
    }

    /// Resolve every email independently; results keep input order.
    pub async fn resolve_emails(&self, emails: &[String]) -> Vec<AttendeeReference> {
        join_all(emails.iter().map(|e| self.resolve_email_ref(e))).await
    }
}
