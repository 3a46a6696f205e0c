//! In-memory gateway used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::{AccessibilityMap, CalendarGateway, ChatUser, DirectoryUser, GatewayError};
use crate::types::{AccountId, MeetingRequest};

#[derive(Default)]
pub struct FakeGateway {
    /// (field, value) -> users
    pub directory: HashMap<(String, String), Vec<DirectoryUser>>,
    pub total_users: u64,
    pub chat_users: Vec<ChatUser>,
    /// First id of every bulk batch that should fail.
    pub failing_batches: HashSet<AccountId>,
    /// Lookup values that fail with an API error.
    pub failing_lookups: HashSet<String>,
    pub accessibility: AccessibilityMap,
    pub fail_accessibility: bool,
    pub fail_create: bool,

    pub count_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub lookups: Mutex<Vec<(String, String)>>,
    pub created: Mutex<Vec<MeetingRequest>>,
}

impl FakeGateway {
    pub fn with_user(mut self, field: &str, value: &str, id: AccountId, name: &str) -> Self {
        let (first, last) = name.split_once(' ').unwrap_or((name, ""));
        self.directory
            .entry((field.to_string(), value.to_string()))
            .or_default()
            .push(DirectoryUser {
                id,
                name: first.to_string(),
                last_name: last.to_string(),
            });
        self
    }

    pub fn with_guest(mut self, id: AccountId, name: &str, email: &str) -> Self {
        self.chat_users.push(ChatUser {
            id,
            name: name.to_string(),
            email: Some(email.to_string()),
            external_auth_id: Some("email".to_string()),
        });
        self
    }

    pub fn api_error(method: &str) -> GatewayError {
        GatewayError::Api {
            method: method.to_string(),
            code: "QUERY_LIMIT_EXCEEDED".to_string(),
            description: "Too many requests".to_string(),
        }
    }
}

#[async_trait]
impl CalendarGateway for FakeGateway {
    async fn find_users(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Vec<DirectoryUser>, GatewayError> {
        self.lookups
            .lock()
            .unwrap()
            .push((field.to_string(), value.to_string()));
        if self.failing_lookups.contains(value) {
            return Err(Self::api_error("user.get"));
        }
        Ok(self
            .directory
            .get(&(field.to_string(), value.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn count_users(&self) -> Result<u64, GatewayError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.total_users)
    }

    async fn list_chat_users(&self, ids: &[AccountId]) -> Result<Vec<ChatUser>, GatewayError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if ids.first().is_some_and(|first| self.failing_batches.contains(first)) {
            return Err(Self::api_error("im.user.list.get"));
        }
        Ok(self
            .chat_users
            .iter()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn accessibility(
        &self,
        ids: &[AccountId],
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> Result<AccessibilityMap, GatewayError> {
        if self.fail_accessibility {
            return Err(Self::api_error("calendar.accessibility.get"));
        }
        Ok(self
            .accessibility
            .iter()
            .filter(|(id, _)| ids.contains(id))
            .map(|(id, slots)| (*id, slots.clone()))
            .collect())
    }

    async fn create_event(
        &self,
        request: &MeetingRequest,
        _timezone: &str,
    ) -> Result<String, GatewayError> {
        if self.fail_create {
            return Err(Self::api_error("calendar.event.add"));
        }
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        Ok(format!("{}", 1000 + created.len()))
    }
}
