//! Bitrix24-style REST gateway.
//!
//! Every call is `POST {endpoint}{method}` with a JSON body. A non-2xx status
//! or an `error` field in the payload is a [`GatewayError`]. No retries are
//! attempted here; the request timeout is the only stall bound.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::{
    AccessibilityMap, AccessibilitySlot, CalendarGateway, ChatUser, DirectoryUser, GatewayError,
};
use crate::config::Config;
use crate::types::{AccountId, MeetingRequest};

/// Datetime format the calendar expects for event bounds.
const EVENT_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

#[derive(Debug, Deserialize)]
struct RawDirectoryUser {
    #[serde(rename = "ID")]
    id: Value,
    #[serde(rename = "NAME", default)]
    name: Option<String>,
    #[serde(rename = "LAST_NAME", default)]
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChatUser {
    id: Value,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    external_auth_id: Option<String>,
}

pub struct RestGateway {
    client: reqwest::Client,
    endpoint: Url,
    access_token: Option<String>,
}

impl RestGateway {
    pub fn new(config: &Config) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: parse_endpoint(&config.endpoint)?,
            access_token: config.access_token.clone(),
        })
    }

    /// Make an authenticated call and return the whole response payload.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        let url = self.endpoint.join(method)?;

        let mut body = match params {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("params".to_string(), other);
                map
            }
        };
        if let Some(token) = &self.access_token {
            body.insert("auth".to_string(), Value::String(token.clone()));
        }

        log::debug!("gateway call {}", method);
        let resp = self.client.post(url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        let data: Option<Value> = serde_json::from_str(&text).ok();

        if let Some(err) = data.as_ref().and_then(|d| d.get("error")) {
            return Err(GatewayError::Api {
                method: method.to_string(),
                code: value_to_string(err),
                description: data
                    .as_ref()
                    .and_then(|d| d.get("error_description"))
                    .map(value_to_string)
                    .unwrap_or_default(),
            });
        }
        if !status.is_success() {
            return Err(GatewayError::Status {
                method: method.to_string(),
                status: status.as_u16(),
            });
        }

        data.ok_or_else(|| GatewayError::MalformedResponse {
            method: method.to_string(),
            reason: "body is not JSON".to_string(),
        })
    }

    async fn current_user_id(&self) -> Result<AccountId, GatewayError> {
        let profile = self.call("profile", Value::Null).await?;
        profile
            .get("result")
            .and_then(|r| r.get("ID"))
            .and_then(parse_account_id)
            .ok_or_else(|| GatewayError::MalformedResponse {
                method: "profile".to_string(),
                reason: "missing result.ID".to_string(),
            })
    }
}

/// The endpoint is a base URL; methods are joined onto it, so it needs a trailing slash.
fn parse_endpoint(raw: &str) -> Result<Url, url::ParseError> {
    if raw.ends_with('/') {
        Url::parse(raw)
    } else {
        Url::parse(&format!("{}/", raw))
    }
}

/// Ids arrive as numbers or numeric strings depending on the method.
pub(crate) fn parse_account_id(value: &Value) -> Option<AccountId> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Build `calendar.event.add` parameters for an owner.
///
/// The owner always leads the attendee list and is never duplicated.
pub(crate) fn event_params(
    owner_id: AccountId,
    request: &MeetingRequest,
    timezone: &str,
) -> Value {
    let mut params = json!({
        "type": "user",
        "ownerId": owner_id,
        "name": request.title,
        "description": request.description,
        "from": request.start.format(EVENT_TIME_FORMAT).to_string(),
        "to": request.end().format(EVENT_TIME_FORMAT).to_string(),
        "timezone_from": timezone,
        "timezone_to": timezone,
    });

    if !request.attendee_ids.is_empty() {
        let mut attendees = vec![owner_id];
        attendees.extend(request.attendee_ids.iter().copied().filter(|id| *id != owner_id));
        if let Value::Object(map) = &mut params {
            map.insert("is_meeting".to_string(), json!("Y"));
            map.insert("host".to_string(), json!(owner_id));
            map.insert("attendees".to_string(), json!(attendees));
            map.insert(
                "meeting".to_string(),
                json!({ "notify": true, "open": false, "reinvite": false }),
            );
        }
    }

    params
}

/// `calendar.accessibility.get` returns an object keyed by user id, or an
/// empty array when nobody has records. Slots that do not decode are skipped.
pub(crate) fn parse_accessibility(result: &Value) -> AccessibilityMap {
    let mut map = AccessibilityMap::new();
    let Value::Object(per_user) = result else {
        return map;
    };
    for (key, slots) in per_user {
        let Ok(id) = key.parse::<AccountId>() else {
            log::warn!("Skipping accessibility for non-numeric user key {}", key);
            continue;
        };
        let slots: Vec<AccessibilitySlot> = match slots {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| match AccessibilitySlot::deserialize(item) {
                    Ok(slot) => Some(slot),
                    Err(e) => {
                        log::warn!("Skip slot parse error: {} | {}", e, item);
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        };
        map.insert(id, slots);
    }
    map
}

/// `im.user.list.get` returns an object keyed by id; unknown ids map to null
/// and records that do not decode are skipped.
pub(crate) fn parse_chat_users(result: &Value) -> Vec<ChatUser> {
    let Value::Object(per_id) = result else {
        return Vec::new();
    };
    let mut users = Vec::with_capacity(per_id.len());
    for record in per_id.values() {
        if record.is_null() {
            continue;
        }
        let raw = match RawChatUser::deserialize(record) {
            Ok(raw) => raw,
            Err(e) => {
                log::debug!("Skip chat user record: {} | {}", e, record);
                continue;
            }
        };
        let Some(id) = parse_account_id(&raw.id) else {
            continue;
        };
        users.push(ChatUser {
            id,
            name: raw.name.unwrap_or_default(),
            email: raw.email,
            external_auth_id: raw.external_auth_id,
        });
    }
    users
}

#[async_trait]
impl CalendarGateway for RestGateway {
    async fn find_users(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Vec<DirectoryUser>, GatewayError> {
        let data = self
            .call("user.get", json!({ "filter": { field: value } }))
            .await?;
        let raw: Vec<RawDirectoryUser> = match data.get("result") {
            Some(Value::Array(items)) => serde_json::from_value(Value::Array(items.clone()))?,
            _ => Vec::new(),
        };
        Ok(raw
            .into_iter()
            .filter_map(|u| {
                Some(DirectoryUser {
                    id: parse_account_id(&u.id)?,
                    name: u.name.unwrap_or_default(),
                    last_name: u.last_name.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn count_users(&self) -> Result<u64, GatewayError> {
        let data = self.call("user.get", json!({ "start": 0 })).await?;
        Ok(data.get("total").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn list_chat_users(&self, ids: &[AccountId]) -> Result<Vec<ChatUser>, GatewayError> {
        let data = self.call("im.user.list.get", json!({ "ID": ids })).await?;
        Ok(data.get("result").map(parse_chat_users).unwrap_or_default())
    }

    async fn accessibility(
        &self,
        ids: &[AccountId],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AccessibilityMap, GatewayError> {
        let data = self
            .call(
                "calendar.accessibility.get",
                json!({
                    "users": ids,
                    "from": from.format("%Y-%m-%d").to_string(),
                    "to": to.format("%Y-%m-%d").to_string(),
                }),
            )
            .await?;
        let result = data.get("result").cloned().unwrap_or(Value::Null);
        Ok(parse_accessibility(&result))
    }

    async fn create_event(
        &self,
        request: &MeetingRequest,
        timezone: &str,
    ) -> Result<String, GatewayError> {
        let owner_id = self.current_user_id().await?;
        let params = event_params(owner_id, request, timezone);
        let data = self.call("calendar.event.add", params).await?;

        let event_id = match data.get("result") {
            Some(Value::Null) | None => "?".to_string(),
            Some(v) => value_to_string(v),
        };
        log::info!(
            "Calendar event created: id={} title={} from={} attendees={:?}",
            event_id,
            request.title,
            request.start.format(EVENT_TIME_FORMAT),
            request.attendee_ids
        );
        Ok(event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn request(attendees: Vec<AccountId>) -> MeetingRequest {
        MeetingRequest {
            title: "Релиз".into(),
            description: "обсудить".into(),
            start: NaiveDate::from_ymd_opt(2026, 2, 27)
                .unwrap()
                .and_hms_opt(16, 0, 0)
                .unwrap(),
            duration_minutes: 60,
            attendee_ids: attendees,
        }
    }

    #[test]
    fn test_endpoint_gets_trailing_slash() {
        let url = parse_endpoint("https://corp.example.com/rest/1/abc").unwrap();
        assert_eq!(
            url.join("user.get").unwrap().as_str(),
            "https://corp.example.com/rest/1/abc/user.get"
        );
    }

    #[test]
    fn test_parse_account_id_number_or_string() {
        assert_eq!(parse_account_id(&json!(42)), Some(42));
        assert_eq!(parse_account_id(&json!("42")), Some(42));
        assert_eq!(parse_account_id(&json!("x")), None);
        assert_eq!(parse_account_id(&Value::Null), None);
    }

    #[test]
    fn test_personal_event_has_no_meeting_fields() {
        let params = event_params(1, &request(vec![]), "Asia/Novosibirsk");
        assert_eq!(params["ownerId"], json!(1));
        assert_eq!(params["from"], json!("27.02.2026 16:00:00"));
        assert_eq!(params["to"], json!("27.02.2026 17:00:00"));
        assert!(params.get("is_meeting").is_none());
        assert!(params.get("attendees").is_none());
    }

    #[test]
    fn test_meeting_puts_owner_first_without_duplicate() {
        let params = event_params(1, &request(vec![5, 1, 9]), "Asia/Novosibirsk");
        assert_eq!(params["is_meeting"], json!("Y"));
        assert_eq!(params["host"], json!(1));
        assert_eq!(params["attendees"], json!([1, 5, 9]));
        assert_eq!(params["meeting"]["notify"], json!(true));
    }

    #[test]
    fn test_parse_accessibility_object_and_empty_array() {
        let result = json!({
            "12": [{"ACCESSIBILITY": "busy", "DATE_FROM": "17.02.2026 09:00:00",
                    "DATE_TO": "17.02.2026 10:00:00", "~USER_OFFSET_FROM": "25200"}],
            "15": [],
            "bogus": []
        });
        let map = parse_accessibility(&result);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&12].len(), 1);
        assert_eq!(map[&12][0].offset_from, json!("25200"));
        assert!(map[&15].is_empty());

        assert!(parse_accessibility(&json!([])).is_empty());
    }

    #[test]
    fn test_parse_accessibility_skips_undecodable_slot() {
        let result = json!({
            "12": [
                {"ACCESSIBILITY": "busy", "DATE_FROM": null, "DATE_TO": "17.02.2026 10:00:00"},
                {"ACCESSIBILITY": 0, "DATE_FROM": "17.02.2026 10:00:00", "DATE_TO": "17.02.2026 11:00:00"},
                {"ACCESSIBILITY": "busy", "DATE_FROM": "17.02.2026 12:00:00",
                 "DATE_TO": "17.02.2026 13:00:00"}
            ]
        });
        let map = parse_accessibility(&result);
        assert_eq!(map[&12].len(), 1);
        assert_eq!(map[&12][0].date_from, "17.02.2026 12:00:00");
    }

    #[test]
    fn test_parse_chat_users_skips_odd_records() {
        let result = json!({
            "149": {"id": 149, "name": "Broken", "email": false, "external_auth_id": "email"},
            "150": {"id": 150, "name": "Guest", "email": "g@x.io", "external_auth_id": "email"},
            "151": {"id": "151", "name": "Staff", "external_auth_id": 7},
            "152": null
        });
        let users = parse_chat_users(&result);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, 150);
        assert!(users[0].is_email_guest());
        assert_eq!(users[0].email.as_deref(), Some("g@x.io"));
    }

    #[tokio::test]
    async fn test_truncated_body_is_http_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = sock.read(&mut buf).await;
            sock.write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n{\"result\"",
            )
            .await
            .unwrap();
            sock.shutdown().await.unwrap();
        });

        let config = Config {
            endpoint: format!("http://{}/rest/", addr),
            ..Config::default()
        };
        let gateway = RestGateway::new(&config).unwrap();
        let err = gateway.call("profile", json!({})).await.unwrap_err();
        assert!(matches!(err, GatewayError::Http(_)), "got {err:?}");
    }
}
