//! Slack Web API client
//!
//! Implements the three platform collaborators the pairing run needs:
//! channel membership, channel history and posting. Reads go through
//! `GET` with query parameters and cursor pagination; posts use JSON bodies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::history::HistoryMessage;
use crate::messenger::{ChannelError, HistorySource, MemberSource, Messenger};
use crate::pairing::Member;

const SLACK_API_BASE: &str = "https://slack.com/api";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_LIMIT: &str = "200";

#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{method} returned HTTP {status}")]
    Status { method: String, status: u16 },
    #[error("{method} failed: {error}")]
    Api { method: String, error: String },
    #[error("Unexpected {method} response: {source}")]
    Decode {
        method: String,
        source: serde_json::Error,
    },
}

impl SlackError {
    pub fn is_channel_not_found(&self) -> bool {
        matches!(self, SlackError::Api { error, .. } if error == "channel_not_found")
    }

    /// Map a read failure onto the collaborator taxonomy
    fn into_fetch_error(self, channel: &str) -> ChannelError {
        if self.is_channel_not_found() {
            ChannelError::ChannelNotFound(channel.to_string())
        } else {
            ChannelError::Transient(self.to_string())
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct ChannelsPage {
    channels: Vec<SlackChannel>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct SlackChannel {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MembersPage {
    members: Vec<String>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    user: SlackUser,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub profile: SlackProfile,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackProfile {
    #[serde(default)]
    pub display_name: String,
}

impl SlackUser {
    /// Real name, else username, else "Unknown"
    pub fn display_name(&self) -> String {
        self.real_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .or(Some(self.name.as_str()).filter(|name| !name.is_empty()))
            .unwrap_or("Unknown")
            .to_string()
    }
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    messages: Vec<SlackMessage>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct SlackMessage {
    #[serde(default)]
    text: String,
    ts: String,
}

#[derive(Debug, Deserialize)]
struct Posted {
    #[serde(default)]
    ts: String,
}

// ============================================================================
// Member filtering
// ============================================================================

/// Drops bots, deleted accounts and explicitly excluded people
#[derive(Debug, Clone, Default)]
pub struct MemberFilter {
    excluded: Vec<String>,
}

impl MemberFilter {
    pub fn new(excluded_names: &[String]) -> Self {
        Self {
            excluded: excluded_names
                .iter()
                .map(|name| name.trim().to_lowercase())
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    fn is_excluded(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.excluded.iter().any(|excluded| *excluded == name)
    }

    /// Whether `user` takes part in pairing
    pub fn admits(&self, user: &SlackUser) -> bool {
        if user.is_bot || user.deleted {
            return false;
        }
        let real_name = user.real_name.as_deref().unwrap_or_default();
        !(self.is_excluded(&user.name)
            || self.is_excluded(&user.profile.display_name)
            || self.is_excluded(real_name))
    }
}

// ============================================================================
// Client
// ============================================================================

#[derive(Clone)]
pub struct SlackClient {
    client: reqwest::Client,
    token: Arc<String>,
    base_url: String,
    filter: MemberFilter,
    channel_ids: Arc<Mutex<HashMap<String, String>>>,
}

impl SlackClient {
    pub fn new(token: &str, filter: MemberFilter) -> Result<Self, SlackError> {
        Self::with_base_url(token, filter, SLACK_API_BASE)
    }

    pub fn with_base_url(
        token: &str,
        filter: MemberFilter,
        base_url: &str,
    ) -> Result<Self, SlackError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("RandomCoffee/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            token: Arc::new(token.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
            filter,
            channel_ids: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, SlackError> {
        debug!("Slack {} {:?}", method, params);
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, method))
            .bearer_auth(self.token.as_str())
            .query(params)
            .send()
            .await?;
        Self::decode(method, response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, SlackError> {
        debug!("Slack {}", method);
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .bearer_auth(self.token.as_str())
            .json(&body)
            .send()
            .await?;
        Self::decode(method, response).await
    }

    async fn decode<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, SlackError> {
        let status = response.status();
        if !status.is_success() {
            return Err(SlackError::Status {
                method: method.to_string(),
                status: status.as_u16(),
            });
        }

        let json: serde_json::Value = response.json().await?;
        parse_envelope(method, json)
    }

    /// Resolve `#name`, `name` or a raw channel id to a channel id
    pub async fn resolve_channel(&self, channel: &str) -> Result<String, SlackError> {
        let name = normalize_channel(channel);

        if let Some(id) = self
            .channel_ids
            .lock()
            .ok()
            .and_then(|ids| ids.get(name).cloned())
        {
            return Ok(id);
        }

        let mut cursor = String::new();
        loop {
            let mut params = vec![
                ("types", "public_channel,private_channel".to_string()),
                ("exclude_archived", "true".to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.clone()));
            }

            let page: ChannelsPage = self.get("conversations.list", &params).await?;
            if let Some(found) = page
                .channels
                .iter()
                .find(|ch| ch.name == name || ch.id == name)
            {
                if let Ok(mut ids) = self.channel_ids.lock() {
                    ids.insert(name.to_string(), found.id.clone());
                }
                return Ok(found.id.clone());
            }

            cursor = page.response_metadata.next_cursor;
            if cursor.is_empty() {
                break;
            }
        }

        warn!("Channel {} not found", channel);
        Err(SlackError::Api {
            method: "conversations.list".to_string(),
            error: "channel_not_found".to_string(),
        })
    }

    async fn member_ids(&self, channel_id: &str) -> Result<Vec<String>, SlackError> {
        let mut ids = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut params = vec![
                ("channel", channel_id.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.clone()));
            }

            let page: MembersPage = self.get("conversations.members", &params).await?;
            ids.extend(page.members);

            cursor = page.response_metadata.next_cursor;
            if cursor.is_empty() {
                return Ok(ids);
            }
        }
    }

    async fn user_info(&self, user_id: &str) -> Result<SlackUser, SlackError> {
        let info: UserInfo = self
            .get("users.info", &[("user", user_id.to_string())])
            .await?;
        Ok(info.user)
    }

    async fn members(&self, channel: &str) -> Result<Vec<Member>, SlackError> {
        let channel_id = self.resolve_channel(channel).await?;
        let ids = self.member_ids(&channel_id).await?;

        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            let user = self.user_info(&id).await?;
            if self.filter.admits(&user) {
                members.push(Member::new(user.id.clone(), user.display_name()));
            } else {
                info!("Excluded user from pairing: {}", user.name);
            }
        }

        info!("Found {} members in channel {}", members.len(), channel);
        Ok(members)
    }

    async fn history(
        &self,
        channel: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoryMessage>, SlackError> {
        let channel_id = self.resolve_channel(channel).await?;

        let mut messages = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut params = vec![
                ("channel", channel_id.clone()),
                ("oldest", since.timestamp().to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.clone()));
            }

            let page: HistoryPage = self.get("conversations.history", &params).await?;
            for message in page.messages {
                match parse_ts(&message.ts) {
                    Some(timestamp) => messages.push(HistoryMessage::new(message.text, timestamp)),
                    None => debug!("Skipping message with unparseable ts {}", message.ts),
                }
            }

            cursor = page.response_metadata.next_cursor;
            if !page.has_more || cursor.is_empty() {
                return Ok(messages);
            }
        }
    }

    async fn post_text(&self, target: &str, text: &str) -> Result<(), SlackError> {
        // Channel names are resolved; user and channel ids pass through
        let channel = if target.starts_with('#') {
            self.resolve_channel(target).await?
        } else {
            target.to_string()
        };

        let posted: Posted = self
            .post(
                "chat.postMessage",
                serde_json::json!({ "channel": channel, "text": text }),
            )
            .await?;
        debug!("Posted message {} to {}", posted.ts, target);
        Ok(())
    }
}

impl std::fmt::Debug for SlackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackClient")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl MemberSource for SlackClient {
    async fn list_members(&self, channel: &str) -> Result<Vec<Member>, ChannelError> {
        self.members(channel)
            .await
            .map_err(|e| e.into_fetch_error(channel))
    }
}

#[async_trait]
impl HistorySource for SlackClient {
    async fn fetch_messages(
        &self,
        channel: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoryMessage>, ChannelError> {
        self.history(channel, since)
            .await
            .map_err(|e| e.into_fetch_error(channel))
    }
}

#[async_trait]
impl Messenger for SlackClient {
    async fn post_message(&self, target: &str, text: &str) -> Result<(), ChannelError> {
        self.post_text(target, text)
            .await
            .map_err(|e| ChannelError::Delivery {
                target: target.to_string(),
                message: e.to_string(),
            })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Strip the leading `#` from a channel name
pub fn normalize_channel(channel: &str) -> &str {
    channel.strip_prefix('#').unwrap_or(channel)
}

/// Check Slack's `ok` flag and decode the rest of the body
fn parse_envelope<T: DeserializeOwned>(
    method: &str,
    json: serde_json::Value,
) -> Result<T, SlackError> {
    if !json["ok"].as_bool().unwrap_or(false) {
        let error = json["error"].as_str().unwrap_or("unknown_error").to_string();
        return Err(SlackError::Api {
            method: method.to_string(),
            error,
        });
    }

    serde_json::from_value(json).map_err(|source| SlackError::Decode {
        method: method.to_string(),
        source,
    })
}

/// Parse a Slack `ts` (`"1700000000.000100"`) into a UTC timestamp
pub fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs.parse().ok()?;
    if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let nanos: u32 = format!("{:0<9}", frac).parse().ok()?;
    DateTime::from_timestamp(secs, nanos)
}
