use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::history::HistoryMessage;
use crate::pairing::Member;

/// Failures reported by the chat platform around a pairing run
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {0} not found")]
    ChannelNotFound(String),
    #[error("Transient fetch error: {0}")]
    Transient(String),
    #[error("Delivery to {target} failed: {message}")]
    Delivery { target: String, message: String },
}

/// Source of the people eligible for pairing
#[async_trait]
pub trait MemberSource: Send + Sync {
    /// Members of `channel`, already filtered of bots and excluded users
    async fn list_members(&self, channel: &str) -> Result<Vec<Member>, ChannelError>;
}

/// Source of past channel messages
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Messages posted to `channel` at or after `since`
    async fn fetch_messages(
        &self,
        channel: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoryMessage>, ChannelError>;
}

/// Trait for posting messages to a channel or user
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn post_message(&self, target: &str, text: &str) -> Result<(), ChannelError>;
}
