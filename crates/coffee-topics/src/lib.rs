//! Coffee Topics - conversation starters for the weekly announcement
//!
//! Modules:
//! - wikipedia: "On this day" page client
//! - chat: OpenAI-compatible chat completions client
//! - topics: generation pipeline and Slack formatting

pub mod chat;
pub mod topics;
pub mod wikipedia;

pub use chat::{ChatClient, ChatError};
pub use topics::{format_topics_for_slack, past_week_dates, TopicSource, TopicsGenerator};
pub use wikipedia::{WikipediaClient, WikipediaError};

/// Build the default generator (public Wikipedia + the given chat endpoint)
pub fn build_generator(
    api_url: &str,
    api_key: &str,
    model: &str,
) -> Result<TopicsGenerator, TopicsError> {
    let chat = ChatClient::new(api_url, api_key, model)?;
    let wikipedia = WikipediaClient::new()?;
    Ok(TopicsGenerator::new(chat, wikipedia))
}

/// Setup failure for the topics pipeline (generation itself never errors)
#[derive(Debug, thiserror::Error)]
pub enum TopicsError {
    #[error(transparent)]
    Chat(#[from] ChatError),
    #[error(transparent)]
    Wikipedia(#[from] WikipediaError),
}
