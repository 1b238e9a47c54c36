//! Conversation starters from the past week in history
//!
//! Pipeline: for each of the last seven days fetch the Wikipedia day page, ask
//! the model for a handful of lighthearted items, then ask it once more to pick
//! the best five. Every step degrades instead of failing; the announcement is
//! still posted when this produces nothing.

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Utc};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{error, info, warn};

use crate::chat::{reply_lines, ChatClient};
use crate::wikipedia::WikipediaClient;

/// Topics kept per day page and in the final selection
pub const MAX_TOPICS: usize = 5;
/// Days of history considered, the reference day included
pub const DAYS_BACK: i64 = 7;
/// Page excerpt sent to the model, in characters
const PAGE_EXCERPT_CHARS: usize = 15_000;

const EXTRACT_SYSTEM_PROMPT: &str = "You are an upbeat assistant who digs entertaining facts out of \
    Wikipedia day pages. You enjoy pop culture, odd holidays, celebrity trivia and strange but \
    harmless history. You stay away from anything grim or heavy.";

const SELECT_SYSTEM_PROMPT: &str = "You are a cheerful assistant choosing conversation topics for \
    colleagues who meet for a weekly coffee chat. Keep everything light and fun.";

/// Anything that can hand the bot a few conversation starters
#[async_trait]
pub trait TopicSource: Send + Sync {
    /// Up to five topics; an empty list when nothing could be produced
    async fn generate_topics(&self) -> Vec<String>;
}

pub struct TopicsGenerator {
    chat: ChatClient,
    wikipedia: WikipediaClient,
}

impl TopicsGenerator {
    pub fn new(chat: ChatClient, wikipedia: WikipediaClient) -> Self {
        Self { chat, wikipedia }
    }

    /// Generate topics for the week ending on `reference`
    pub async fn generate(&self, reference: NaiveDate) -> Vec<String> {
        let dates = past_week_dates(reference);
        info!("Fetching events for {} days ending {}", dates.len(), reference);

        let mut all_events = Vec::new();
        for (month, day) in &dates {
            match self.wikipedia.fetch_day(month, *day).await {
                Ok(page) => {
                    let events = self.extract_events(&page, month, *day).await;
                    info!("Extracted {} events for {} {}", events.len(), month, day);
                    all_events.extend(events);
                }
                Err(e) => warn!("Skipping {} {}: {}", month, day, e),
            }
        }

        if all_events.is_empty() {
            error!("No events collected from any day");
            return Vec::new();
        }

        info!("Total events collected: {}", all_events.len());
        let topics = self.select_final(&all_events).await;
        info!("Selected {} final topics", topics.len());
        topics
    }

    async fn extract_events(&self, page: &str, month: &str, day: u32) -> Vec<String> {
        let excerpt: String = page.chars().take(PAGE_EXCERPT_CHARS).collect();
        let prompt = format!(
            "Read this Wikipedia page for {month} {day} and pull out exactly {MAX_TOPICS} fun, \
             entertaining items.\n\n\
             Good picks:\n\
             - quirky holidays and observances\n\
             - surprising or funny historical events (no wars, tragedies or politics)\n\
             - birthdays of actors, musicians, comedians and athletes\n\
             - pop culture moments and odd world records\n\n\
             Keep each item to one or two playful sentences that would spark a casual chat.\n\
             Reply with one item per line, no numbering or bullets.\n\n\
             Page content:\n{excerpt}"
        );

        match self
            .chat
            .complete(EXTRACT_SYSTEM_PROMPT, &prompt, 1000, 0.8)
            .await
        {
            Ok(content) => reply_lines(&content, MAX_TOPICS),
            Err(e) => {
                error!("Failed to extract events for {} {}: {}", month, day, e);
                Vec::new()
            }
        }
    }

    async fn select_final(&self, events: &[String]) -> Vec<String> {
        let listed = events
            .iter()
            .map(|event| format!("- {}", event))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "From these fun facts about the past week, choose the {MAX_TOPICS} most entertaining \
             topics for a casual coffee chat between colleagues.\n\n\
             Prefer topics that make people smile, invite \"what's your favourite\" debates or \
             personal stories, and mix birthdays, holidays, pop culture and trivia. Skip anything \
             serious or political.\n\n\
             Facts:\n{listed}\n\n\
             Rewrite each pick as a playful one or two sentence conversation starter, one per line, \
             no numbering or bullets."
        );

        match self.chat.complete(SELECT_SYSTEM_PROMPT, &prompt, 500, 0.9).await {
            Ok(content) => reply_lines(&content, MAX_TOPICS),
            Err(e) => {
                error!("Failed to select final topics: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl TopicSource for TopicsGenerator {
    async fn generate_topics(&self) -> Vec<String> {
        self.generate(Utc::now().date_naive()).await
    }
}

/// The reference day and the six before it, newest first, as `(month name, day)`
pub fn past_week_dates(reference: NaiveDate) -> Vec<(String, u32)> {
    (0..DAYS_BACK)
        .map(|offset| {
            let date = reference - Duration::days(offset);
            (date.format("%B").to_string(), date.day())
        })
        .collect()
}

static MARKDOWN_BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid bold pattern"));

/// Slack's mrkdwn uses single asterisks for bold
pub fn markdown_to_slack(text: &str) -> String {
    MARKDOWN_BOLD.replace_all(text, "*$1*").into_owned()
}

/// Render topics as the announcement's conversation-starter block
pub fn format_topics_for_slack(topics: &[String]) -> String {
    if topics.is_empty() {
        return String::new();
    }

    let mut out = String::from("\n🎉 *Fun Conversation Starters for This Week:* 🎉\n");
    out.push_str("_Some entertaining things that happened this past week in history..._\n\n");
    for (i, topic) in topics.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, markdown_to_slack(topic)));
    }
    out
}
