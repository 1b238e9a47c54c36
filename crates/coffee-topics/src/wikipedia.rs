//! Wikipedia "On this day" client
//!
//! Every calendar day has a page (`/wiki/December_7`) listing events,
//! births, deaths and observances. The topic generator reads those pages as
//! raw HTML and lets the model pick the fun bits.

use std::time::Duration;
use tracing::debug;

const WIKIPEDIA_BASE: &str = "https://en.wikipedia.org/wiki";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!(
    "RandomCoffeeBot/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/random-coffee-bot) reqwest"
);

#[derive(Debug, thiserror::Error)]
pub enum WikipediaError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Wikipedia returned {status} for {page}")]
    Status { status: u16, page: String },
}

#[derive(Clone)]
pub struct WikipediaClient {
    client: reqwest::Client,
    base_url: String,
}

impl WikipediaClient {
    pub fn new() -> Result<Self, WikipediaError> {
        Self::with_base_url(WIKIPEDIA_BASE)
    }

    /// Point the client at a different wiki (mirrors, local fixtures)
    pub fn with_base_url(base_url: &str) -> Result<Self, WikipediaError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the page for a calendar day, e.g. `("December", 7)`
    pub async fn fetch_day(&self, month: &str, day: u32) -> Result<String, WikipediaError> {
        let page = page_title(month, day);
        let url = format!("{}/{}", self.base_url, page);
        debug!("Fetching Wikipedia page {}", url);

        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WikipediaError::Status {
                status: status.as_u16(),
                page,
            });
        }

        Ok(response.text().await?)
    }
}

impl std::fmt::Debug for WikipediaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WikipediaClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Page title for a calendar day (`December_7`)
pub fn page_title(month: &str, day: u32) -> String {
    format!("{}_{}", month, day)
}
