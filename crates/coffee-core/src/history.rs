//! History Miner
//!
//! Rebuilds "who met whom recently" from the bot's own past announcements.
//! Every announcement line names one group as Slack mentions (`<@U123>`), so
//! any line with two or more mentions yields a blocked pair for each two-way
//! relationship on it.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, info};

use crate::messenger::{ChannelError, HistorySource};

/// Lowercase phrases that mark a message as a pairing announcement
pub const ANNOUNCEMENT_MARKERS: &[&str] =
    &["random coffee pairings", "this week's wonderful pairings"];

/// Slack user mention: `<@` + alphanumeric id + `>`
const MENTION_PATTERN: &str = r"<@([A-Za-z0-9]+)>";

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(MENTION_PATTERN).expect("valid mention pattern"));

/// A past channel message, as evidence only
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryMessage {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryMessage {
    pub fn new(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            timestamp,
        }
    }
}

/// Unordered pair of two distinct member ids, stored sorted
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    low: String,
    high: String,
}

impl PairKey {
    /// `None` when both ids are the same member
    pub fn new(a: &str, b: &str) -> Option<Self> {
        match a.cmp(b) {
            std::cmp::Ordering::Less => Some(Self {
                low: a.to_string(),
                high: b.to_string(),
            }),
            std::cmp::Ordering::Greater => Some(Self {
                low: b.to_string(),
                high: a.to_string(),
            }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn ids(&self) -> (&str, &str) {
        (&self.low, &self.high)
    }

    pub fn involves(&self, id: &str) -> bool {
        self.low == id || self.high == id
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.low, self.high)
    }
}

/// Pairs that met within the lookback window and should not meet again now
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockingSet {
    pairs: BTreeSet<PairKey>,
}

impl BlockingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `a` with `b`; returns false for self-pairs and repeats
    pub fn block(&mut self, a: &str, b: &str) -> bool {
        match PairKey::new(a, b) {
            Some(key) => self.pairs.insert(key),
            None => false,
        }
    }

    pub fn is_blocked(&self, a: &str, b: &str) -> bool {
        PairKey::new(a, b).is_some_and(|key| self.pairs.contains(&key))
    }

    pub fn contains(&self, key: &PairKey) -> bool {
        self.pairs.contains(key)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PairKey> {
        self.pairs.iter()
    }
}

impl FromIterator<PairKey> for BlockingSet {
    fn from_iter<I: IntoIterator<Item = PairKey>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

impl Extend<PairKey> for BlockingSet {
    fn extend<I: IntoIterator<Item = PairKey>>(&mut self, iter: I) {
        self.pairs.extend(iter);
    }
}

/// True when the text carries one of the announcement marker phrases
pub fn is_announcement(text: &str) -> bool {
    let lower = text.to_lowercase();
    ANNOUNCEMENT_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Member ids mentioned on a line, in order of appearance
pub fn extract_mentions(line: &str) -> Vec<&str> {
    MENTION
        .captures_iter(line)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// Every unordered pair among the mentions on one line
fn line_pairs(line: &str) -> Vec<PairKey> {
    let mentions = extract_mentions(line);
    let mut pairs = Vec::new();
    for (i, a) in mentions.iter().enumerate() {
        for b in &mentions[i + 1..] {
            if let Some(key) = PairKey::new(a, b) {
                pairs.push(key);
            }
        }
    }
    pairs
}

/// Derive the blocking set from an already time-bounded batch of messages.
///
/// Messages without a marker phrase and lines with fewer than two mentions
/// contribute nothing. No timestamp filtering happens here.
pub fn mine_blocked_pairs(messages: &[HistoryMessage]) -> BlockingSet {
    let mut blocked = BlockingSet::new();

    for message in messages.iter().filter(|m| is_announcement(&m.text)) {
        for line in message.text.lines() {
            blocked.extend(line_pairs(line));
        }
    }

    blocked
}

/// Fetch announcements newer than `now - lookback` and mine them.
///
/// Retrieval failures are returned as-is so the caller can decide whether
/// running without history is acceptable.
pub async fn fetch_recent_pairs(
    source: &dyn HistorySource,
    channel: &str,
    lookback: Duration,
    now: DateTime<Utc>,
) -> Result<BlockingSet, ChannelError> {
    let since = now
        .checked_sub_signed(lookback)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    debug!("Fetching history for {} since {}", channel, since);

    let messages = source.fetch_messages(channel, since).await?;
    let announcements = messages.iter().filter(|m| is_announcement(&m.text)).count();
    let blocked = mine_blocked_pairs(&messages);

    info!(
        "Mined {} blocked pairs from {} announcements ({} messages, {} days)",
        blocked.len(),
        announcements,
        messages.len(),
        lookback.num_days()
    );

    Ok(blocked)
}
