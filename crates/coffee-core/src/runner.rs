//! Pairing run orchestration
//!
//! Wires the collaborators together for one weekly run: members, history,
//! groups, topics, announcement. Only `pair_and_notify` talks to the admin.

use chrono::{Duration, Utc};
use coffee_topics::{format_topics_for_slack, TopicSource};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::announcement::{admin_error_message, create_pairing_message, AnnouncementStyle};
use crate::history::{fetch_recent_pairs, BlockingSet};
use crate::messenger::{ChannelError, HistorySource, MemberSource, Messenger};
use crate::pairing::{construct_groups, count_reused_pairs, Group, GroupKind, PairingError};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Pairing(#[from] PairingError),
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Channel whose members are paired and where the announcement goes
    pub channel: String,
    pub lookback: Duration,
    pub admin_recipient: Option<String>,
    pub require_history: bool,
    pub style: AnnouncementStyle,
}

impl RunSettings {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            lookback: Duration::days(30),
            admin_recipient: None,
            require_history: false,
            style: AnnouncementStyle::default(),
        }
    }
}

/// Outcome of a pairing run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub members: usize,
    pub groups: Vec<Group>,
    pub trios: usize,
    /// Pairs known from recent announcements
    pub blocked_pairs: usize,
    /// Blocked pairs that had to be matched again
    pub reused_pairs: usize,
    pub topics: usize,
    pub history_available: bool,
    /// Announcement text, posted or not
    pub message: String,
}

pub struct PairingBot {
    members: Arc<dyn MemberSource>,
    history: Arc<dyn HistorySource>,
    messenger: Arc<dyn Messenger>,
    topics: Option<Arc<dyn TopicSource>>,
    settings: RunSettings,
}

impl PairingBot {
    pub fn new(
        members: Arc<dyn MemberSource>,
        history: Arc<dyn HistorySource>,
        messenger: Arc<dyn Messenger>,
        settings: RunSettings,
    ) -> Self {
        Self {
            members,
            history,
            messenger,
            topics: None,
            settings,
        }
    }

    pub fn with_topics(mut self, topics: Arc<dyn TopicSource>) -> Self {
        self.topics = Some(topics);
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Gather members and history, build groups and the announcement.
    /// Nothing is posted.
    pub async fn prepare<R: Rng + Send>(&self, rng: &mut R) -> Result<RunReport, RunError> {
        let channel = self.settings.channel.as_str();

        let members = self.members.list_members(channel).await?;
        info!("Found {} eligible members in {}", members.len(), channel);
        if members.len() < 2 {
            return Err(PairingError::InsufficientMembers {
                found: members.len(),
            }
            .into());
        }

        let (blocked, history_available) = self.recent_pairs().await?;

        let groups = construct_groups(&members, &blocked, rng)?;
        let reused_pairs = count_reused_pairs(&groups, &blocked);
        if reused_pairs > 0 {
            warn!("{} recent pairs had to be matched again", reused_pairs);
        }

        let topics = match &self.topics {
            Some(source) => source.generate_topics().await,
            None => Vec::new(),
        };
        if self.topics.is_some() && topics.is_empty() {
            warn!("No conversation topics generated, posting without them");
        }

        let message =
            create_pairing_message(&groups, &format_topics_for_slack(&topics), &self.settings.style);

        Ok(RunReport {
            members: members.len(),
            trios: groups.iter().filter(|g| g.kind() == GroupKind::Trio).count(),
            groups,
            blocked_pairs: blocked.len(),
            reused_pairs,
            topics: topics.len(),
            history_available,
            message,
        })
    }

    /// One full run: prepare and post the announcement to the channel
    pub async fn run_once<R: Rng + Send>(&self, rng: &mut R) -> Result<RunReport, RunError> {
        let report = self.prepare(rng).await?;

        self.messenger
            .post_message(&self.settings.channel, &report.message)
            .await?;

        info!(
            "Posted {} groups ({} trios) to {}",
            report.groups.len(),
            report.trios,
            self.settings.channel
        );
        Ok(report)
    }

    /// Scheduled entry point: run with fresh entropy, alert the admin on failure
    pub async fn pair_and_notify(&self) -> Option<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pairing_run", %run_id, channel = %self.settings.channel);

        async {
            let mut rng = StdRng::from_entropy();
            match self.run_once(&mut rng).await {
                Ok(report) => {
                    info!("☕ Pairing run complete");
                    Some(report)
                }
                Err(e) => {
                    let context = match &e {
                        RunError::Pairing(PairingError::InsufficientMembers { .. }) => {
                            warn!("Pairing skipped: {}", e);
                            "Pairing Process Warning".to_string()
                        }
                        _ => {
                            error!("Pairing run failed: {}", e);
                            format!("Failed to complete pairing for {}", self.settings.channel)
                        }
                    };
                    self.notify_admin(&context, &e.to_string()).await;
                    None
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn recent_pairs(&self) -> Result<(BlockingSet, bool), RunError> {
        let result = fetch_recent_pairs(
            self.history.as_ref(),
            &self.settings.channel,
            self.settings.lookback,
            Utc::now(),
        )
        .await;

        match result {
            Ok(blocked) => Ok((blocked, true)),
            Err(e @ ChannelError::ChannelNotFound(_)) => Err(e.into()),
            Err(e) if self.settings.require_history => Err(e.into()),
            Err(e) => {
                warn!("Could not read pairing history, pairing without it: {}", e);
                Ok((BlockingSet::new(), false))
            }
        }
    }

    async fn notify_admin(&self, context: &str, error: &str) {
        let Some(recipient) = self.settings.admin_recipient.as_deref() else {
            warn!("No admin recipient configured; not sending error notification");
            return;
        };

        let text = admin_error_message(context, error, Utc::now());
        match self.messenger.post_message(recipient, &text).await {
            Ok(()) => info!("Error notification sent to admin"),
            Err(e) => error!("Failed to notify admin: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryMessage;
    use crate::pairing::Member;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::Mutex;

    struct Channel {
        members: Vec<Member>,
        history: Vec<HistoryMessage>,
        history_failure: Option<bool>,
        posted: Mutex<Vec<(String, String)>>,
    }

    impl Channel {
        fn with_members(n: usize) -> Self {
            Self {
                members: (1..=n)
                    .map(|i| Member::new(format!("U{}", i), format!("User {}", i)))
                    .collect(),
                history: Vec::new(),
                history_failure: None,
                posted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MemberSource for Channel {
        async fn list_members(&self, _channel: &str) -> Result<Vec<Member>, ChannelError> {
            Ok(self.members.clone())
        }
    }

    #[async_trait]
    impl HistorySource for Channel {
        async fn fetch_messages(
            &self,
            channel: &str,
            _since: DateTime<Utc>,
        ) -> Result<Vec<HistoryMessage>, ChannelError> {
            // Some(true): channel gone, Some(false): transient
            match self.history_failure {
                None => Ok(self.history.clone()),
                Some(true) => Err(ChannelError::ChannelNotFound(channel.to_string())),
                Some(false) => Err(ChannelError::Transient("rate limited".into())),
            }
        }
    }

    #[async_trait]
    impl Messenger for Channel {
        async fn post_message(&self, target: &str, text: &str) -> Result<(), ChannelError> {
            self.posted
                .lock()
                .unwrap()
                .push((target.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn bot(channel: Arc<Channel>, settings: RunSettings) -> PairingBot {
        PairingBot::new(channel.clone(), channel.clone(), channel, settings)
    }

    #[test]
    fn test_prepare_does_not_post() {
        let channel = Arc::new(Channel::with_members(4));
        let bot = bot(channel.clone(), RunSettings::new("#coffee"));

        let report =
            tokio_test::block_on(bot.prepare(&mut StdRng::seed_from_u64(1))).unwrap();

        assert_eq!(report.groups.len(), 2);
        assert!(report.history_available);
        assert!(channel.posted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_transient_history_failure_degrades() {
        let mut channel = Channel::with_members(4);
        channel.history_failure = Some(false);
        let bot = bot(Arc::new(channel), RunSettings::new("#coffee"));

        let report =
            tokio_test::block_on(bot.prepare(&mut StdRng::seed_from_u64(1))).unwrap();
        assert!(!report.history_available);
        assert_eq!(report.blocked_pairs, 0);
    }

    #[test]
    fn test_missing_history_channel_is_fatal() {
        let mut channel = Channel::with_members(4);
        channel.history_failure = Some(true);
        let bot = bot(Arc::new(channel), RunSettings::new("#coffee"));

        let result = tokio_test::block_on(bot.prepare(&mut StdRng::seed_from_u64(1)));
        assert!(matches!(
            result,
            Err(RunError::Channel(ChannelError::ChannelNotFound(_)))
        ));
    }

    #[test]
    fn test_notify_admin_without_recipient_is_silent() {
        let channel = Arc::new(Channel::with_members(1));
        let bot = bot(channel.clone(), RunSettings::new("#coffee"));

        assert!(tokio_test::block_on(bot.pair_and_notify()).is_none());
        assert!(channel.posted.lock().unwrap().is_empty());
    }
}
