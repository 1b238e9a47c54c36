//! Pairing preview CLI
//!
//! Runs the pairing pipeline without posting anything.
//!
//! Usage:
//!   cargo run --bin pairing-preview -- --mock 7 --seed 42
//!   cargo run --bin pairing-preview -- --channel '#random-coffee'
//!   cargo run --bin pairing-preview -- --channel '#random-coffee' --no-history --topics

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::info;

use coffee_core::announcement::{format_pairs_preview, AnnouncementStyle};
use coffee_core::config::Config;
use coffee_core::history::HistoryMessage;
use coffee_core::messenger::{ChannelError, HistorySource, MemberSource, Messenger};
use coffee_core::pairing::Member;
use coffee_core::runner::{PairingBot, RunSettings};
use coffee_core::slack::{MemberFilter, SlackClient};

#[derive(Parser, Debug)]
#[command(author, version, about = "Preview Random Coffee pairings without posting", long_about = None)]
struct Args {
    /// Use N synthetic members instead of a Slack channel
    #[arg(long, value_name = "N")]
    mock: Option<usize>,

    /// Slack channel to read members (and history) from
    #[arg(short, long)]
    channel: Option<String>,

    /// Slack bot token (defaults to SLACK_BOT_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Ignore pairing history
    #[arg(long)]
    no_history: bool,

    /// Seed for a reproducible preview
    #[arg(long)]
    seed: Option<u64>,

    /// Only print the groups, not the announcement
    #[arg(long)]
    no_message: bool,

    /// Generate conversation topics (needs OPENAI_API_KEY)
    #[arg(long)]
    topics: bool,
}

/// Offline stand-in: fixed members, no history, refuses to post
#[derive(Default)]
struct Offline {
    members: Vec<Member>,
}

impl Offline {
    fn mock(count: usize) -> Self {
        Self {
            members: (1..=count)
                .map(|i| Member::new(format!("U{:04}", i), format!("Test User {}", i)))
                .collect(),
        }
    }
}

#[async_trait]
impl MemberSource for Offline {
    async fn list_members(&self, _channel: &str) -> Result<Vec<Member>, ChannelError> {
        Ok(self.members.clone())
    }
}

#[async_trait]
impl HistorySource for Offline {
    async fn fetch_messages(
        &self,
        _channel: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<HistoryMessage>, ChannelError> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl Messenger for Offline {
    async fn post_message(&self, target: &str, _text: &str) -> Result<(), ChannelError> {
        Err(ChannelError::Delivery {
            target: target.to_string(),
            message: "previews never post".to_string(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    // Logs go to stderr; stdout carries only the preview
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let mut settings = RunSettings::new(args.channel.clone().unwrap_or_else(|| config.channel.clone()));
    settings.lookback = config.lookback();
    settings.style = AnnouncementStyle::preview(config.schedule.weekday);

    let offline = Arc::new(match args.mock {
        Some(count) => Offline::mock(count),
        None => Offline::default(),
    });

    let bot = if args.mock.is_some() {
        info!("Previewing with {} mock members", offline.members.len());
        PairingBot::new(offline.clone(), offline.clone(), offline, settings)
    } else {
        let token = args
            .token
            .clone()
            .or_else(|| config.slack_token.clone())
            .context("Either --mock N or a Slack token (SLACK_BOT_TOKEN or --token) is required")?;
        let slack = Arc::new(SlackClient::new(
            &token,
            MemberFilter::new(&config.excluded_usernames),
        )?);

        let history: Arc<dyn HistorySource> = if args.no_history {
            info!("Ignoring pairing history");
            offline.clone()
        } else {
            slack.clone()
        };
        PairingBot::new(slack, history, offline, settings)
    };

    let bot = match (&config.openai_api_key, args.topics) {
        (Some(api_key), true) => {
            let generator = coffee_topics::build_generator(
                &config.openai_api_url,
                api_key,
                &config.openai_model,
            )?;
            bot.with_topics(Arc::new(generator))
        }
        (None, true) => anyhow::bail!("--topics needs OPENAI_API_KEY"),
        _ => bot,
    };

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let report = bot.prepare(&mut rng).await?;

    println!("{}", format_pairs_preview(&report.groups));
    println!(
        "Members: {}  Trios: {}  Recent pairs: {}  Reused: {}",
        report.members, report.trios, report.blocked_pairs, report.reused_pairs
    );
    if !report.history_available {
        println!("(pairing history unavailable)");
    }

    if !args.no_message {
        println!("\nAnnouncement:\n{}\n{}", "-".repeat(40), report.message);
    }

    Ok(())
}
