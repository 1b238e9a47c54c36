use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coffee_core::announcement::AnnouncementStyle;
use coffee_core::config::{Config, ConfigFile, DEFAULT_CONFIG_PATH};
use coffee_core::runner::{PairingBot, RunSettings};
use coffee_core::scheduler::{parse_time, spawn_scheduler};
use coffee_core::slack::{MemberFilter, SlackClient};

/// How often the scheduler checks whether a run is due
const SCHEDULER_POLL_SECS: u64 = 30;

#[derive(Parser, Debug)]
#[command(author, version, about = "Weekly Random Coffee pairings for Slack", long_about = None)]
struct Args {
    /// Slack bot token (overrides config file and SLACK_BOT_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Channel to pair and post in, e.g. #random-coffee
    #[arg(short, long)]
    channel: Option<String>,

    /// JSON config file
    #[arg(long, env = "RANDOM_COFFEE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Pairing time, HH:MM in the configured timezone
    #[arg(long)]
    time: Option<String>,

    /// Run a pairing immediately, then exit
    #[arg(long)]
    run_now: bool,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::from_env()?;

    if let Some(file) = ConfigFile::load(&args.config)? {
        config.apply_file(file)?;
    }

    if let Some(token) = &args.token {
        config.slack_token = Some(token.clone());
    }
    if let Some(channel) = &args.channel {
        config.channel = channel.clone();
    }
    if let Some(time) = &args.time {
        config.schedule.time = parse_time(time)?;
    }

    Ok(config)
}

fn build_bot(config: &Config) -> Result<PairingBot> {
    let token = config
        .slack_token
        .as_deref()
        .context("Slack token is required (SLACK_BOT_TOKEN, config file or --token)")?;

    let slack = Arc::new(SlackClient::new(
        token,
        MemberFilter::new(&config.excluded_usernames),
    )?);

    let settings = RunSettings {
        channel: config.channel.clone(),
        lookback: config.lookback(),
        admin_recipient: config.admin_recipient.clone(),
        require_history: config.require_history,
        style: AnnouncementStyle {
            weekday: config.schedule.weekday,
            use_names: false,
        },
    };
    let bot = PairingBot::new(slack.clone(), slack.clone(), slack, settings);

    match &config.openai_api_key {
        Some(api_key) => {
            let generator = coffee_topics::build_generator(
                &config.openai_api_url,
                api_key,
                &config.openai_model,
            )?;
            info!("Conversation topics enabled ({})", config.openai_model);
            Ok(bot.with_topics(Arc::new(generator)))
        }
        None => {
            warn!("OPENAI_API_KEY not set, announcements will not include topics");
            Ok(bot)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "random_coffee=debug,coffee_core=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!("☕ Random Coffee starting up...");

    let config = load_config(&args)?;
    info!("Configuration loaded");
    info!("  Channel: {}", config.channel);
    info!("  Schedule: {}", config.schedule.describe());
    info!("  Lookback: {} days", config.lookback_days);
    match &config.admin_recipient {
        Some(recipient) => info!("  Admin: {}", recipient),
        None => info!("  Admin: none (errors are only logged)"),
    }

    let bot = build_bot(&config)?;

    if args.run_now {
        info!("Running pairing now");
        return match bot.pair_and_notify().await {
            Some(_) => Ok(()),
            None => Err(anyhow::anyhow!("Pairing run failed, see logs")),
        };
    }

    let health_router = Router::new()
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http());
    let health_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.health_port))
        .await
        .with_context(|| format!("Failed to bind health port {}", config.health_port))?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(health_listener, health_router).await {
            error!("Health check server error: {}", e);
        }
    });
    info!("Health check server listening on port {}", config.health_port);

    let mut runs = spawn_scheduler(config.schedule.clone(), SCHEDULER_POLL_SECS)?;
    info!(
        "Background scheduler started (polling every {}s)",
        SCHEDULER_POLL_SECS
    );

    loop {
        tokio::select! {
            Some(run) = runs.recv() => {
                info!("⏰ Scheduled pairing due at {}", run.due_at);
                if let Some(report) = bot.pair_and_notify().await {
                    info!(
                        "{} members, {} groups, {} of {} recent pairs reused",
                        report.members,
                        report.groups.len(),
                        report.reused_pairs,
                        report.blocked_pairs
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    info!("☕ Random Coffee has shut down.");
    Ok(())
}
