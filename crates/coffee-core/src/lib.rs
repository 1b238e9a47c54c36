//! Random Coffee Core Library
//!
//! Weekly Slack pairings that avoid repeating recent partners.
//!
//! Modules:
//! - history: mines past announcements into blocked pairs
//! - pairing: randomized greedy group construction
//! - announcement: Slack message formatting
//! - runner: one pairing run end to end
//! - slack: Slack Web API collaborators
//! - scheduler / config: service plumbing

pub mod announcement;
pub mod config;
pub mod history;
pub mod messenger;
pub mod pairing;
pub mod runner;
pub mod scheduler;
pub mod slack;

pub use config::{Config, ConfigFile};
pub use history::{fetch_recent_pairs, mine_blocked_pairs, BlockingSet, HistoryMessage, PairKey};
pub use messenger::{ChannelError, HistorySource, MemberSource, Messenger};
pub use pairing::{construct_groups, count_reused_pairs, Group, GroupKind, Member, PairingError};
pub use runner::{PairingBot, RunError, RunReport, RunSettings};
pub use scheduler::{spawn_scheduler, PairingSchedule, ScheduledRun};
pub use slack::{MemberFilter, SlackClient, SlackError};
