//! Slack message formatting
//!
//! The announcement doubles as the bot's memory: the History Miner finds it
//! again through its marker phrases and reads one group per numbered line. Keep
//! the header phrases and the one-group-per-line layout in sync with
//! `history::ANNOUNCEMENT_MARKERS`.

use chrono::{DateTime, Utc, Weekday};

use crate::pairing::{Group, GroupKind, Member};

/// How the announcement is rendered
#[derive(Debug, Clone)]
pub struct AnnouncementStyle {
    /// Day the pairing goes out; the chat is suggested for the day after
    pub weekday: Weekday,
    /// Show display names instead of mention tokens (previews)
    pub use_names: bool,
}

impl Default for AnnouncementStyle {
    fn default() -> Self {
        Self {
            weekday: Weekday::Tue,
            use_names: false,
        }
    }
}

impl AnnouncementStyle {
    pub fn preview(weekday: Weekday) -> Self {
        Self {
            weekday,
            use_names: true,
        }
    }

    fn render(&self, member: &Member) -> String {
        if self.use_names {
            member.name.clone()
        } else {
            member.mention()
        }
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn group_line(index: usize, group: &Group, style: &AnnouncementStyle) -> String {
    let names: Vec<String> = group.members().iter().map(|m| style.render(m)).collect();
    match (group.kind(), names.as_slice()) {
        (GroupKind::Pair, [a, b]) => format!("{}. {} & {} ☕\n", index, a, b),
        (GroupKind::Trio, [a, b, c]) => format!("{}. {}, {} & {} ☕ (trio!)\n", index, a, b, c),
        _ => format!(
            "{}. {} - You're flying solo this week! 💙\n",
            index,
            names.join(", ")
        ),
    }
}

/// Build the weekly announcement posted to the channel
pub fn create_pairing_message(
    groups: &[Group],
    topics_text: &str,
    style: &AnnouncementStyle,
) -> String {
    let today = weekday_name(style.weekday);
    let tomorrow = weekday_name(style.weekday.succ());

    let mut message = format!("☕ *Happy {}, Coffee Lovers!* ☕\n", today);
    message.push_str("It's time for our weekly Random Coffee pairings! 🎉\n\n");
    message.push_str("Here are this week's wonderful pairings:\n\n");

    for (i, group) in groups.iter().enumerate() {
        message.push_str(&group_line(i + 1, group, style));
    }

    message.push_str(topics_text);

    message.push_str("\n✨ *Here's the idea:* ✨\n");
    message.push_str(&format!(
        "Tomorrow ({}) would be a lovely day for a coffee chat! \
         It's totally optional and there's no pressure at all. 💛\n\n",
        tomorrow
    ));
    message.push_str(
        "📅 Feel free to schedule a quick 15-30 minute call whenever works best for your group.\n",
    );
    message.push_str(
        "💬 Chat about anything - hobbies, weekend plans, fun projects, or just say hi!\n",
    );
    message.push_str(&format!(
        "🤝 If this week doesn't work out, no worries! There's always next {}.\n\n",
        today
    ));
    message.push_str("Have a wonderful week, everyone! 🌟");

    message
}

/// Plain-text preview of a pairing run
pub fn format_pairs_preview(groups: &[Group]) -> String {
    let rule = "=".repeat(40);
    let mut lines = vec!["Pairing Preview:".to_string(), rule.clone()];

    for (i, group) in groups.iter().enumerate() {
        let names: Vec<&str> = group.members().iter().map(|m| m.name.as_str()).collect();
        let kind = match group.kind() {
            GroupKind::Solo => "solo",
            GroupKind::Pair => "pair",
            GroupKind::Trio => "trio",
        };
        lines.push(format!("{}. {} ({})", i + 1, names.join(" & "), kind));
    }

    lines.push(rule);
    lines.push(format!("Total groups: {}", groups.len()));
    lines.join("\n")
}

/// Alert sent to the administrator when a run fails
pub fn admin_error_message(context: &str, error: &str, now: DateTime<Utc>) -> String {
    format!(
        "🚨 *Random Coffee Bot Error* 🚨\n{}\n```{}```\nTimestamp: {}",
        context,
        error,
        now.format("%Y-%m-%d %H:%M:%S UTC")
    )
}
