pub mod conference;
pub mod contact;
pub mod record;
pub mod resolve;
pub mod show;
pub mod watch;

use chrono::{DateTime, Utc};

use crate::model::Conversation;

pub(crate) fn print_table(conversations: &[&Conversation], now: DateTime<Utc>) {
    println!(
        "{:<12} {:<28} {:<24} {:<6} {:<9} {}",
        "Last", "Key", "Name", "Calls", "Accounts", "Live"
    );
    println!("{}", "-".repeat(90));

    for conv in conversations {
        let last = conv
            .last_interaction(now)
            .map(|ts| ts.format("%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let live = conv
            .conference
            .as_ref()
            .map(|c| c.id.as_str())
            .unwrap_or("-");

        println!(
            "{:<12} {:<28} {:<24} {:<6} {:<9} {}",
            last,
            truncate(&conv.key, 28),
            truncate(conv.contact.display_name(), 24),
            conv.call_count(),
            conv.history.len(),
            live,
        );
    }
}

pub(crate) fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let cut: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}
