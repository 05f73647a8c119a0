//! Resolve command implementation

use anyhow::{Context, Result};
use chrono::Utc;

use crate::service::{ConversationService, TriggerReason};

pub async fn run(service: &ConversationService, json: bool) -> Result<()> {
    service
        .rebuild(TriggerReason::Manual)
        .await
        .context("Failed to resolve conversations")?;

    let set = service.current();
    let now = Utc::now();
    let sorted = set.sorted_by_last_interaction(now);

    if json {
        println!("{}", serde_json::to_string_pretty(&sorted)?);
        return Ok(());
    }

    if sorted.is_empty() {
        println!("No conversations. Add calls with 'callbook record' first.");
        return Ok(());
    }

    super::print_table(&sorted, now);
    Ok(())
}
