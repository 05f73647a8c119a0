//! Watch command implementation
//!
//! Polls the database for commits from other processes and republishes the
//! conversation list on every change, until interrupted.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::warn;

use crate::service::{ConversationService, TriggerReason};
use crate::store::CallStore;

pub async fn run(store: Arc<CallStore>, service: &ConversationService, interval: Duration) -> Result<()> {
    let mut updates = service.subscribe();
    let (events_tx, events_rx) = broadcast::channel(8);
    let listener = service.attach(events_rx);

    let mut last_version = store.data_version()?;
    let mut ticker = tokio::time::interval(interval);
    events_tx.send(TriggerReason::Startup)?;

    println!("Watching for changes every {:?} (Ctrl-C to stop)\n", interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.data_version() {
                    Ok(version) if version != last_version => {
                        last_version = version;
                        events_tx.send(TriggerReason::CallStateChanged)?;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "failed to poll database"),
                }
            }
            update = updates.recv() => {
                match update {
                    Ok(update) => {
                        let now = Utc::now();
                        println!(
                            "\n[generation {} | {}] {} conversations",
                            update.generation,
                            update.reason.as_str(),
                            update.conversations.len()
                        );
                        super::print_table(&update.conversations.sorted_by_last_interaction(now), now);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "display fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(events_tx);
    listener.await?;
    Ok(())
}
