//! Record command implementation

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};

use crate::model::{HistoryCallRecord, UNKNOWN_ID};
use crate::store::CallStore;

pub struct RecordArgs {
    pub account: String,
    pub peer: String,
    pub contact_id: Option<i64>,
    pub start: Option<String>,
    pub duration: i64,
    pub incoming: bool,
    pub missed: bool,
    pub call_id: Option<String>,
}

pub fn run(store: &CallStore, args: RecordArgs) -> Result<()> {
    let start = match &args.start {
        Some(ts) => DateTime::parse_from_rfc3339(ts)
            .with_context(|| format!("Invalid --start timestamp: {}", ts))?
            .with_timezone(&Utc),
        None => Utc::now() - Duration::seconds(args.duration),
    };
    let call_id = args
        .call_id
        .unwrap_or_else(|| format!("{}-{}", args.account, start.timestamp_millis()));

    let call = HistoryCallRecord {
        call_id,
        account_id: args.account,
        peer_number: args.peer,
        contact_id: args.contact_id.unwrap_or(UNKNOWN_ID),
        call_start: start,
        call_end: start + Duration::seconds(args.duration.max(0)),
        incoming: args.incoming || args.missed,
        missed: args.missed,
    };

    store.insert_call(&call).context("Failed to store call")?;
    println!(
        "Recorded call {} with '{}' on account {}",
        call.call_id, call.peer_number, call.account_id
    );
    Ok(())
}
