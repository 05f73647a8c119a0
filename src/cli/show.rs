//! Show command implementation

use anyhow::{Context, Result};

use crate::identity::SipUri;
use crate::model::Conversation;
use crate::service::{ConversationService, TriggerReason};

pub async fn run(service: &ConversationService, query: &str) -> Result<()> {
    service
        .rebuild(TriggerReason::Manual)
        .await
        .context("Failed to resolve conversations")?;
    let set = service.current();

    // Exact key first, then display name, then any number or address
    // the contact used
    let address = SipUri::parse(query);
    let conversation = set.get(query).or_else(|| {
        set.iter().find(|c| {
            c.contact.display_name().eq_ignore_ascii_case(query)
                || c.contact.has_number(query)
                || (address.has_user()
                    && c.contact.phones.iter().any(|p| p.uri.same_address(&address)))
        })
    });

    let conversation = match conversation {
        Some(c) => c,
        None => {
            println!("Conversation '{}' not found.", query);
            return Ok(());
        }
    };

    print_conversation(conversation);
    Ok(())
}

fn print_conversation(conv: &Conversation) {
    println!("\n{}", "=".repeat(80));
    println!("Conversation: {}", conv.key);
    println!("Contact: {}", conv.contact.display_name());
    if conv.contact.is_known() {
        println!("Directory id: {}", conv.contact.id);
    }
    let numbers: Vec<&str> = conv.contact.phones.iter().map(|p| p.number.as_str()).collect();
    println!("Numbers: {}", numbers.join(", "));
    if let Some(conf) = &conv.conference {
        println!("Live: {} ({} participants)", conf.id, conf.participants.len());
    }
    println!("{}", "=".repeat(80));

    for (account, entry) in &conv.history {
        println!(
            "\n[{}] {} calls, last number {}",
            account,
            entry.calls.len(),
            entry.last_number_used().unwrap_or("-")
        );
        for call in &entry.calls {
            let direction = match (call.incoming, call.missed) {
                (true, true) => "missed",
                (true, false) => "in",
                (false, _) => "out",
            };
            println!(
                "  {} {:<7} {:>5}s  {}",
                call.call_start.format("%Y-%m-%d %H:%M"),
                direction,
                call.duration_secs(),
                call.peer_number
            );
        }
        println!("{}", "-".repeat(40));
    }
}
