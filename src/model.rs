//! Records consumed by the resolver and the conversations it produces

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::identity::{self, SipUri};

/// Contact id used when the system directory does not know the party
pub const UNKNOWN_ID: i64 = -1;

/// A phone number or SIP address attached to a contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phone {
    /// Raw string exactly as it appeared in the record
    pub number: String,
    #[serde(skip)]
    pub uri: SipUri,
}

impl Phone {
    pub fn new(number: impl Into<String>) -> Self {
        let number = number.into();
        let uri = SipUri::parse(&number);
        Self { number, uri }
    }
}

/// A communication party, possibly only partially identified
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub id: i64,
    pub display_name: Option<String>,
    pub photo_ref: Option<i64>,
    pub phones: Vec<Phone>,
    /// Positive id a record carried that the directory could not resolve
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unresolved_id: Option<i64>,
}

impl Contact {
    /// Contact known only by the number it called from / was called at
    pub fn unknown(number: &str) -> Self {
        Self {
            id: UNKNOWN_ID,
            display_name: None,
            photo_ref: None,
            phones: vec![Phone::new(number)],
            unresolved_id: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.id > 0
    }

    /// Name to show for this contact, falling back to its first number
    pub fn display_name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => self.phones.first().map(|p| p.number.as_str()).unwrap_or(""),
        }
    }

    /// Directory id for known contacts, else any id the records claimed
    pub fn asserted_id(&self) -> Option<i64> {
        if self.is_known() {
            Some(self.id)
        } else {
            self.unresolved_id
        }
    }

    pub fn has_stored_name(&self) -> bool {
        self.display_name.as_deref().map_or(false, |n| !n.is_empty())
    }

    /// Raw-string containment
    pub fn has_number(&self, number: &str) -> bool {
        self.phones.iter().any(|p| p.number == number)
    }

    /// Any phone whose SIP address reduces to this `user@host` key
    pub fn has_address(&self, canonical: &str) -> bool {
        self.phones
            .iter()
            .any(|p| p.uri.canonical_key().as_deref() == Some(canonical))
    }

    pub fn add_phone(&mut self, number: &str) {
        if !self.has_number(number) {
            self.phones.push(Phone::new(number));
        }
    }

    /// Every key this contact may be filed under, most specific first
    pub fn ids(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(1 + self.phones.len() * 2);
        if self.is_known() {
            keys.push(identity::contact_key(self.id));
        }
        for phone in &self.phones {
            if let Some(canonical) = phone.uri.canonical_key() {
                if !keys.contains(&canonical) {
                    keys.push(canonical);
                }
            }
            if !keys.contains(&phone.number) {
                keys.push(phone.number.clone());
            }
        }
        keys
    }
}

/// An immutable past call as returned by the history store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryCallRecord {
    pub call_id: String,
    pub account_id: String,
    pub peer_number: String,
    pub contact_id: i64,
    pub call_start: DateTime<Utc>,
    pub call_end: DateTime<Utc>,
    pub incoming: bool,
    pub missed: bool,
}

impl HistoryCallRecord {
    pub fn duration_secs(&self) -> i64 {
        (self.call_end - self.call_start).num_seconds().max(0)
    }
}

/// One call leg inside a live conference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub call_id: String,
    pub account_id: String,
    pub peer_number: String,
    pub contact_id: i64,
}

/// A currently active call grouping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveConference {
    pub id: String,
    pub participants: Vec<Participant>,
}

impl LiveConference {
    pub fn primary(&self) -> Option<&Participant> {
        self.participants.first()
    }

    pub fn has_call(&self, call_id: &str) -> bool {
        self.participants.iter().any(|p| p.call_id == call_id)
    }
}

/// Calls exchanged with one contact through one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub account_id: String,
    pub calls: Vec<HistoryCallRecord>,
}

impl HistoryEntry {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            calls: vec![],
        }
    }

    pub fn last_interaction(&self) -> Option<DateTime<Utc>> {
        self.calls.iter().map(|c| c.call_end.max(c.call_start)).max()
    }

    pub fn last_number_used(&self) -> Option<&str> {
        self.calls
            .iter()
            .max_by_key(|c| c.call_start)
            .map(|c| c.peer_number.as_str())
    }
}

/// All history and live state grouped under one party
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    pub key: String,
    pub contact: Contact,
    pub history: BTreeMap<String, HistoryEntry>,
    pub conference: Option<LiveConference>,
}

impl Conversation {
    pub fn new(key: impl Into<String>, contact: Contact) -> Self {
        Self {
            key: key.into(),
            contact,
            history: BTreeMap::new(),
            conference: None,
        }
    }

    pub fn add_call(&mut self, call: HistoryCallRecord) {
        self.history
            .entry(call.account_id.clone())
            .or_insert_with(|| HistoryEntry::new(call.account_id.clone()))
            .calls
            .push(call);
    }

    /// At most one live conference; a newer one replaces the old
    pub fn attach_conference(&mut self, conference: LiveConference) {
        self.conference = Some(conference);
    }

    pub fn call_count(&self) -> usize {
        self.history.values().map(|e| e.calls.len()).sum()
    }

    /// Most recent activity; an ongoing conference counts as `now`
    pub fn last_interaction(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.conference.is_some() {
            return Some(now);
        }
        self.history
            .values()
            .filter_map(HistoryEntry::last_interaction)
            .max()
    }

    pub fn last_number_used(&self, account_id: &str) -> Option<&str> {
        self.history.get(account_id)?.last_number_used()
    }

    pub fn find_call(&self, call_id: &str) -> Option<(&HistoryEntry, &HistoryCallRecord)> {
        self.history.values().find_map(|entry| {
            entry
                .calls
                .iter()
                .find(|c| c.call_id == call_id)
                .map(|c| (entry, c))
        })
    }
}
