//! Conversation resolver
//!
//! Groups history calls and live conferences into one conversation per
//! party. History is processed first, in store order, so earlier records
//! decide which conversation later ones are matched against; conferences
//! are attached afterwards against the populated set.
//!
//! Key precedence when a record opens a new conversation:
//! - `c:<hex id>` for contacts known to the directory
//! - `user@host` for structured SIP addresses
//! - the raw peer number otherwise

mod set;

pub use set::ConversationSet;

use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, trace};

use crate::config::ResolverConfig;
use crate::error::Result;
use crate::identity::{self, ContactResolver, Directory, SipUri};
use crate::model::{Contact, Conversation, HistoryCallRecord, LiveConference};

/// Persistent call history
pub trait HistoryStore: Send + Sync {
    /// All records, ordered by start time ascending
    fn all_calls(&self) -> Result<Vec<HistoryCallRecord>>;
}

/// Currently active conferences, keyed by conference id
pub trait ConferenceRegistry: Send + Sync {
    fn conferences(&self) -> Result<BTreeMap<String, LiveConference>>;
}

pub struct ConversationResolver<'a> {
    directory: &'a dyn Directory,
    config: ResolverConfig,
}

impl<'a> ConversationResolver<'a> {
    pub fn new(directory: &'a dyn Directory, config: ResolverConfig) -> Self {
        Self { directory, config }
    }

    /// Reads both collaborators then builds. A read failure aborts the
    /// whole build; nothing partial is returned.
    pub fn load_and_build(
        &self,
        history: &dyn HistoryStore,
        registry: &dyn ConferenceRegistry,
    ) -> Result<ConversationSet> {
        let calls = history.all_calls()?;
        let conferences = registry.conferences()?;
        Ok(self.build(calls, conferences))
    }

    pub fn build(
        &self,
        calls: Vec<HistoryCallRecord>,
        conferences: BTreeMap<String, LiveConference>,
    ) -> ConversationSet {
        let started = Instant::now();
        let call_count = calls.len();
        let conference_count = conferences.len();

        let mut contacts = ContactResolver::new(self.directory, self.config.cache_directory_lookups);
        let mut set = ConversationSet::new();

        for call in calls {
            let contact = contacts.resolve(&call);
            self.place_call(&mut set, contact, call);
        }

        for (conf_id, conference) in conferences {
            let Some(primary) = conference.primary() else {
                trace!(conference = %conf_id, "conference without participants");
                continue;
            };
            let contact = contacts.resolve(primary);
            self.place_conference(&mut set, contact, conference);
        }

        info!(
            calls = call_count,
            conferences = conference_count,
            conversations = set.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "conversations resolved"
        );
        set
    }

    fn place_call(&self, set: &mut ConversationSet, contact: Contact, call: HistoryCallRecord) {
        let claim = contact.unresolved_id;

        // First match wins, in creation order
        if let Some(index) =
            set.position_where(|c| identity::same_contact(&c.contact, &contact, &call.peer_number))
        {
            let index = if !set.at(index).contact.is_known() && contact.is_known() {
                upgrade_contact(set, index, contact)
            } else {
                index
            };
            debug!(key = %set.at(index).key, number = %call.peer_number, "joined existing conversation");
            merge_call(set, index, call, claim);
            return;
        }

        if contact.is_known() {
            let key = identity::contact_key(contact.id);
            match set.position(&key) {
                Some(index) => merge_call(set, index, call, None),
                None => open_conversation(set, key, contact, call),
            }
            return;
        }

        let uri = SipUri::parse(&call.peer_number);
        let canonical = uri.canonical_key().filter(|_| self.config.canonical_uri_keys);
        let (key, found) = match &canonical {
            // The address may already live under an upgraded `c:` key
            Some(key) => (key.clone(), set.position_by_address(key)),
            None => (call.peer_number.clone(), set.position(&call.peer_number)),
        };

        match found {
            Some(index) if identity::compatible(&set.at(index).contact, &contact) => {
                if canonical.is_some() {
                    backfill_display_name(set.at_mut(index), &uri);
                }
                merge_call(set, index, call, claim);
            }
            Some(_) => {
                // Held by a party asserting another id
                let key = claim.map(identity::contact_key).unwrap_or(key);
                debug!(key = %key, number = %call.peer_number, "address claimed by another id");
                match set.position(&key) {
                    Some(index) => merge_call(set, index, call, claim),
                    None => open_conversation(set, key, contact, call),
                }
            }
            None => {
                let mut contact = contact;
                if canonical.is_some() {
                    contact.display_name = uri.display_name;
                }
                open_conversation(set, key, contact, call);
            }
        }
    }

    fn place_conference(&self, set: &mut ConversationSet, contact: Contact, conference: LiveConference) {
        let candidates = self.candidate_keys(&contact);
        let found = {
            let view: &ConversationSet = set;
            let fits = |index: &usize| identity::compatible(&view.at(*index).contact, &contact);
            let by_key = candidates.iter().find_map(|k| view.position(k).filter(fits));
            match by_key {
                Some(index) => Some(index),
                None if self.config.canonical_uri_keys => contact
                    .phones
                    .iter()
                    .filter_map(|p| p.uri.canonical_key())
                    .find_map(|k| view.position_by_address(&k).filter(fits)),
                None => None,
            }
        };

        let index = match found {
            Some(index) => index,
            None => {
                // ids() always yields at least the raw number
                let mut key = candidates.into_iter().next().unwrap_or_default();
                if set.contains_key(&key) {
                    if let Some(id) = contact.unresolved_id {
                        key = identity::contact_key(id);
                    }
                }
                match set.position(&key) {
                    Some(index) => index,
                    None => {
                        debug!(key = %key, conference = %conference.id, "conference opened conversation");
                        set.insert(Conversation::new(key, contact))
                    }
                }
            }
        };

        let conversation = set.at_mut(index);
        debug!(key = %conversation.key, conference = %conference.id, "attached conference");
        conversation.attach_conference(conference);
    }

    fn candidate_keys(&self, contact: &Contact) -> Vec<String> {
        let keys = contact.ids();
        if self.config.canonical_uri_keys {
            return keys;
        }
        let canonical: Vec<String> = contact
            .phones
            .iter()
            .filter_map(|p| p.uri.canonical_key())
            .filter(|k| !contact.has_number(k))
            .collect();
        keys.into_iter().filter(|k| !canonical.contains(k)).collect()
    }
}

fn open_conversation(set: &mut ConversationSet, key: String, contact: Contact, call: HistoryCallRecord) {
    trace!(key = %key, "new conversation");
    let mut conversation = Conversation::new(key, contact);
    conversation.add_call(call);
    set.insert(conversation);
}

/// Adds the call and its number; an unknown contact also takes over any
/// unresolved id the record asserted.
fn merge_call(set: &mut ConversationSet, index: usize, call: HistoryCallRecord, claim: Option<i64>) {
    let conversation = set.at_mut(index);
    if !conversation.contact.is_known() && conversation.contact.unresolved_id.is_none() {
        conversation.contact.unresolved_id = claim;
    }
    conversation.contact.add_phone(&call.peer_number);
    conversation.add_call(call);
}

/// Swap an unknown contact for a directory one and refile under its id key
fn upgrade_contact(set: &mut ConversationSet, index: usize, mut contact: Contact) -> usize {
    let conversation = set.at_mut(index);
    for phone in &conversation.contact.phones {
        contact.add_phone(&phone.number);
    }
    let key = identity::contact_key(contact.id);
    debug!(from = %conversation.key, to = %key, "contact upgraded");
    conversation.contact = contact;
    set.rekey(index, key)
}

/// Only fills an empty stored name; never overwrites one
fn backfill_display_name(conversation: &mut Conversation, uri: &SipUri) {
    if conversation.contact.is_known() || conversation.contact.has_stored_name() {
        return;
    }
    if let Some(name) = uri.display_name.as_ref().filter(|n| !n.is_empty()) {
        conversation.contact.display_name = Some(name.clone());
    }
}
