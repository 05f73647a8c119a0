//! Insertion-ordered conversation map produced by one build

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::model::{Contact, Conversation, HistoryCallRecord, HistoryEntry, LiveConference};

/// Conversations keyed by canonical key, iterated in creation order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationSet {
    conversations: Vec<Conversation>,
    index: HashMap<String, usize>,
}

impl ConversationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.conversations.iter().map(|c| c.key.as_str())
    }

    pub fn get(&self, key: &str) -> Option<&Conversation> {
        self.index.get(key).map(|&i| &self.conversations[i])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// First conversation filed under any of the contact's keys
    pub fn by_contact(&self, contact: &Contact) -> Option<&Conversation> {
        contact.ids().iter().find_map(|k| self.get(k))
    }

    /// Live conference by conference id or by any participant call id
    pub fn conference(&self, id: &str) -> Option<&LiveConference> {
        self.by_call_id(id).and_then(|c| c.conference.as_ref())
    }

    pub fn by_call_id(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| {
            c.conference
                .as_ref()
                .map_or(false, |conf| conf.id == id || conf.has_call(id))
        })
    }

    pub fn find_history_by_call_id(
        &self,
        call_id: &str,
    ) -> Option<(&HistoryEntry, &HistoryCallRecord)> {
        self.conversations.iter().find_map(|c| c.find_call(call_id))
    }

    /// Most recently active first
    pub fn sorted_by_last_interaction(&self, now: DateTime<Utc>) -> Vec<&Conversation> {
        let mut sorted: Vec<&Conversation> = self.conversations.iter().collect();
        sorted.sort_by(|a, b| b.last_interaction(now).cmp(&a.last_interaction(now)));
        sorted
    }

    pub fn into_vec(self) -> Vec<Conversation> {
        self.conversations
    }

    pub(super) fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub(super) fn position_where(&self, pred: impl Fn(&Conversation) -> bool) -> Option<usize> {
        self.conversations.iter().position(pred)
    }

    /// Conversation whose contact used an address reducing to `canonical`,
    /// even when it is filed under another key
    pub(super) fn position_by_address(&self, canonical: &str) -> Option<usize> {
        self.position(canonical)
            .or_else(|| self.position_where(|c| c.contact.has_address(canonical)))
    }

    pub(super) fn at(&self, index: usize) -> &Conversation {
        &self.conversations[index]
    }

    pub(super) fn at_mut(&mut self, index: usize) -> &mut Conversation {
        &mut self.conversations[index]
    }

    /// Caller guarantees the key is not already present
    pub(super) fn insert(&mut self, conversation: Conversation) -> usize {
        let index = self.conversations.len();
        self.index.insert(conversation.key.clone(), index);
        self.conversations.push(conversation);
        index
    }

    /// Moves the conversation at `index` under `new_key`. When another
    /// conversation already owns that key the two are folded into it.
    /// Returns the index that now holds the conversation.
    pub(super) fn rekey(&mut self, index: usize, new_key: String) -> usize {
        if self.conversations[index].key == new_key {
            return index;
        }
        match self.index.get(&new_key).copied() {
            Some(target) => {
                let source = self.conversations.remove(index);
                let target = if target > index { target - 1 } else { target };
                fold_into(&mut self.conversations[target], source);
                self.reindex();
                target
            }
            None => {
                let old_key = std::mem::replace(&mut self.conversations[index].key, new_key.clone());
                self.index.remove(&old_key);
                self.index.insert(new_key, index);
                index
            }
        }
    }

    fn reindex(&mut self) {
        self.index = self
            .conversations
            .iter()
            .enumerate()
            .map(|(i, c)| (c.key.clone(), i))
            .collect();
    }
}

fn fold_into(target: &mut Conversation, source: Conversation) {
    for phone in &source.contact.phones {
        target.contact.add_phone(&phone.number);
    }
    for (_, entry) in source.history {
        for call in entry.calls {
            target.add_call(call);
        }
    }
    for entry in target.history.values_mut() {
        entry.calls.sort_by_key(|c| c.call_start);
    }
    if target.conference.is_none() {
        target.conference = source.conference;
    }
}

impl<'a> IntoIterator for &'a ConversationSet {
    type Item = &'a Conversation;
    type IntoIter = std::slice::Iter<'a, Conversation>;

    fn into_iter(self) -> Self::IntoIter {
        self.conversations.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Participant;
    use chrono::TimeZone;

    fn call(id: &str, account: &str, number: &str, minute: u32) -> HistoryCallRecord {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap();
        HistoryCallRecord {
            call_id: id.to_string(),
            account_id: account.to_string(),
            peer_number: number.to_string(),
            contact_id: -1,
            call_start: start,
            call_end: start + chrono::Duration::seconds(30),
            incoming: true,
            missed: false,
        }
    }

    fn conversation(key: &str, number: &str) -> Conversation {
        Conversation::new(key, Contact::unknown(number))
    }

    #[test]
    fn test_rekey_moves_index() {
        let mut set = ConversationSet::new();
        let i = set.insert(conversation("+1555", "+1555"));
        let j = set.rekey(i, "c:2a".to_string());
        assert_eq!(i, j);
        assert!(set.get("+1555").is_none());
        assert_eq!(set.get("c:2a").unwrap().key, "c:2a");
    }

    #[test]
    fn test_rekey_collision_folds_histories() {
        let mut set = ConversationSet::new();
        let mut a = conversation("+1555", "+1555");
        a.add_call(call("a1", "acc", "+1555", 5));
        let mut b = conversation("c:2a", "+1666");
        b.add_call(call("b1", "acc", "+1666", 1));
        let ia = set.insert(a);
        set.insert(b);

        let idx = set.rekey(ia, "c:2a".to_string());
        assert_eq!(set.len(), 1);
        assert_eq!(idx, 0);
        let merged = set.get("c:2a").unwrap();
        assert_eq!(merged.call_count(), 2);
        assert!(merged.contact.has_number("+1555"));
        let ids: Vec<_> = merged.history["acc"].calls.iter().map(|c| c.call_id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "a1"]);
    }

    #[test]
    fn test_queries_by_call_and_conference() {
        let mut set = ConversationSet::new();
        let mut a = conversation("+1555", "+1555");
        a.add_call(call("hist-1", "acc", "+1555", 0));
        a.attach_conference(LiveConference {
            id: "conf-9".to_string(),
            participants: vec![Participant {
                call_id: "live-1".to_string(),
                account_id: "acc".to_string(),
                peer_number: "+1555".to_string(),
                contact_id: -1,
            }],
        });
        set.insert(a);
        set.insert(conversation("+1666", "+1666"));

        assert_eq!(set.conference("conf-9").unwrap().id, "conf-9");
        assert_eq!(set.by_call_id("live-1").unwrap().key, "+1555");
        assert!(set.conference("nope").is_none());
        let (entry, found) = set.find_history_by_call_id("hist-1").unwrap();
        assert_eq!(entry.account_id, "acc");
        assert_eq!(found.peer_number, "+1555");
        assert_eq!(set.by_contact(&Contact::unknown("+1666")).unwrap().key, "+1666");
    }

    #[test]
    fn test_address_lookup_survives_rekey() {
        let mut set = ConversationSet::new();
        let i = set.insert(conversation("alice@example.com", "sip:alice@example.com"));
        set.rekey(i, "c:2a".to_string());

        assert_eq!(set.position("alice@example.com"), None);
        assert_eq!(set.position_by_address("alice@example.com"), Some(0));
        assert_eq!(set.position_by_address("bob@example.com"), None);
    }

    #[test]
    fn test_sorted_by_last_interaction() {
        let mut set = ConversationSet::new();
        let mut old = conversation("old", "old");
        old.add_call(call("o", "acc", "old", 1));
        let mut new = conversation("new", "new");
        new.add_call(call("n", "acc", "new", 30));
        set.insert(old);
        set.insert(new);
        set.insert(conversation("empty", "empty"));

        let now = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let keys: Vec<_> = set
            .sorted_by_last_interaction(now)
            .into_iter()
            .map(|c| c.key.as_str())
            .collect();
        assert_eq!(keys, vec!["new", "old", "empty"]);
    }
}
