//! Identity matching: turns partially keyed call records into contacts
//! and decides when two contacts denote the same party.

mod uri;

pub use uri::SipUri;

use std::collections::HashMap;
use tracing::{trace, warn};

use crate::error::Result;
use crate::model::{Contact, Phone};

/// Row returned by the system contact directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id: i64,
    pub display_name: String,
    pub photo_ref: Option<i64>,
}

/// System contact directory, queried by numeric id
pub trait Directory: Send + Sync {
    /// `Ok(None)` when the id is unknown or not positive
    fn lookup_by_id(&self, id: i64) -> Result<Option<DirectoryEntry>>;
}

/// Anything that names a peer: a history record or a live call leg
pub trait PeerRef {
    fn peer_number(&self) -> &str;
    fn contact_id(&self) -> i64;
}

impl PeerRef for crate::model::HistoryCallRecord {
    fn peer_number(&self) -> &str {
        &self.peer_number
    }

    fn contact_id(&self) -> i64 {
        self.contact_id
    }
}

impl PeerRef for crate::model::Participant {
    fn peer_number(&self) -> &str {
        &self.peer_number
    }

    fn contact_id(&self) -> i64 {
        self.contact_id
    }
}

/// Key for a contact known to the directory: `c:<hex id>`
pub fn contact_key(id: i64) -> String {
    format!("c:{:x}", id)
}

/// Same party if both ids are known and equal. Two different asserted
/// ids never match, resolved or not; otherwise fall back to raw number
/// containment.
pub fn same_contact(existing: &Contact, candidate: &Contact, peer_number: &str) -> bool {
    if existing.is_known() && candidate.is_known() {
        return existing.id == candidate.id;
    }
    compatible(existing, candidate) && existing.has_number(peer_number)
}

/// False only when both contacts assert different positive ids
pub fn compatible(existing: &Contact, candidate: &Contact) -> bool {
    match (existing.asserted_id(), candidate.asserted_id()) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Resolves records to contacts, memoising directory answers for the
/// lifetime of one build.
pub struct ContactResolver<'a> {
    directory: &'a dyn Directory,
    cache: Option<HashMap<i64, Option<DirectoryEntry>>>,
}

impl<'a> ContactResolver<'a> {
    pub fn new(directory: &'a dyn Directory, cache_lookups: bool) -> Self {
        Self {
            directory,
            cache: cache_lookups.then(HashMap::new),
        }
    }

    fn lookup(&mut self, id: i64) -> Option<DirectoryEntry> {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(&id)) {
            return cached.clone();
        }
        let found = match self.directory.lookup_by_id(id) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(contact_id = id, error = %e, "directory lookup failed");
                None
            }
        };
        if let Some(cache) = self.cache.as_mut() {
            cache.insert(id, found.clone());
        }
        found
    }

    /// Directory contact when the id resolves, otherwise an unknown contact
    /// carrying only the peer number.
    pub fn resolve(&mut self, peer: &dyn PeerRef) -> Contact {
        let id = peer.contact_id();
        if id > 0 {
            if let Some(entry) = self.lookup(id) {
                return Contact {
                    id: entry.id,
                    display_name: Some(entry.display_name),
                    photo_ref: entry.photo_ref,
                    phones: vec![Phone::new(peer.peer_number())],
                    unresolved_id: None,
                };
            }
            trace!(contact_id = id, "no directory entry, using number");
            return Contact {
                unresolved_id: Some(id),
                ..Contact::unknown(peer.peer_number())
            };
        }
        Contact::unknown(peer.peer_number())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::CallbookError;
    use crate::model::{Participant, UNKNOWN_ID};
    use std::sync::Mutex;

    /// In-memory directory shared by the crate's unit tests
    #[derive(Default)]
    pub struct FakeDirectory {
        pub entries: HashMap<i64, DirectoryEntry>,
        pub failing: Vec<i64>,
        pub calls: Mutex<usize>,
    }

    impl FakeDirectory {
        pub fn with(entries: &[(i64, &str)]) -> Self {
            Self {
                entries: entries
                    .iter()
                    .map(|(id, name)| {
                        (
                            *id,
                            DirectoryEntry {
                                id: *id,
                                display_name: name.to_string(),
                                photo_ref: None,
                            },
                        )
                    })
                    .collect(),
                ..Self::default()
            }
        }
    }

    impl Directory for FakeDirectory {
        fn lookup_by_id(&self, id: i64) -> Result<Option<DirectoryEntry>> {
            *self.calls.lock().unwrap() += 1;
            if self.failing.contains(&id) {
                return Err(CallbookError::Worker("directory offline".to_string()));
            }
            Ok(self.entries.get(&id).cloned())
        }
    }

    fn leg(number: &str, contact_id: i64) -> Participant {
        Participant {
            call_id: "call-1".to_string(),
            account_id: "acc".to_string(),
            peer_number: number.to_string(),
            contact_id,
        }
    }

    #[test]
    fn test_contact_key_is_hex() {
        assert_eq!(contact_key(42), "c:2a");
        assert_eq!(contact_key(255), "c:ff");
    }

    #[test]
    fn test_resolve_known_contact() {
        let dir = FakeDirectory::with(&[(42, "Bob")]);
        let mut resolver = ContactResolver::new(&dir, true);
        let contact = resolver.resolve(&leg("+15550001", 42));
        assert_eq!(contact.id, 42);
        assert_eq!(contact.display_name(), "Bob");
        assert!(contact.has_number("+15550001"));
    }

    #[test]
    fn test_resolve_miss_and_unknown_fall_back_to_number() {
        let dir = FakeDirectory::with(&[]);
        let mut resolver = ContactResolver::new(&dir, true);

        let missing = resolver.resolve(&leg("+15550002", 7));
        assert_eq!(missing.id, UNKNOWN_ID);
        assert_eq!(missing.display_name(), "+15550002");
        assert_eq!(missing.unresolved_id, Some(7));

        let unknown = resolver.resolve(&leg("+15550003", UNKNOWN_ID));
        assert!(!unknown.is_known());
        assert_eq!(unknown.asserted_id(), None);
        assert_eq!(*dir.calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_directory_errors_are_absorbed() {
        let mut dir = FakeDirectory::with(&[(9, "Eve")]);
        dir.failing.push(9);
        let mut resolver = ContactResolver::new(&dir, false);
        let contact = resolver.resolve(&leg("sip:eve@example.com", 9));
        assert!(!contact.is_known());
    }

    #[test]
    fn test_lookups_are_cached_per_resolver() {
        let dir = FakeDirectory::with(&[(42, "Bob")]);
        let mut resolver = ContactResolver::new(&dir, true);
        resolver.resolve(&leg("+1", 42));
        resolver.resolve(&leg("+2", 42));
        assert_eq!(*dir.calls.lock().unwrap(), 1);

        let mut resolver = ContactResolver::new(&dir, false);
        resolver.resolve(&leg("+1", 42));
        resolver.resolve(&leg("+2", 42));
        assert_eq!(*dir.calls.lock().unwrap(), 3);
    }

    #[test]
    fn test_same_contact_rules() {
        let bob = Contact {
            id: 42,
            display_name: Some("Bob".into()),
            photo_ref: None,
            phones: vec![Phone::new("+15550001")],
            unresolved_id: None,
        };
        let other = Contact {
            id: 43,
            ..bob.clone()
        };
        let anon = Contact::unknown("+15550001");

        assert!(same_contact(&bob, &bob.clone(), "+15550001"));
        assert!(!same_contact(&bob, &other, "+15550001"));
        assert!(same_contact(&bob, &anon, "+15550001"));
        assert!(same_contact(&anon, &bob, "+15550001"));
        assert!(!same_contact(&anon, &Contact::unknown("+1999"), "+1999"));

        let claims_seven = Contact {
            unresolved_id: Some(7),
            ..Contact::unknown("+15550001")
        };
        assert!(!same_contact(&bob, &claims_seven, "+15550001"));
        assert!(!same_contact(&claims_seven, &bob, "+15550001"));
        assert!(same_contact(&claims_seven, &anon, "+15550001"));
        assert!(same_contact(&claims_seven, &claims_seven.clone(), "+15550001"));
    }

    #[test]
    fn test_contact_ids_order() {
        let mut contact = Contact::unknown("Alice <sip:alice@example.com>");
        contact.id = 10;
        contact.add_phone("+15550009");
        assert_eq!(
            contact.ids(),
            vec![
                "c:a".to_string(),
                "alice@example.com".to_string(),
                "Alice <sip:alice@example.com>".to_string(),
                "+15550009".to_string(),
            ]
        );
    }
}
