//! Call storage with SQLite
//!
//! Backs the history store, the contact directory and the live-conference
//! registry the resolver reads from.

mod schema;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{CallbookError, Result};
use crate::identity::{Directory, DirectoryEntry};
use crate::model::{HistoryCallRecord, LiveConference, Participant};
use crate::resolver::{ConferenceRegistry, HistoryStore};

pub use schema::SCHEMA;

pub struct CallStore {
    conn: Mutex<Connection>,
}

fn to_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn from_text(ts: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(ts)?.with_timezone(&Utc))
}

impl CallStore {
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CallbookError::LockPoisoned("call store connection"))
    }

    /// Changes whenever another connection commits to the database
    pub fn data_version(&self) -> Result<i64> {
        let version = self
            .conn()?
            .query_row("PRAGMA data_version", [], |row| row.get(0))?;
        Ok(version)
    }

    // ============================================
    // DIRECTORY
    // ============================================

    pub fn upsert_contact(&self, entry: &DirectoryEntry) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO contacts (id, display_name, photo_ref) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET display_name = ?2, photo_ref = ?3",
            params![entry.id, entry.display_name, entry.photo_ref],
        )?;
        Ok(())
    }

    // ============================================
    // HISTORY
    // ============================================

    pub fn insert_call(&self, call: &HistoryCallRecord) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO history_calls
                (call_id, account_id, peer_number, contact_id, call_start, call_end, incoming, missed)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                call.call_id,
                call.account_id,
                call.peer_number,
                call.contact_id,
                to_text(&call.call_start),
                to_text(&call.call_end),
                call.incoming,
                call.missed,
            ],
        )?;
        Ok(())
    }

    // ============================================
    // LIVE CONFERENCES
    // ============================================

    pub fn start_conference(&self, id: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO live_conferences (id, started_at) VALUES (?, ?)",
            params![id, to_text(&Utc::now())],
        )?;
        Ok(())
    }

    /// Appends a call leg; the first leg added is the primary one
    pub fn add_participant(&self, conference_id: &str, participant: &Participant) -> Result<()> {
        let conn = self.conn()?;
        let position: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conference_participants WHERE conference_id = ?",
            params![conference_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO conference_participants
                (conference_id, position, call_id, account_id, peer_number, contact_id)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                conference_id,
                position,
                participant.call_id,
                participant.account_id,
                participant.peer_number,
                participant.contact_id,
            ],
        )?;
        Ok(())
    }

    /// Returns false when no such conference was live
    pub fn end_conference(&self, id: &str) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM live_conferences WHERE id = ?", params![id])?;
        Ok(removed > 0)
    }
}

impl Directory for CallStore {
    fn lookup_by_id(&self, id: i64) -> Result<Option<DirectoryEntry>> {
        if id <= 0 {
            return Ok(None);
        }
        let entry = self
            .conn()?
            .query_row(
                "SELECT id, display_name, photo_ref FROM contacts WHERE id = ?",
                params![id],
                |row| {
                    Ok(DirectoryEntry {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        photo_ref: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }
}

impl HistoryStore for CallStore {
    fn all_calls(&self) -> Result<Vec<HistoryCallRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT call_id, account_id, peer_number, contact_id, call_start, call_end, incoming, missed
             FROM history_calls
             ORDER BY call_start ASC, seq ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, bool>(6)?,
                row.get::<_, bool>(7)?,
            ))
        })?;

        let mut calls = vec![];
        for row in rows {
            let (call_id, account_id, peer_number, contact_id, start, end, incoming, missed) = row?;
            calls.push(HistoryCallRecord {
                call_id,
                account_id,
                peer_number,
                contact_id,
                call_start: from_text(&start)?,
                call_end: from_text(&end)?,
                incoming,
                missed,
            });
        }
        Ok(calls)
    }
}

impl ConferenceRegistry for CallStore {
    fn conferences(&self) -> Result<BTreeMap<String, LiveConference>> {
        let conn = self.conn()?;
        let mut conferences: BTreeMap<String, LiveConference> = BTreeMap::new();

        let mut stmt = conn.prepare("SELECT id FROM live_conferences")?;
        let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for id in ids {
            let id = id?;
            conferences.insert(
                id.clone(),
                LiveConference {
                    id,
                    participants: vec![],
                },
            );
        }

        let mut stmt = conn.prepare(
            "SELECT conference_id, call_id, account_id, peer_number, contact_id
             FROM conference_participants
             ORDER BY conference_id, position",
        )?;
        let legs = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Participant {
                    call_id: row.get(1)?,
                    account_id: row.get(2)?,
                    peer_number: row.get(3)?,
                    contact_id: row.get(4)?,
                },
            ))
        })?;
        for leg in legs {
            let (conference_id, participant) = leg?;
            if let Some(conference) = conferences.get_mut(&conference_id) {
                conference.participants.push(participant);
            }
        }

        Ok(conferences)
    }
}
