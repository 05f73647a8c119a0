use anyhow::Result;

use crate::model::{Participant, UNKNOWN_ID};
use crate::store::CallStore;

pub struct LegArgs {
    pub call_id: String,
    pub account: String,
    pub peer: String,
    pub contact_id: Option<i64>,
}

impl LegArgs {
    fn into_participant(self) -> Participant {
        Participant {
            call_id: self.call_id,
            account_id: self.account,
            peer_number: self.peer,
            contact_id: self.contact_id.unwrap_or(UNKNOWN_ID),
        }
    }
}

/// Start a conference with its primary leg
pub fn start(store: &CallStore, conference_id: &str, leg: LegArgs) -> Result<()> {
    store.start_conference(conference_id)?;
    store.add_participant(conference_id, &leg.into_participant())?;
    println!("Conference '{}' started", conference_id);
    Ok(())
}

pub fn join(store: &CallStore, conference_id: &str, leg: LegArgs) -> Result<()> {
    let call_id = leg.call_id.clone();
    store.add_participant(conference_id, &leg.into_participant())?;
    println!("Call '{}' joined conference '{}'", call_id, conference_id);
    Ok(())
}

pub fn end(store: &CallStore, conference_id: &str) -> Result<()> {
    if store.end_conference(conference_id)? {
        println!("Conference '{}' ended", conference_id);
    } else {
        println!("Conference '{}' not found.", conference_id);
    }
    Ok(())
}
