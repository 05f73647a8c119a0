use anyhow::{bail, Result};

use crate::identity::DirectoryEntry;
use crate::store::CallStore;

pub fn add(store: &CallStore, id: i64, name: String, photo: Option<i64>) -> Result<()> {
    if id <= 0 {
        bail!("Directory ids must be positive, got {}", id);
    }
    store.upsert_contact(&DirectoryEntry {
        id,
        display_name: name.clone(),
        photo_ref: photo,
    })?;
    println!("Contact '{}' saved with id {} (key c:{:x})", name, id, id);
    Ok(())
}
