//! Featured files
//!
//! A client-only highlight list with no provider-side equivalent. The set is
//! persisted as a JSON array of entries so the "shared highlights" view can
//! render without a provider call. Provider listings are joined against it at
//! read time; provider entries themselves are never modified.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::providers::{FileEntry, ProviderError, RemoteEntry};
use crate::store::{self, KeyValueStore, FEATURED_KEY};

pub struct FeaturedFiles {
    store: Arc<dyn KeyValueStore>,
    entries: Mutex<Vec<RemoteEntry>>,
}

impl FeaturedFiles {
    /// Load the persisted list from `store`
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, ProviderError> {
        let entries: Vec<RemoteEntry> = store::get_json(store.as_ref(), FEATURED_KEY)?.unwrap_or_default();
        debug!("Loaded {} featured file(s)", entries.len());
        Ok(Self {
            store,
            entries: Mutex::new(entries),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RemoteEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, entries: &[RemoteEntry]) -> Result<(), ProviderError> {
        store::set_json(self.store.as_ref(), FEATURED_KEY, entries)
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.lock().iter().any(|e| e.id == file_id)
    }

    pub fn entries(&self) -> Vec<RemoteEntry> {
        self.lock().clone()
    }

    pub fn ids(&self) -> HashSet<String> {
        self.lock().iter().map(|e| e.id.clone()).collect()
    }

    /// Flip the featured state of `entry`, returning the new state
    ///
    /// The in-memory list only changes once the store write succeeded.
    pub fn toggle(&self, entry: &RemoteEntry) -> Result<bool, ProviderError> {
        let mut entries = self.lock();
        let mut updated = entries.clone();
        let now_featured = match updated.iter().position(|e| e.id == entry.id) {
            Some(index) => {
                updated.remove(index);
                false
            }
            None => {
                updated.push(entry.clone());
                true
            }
        };
        self.persist(&updated)?;
        *entries = updated;
        Ok(now_featured)
    }

    /// Drop `file_id` if present (e.g. after the file was deleted)
    pub fn remove(&self, file_id: &str) -> Result<bool, ProviderError> {
        let mut entries = self.lock();
        if !entries.iter().any(|e| e.id == file_id) {
            return Ok(false);
        }
        let updated: Vec<RemoteEntry> = entries.iter().filter(|e| e.id != file_id).cloned().collect();
        self.persist(&updated)?;
        *entries = updated;
        Ok(true)
    }

    /// Join provider entries with the featured set
    pub fn join(&self, entries: &[RemoteEntry]) -> Vec<FileEntry> {
        let ids = self.ids();
        entries
            .iter()
            .map(|e| FileEntry::new(e.clone(), ids.contains(&e.id)))
            .collect()
    }
}
