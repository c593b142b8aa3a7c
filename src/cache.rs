//! Listing cache
//!
//! Maps (folder id, page cursor) to a previously fetched listing page. Entries
//! expire after a fixed window and are never served stale. There is no size
//! bound: the cache lives for one browsing session only.
//!
//! Concurrent misses on the same key are not coalesced; both callers fetch
//! and the last `put` wins.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::providers::ListPage;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    folder_id: String,
    /// `None` is the first page
    cursor: Option<String>,
}

impl CacheKey {
    fn new(folder_id: &str, cursor: Option<&str>) -> Self {
        Self {
            folder_id: folder_id.to_string(),
            cursor: cursor.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedPage {
    page: ListPage,
    fetched_at: Instant,
}

pub struct ListingCache {
    ttl: Duration,
    pages: Mutex<HashMap<CacheKey, CachedPage>>,
}

impl ListingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pages: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CachedPage>> {
        self.pages.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached page for the key, if present and younger than the TTL
    pub fn get(&self, folder_id: &str, cursor: Option<&str>) -> Option<ListPage> {
        let key = CacheKey::new(folder_id, cursor);
        let mut pages = self.lock();

        let expired = match pages.get(&key) {
            None => return None,
            Some(cached) => cached.fetched_at.elapsed() >= self.ttl,
        };
        if expired {
            debug!("Cache entry for {} ({:?}) expired", folder_id, cursor);
            pages.remove(&key);
            return None;
        }
        pages.get(&key).map(|cached| cached.page.clone())
    }

    pub fn put(&self, folder_id: &str, cursor: Option<&str>, page: ListPage) {
        self.lock().insert(
            CacheKey::new(folder_id, cursor),
            CachedPage {
                page,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Drop every page of `folder_id`, returning how many were removed
    pub fn invalidate(&self, folder_id: &str) -> usize {
        let mut pages = self.lock();
        let before = pages.len();
        pages.retain(|key, _| key.folder_id != folder_id);
        let removed = before - pages.len();
        if removed > 0 {
            debug!("Invalidated {} cached page(s) of {}", removed, folder_id);
        }
        removed
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ListingCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
