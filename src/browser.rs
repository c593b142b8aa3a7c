//! File browser state
//!
//! Tracks the current folder, its breadcrumb path and the loaded listing
//! pages, and sequences the mutation operations. Listings go through the
//! [`ListingCache`]; every successful mutation invalidates the affected
//! folder and re-lists the current one.
//!
//! Navigation is guarded by a busy flag: a `list_files` or `load_more_files`
//! call made while another listing is in flight is dropped (not queued) and
//! reports [`ListOutcome::Skipped`].

use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::ListingCache;
use crate::featured::FeaturedFiles;
use crate::notice::Notifier;
use crate::providers::{
    Breadcrumb, FileEntry, ListPage, ListRequest, ProviderError, RemoteEntry, SharePermission,
    StorageInfo, StorageProvider, ROOT_FOLDER_ID,
};
use crate::session::SessionManager;

/// Upper bound on parent lookups when rebuilding a breadcrumb path
const MAX_BREADCRUMB_DEPTH: usize = 64;

/// How a listing request was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOutcome {
    /// Fetched from the provider
    Fetched,
    /// Served from the listing cache
    Cached,
    /// Dropped: another listing was in flight, or there was nothing to load
    Skipped,
}

/// Read-only view of the browser for front ends
#[derive(Debug, Clone, Serialize)]
pub struct BrowserSnapshot {
    pub folder_id: String,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub files: Vec<FileEntry>,
    pub has_more: bool,
    pub loading: bool,
}

#[derive(Debug, Clone)]
struct BrowserState {
    folder_id: String,
    breadcrumbs: Vec<Breadcrumb>,
    entries: Vec<RemoteEntry>,
    next_cursor: Option<String>,
}

impl Default for BrowserState {
    fn default() -> Self {
        Self {
            folder_id: ROOT_FOLDER_ID.to_string(),
            breadcrumbs: vec![Breadcrumb::root()],
            entries: Vec::new(),
            next_cursor: None,
        }
    }
}

/// Clears a flag when dropped
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Counts a mutation as in flight until dropped
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn start(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct FileBrowser {
    provider: Arc<dyn StorageProvider>,
    session: Arc<SessionManager>,
    cache: Arc<ListingCache>,
    featured: Arc<FeaturedFiles>,
    notifier: Notifier,
    page_size: u32,
    state: RwLock<BrowserState>,
    busy: AtomicBool,
    mutations: AtomicUsize,
    /// Provider id behind the `root` alias, once seen
    root_id: Mutex<Option<String>>,
}

impl FileBrowser {
    pub fn new(
        provider: Arc<dyn StorageProvider>,
        session: Arc<SessionManager>,
        cache: Arc<ListingCache>,
        featured: Arc<FeaturedFiles>,
        notifier: Notifier,
        page_size: u32,
    ) -> Self {
        Self {
            provider,
            session,
            cache,
            featured,
            notifier,
            page_size,
            state: RwLock::new(BrowserState::default()),
            busy: AtomicBool::new(false),
            mutations: AtomicUsize::new(0),
            root_id: Mutex::new(None),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_mutating(&self) -> bool {
        self.mutations.load(Ordering::SeqCst) > 0
    }

    pub async fn current_folder(&self) -> String {
        self.state.read().await.folder_id.clone()
    }

    /// Current state joined with the featured set
    pub async fn snapshot(&self) -> BrowserSnapshot {
        let state = self.state.read().await;
        BrowserSnapshot {
            folder_id: state.folder_id.clone(),
            breadcrumbs: state.breadcrumbs.clone(),
            files: self.featured.join(&state.entries),
            has_more: state.next_cursor.is_some(),
            loading: self.is_loading(),
        }
    }

    /// Forget all folder state and cached pages (used on sign-out)
    pub async fn reset(&self) {
        *self.state.write().await = BrowserState::default();
        *self.root_id.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.cache.clear();
    }

    /// Show `folder_id`, replacing the current listing
    ///
    /// With `cursor` set, that page is shown instead of the first one. The
    /// breadcrumb path is rebuilt after the listing resolves, and only when
    /// the folder differs from the previous one.
    pub async fn list_files(&self, folder_id: &str, cursor: Option<&str>) -> Result<ListOutcome, ProviderError> {
        self.session.require_linked()?;
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            debug!("Listing of {} dropped, another listing is in flight", folder_id);
            return Ok(ListOutcome::Skipped);
        };

        let (page, outcome) = match self.fetch_page(folder_id, cursor).await {
            Ok(result) => result,
            Err(e) => return Err(self.fail("Could not load folder", e).await),
        };

        if folder_id == ROOT_FOLDER_ID {
            if let Some(parent) = page.entries.iter().find_map(|e| e.parent.as_deref()) {
                self.learn_root_id(parent);
            }
        }

        let previous = self.state.read().await.folder_id.clone();
        let breadcrumbs = if previous != folder_id {
            Some(self.build_breadcrumbs(folder_id).await)
        } else {
            None
        };

        let mut state = self.state.write().await;
        state.folder_id = folder_id.to_string();
        state.entries = page.entries;
        state.next_cursor = page.next_cursor;
        if let Some(breadcrumbs) = breadcrumbs {
            state.breadcrumbs = breadcrumbs;
        }

        Ok(outcome)
    }

    /// Append the next page of the current folder
    ///
    /// No-op unless a next cursor exists and no listing is in flight.
    pub async fn load_more_files(&self) -> Result<ListOutcome, ProviderError> {
        self.session.require_linked()?;
        let (folder_id, cursor) = {
            let state = self.state.read().await;
            match state.next_cursor {
                Some(ref cursor) => (state.folder_id.clone(), cursor.clone()),
                None => return Ok(ListOutcome::Skipped),
            }
        };
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            return Ok(ListOutcome::Skipped);
        };

        let (page, outcome) = match self.fetch_page(&folder_id, Some(&cursor)).await {
            Ok(result) => result,
            Err(e) => return Err(self.fail("Could not load more files", e).await),
        };

        let mut state = self.state.write().await;
        if state.folder_id != folder_id {
            return Ok(ListOutcome::Skipped);
        }
        state.entries.extend(page.entries);
        state.next_cursor = page.next_cursor;

        Ok(outcome)
    }

    /// List the parent of the current folder (no-op at the root)
    pub async fn navigate_up(&self) -> Result<ListOutcome, ProviderError> {
        let parent = {
            let state = self.state.read().await;
            let len = state.breadcrumbs.len();
            if len < 2 {
                return Ok(ListOutcome::Skipped);
            }
            state.breadcrumbs[len - 2].id.clone()
        };
        self.list_files(&parent, None).await
    }

    /// Drop the cached pages of the current folder and list it again
    pub async fn refresh(&self) -> Result<ListOutcome, ProviderError> {
        let folder_id = self.current_folder().await;
        self.cache.invalidate(&folder_id);
        self.list_files(&folder_id, None).await
    }

    async fn fetch_page(&self, folder_id: &str, cursor: Option<&str>) -> Result<(ListPage, ListOutcome), ProviderError> {
        if let Some(page) = self.cache.get(folder_id, cursor) {
            debug!("Serving {} ({:?}) from cache", folder_id, cursor);
            return Ok((page, ListOutcome::Cached));
        }

        let request = ListRequest {
            folder_id: folder_id.to_string(),
            cursor: cursor.map(str::to_string),
            page_size: self.page_size,
        };
        let page = self.provider.list(&request).await?;
        self.cache.put(folder_id, cursor, page.clone());
        Ok((page, ListOutcome::Fetched))
    }

    /// Walk parent links upward from `folder_id` to the root
    async fn build_breadcrumbs(&self, folder_id: &str) -> Vec<Breadcrumb> {
        let mut path: Vec<Breadcrumb> = Vec::new();
        let mut next = Some(folder_id.to_string());

        while let Some(id) = next.take() {
            if id == ROOT_FOLDER_ID || path.len() >= MAX_BREADCRUMB_DEPTH {
                break;
            }
            match self.provider.get(&id).await {
                Ok(entry) => {
                    // The provider's own root object has no parent
                    if entry.parent.is_none() && !path.is_empty() {
                        self.learn_root_id(&id);
                        break;
                    }
                    path.push(Breadcrumb::new(&id, &entry.name));
                    next = entry.parent;
                }
                Err(e) => {
                    debug!("Breadcrumb walk stopped at {}: {}", id, e);
                    self.session.observe_error(&e).await;
                    if path.is_empty() {
                        path.push(Breadcrumb::new(&id, &id));
                    }
                    break;
                }
            }
        }

        path.push(Breadcrumb::root());
        path.reverse();
        path
    }

    fn learn_root_id(&self, id: &str) {
        if id == ROOT_FOLDER_ID {
            return;
        }
        let mut root_id = self.root_id.lock().unwrap_or_else(|e| e.into_inner());
        if root_id.as_deref() != Some(id) {
            debug!("Root folder resolved to {}", id);
            *root_id = Some(id.to_string());
        }
    }

    /// Drop the cached pages of `folder_id`, including the `root` alias for it
    fn invalidate_folder(&self, folder_id: &str) {
        self.cache.invalidate(folder_id);
        let is_root = self.root_id.lock().unwrap_or_else(|e| e.into_inner()).as_deref() == Some(folder_id);
        if is_root {
            self.cache.invalidate(ROOT_FOLDER_ID);
        }
    }

    /// Folders whose listings change when `file_id` changes
    ///
    /// Always the current folder, plus the entry's parent taken from the
    /// current listing or, failing that, looked up with the provider.
    /// Must run before the mutation so the lookup still succeeds.
    async fn affected_folders(&self, file_id: &str) -> Vec<String> {
        let (current, listed) = {
            let state = self.state.read().await;
            let listed = state.entries.iter().find(|e| e.id == file_id).map(|e| e.parent.clone());
            (state.folder_id.clone(), listed)
        };
        let parent = match listed {
            Some(parent) => parent,
            None => match self.provider.get(file_id).await {
                Ok(entry) => entry.parent,
                Err(e) => {
                    debug!("Could not resolve parent of {}: {}", file_id, e);
                    None
                }
            },
        };

        let mut folders = vec![current];
        if let Some(parent) = parent {
            if !folders.contains(&parent) {
                folders.push(parent);
            }
        }
        folders
    }

    /// Notify, unlink on 401, and hand the error back
    async fn fail(&self, context: &str, error: ProviderError) -> ProviderError {
        self.notifier.error(format!("{}: {}", context, error));
        self.session.observe_error(&error).await;
        error
    }

    /// Invalidate affected folders, refresh the view and notify success
    async fn complete(&self, affected: &[&str], message: String) {
        for folder_id in affected {
            self.invalidate_folder(folder_id);
        }
        let current = self.current_folder().await;
        if let Err(e) = self.list_files(&current, None).await {
            warn!("Refresh after mutation failed: {}", e);
        }
        self.notifier.success(message);
    }

    pub async fn upload_file(&self, folder_id: &str, name: &str, content: Vec<u8>) -> Result<RemoteEntry, ProviderError> {
        if folder_id.trim().is_empty() {
            return Err(self.reject(ProviderError::InvalidPath("upload requires a target folder".to_string())));
        }
        if name.trim().is_empty() {
            return Err(self.reject(ProviderError::InvalidPath("upload requires a file name".to_string())));
        }
        self.session.require_linked()?;
        let _in_flight = InFlight::start(&self.mutations);

        let mime_type = mime_guess::from_path(name).first_or_octet_stream();
        match self.provider.upload(folder_id, name, mime_type.essence_str(), content).await {
            Ok(entry) => {
                self.complete(&[folder_id], format!("Uploaded {}", name)).await;
                Ok(entry)
            }
            Err(e) => Err(self.fail(&format!("Upload of {} failed", name), e).await),
        }
    }

    /// Read a local file and upload it under `folder_id`
    pub async fn upload_local_file(&self, folder_id: &str, path: &Path) -> Result<RemoteEntry, ProviderError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| self.reject(ProviderError::InvalidPath(format!("{} has no file name", path.display()))))?
            .to_string();
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| self.reject(ProviderError::IoError(e)))?;
        self.upload_file(folder_id, &name, content).await
    }

    pub async fn create_folder(&self, parent_id: &str, name: &str) -> Result<RemoteEntry, ProviderError> {
        if name.trim().is_empty() {
            return Err(self.reject(ProviderError::InvalidPath("folder name is empty".to_string())));
        }
        self.session.require_linked()?;
        let _in_flight = InFlight::start(&self.mutations);

        match self.provider.create_folder(parent_id, name).await {
            Ok(entry) => {
                self.complete(&[parent_id], format!("Created folder {}", name)).await;
                Ok(entry)
            }
            Err(e) => Err(self.fail(&format!("Could not create folder {}", name), e).await),
        }
    }

    /// Delete a file or folder; it also leaves the featured set
    pub async fn delete_file(&self, file_id: &str) -> Result<(), ProviderError> {
        self.session.require_linked()?;
        let _in_flight = InFlight::start(&self.mutations);
        let mut affected = self.affected_folders(file_id).await;

        if let Err(e) = self.provider.delete(file_id).await {
            return Err(self.fail("Delete failed", e).await);
        }

        if let Err(e) = self.featured.remove(file_id) {
            warn!("Could not update featured files after delete: {}", e);
        }
        info!("Deleted {} from {}", file_id, affected.join(", "));
        affected.push(file_id.to_string());
        let affected: Vec<&str> = affected.iter().map(String::as_str).collect();
        self.complete(&affected, "Deleted".to_string()).await;
        Ok(())
    }

    /// Make a file publicly readable (returns its share link) or private again
    pub async fn set_file_permission(&self, file_id: &str, public: bool) -> Result<Option<String>, ProviderError> {
        self.session.require_linked()?;
        let _in_flight = InFlight::start(&self.mutations);
        let affected = self.affected_folders(file_id).await;

        let result = if public {
            self.share_publicly(file_id).await
        } else {
            self.unshare(file_id).await.map(|_| None)
        };

        match result {
            Ok(link) => {
                let message = if public { "File is now public" } else { "File is now private" };
                let affected: Vec<&str> = affected.iter().map(String::as_str).collect();
                self.complete(&affected, message.to_string()).await;
                Ok(link)
            }
            Err(e) => Err(self.fail("Could not change sharing", e).await),
        }
    }

    async fn share_publicly(&self, file_id: &str) -> Result<Option<String>, ProviderError> {
        self.provider
            .create_permission(file_id, &SharePermission::anyone_reader())
            .await?;
        let entry = self.provider.get(file_id).await?;
        Ok(entry.web_view_link)
    }

    async fn unshare(&self, file_id: &str) -> Result<(), ProviderError> {
        let permissions = self.provider.list_permissions(file_id).await?;
        for permission in permissions.iter().filter(|p| p.target_type == "anyone") {
            self.provider.delete_permission(file_id, &permission.id).await?;
        }
        Ok(())
    }

    /// Flip the featured flag of a file, returning the new state
    ///
    /// Purely local: nothing is sent to the provider unless the entry is
    /// neither in the current listing nor already featured.
    pub async fn toggle_featured(&self, file_id: &str) -> Result<bool, ProviderError> {
        let known = {
            let state = self.state.read().await;
            state.entries.iter().find(|e| e.id == file_id).cloned()
        };
        let entry = match known.or_else(|| self.featured.entries().into_iter().find(|e| e.id == file_id)) {
            Some(entry) => entry,
            None => {
                self.session.require_linked()?;
                match self.provider.get(file_id).await {
                    Ok(entry) => entry,
                    Err(e) => return Err(self.fail("Could not feature file", e).await),
                }
            }
        };

        let featured = self.featured.toggle(&entry)?;
        if featured {
            self.notifier.info(format!("{} added to featured files", entry.name));
        } else {
            self.notifier.info(format!("{} removed from featured files", entry.name));
        }
        Ok(featured)
    }

    /// The "shared highlights" view
    pub fn featured_files(&self) -> Vec<FileEntry> {
        self.featured
            .entries()
            .into_iter()
            .map(|e| FileEntry::new(e, true))
            .collect()
    }

    pub async fn quota(&self) -> Result<StorageInfo, ProviderError> {
        self.session.require_linked()?;
        match self.provider.storage_quota().await {
            Ok(info) => Ok(info),
            Err(e) => Err(self.fail("Could not read storage quota", e).await),
        }
    }

    fn reject(&self, error: ProviderError) -> ProviderError {
        self.notifier.error(error.to_string());
        error
    }
}
