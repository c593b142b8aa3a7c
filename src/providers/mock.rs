//! In-memory provider used by unit tests
//!
//! Holds a flat id → entry map, pages listings with numeric cursors and
//! counts every call so tests can assert on cache behaviour.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{
    ListPage, ListRequest, Permission, ProviderError, RemoteEntry, SharePermission, StorageInfo,
    StorageProvider, ROOT_FOLDER_ID,
};

/// Failure the mock returns for every authenticated call until cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Unauthorized,
    Server,
}

impl MockFailure {
    fn to_error(self) -> ProviderError {
        match self {
            MockFailure::Unauthorized => ProviderError::Unauthorized,
            MockFailure::Server => ProviderError::ServerError("mock returned 500".to_string()),
        }
    }
}

#[derive(Default)]
pub struct MockProvider {
    entries: Mutex<Vec<RemoteEntry>>,
    permissions: Mutex<HashMap<String, Vec<Permission>>>,
    token: Mutex<Option<SecretString>>,
    failure: Mutex<Option<MockFailure>>,
    list_delay: Mutex<Option<Duration>>,
    /// Real id of the root folder; `None` files top-level entries under `root`
    root_id: Mutex<Option<String>>,
    next_id: AtomicUsize,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    mutation_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<RemoteEntry>) -> Self {
        let provider = Self::new();
        *provider.entries.lock().unwrap() = entries;
        provider
    }

    /// `count` plain files directly under `parent`, named `<prefix>-<n>.txt`
    pub fn files(parent: &str, prefix: &str, count: usize) -> Vec<RemoteEntry> {
        (0..count)
            .map(|n| RemoteEntry::file(&format!("{}-{}", prefix, n), &format!("{}-{}.txt", prefix, n), Some(parent), 10))
            .collect()
    }

    pub fn add(&self, entry: RemoteEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().unwrap().iter().any(|e| e.id == id)
    }

    pub fn entry(&self, id: &str) -> Option<RemoteEntry> {
        self.entries.lock().unwrap().iter().find(|e| e.id == id).cloned()
    }

    pub fn fail_with(&self, failure: MockFailure) {
        *self.failure.lock().unwrap() = Some(failure);
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = Some(delay);
    }

    /// Report top-level entries with `id` as parent, like Drive does
    pub fn set_root_id(&self, id: &str) {
        *self.root_id.lock().unwrap() = Some(id.to_string());
    }

    fn resolve(&self, folder_id: &str) -> String {
        match self.root_id.lock().unwrap().as_deref() {
            Some(real) if folder_id == ROOT_FOLDER_ID => real.to_string(),
            _ => folder_id.to_string(),
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn mutation_calls(&self) -> usize {
        self.mutation_calls.load(Ordering::SeqCst)
    }

    pub fn token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.expose_secret().to_string())
    }

    fn check(&self) -> Result<(), ProviderError> {
        if self.token.lock().unwrap().is_none() {
            return Err(ProviderError::NotConnected);
        }
        match *self.failure.lock().unwrap() {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    fn new_id(&self) -> String {
        format!("new-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl StorageProvider for MockProvider {
    fn display_name(&self) -> String {
        "Mock".to_string()
    }

    async fn set_access_token(&self, token: Option<SecretString>) {
        *self.token.lock().unwrap() = token;
    }

    async fn has_access_token(&self) -> bool {
        self.token.lock().unwrap().is_some()
    }

    async fn list(&self, request: &ListRequest) -> Result<ListPage, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        let folder_id = self.resolve(&request.folder_id);

        let mut children: Vec<RemoteEntry> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.parent.as_deref() == Some(folder_id.as_str()))
            .cloned()
            .collect();
        children.sort_by(|a, b| b.is_folder().cmp(&a.is_folder()).then(b.modified.cmp(&a.modified)));

        let offset: usize = request
            .cursor
            .as_deref()
            .map(|c| c.parse().map_err(|_| ProviderError::ParseError(format!("bad cursor {}", c))))
            .transpose()?
            .unwrap_or(0);
        let end = (offset + request.page_size as usize).min(children.len());
        let next_cursor = (end < children.len()).then(|| end.to_string());

        Ok(ListPage {
            entries: children.get(offset..end).unwrap_or_default().to_vec(),
            next_cursor,
        })
    }

    async fn get(&self, file_id: &str) -> Result<RemoteEntry, ProviderError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let root_id = self.root_id.lock().unwrap().clone();
        if file_id == ROOT_FOLDER_ID || root_id.as_deref() == Some(file_id) {
            let id = root_id.unwrap_or_else(|| "0root".to_string());
            return Ok(RemoteEntry::folder(&id, "My Drive", None));
        }
        self.entry(file_id)
            .ok_or_else(|| ProviderError::NotFound(file_id.to_string()))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<RemoteEntry, ProviderError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let entry = RemoteEntry::folder(&self.new_id(), name, Some(&self.resolve(parent_id)));
        self.add(entry.clone());
        Ok(entry)
    }

    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> Result<RemoteEntry, ProviderError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let mut entry = RemoteEntry::file(&self.new_id(), name, Some(&self.resolve(parent_id)), content.len() as u64);
        entry.mime_type = mime_type.to_string();
        self.add(entry.clone());
        Ok(entry)
    }

    async fn delete(&self, file_id: &str) -> Result<(), ProviderError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .retain(|e| e.id != file_id && e.parent.as_deref() != Some(file_id));
        Ok(())
    }

    async fn create_permission(
        &self,
        file_id: &str,
        permission: &SharePermission,
    ) -> Result<String, ProviderError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let id = self.new_id();
        self.permissions
            .lock()
            .unwrap()
            .entry(file_id.to_string())
            .or_default()
            .push(Permission {
                id: id.clone(),
                role: permission.role.clone(),
                target_type: permission.target_type.clone(),
                email: None,
            });
        if permission.target_type == "anyone" {
            if let Some(entry) = self.entries.lock().unwrap().iter_mut().find(|e| e.id == file_id) {
                entry.shared = true;
                entry.web_view_link = Some(format!("https://drive.example/{}", file_id));
            }
        }
        Ok(id)
    }

    async fn list_permissions(&self, file_id: &str) -> Result<Vec<Permission>, ProviderError> {
        self.check()?;
        Ok(self
            .permissions
            .lock()
            .unwrap()
            .get(file_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_permission(&self, file_id: &str, permission_id: &str) -> Result<(), ProviderError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let mut permissions = self.permissions.lock().unwrap();
        if let Some(list) = permissions.get_mut(file_id) {
            list.retain(|p| p.id != permission_id);
            if !list.iter().any(|p| p.target_type == "anyone") {
                if let Some(entry) = self.entries.lock().unwrap().iter_mut().find(|e| e.id == file_id) {
                    entry.shared = false;
                }
            }
        }
        Ok(())
    }

    async fn storage_quota(&self) -> Result<StorageInfo, ProviderError> {
        self.check()?;
        Ok(StorageInfo {
            used: 1024,
            total: Some(15 * 1024 * 1024 * 1024),
        })
    }
}
