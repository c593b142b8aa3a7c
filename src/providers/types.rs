//! Shared types for the remote file provider
//!
//! This module contains the provider-sourced entry representation, listing
//! request/response pages, sharing and quota types, and the error type used
//! throughout the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier the provider accepts for the user's top-level folder
pub const ROOT_FOLDER_ID: &str = "root";

/// Display label used for the root breadcrumb
pub const ROOT_FOLDER_NAME: &str = "My Drive";

/// Content-type tag the provider uses for folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// File or folder entry as returned by the provider
///
/// This is the provider-owned half of a listing. Client-only state (the
/// "featured" flag) lives in [`FileEntry`], which is produced by joining
/// these entries with the locally persisted featured set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Provider-assigned identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Content-type tag
    pub mime_type: String,
    /// Size in bytes (absent for folders and provider-native documents)
    #[serde(default)]
    pub size: Option<u64>,
    /// Last modification time
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    /// Browser link for the entry, if the provider returned one
    #[serde(default)]
    pub web_view_link: Option<String>,
    /// Whether the entry is shared publicly
    #[serde(default)]
    pub shared: bool,
    /// Parent folder id (zero or one)
    #[serde(default)]
    pub parent: Option<String>,
}

impl RemoteEntry {
    /// Create a folder entry
    pub fn folder(id: &str, name: &str, parent: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            size: None,
            modified: None,
            web_view_link: None,
            shared: false,
            parent: parent.map(str::to_string),
        }
    }

    /// Create a regular file entry
    pub fn file(id: &str, name: &str, parent: Option<&str>, size: u64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime_guess::from_path(name)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            size: Some(size),
            modified: None,
            web_view_link: None,
            shared: false,
            parent: parent.map(str::to_string),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

/// Entry as presented to a front end: provider data plus the featured flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(flatten)]
    pub entry: RemoteEntry,
    pub featured: bool,
}

impl FileEntry {
    pub fn new(entry: RemoteEntry, featured: bool) -> Self {
        Self { entry, featured }
    }

    pub fn id(&self) -> &str {
        &self.entry.id
    }
}

/// One element of the folder path from the root to the current folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub id: String,
    pub name: String,
}

impl Breadcrumb {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    pub fn root() -> Self {
        Self::new(ROOT_FOLDER_ID, ROOT_FOLDER_NAME)
    }
}

/// Parameters for a single listing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub folder_id: String,
    /// Cursor returned by a previous page, `None` for the first page
    pub cursor: Option<String>,
    pub page_size: u32,
}

/// One page of a folder listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    pub entries: Vec<RemoteEntry>,
    pub next_cursor: Option<String>,
}

/// Permission to grant on a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePermission {
    /// Permission role: "reader", "writer", "commenter", "owner"
    pub role: String,
    /// Target type: "user", "group", "domain", "anyone"
    pub target_type: String,
    /// Target email or identifier (empty for "anyone")
    pub target: String,
}

impl SharePermission {
    /// Anyone holding the link may view
    pub fn anyone_reader() -> Self {
        Self {
            role: "reader".to_string(),
            target_type: "anyone".to_string(),
            target: String::new(),
        }
    }
}

/// Permission as currently set on a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub role: String,
    pub target_type: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Storage quota information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    /// Bytes used
    pub used: u64,
    /// Total bytes available (`None` for unlimited plans)
    pub total: Option<u64>,
}

impl StorageInfo {
    pub fn free(&self) -> Option<u64> {
        self.total.map(|t| t.saturating_sub(self.used))
    }
}

/// Provider error type
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("No access token set on the provider client")]
    NotConnected,

    #[error("Google Drive account is not linked")]
    NotLinked,

    #[error("Access token rejected (401)")]
    Unauthorized,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Local storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Whether the credential must be dropped and the account re-linked
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ProviderError::Unauthorized)
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::ParseError(e.to_string())
    }
}
