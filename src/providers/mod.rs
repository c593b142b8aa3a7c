//! Remote File Provider Module
//!
//! This module provides the abstraction over the hierarchical file storage
//! backend. The browser, session and mutation layers only talk to the
//! `StorageProvider` trait, so tests can swap in an in-memory provider.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │           StorageProvider Trait             │
//! │  list, get, create, delete, permissions     │
//! └─────────────────────────────────────────────┘
//!                      │
//!            ┌─────────┴─────────┐
//!            ▼                   ▼
//!     ┌─────────────┐     ┌─────────────┐
//!     │ GoogleDrive │     │ MockProvider│ (tests)
//!     └─────────────┘     └─────────────┘
//! ```

pub mod types;
pub mod oauth2;
pub mod google_drive;

#[cfg(test)]
pub(crate) mod mock;

pub use types::*;
pub use self::google_drive::{GoogleDriveConfig, GoogleDriveProvider};
pub use self::oauth2::{GoogleOAuth, OAuthConfig, StoredTokens, TokenAuthority};

use async_trait::async_trait;
use secrecy::SecretString;

/// Remote file provider trait
///
/// Every method takes `&self` so a single provider instance can be shared
/// (behind an `Arc`) between the session manager and the file browser.
/// Implementations hold the bearer credential themselves; callers set it via
/// [`StorageProvider::set_access_token`].
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get display name for this provider instance
    fn display_name(&self) -> String;

    /// Replace (or clear) the bearer credential used for requests
    async fn set_access_token(&self, token: Option<SecretString>);

    /// Check if a bearer credential is currently set
    async fn has_access_token(&self) -> bool;

    /// List one page of the non-trashed children of a folder,
    /// folders first, then most recently modified first
    async fn list(&self, request: &ListRequest) -> Result<ListPage, ProviderError>;

    /// Get a single entry by id (including its parent reference)
    async fn get(&self, file_id: &str) -> Result<RemoteEntry, ProviderError>;

    /// Create a folder under `parent_id`
    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<RemoteEntry, ProviderError>;

    /// Upload file content under `parent_id`
    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> Result<RemoteEntry, ProviderError>;

    /// Delete a file or folder (folders are removed with their contents)
    async fn delete(&self, file_id: &str) -> Result<(), ProviderError>;

    /// Grant a permission, returning the new permission id
    async fn create_permission(
        &self,
        file_id: &str,
        permission: &SharePermission,
    ) -> Result<String, ProviderError>;

    /// List permissions currently set on a file
    async fn list_permissions(&self, file_id: &str) -> Result<Vec<Permission>, ProviderError>;

    /// Remove a permission from a file
    async fn delete_permission(&self, file_id: &str, permission_id: &str) -> Result<(), ProviderError>;

    /// Get storage quota
    async fn storage_quota(&self) -> Result<StorageInfo, ProviderError>;
}
