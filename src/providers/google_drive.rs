//! Google Drive Storage Provider
//!
//! Implements StorageProvider for Google Drive using the Drive API v3.
//! The bearer token is supplied by the session manager; this client never
//! refreshes or persists it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{
    ListPage, ListRequest, Permission, ProviderError, RemoteEntry, SharePermission, StorageInfo,
    StorageProvider, FOLDER_MIME_TYPE,
};

/// Google Drive API base URL
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const UPLOAD_API_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Field projection for a single file
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime,parents,webViewLink,shared";

/// Listing order: folders first, then most recently modified
const LIST_ORDER: &str = "folder,modifiedTime desc";

/// Google Drive file metadata from API
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    mime_type: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    web_view_link: Option<String>,
    #[serde(default)]
    shared: bool,
}

impl From<DriveFile> for RemoteEntry {
    fn from(file: DriveFile) -> Self {
        let size = file.size.as_deref().and_then(|s| s.parse().ok());
        RemoteEntry {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            size,
            modified: file.modified_time,
            web_view_link: file.web_view_link,
            shared: file.shared,
            parent: file.parents.into_iter().next(),
        }
    }
}

/// Google Drive file list response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DrivePermission {
    id: String,
    role: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DrivePermissionList {
    #[serde(default)]
    permissions: Vec<DrivePermission>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveQuota {
    #[serde(default)]
    limit: Option<String>,
    #[serde(default)]
    usage: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveAbout {
    storage_quota: DriveQuota,
}

/// Google Drive provider configuration
#[derive(Debug, Clone)]
pub struct GoogleDriveConfig {
    pub api_base: String,
    pub upload_base: String,
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: UPLOAD_API_BASE.to_string(),
        }
    }
}

/// Google Drive Storage Provider
pub struct GoogleDriveProvider {
    config: GoogleDriveConfig,
    client: reqwest::Client,
    token: RwLock<Option<SecretString>>,
}

impl GoogleDriveProvider {
    pub fn new(config: GoogleDriveConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            token: RwLock::new(None),
        }
    }

    /// Get authorization header
    async fn auth_header(&self) -> Result<HeaderValue, ProviderError> {
        let guard = self.token.read().await;
        let token = guard.as_ref().ok_or(ProviderError::NotConnected)?;
        HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|e| ProviderError::Other(format!("Invalid token: {}", e)))
    }

    fn url(&self, base: &str, path: &str, params: &[(&str, &str)]) -> Result<url::Url, ProviderError> {
        url::Url::parse_with_params(&format!("{}{}", base, path), params)
            .map_err(|e| ProviderError::InvalidConfig(format!("Bad API URL: {}", e)))
    }

    /// Send a request and map non-2xx statuses onto provider errors
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, ProviderError> {
        let response = request
            .header(AUTHORIZATION, self.auth_header().await?)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        debug!("Drive API {} failed with {}: {}", what, status, body);
        Err(error_for_status(status.as_u16(), what, &body))
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
        response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

/// Map an unsuccessful HTTP status to the provider error taxonomy
fn error_for_status(status: u16, what: &str, body: &str) -> ProviderError {
    match status {
        401 => ProviderError::Unauthorized,
        403 => ProviderError::PermissionDenied(format!("{}: {}", what, body)),
        404 => ProviderError::NotFound(what.to_string()),
        _ => ProviderError::ServerError(format!("{} returned {}: {}", what, status, body)),
    }
}

/// Build the `q` expression selecting non-trashed children of a folder
fn children_query(folder_id: &str) -> String {
    let escaped = folder_id.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}' in parents and trashed = false", escaped)
}

/// Build a `multipart/related` upload body (metadata part + content part)
fn multipart_body(boundary: &str, metadata: &serde_json::Value, mime_type: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);

    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--", boundary).as_bytes());
    body
}

#[async_trait]
impl StorageProvider for GoogleDriveProvider {
    fn display_name(&self) -> String {
        "Google Drive".to_string()
    }

    async fn set_access_token(&self, token: Option<SecretString>) {
        *self.token.write().await = token;
    }

    async fn has_access_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    async fn list(&self, request: &ListRequest) -> Result<ListPage, ProviderError> {
        let query = children_query(&request.folder_id);
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);
        let page_size = request.page_size.to_string();

        let mut params = vec![
            ("q", query.as_str()),
            ("fields", fields.as_str()),
            ("orderBy", LIST_ORDER),
            ("pageSize", page_size.as_str()),
        ];
        if let Some(ref cursor) = request.cursor {
            params.push(("pageToken", cursor.as_str()));
        }

        let url = self.url(&self.config.api_base, "/files", &params)?;
        let response = self.execute(self.client.get(url.as_str()), "list").await?;
        let list: DriveFileList = Self::parse(response).await?;

        debug!(
            "Listed {} entries in {} (more: {})",
            list.files.len(),
            request.folder_id,
            list.next_page_token.is_some()
        );

        Ok(ListPage {
            entries: list.files.into_iter().map(RemoteEntry::from).collect(),
            next_cursor: list.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn get(&self, file_id: &str) -> Result<RemoteEntry, ProviderError> {
        let path = format!("/files/{}", urlencoding::encode(file_id));
        let url = self.url(&self.config.api_base, &path, &[("fields", FILE_FIELDS)])?;
        let response = self.execute(self.client.get(url.as_str()), file_id).await?;
        let file: DriveFile = Self::parse(response).await?;
        Ok(file.into())
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<RemoteEntry, ProviderError> {
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id]
        });

        let url = self.url(&self.config.api_base, "/files", &[("fields", FILE_FIELDS)])?;
        let request = self
            .client
            .post(url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(metadata.to_string());
        let response = self.execute(request, "create folder").await?;
        let file: DriveFile = Self::parse(response).await?;

        info!("Created folder {} ({}) in {}", name, file.id, parent_id);
        Ok(file.into())
    }

    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> Result<RemoteEntry, ProviderError> {
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": mime_type,
            "parents": [parent_id]
        });

        let boundary = format!("cloudnest_{:016x}", rand::random::<u64>());
        let size = content.len();
        let body = multipart_body(&boundary, &metadata, mime_type, &content);

        let url = self.url(
            &self.config.upload_base,
            "/files",
            &[("uploadType", "multipart"), ("fields", FILE_FIELDS)],
        )?;
        let request = self
            .client
            .post(url.as_str())
            .header(CONTENT_TYPE, format!("multipart/related; boundary={}", boundary))
            .body(body);
        let response = self.execute(request, "upload").await?;
        let file: DriveFile = Self::parse(response).await?;

        info!("Uploaded {} ({} bytes) to {}", name, size, parent_id);
        Ok(file.into())
    }

    async fn delete(&self, file_id: &str) -> Result<(), ProviderError> {
        let path = format!("/files/{}", urlencoding::encode(file_id));
        let url = self.url(&self.config.api_base, &path, &[])?;

        match self.execute(self.client.delete(url.as_str()), file_id).await {
            Ok(_) | Err(ProviderError::NotFound(_)) => {
                info!("Deleted: {}", file_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn create_permission(
        &self,
        file_id: &str,
        permission: &SharePermission,
    ) -> Result<String, ProviderError> {
        let mut body = serde_json::json!({
            "role": permission.role,
            "type": permission.target_type,
        });
        if !permission.target.is_empty() {
            body["emailAddress"] = serde_json::Value::String(permission.target.clone());
        }

        let path = format!("/files/{}/permissions", urlencoding::encode(file_id));
        let url = self.url(&self.config.api_base, &path, &[("fields", "id")])?;
        let request = self
            .client
            .post(url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string());
        let response = self.execute(request, "create permission").await?;

        #[derive(Deserialize)]
        struct Created {
            id: String,
        }
        let created: Created = Self::parse(response).await?;

        info!("Granted {} to {} on {}", permission.role, permission.target_type, file_id);
        Ok(created.id)
    }

    async fn list_permissions(&self, file_id: &str) -> Result<Vec<Permission>, ProviderError> {
        let path = format!("/files/{}/permissions", urlencoding::encode(file_id));
        let url = self.url(
            &self.config.api_base,
            &path,
            &[("fields", "permissions(id,role,type,emailAddress)")],
        )?;
        let response = self.execute(self.client.get(url.as_str()), "list permissions").await?;
        let list: DrivePermissionList = Self::parse(response).await?;

        Ok(list
            .permissions
            .into_iter()
            .map(|p| Permission {
                id: p.id,
                role: p.role,
                target_type: p.kind,
                email: p.email_address,
            })
            .collect())
    }

    async fn delete_permission(&self, file_id: &str, permission_id: &str) -> Result<(), ProviderError> {
        let path = format!(
            "/files/{}/permissions/{}",
            urlencoding::encode(file_id),
            urlencoding::encode(permission_id)
        );
        let url = self.url(&self.config.api_base, &path, &[])?;
        self.execute(self.client.delete(url.as_str()), "delete permission").await?;

        info!("Removed permission {} from {}", permission_id, file_id);
        Ok(())
    }

    async fn storage_quota(&self) -> Result<StorageInfo, ProviderError> {
        let url = self.url(&self.config.api_base, "/about", &[("fields", "storageQuota")])?;
        let response = self.execute(self.client.get(url.as_str()), "quota").await?;
        let about: DriveAbout = Self::parse(response).await?;

        let used = about
            .storage_quota
            .usage
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let total = about.storage_quota.limit.as_deref().and_then(|s| s.parse().ok());

        Ok(StorageInfo { used, total })
    }
}
