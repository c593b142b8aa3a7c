//! Application context
//!
//! `CloudNest` wires the provider, session, listing cache, featured set and
//! file browser together. It is constructed once and passed to front ends;
//! nothing in the crate is global.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::browser::FileBrowser;
use crate::cache::ListingCache;
use crate::config::CloudNestConfig;
use crate::featured::FeaturedFiles;
use crate::notice::{Notice, Notifier};
use crate::providers::{GoogleDriveProvider, GoogleOAuth, ProviderError, StorageProvider, TokenAuthority};
use crate::session::SessionManager;
use crate::store::{FileStore, KeyValueStore, MemoryStore};

pub struct CloudNest {
    session: Arc<SessionManager>,
    browser: FileBrowser,
    notifier: Notifier,
}

impl CloudNest {
    pub fn new(
        provider: Arc<dyn StorageProvider>,
        authority: Arc<dyn TokenAuthority>,
        store: Arc<dyn KeyValueStore>,
        cache_ttl: Duration,
        page_size: u32,
    ) -> Result<Self, ProviderError> {
        let notifier = Notifier::new();
        let session = Arc::new(SessionManager::new(
            provider.clone(),
            authority,
            store.clone(),
            notifier.clone(),
        ));
        let cache = Arc::new(ListingCache::new(cache_ttl));
        let featured = Arc::new(FeaturedFiles::load(store)?);
        let browser = FileBrowser::new(
            provider,
            session.clone(),
            cache,
            featured,
            notifier.clone(),
            page_size,
        );

        Ok(Self {
            session,
            browser,
            notifier,
        })
    }

    /// Google Drive context from configuration
    ///
    /// `ephemeral` keeps all local state in memory for this process only.
    pub fn from_config(config: &CloudNestConfig, ephemeral: bool) -> Result<Self, ProviderError> {
        config.validate()?;
        let store: Arc<dyn KeyValueStore> = if ephemeral {
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(FileStore::open(&config.storage_path)?)
        };
        let provider = Arc::new(GoogleDriveProvider::new(config.drive_config()));
        let authority = Arc::new(GoogleOAuth::new(&config.client_id, &config.client_secret));

        Self::new(provider, authority, store, config.cache_ttl(), config.page_size)
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn browser(&self) -> &FileBrowser {
        &self.browser
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    pub fn is_linked(&self) -> bool {
        self.session.is_linked()
    }

    /// Restore a stored session; returns whether the account is linked
    pub async fn restore(&self) -> Result<bool, ProviderError> {
        self.session.restore().await
    }

    pub async fn sign_in(&self) -> Result<(), ProviderError> {
        self.session.sign_in().await
    }

    /// Revoke and forget the credential, then drop all browsing state
    pub async fn sign_out(&self) -> Result<(), ProviderError> {
        self.session.sign_out().await?;
        self.browser.reset().await;
        Ok(())
    }
}
