//! Session / token manager
//!
//! Owns the Drive bearer credential: obtains it through a [`TokenAuthority`],
//! hands it to the provider client, mirrors it into local storage so it
//! survives restarts, and drops it on sign-out or on a 401.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::notice::Notifier;
use crate::providers::{ProviderError, StorageProvider, StoredTokens, TokenAuthority};
use crate::store::{self, KeyValueStore, LINKED_KEY, TOKEN_KEY};

pub struct SessionManager {
    provider: Arc<dyn StorageProvider>,
    authority: Arc<dyn TokenAuthority>,
    store: Arc<dyn KeyValueStore>,
    notifier: Notifier,
    linked: AtomicBool,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn StorageProvider>,
        authority: Arc<dyn TokenAuthority>,
        store: Arc<dyn KeyValueStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            provider,
            authority,
            store,
            notifier,
            linked: AtomicBool::new(false),
        }
    }

    pub fn is_linked(&self) -> bool {
        self.linked.load(Ordering::SeqCst)
    }

    /// Reject an operation up front when no account is linked
    pub fn require_linked(&self) -> Result<(), ProviderError> {
        if self.is_linked() {
            Ok(())
        } else {
            Err(ProviderError::NotLinked)
        }
    }

    /// Request a new token through user consent and link the account
    pub async fn sign_in(&self) -> Result<(), ProviderError> {
        match self.authority.request_token().await {
            Ok(tokens) => self.link(tokens).await,
            Err(e) => {
                self.notifier.error(format!("Could not link Google Drive: {}", e));
                Err(e)
            }
        }
    }

    /// Link the account with already obtained tokens
    pub async fn link(&self, tokens: StoredTokens) -> Result<(), ProviderError> {
        store::set_json(self.store.as_ref(), TOKEN_KEY, &tokens)?;
        self.store.set(LINKED_KEY, "true")?;
        self.provider.set_access_token(Some(tokens.access_secret())).await;
        self.linked.store(true, Ordering::SeqCst);

        self.notifier.success("Google Drive linked");
        Ok(())
    }

    /// Revoke the token with the issuer and forget every local copy
    ///
    /// Revocation failures are logged only; local state is always cleared.
    pub async fn sign_out(&self) -> Result<(), ProviderError> {
        let tokens: Option<StoredTokens> = store::get_json(self.store.as_ref(), TOKEN_KEY)?;
        if let Some(tokens) = tokens {
            if let Err(e) = self.authority.revoke(&tokens.access_token).await {
                warn!("Token revocation failed, clearing local state anyway: {}", e);
            }
        }

        self.clear_credential().await?;
        self.notifier.info("Signed out of Google Drive");
        Ok(())
    }

    /// Restore a stored token and check it with one cheap provider call
    ///
    /// Returns whether the account is linked afterwards. Only a 401 unlinks;
    /// other validation failures (e.g. offline) keep the stored credential.
    pub async fn restore(&self) -> Result<bool, ProviderError> {
        let stored: Option<StoredTokens> = store::get_json(self.store.as_ref(), TOKEN_KEY)?;
        let Some(mut tokens) = stored else {
            self.linked.store(false, Ordering::SeqCst);
            return Ok(false);
        };

        if tokens.is_expired() {
            match tokens.refresh_token.clone() {
                Some(refresh_token) => match self.authority.refresh(&refresh_token).await {
                    Ok(fresh) => {
                        store::set_json(self.store.as_ref(), TOKEN_KEY, &fresh)?;
                        tokens = fresh;
                    }
                    Err(e) => {
                        warn!("Token refresh failed: {}", e);
                        self.invalidate().await?;
                        return Ok(false);
                    }
                },
                None => {
                    self.invalidate().await?;
                    return Ok(false);
                }
            }
        }

        self.provider.set_access_token(Some(tokens.access_secret())).await;

        match self.provider.storage_quota().await {
            Ok(_) => {
                self.store.set(LINKED_KEY, "true")?;
                self.linked.store(true, Ordering::SeqCst);
                info!("Restored Google Drive session");
                Ok(true)
            }
            Err(e) if e.is_auth_error() => {
                self.invalidate().await?;
                Ok(false)
            }
            Err(e) => {
                warn!("Could not validate stored token: {}", e);
                let linked = self.store.get(LINKED_KEY)?.as_deref() == Some("true");
                self.linked.store(linked, Ordering::SeqCst);
                Ok(linked)
            }
        }
    }

    /// Drop a credential the provider rejected and ask the user to re-link
    pub async fn invalidate(&self) -> Result<(), ProviderError> {
        self.clear_credential().await?;
        self.notifier.error("Google Drive session expired, please link again");
        Ok(())
    }

    /// Route an operation error: a 401 unlinks the session
    pub async fn observe_error(&self, error: &ProviderError) {
        if error.is_auth_error() {
            if let Err(e) = self.invalidate().await {
                warn!("Failed to clear rejected credential: {}", e);
            }
        }
    }

    async fn clear_credential(&self) -> Result<(), ProviderError> {
        self.provider.set_access_token(None).await;
        self.linked.store(false, Ordering::SeqCst);
        self.store.remove(TOKEN_KEY)?;
        self.store.set(LINKED_KEY, "false")?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::notice::NoticeLevel;
    use crate::providers::mock::{MockFailure, MockProvider};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Authority that hands out fixed tokens and records revocations
    #[derive(Default)]
    pub(crate) struct StubAuthority {
        pub revoked: Mutex<Vec<String>>,
        pub refreshed: Mutex<usize>,
        pub deny: bool,
    }

    #[async_trait]
    impl TokenAuthority for StubAuthority {
        async fn request_token(&self) -> Result<StoredTokens, ProviderError> {
            if self.deny {
                return Err(ProviderError::AuthenticationFailed("denied".to_string()));
            }
            Ok(StoredTokens::bearer("fresh-token"))
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<StoredTokens, ProviderError> {
            *self.refreshed.lock().unwrap() += 1;
            Ok(StoredTokens::bearer("refreshed-token"))
        }

        async fn revoke(&self, token: &str) -> Result<(), ProviderError> {
            self.revoked.lock().unwrap().push(token.to_string());
            Err(ProviderError::NetworkError("offline".to_string()))
        }
    }

    struct Fixture {
        provider: Arc<MockProvider>,
        authority: Arc<StubAuthority>,
        store: Arc<MemoryStore>,
        notifier: Notifier,
        session: SessionManager,
    }

    fn fixture(authority: StubAuthority) -> Fixture {
        let provider = Arc::new(MockProvider::new());
        let authority = Arc::new(authority);
        let store = Arc::new(MemoryStore::new());
        let notifier = Notifier::new();
        let session = SessionManager::new(provider.clone(), authority.clone(), store.clone(), notifier.clone());
        Fixture {
            provider,
            authority,
            store,
            notifier,
            session,
        }
    }

    #[tokio::test]
    async fn test_sign_in_stores_token_everywhere() {
        let f = fixture(StubAuthority::default());
        assert!(matches!(f.session.require_linked(), Err(ProviderError::NotLinked)));

        f.session.sign_in().await.unwrap();

        assert!(f.session.is_linked());
        assert_eq!(f.provider.token().as_deref(), Some("fresh-token"));
        assert_eq!(f.store.get(LINKED_KEY).unwrap().as_deref(), Some("true"));
        let stored: StoredTokens = store::get_json(f.store.as_ref(), TOKEN_KEY).unwrap().unwrap();
        assert_eq!(stored.access_token, "fresh-token");
    }

    #[tokio::test]
    async fn test_denied_consent_stays_unlinked() {
        let f = fixture(StubAuthority {
            deny: true,
            ..Default::default()
        });
        let mut rx = f.notifier.subscribe();

        assert!(f.session.sign_in().await.is_err());
        assert!(!f.session.is_linked());
        assert_eq!(rx.recv().await.unwrap().level, NoticeLevel::Error);
    }

    #[tokio::test]
    async fn test_sign_out_clears_even_when_revoke_fails() {
        let f = fixture(StubAuthority::default());
        f.session.sign_in().await.unwrap();

        f.session.sign_out().await.unwrap();

        assert_eq!(f.authority.revoked.lock().unwrap().as_slice(), ["fresh-token"]);
        assert!(!f.session.is_linked());
        assert!(f.provider.token().is_none());
        assert!(f.store.get(TOKEN_KEY).unwrap().is_none());
        assert_eq!(f.store.get(LINKED_KEY).unwrap().as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn test_restore_without_token() {
        let f = fixture(StubAuthority::default());
        assert!(!f.session.restore().await.unwrap());
        assert!(!f.session.is_linked());
    }

    #[tokio::test]
    async fn test_restore_valid_token() {
        let f = fixture(StubAuthority::default());
        store::set_json(f.store.as_ref(), TOKEN_KEY, &StoredTokens::bearer("saved")).unwrap();

        assert!(f.session.restore().await.unwrap());
        assert!(f.session.is_linked());
        assert_eq!(f.provider.token().as_deref(), Some("saved"));
    }

    #[tokio::test]
    async fn test_restore_rejected_token_unlinks_with_message() {
        let f = fixture(StubAuthority::default());
        store::set_json(f.store.as_ref(), TOKEN_KEY, &StoredTokens::bearer("stale")).unwrap();
        f.store.set(LINKED_KEY, "true").unwrap();
        f.provider.fail_with(MockFailure::Unauthorized);
        let mut rx = f.notifier.subscribe();

        assert!(!f.session.restore().await.unwrap());

        assert!(!f.session.is_linked());
        assert!(f.store.get(TOKEN_KEY).unwrap().is_none());
        assert!(f.provider.token().is_none());
        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(notice.message.contains("link again"));
    }

    #[tokio::test]
    async fn test_restore_offline_keeps_token() {
        let f = fixture(StubAuthority::default());
        store::set_json(f.store.as_ref(), TOKEN_KEY, &StoredTokens::bearer("saved")).unwrap();
        f.store.set(LINKED_KEY, "true").unwrap();
        f.provider.fail_with(MockFailure::Server);

        assert!(f.session.restore().await.unwrap());
        assert!(f.store.get(TOKEN_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restore_refreshes_expired_token() {
        let f = fixture(StubAuthority::default());
        let mut tokens = StoredTokens::bearer("old");
        tokens.refresh_token = Some("refresh".to_string());
        tokens.expires_at = Some(0);
        store::set_json(f.store.as_ref(), TOKEN_KEY, &tokens).unwrap();

        assert!(f.session.restore().await.unwrap());
        assert_eq!(*f.authority.refreshed.lock().unwrap(), 1);
        assert_eq!(f.provider.token().as_deref(), Some("refreshed-token"));
    }

    #[tokio::test]
    async fn test_restore_expired_without_refresh_token() {
        let f = fixture(StubAuthority::default());
        let mut tokens = StoredTokens::bearer("old");
        tokens.expires_at = Some(0);
        store::set_json(f.store.as_ref(), TOKEN_KEY, &tokens).unwrap();

        assert!(!f.session.restore().await.unwrap());
        assert!(f.store.get(TOKEN_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_observe_error_only_reacts_to_401() {
        let f = fixture(StubAuthority::default());
        f.session.sign_in().await.unwrap();

        f.session.observe_error(&ProviderError::NotFound("x".into())).await;
        assert!(f.session.is_linked());

        f.session.observe_error(&ProviderError::Unauthorized).await;
        assert!(!f.session.is_linked());
    }
}
