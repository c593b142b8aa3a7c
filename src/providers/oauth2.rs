//! OAuth2 Authentication Module
//!
//! Provides the Google consent flow used to link a Drive account. The user is
//! sent to the system browser; the authorization code comes back to a
//! loopback listener and is exchanged (with PKCE) for tokens. Token storage is
//! not handled here, the session manager owns persistence.

use async_trait::async_trait;
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    Scope, TokenResponse, TokenUrl,
};
use reqwest::header::CONTENT_TYPE;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::ProviderError;

/// Configured OAuth2 client with auth and token endpoints set (v5 typestates)
type ConfiguredClient = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

/// Refresh this many seconds before the provider-reported expiry
const EXPIRY_BUFFER_SECS: i64 = 300;

/// Error wrapper for the oauth2 HTTP client adapter.
#[derive(Debug)]
struct OAuth2TransportError(String);

impl std::fmt::Display for OAuth2TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for OAuth2TransportError {}

/// Async HTTP client adapter for oauth2 v5.
/// Bridges reqwest 0.13 with oauth2's `AsyncHttpClient` trait, since the
/// built-in reqwest support in oauth2 v5 targets reqwest 0.12.
struct OAuth2HttpClient {
    client: reqwest::Client,
}

impl OAuth2HttpClient {
    fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProviderError::Other(format!("Failed to build OAuth HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl<'c> oauth2::AsyncHttpClient<'c> for OAuth2HttpClient {
    type Error = oauth2::HttpClientError<OAuth2TransportError>;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<oauth2::HttpResponse, Self::Error>> + Send + Sync + 'c>,
    >;

    fn call(&'c self, request: oauth2::HttpRequest) -> Self::Future {
        Box::pin(async move {
            let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
                .unwrap_or(reqwest::Method::POST);
            let url = request.uri().to_string();

            let mut builder = self.client.request(method, &url);
            for (name, value) in request.headers() {
                builder = builder.header(name.as_str(), value.as_bytes());
            }
            builder = builder.body(request.into_body());

            let response = builder
                .send()
                .await
                .map_err(|e| oauth2::HttpClientError::Other(e.to_string()))?;

            let status_code = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| oauth2::HttpClientError::Other(e.to_string()))?;

            let mut http_response = http::Response::builder().status(
                http::StatusCode::from_u16(status_code).unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR),
            );
            for (name, value) in headers.iter() {
                http_response = http_response.header(name.as_str(), value.as_bytes());
            }
            http_response
                .body(body.to_vec())
                .map_err(|e| oauth2::HttpClientError::Other(e.to_string()))
        })
    }
}

/// OAuth2 configuration for the Drive consent flow
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    /// Extra query parameters for the authorization URL
    pub extra_auth_params: Vec<(String, String)>,
}

impl OAuthConfig {
    /// Create Google Drive OAuth config with dynamic callback port
    pub fn google_with_port(client_id: &str, client_secret: &str, port: u16) -> Self {
        let client_secret = if client_secret.is_empty() {
            None
        } else {
            Some(client_secret.to_string())
        };
        Self {
            client_id: client_id.to_string(),
            client_secret,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            scopes: vec!["https://www.googleapis.com/auth/drive".to_string()],
            redirect_uri: format!("http://127.0.0.1:{}/callback", port),
            extra_auth_params: vec![("access_type".to_string(), "offline".to_string())],
        }
    }

    /// Create Google Drive OAuth config (default port for token refresh only)
    pub fn google(client_id: &str, client_secret: &str) -> Self {
        Self::google_with_port(client_id, client_secret, 0)
    }
}

/// Tokens obtained from the consent flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>, // Unix timestamp
    pub token_type: String,
}

impl StoredTokens {
    /// Bearer token with no known expiry or refresh token
    pub fn bearer(access_token: &str) -> Self {
        Self {
            access_token: access_token.to_string(),
            refresh_token: None,
            expires_at: None,
            token_type: "Bearer".to_string(),
        }
    }

    /// Check if token is expired (with 5 min buffer)
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= chrono::Utc::now().timestamp() + EXPIRY_BUFFER_SECS,
            None => false,
        }
    }

    pub fn access_secret(&self) -> SecretString {
        SecretString::from(self.access_token.clone())
    }
}

/// Issuer of bearer credentials
///
/// `SessionManager` drives sign-in, refresh and revocation through this
/// trait so it can be exercised without a browser or network.
#[async_trait]
pub trait TokenAuthority: Send + Sync {
    /// Obtain a new token through user consent
    async fn request_token(&self) -> Result<StoredTokens, ProviderError>;

    /// Exchange a refresh token for a new access token
    async fn refresh(&self, refresh_token: &str) -> Result<StoredTokens, ProviderError>;

    /// Revoke a token with the issuer
    async fn revoke(&self, token: &str) -> Result<(), ProviderError>;
}

/// Google consent flow (PKCE + loopback redirect)
pub struct GoogleOAuth {
    client_id: String,
    client_secret: String,
    /// Pending PKCE verifiers keyed by CSRF state
    pending_verifiers: RwLock<HashMap<String, PkceCodeVerifier>>,
    open_browser: bool,
}

impl GoogleOAuth {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            pending_verifiers: RwLock::new(HashMap::new()),
            open_browser: true,
        }
    }

    /// Only log the consent URL instead of launching the system browser
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    /// Start OAuth2 authorization flow - returns (URL to open, CSRF state)
    pub async fn start_auth_flow(&self, config: &OAuthConfig) -> Result<(String, String), ProviderError> {
        let client = create_client(config)?;

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let (auth_url, csrf_token) = {
            let mut auth_builder = client
                .authorize_url(CsrfToken::new_random)
                .set_pkce_challenge(pkce_challenge);

            for scope in &config.scopes {
                auth_builder = auth_builder.add_scope(Scope::new(scope.clone()));
            }
            for (key, value) in &config.extra_auth_params {
                auth_builder = auth_builder.add_extra_param(key, value);
            }

            auth_builder.url()
        };

        let state = csrf_token.secret().clone();
        self.pending_verifiers
            .write()
            .await
            .insert(state.clone(), pkce_verifier);

        debug!("OAuth2 auth URL generated");
        Ok((auth_url.to_string(), state))
    }

    /// Complete OAuth2 flow with authorization code
    pub async fn complete_auth_flow(
        &self,
        config: &OAuthConfig,
        code: &str,
        state: &str,
    ) -> Result<StoredTokens, ProviderError> {
        let verifier = self
            .pending_verifiers
            .write()
            .await
            .remove(state)
            .ok_or_else(|| {
                ProviderError::AuthenticationFailed(
                    "Invalid state token - authorization flow expired or invalid".to_string(),
                )
            })?;

        let client = create_client(config)?;
        let http_client = OAuth2HttpClient::new()?;

        let token_result = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(verifier)
            .request_async(&http_client)
            .await
            .map_err(|e| ProviderError::AuthenticationFailed(format!("Token exchange failed: {}", e)))?;

        let expires_at = token_result
            .expires_in()
            .map(|d| chrono::Utc::now().timestamp() + d.as_secs() as i64);

        info!("OAuth2 tokens obtained for Google Drive");

        Ok(StoredTokens {
            access_token: token_result.access_token().secret().clone(),
            refresh_token: token_result.refresh_token().map(|t| t.secret().clone()),
            expires_at,
            token_type: "Bearer".to_string(),
        })
    }
}

#[async_trait]
impl TokenAuthority for GoogleOAuth {
    async fn request_token(&self) -> Result<StoredTokens, ProviderError> {
        if self.client_id.is_empty() {
            return Err(ProviderError::InvalidConfig("client_id is not configured".to_string()));
        }

        let (listener, port) = bind_callback_listener().await?;
        let config = OAuthConfig::google_with_port(&self.client_id, &self.client_secret, port);
        let (auth_url, _state) = self.start_auth_flow(&config).await?;

        info!("Open this URL to link Google Drive: {}", auth_url);
        if self.open_browser {
            if let Err(e) = open::that(&auth_url) {
                warn!("Could not launch browser: {}", e);
            }
        }

        let (code, state) = wait_for_callback(listener).await?;
        self.complete_auth_flow(&config, &code, &state).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<StoredTokens, ProviderError> {
        let config = OAuthConfig::google(&self.client_id, &self.client_secret);
        let client = create_client(&config)?;
        let http_client = OAuth2HttpClient::new()?;

        let token_result = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&http_client)
            .await
            .map_err(|e| ProviderError::AuthenticationFailed(format!("Token refresh failed: {}", e)))?;

        let expires_at = token_result
            .expires_in()
            .map(|d| chrono::Utc::now().timestamp() + d.as_secs() as i64);

        info!("OAuth2 tokens refreshed for Google Drive");

        Ok(StoredTokens {
            access_token: token_result.access_token().secret().clone(),
            // Keep old refresh token if not returned
            refresh_token: token_result
                .refresh_token()
                .map(|t| t.secret().clone())
                .or_else(|| Some(refresh_token.to_string())),
            expires_at,
            token_type: "Bearer".to_string(),
        })
    }

    async fn revoke(&self, token: &str) -> Result<(), ProviderError> {
        let response = reqwest::Client::new()
            .post(GOOGLE_REVOKE_URL)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(format!("token={}", urlencoding::encode(token)))
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!("Google Drive token revoked");
            return Ok(());
        }
        // 400 means the token is already invalid
        if status.as_u16() == 400 {
            debug!("Token was already invalid at revocation");
            return Ok(());
        }
        Err(ProviderError::ServerError(format!("Revocation returned {}", status)))
    }
}

/// Create OAuth2 client from config (v5 builder API)
fn create_client(config: &OAuthConfig) -> Result<ConfiguredClient, ProviderError> {
    let auth_url = AuthUrl::new(config.auth_url.clone())
        .map_err(|e| ProviderError::InvalidConfig(format!("Invalid auth URL: {}", e)))?;
    let token_url = TokenUrl::new(config.token_url.clone())
        .map_err(|e| ProviderError::InvalidConfig(format!("Invalid token URL: {}", e)))?;
    let redirect_url = RedirectUrl::new(config.redirect_uri.clone())
        .map_err(|e| ProviderError::InvalidConfig(format!("Invalid redirect URL: {}", e)))?;

    let mut client = BasicClient::new(ClientId::new(config.client_id.clone()))
        .set_auth_uri(auth_url)
        .set_token_uri(token_url)
        .set_redirect_uri(redirect_url);

    if let Some(ref secret) = config.client_secret {
        client = client.set_client_secret(ClientSecret::new(secret.clone()));
    }

    Ok(client)
}

/// Bind the OAuth2 callback listener on an ephemeral port.
/// Returns the listener and the actual port assigned by the OS.
pub async fn bind_callback_listener() -> Result<(tokio::net::TcpListener, u16), ProviderError> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| ProviderError::Other(format!("Failed to bind callback server: {}", e)))?;

    let port = listener
        .local_addr()
        .map(|a| a.port())
        .map_err(|e| ProviderError::Other(format!("Failed to get local port: {}", e)))?;

    debug!("OAuth callback listener bound on port {}", port);
    Ok((listener, port))
}

const CALLBACK_PAGE: &str = "HTTP/1.1 200 OK\r\n\
Content-Type: text/html; charset=utf-8\r\n\
Connection: close\r\n\r\n\
<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>CloudNest</title></head>\
<body style=\"font-family:sans-serif;text-align:center;padding-top:80px\">\
<h1>Google Drive linked</h1><p>You can close this window and return to CloudNest.</p>\
</body></html>";

/// Wait for an OAuth2 callback on an already-bound listener.
/// Returns (code, state) extracted from the callback request.
pub async fn wait_for_callback(listener: tokio::net::TcpListener) -> Result<(String, String), ProviderError> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (mut socket, _) = listener
        .accept()
        .await
        .map_err(|e| ProviderError::Other(format!("Failed to accept connection: {}", e)))?;

    let mut buffer = vec![0u8; 4096];
    let n = socket
        .read(&mut buffer)
        .await
        .map_err(|e| ProviderError::Other(format!("Failed to read request: {}", e)))?;

    let request = String::from_utf8_lossy(&buffer[..n]);
    let (code, state) = parse_callback_request(&request)?;

    socket
        .write_all(CALLBACK_PAGE.as_bytes())
        .await
        .map_err(|e| ProviderError::Other(format!("Failed to send response: {}", e)))?;

    Ok((code, state))
}

/// Parse OAuth callback request to extract code and state
fn parse_callback_request(request: &str) -> Result<(String, String), ProviderError> {
    let first_line = request
        .lines()
        .next()
        .ok_or_else(|| ProviderError::AuthenticationFailed("Empty request".to_string()))?;

    // GET /callback?code=xxx&state=yyy HTTP/1.1
    let path = first_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| ProviderError::AuthenticationFailed("Invalid request format".to_string()))?;

    let (_, query) = path
        .split_once('?')
        .ok_or_else(|| ProviderError::AuthenticationFailed("No query parameters".to_string()))?;

    let mut code = None;
    let mut state = None;

    for param in query.split('&') {
        let (key, value) = param.split_once('=').unwrap_or((param, ""));
        let decoded = urlencoding::decode(value).unwrap_or_default().to_string();
        match key {
            "code" => code = Some(decoded),
            "state" => state = Some(decoded),
            "error" => {
                return Err(ProviderError::AuthenticationFailed(format!("OAuth error: {}", decoded)))
            }
            _ => {}
        }
    }

    let code = code.ok_or_else(|| ProviderError::AuthenticationFailed("Missing code".to_string()))?;
    let state = state.ok_or_else(|| ProviderError::AuthenticationFailed("Missing state".to_string()))?;

    Ok((code, state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_callback_request() {
        let request = "GET /callback?code=abc123&state=xyz789 HTTP/1.1\r\nHost: localhost\r\n";
        let (code, state) = parse_callback_request(request).unwrap();
        assert_eq!(code, "abc123");
        assert_eq!(state, "xyz789");
    }

    #[test]
    fn test_parse_callback_request_decodes_and_rejects_errors() {
        let request = "GET /callback?state=s%2F1&code=4%2F0Ab HTTP/1.1\r\n";
        let (code, state) = parse_callback_request(request).unwrap();
        assert_eq!(code, "4/0Ab");
        assert_eq!(state, "s/1");

        let denied = "GET /callback?error=access_denied HTTP/1.1\r\n";
        assert!(matches!(
            parse_callback_request(denied),
            Err(ProviderError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_oauth_config_google() {
        let config = OAuthConfig::google_with_port("client_id", "client_secret", 8123);
        assert!(!config.scopes.is_empty());
        assert_eq!(config.redirect_uri, "http://127.0.0.1:8123/callback");
        assert_eq!(config.client_secret.as_deref(), Some("client_secret"));

        let public = OAuthConfig::google("client_id", "");
        assert!(public.client_secret.is_none());
    }

    #[test]
    fn test_stored_tokens_expiry() {
        let mut tokens = StoredTokens::bearer("abc");
        assert!(!tokens.is_expired());

        tokens.expires_at = Some(chrono::Utc::now().timestamp() + 60);
        assert!(tokens.is_expired(), "inside the 5 minute buffer");

        tokens.expires_at = Some(chrono::Utc::now().timestamp() + 3600);
        assert!(!tokens.is_expired());
    }

    #[tokio::test]
    async fn test_start_auth_flow_registers_state() {
        let oauth = GoogleOAuth::new("cid", "secret").without_browser();
        let config = OAuthConfig::google_with_port("cid", "secret", 9000);
        let (url, state) = oauth.start_auth_flow(&config).await.unwrap();
        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("code_challenge="));
        assert!(url.contains("access_type=offline"));
        assert!(oauth.pending_verifiers.read().await.contains_key(&state));

        let err = oauth.complete_auth_flow(&config, "code", "unknown").await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }
}
