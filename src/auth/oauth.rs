//! OAuth2 client with PKCE support for Azure AD authentication.

use std::collections::HashMap;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::Config;
use crate::error::AuthError;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// PKCE code verifier and challenge pair.
#[derive(Debug)]
pub struct PkceChallenge {
    /// The code verifier (stored locally, sent in token exchange).
    pub verifier: String,
    /// The code challenge (SHA256 hash of verifier, sent in auth request).
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn new() -> Self {
        // Generate 32 random bytes for the verifier
        let mut rng = rand::thread_rng();
        let verifier_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
        let verifier = URL_SAFE_NO_PAD.encode(&verifier_bytes);

        // Create challenge = BASE64URL(SHA256(verifier))
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let hash = hasher.finalize();
        let challenge = URL_SAFE_NO_PAD.encode(hash);

        Self {
            verifier,
            challenge,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// OAuth2 client for Azure AD authentication.
pub struct OAuth2Client {
    client_id: String,
    auth_endpoint: String,
    token_endpoint: String,
    redirect_uri: String,
    scopes: Vec<String>,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a new OAuth2 client from configuration.
    pub fn new(config: &Config) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::OAuthFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client_id: config.oauth.client_id.clone(),
            auth_endpoint: config.auth_url(),
            token_endpoint: config.token_url(),
            redirect_uri: config.oauth.redirect_uri.clone(),
            scopes: config.oauth.scopes.clone(),
            http_client,
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Generate the authorization URL for browser-based sign-in.
    ///
    /// Returns the URL and a CSRF state token that must be verified in the callback.
    pub fn generate_auth_url(&self, pkce: &PkceChallenge) -> Result<(Url, String), AuthError> {
        // Generate random state for CSRF protection
        let mut rng = rand::thread_rng();
        let state_bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
        let state = URL_SAFE_NO_PAD.encode(&state_bytes);

        let mut url = Url::parse(&self.auth_endpoint).map_err(|e| {
            AuthError::OAuthFailed(format!("Invalid auth endpoint {}: {}", self.auth_endpoint, e))
        })?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");

        Ok((url, state))
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<TokenResponse, AuthError> {
        let scope = self.scopes.join(" ");
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", pkce_verifier),
            ("scope", scope.as_str()),
        ];

        self.token_request(&params)
            .await
            .map_err(AuthError::TokenExchangeFailed)
    }

    /// Redeem a refresh token for a new management API access token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let scope = self.scopes.join(" ");
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];

        self.token_request(&params)
            .await
            .map_err(AuthError::TokenRefreshFailed)
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, String> {
        let response = self
            .http_client
            .post(&self.token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            let status = response.status();
            // Log error details for debugging (doesn't expose to user)
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!("Token request failed: HTTP {} - {}", status, error_body);
            return Err(format!("HTTP {}", status.as_u16()));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| e.to_string())
    }
}

/// Token response from Azure AD.
#[derive(Debug, serde::Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
}

/// Parse OAuth callback URL to extract code and state.
pub fn parse_callback_url(url_string: &str) -> Result<(String, String), AuthError> {
    let url = Url::parse(url_string).map_err(|_| AuthError::InvalidAuthCode)?;

    let params: HashMap<_, _> = url.query_pairs().collect();

    // Check for error response
    if let Some(error) = params.get("error") {
        let description = params
            .get("error_description")
            .map(|s| s.to_string())
            .unwrap_or_else(|| error.to_string());
        return Err(AuthError::OAuthFailed(description));
    }

    let code = params
        .get("code")
        .ok_or(AuthError::InvalidAuthCode)?
        .to_string();

    let state = params
        .get("state")
        .ok_or(AuthError::StateValidationFailed)?
        .to_string();

    Ok((code, state))
}
