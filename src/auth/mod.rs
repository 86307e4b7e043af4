//! Azure AD authentication module.
//!
//! Provides OAuth2 with PKCE browser sign-in, a loopback callback server,
//! and a cached refresh token so repeated runs skip the browser.

pub mod callback_server;
pub mod oauth;
pub mod token_cache;

use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::Config;
use crate::error::{AppError, AuthError};
use callback_server::CallbackServer;
use oauth::{parse_callback_url, OAuth2Client, PkceChallenge, TokenResponse};
use token_cache::{AuthRecord, TokenCache};

/// How long to wait for the user to finish signing in.
const SIGN_IN_TIMEOUT: StdDuration = StdDuration::from_secs(300);

/// Obtain a management API access token.
///
/// Redeems the cached refresh token when there is one for this tenant,
/// otherwise runs the interactive browser flow. Cache problems only warn.
pub async fn acquire_management_token(
    config: &Config,
    cache: Option<&TokenCache>,
) -> Result<Zeroizing<String>, AppError> {
    let oauth_client = OAuth2Client::new(config)?;

    if let Some(cache) = cache {
        if let Some(token) = try_cached_sign_in(config, &oauth_client, cache).await {
            return Ok(token);
        }
    }

    let token_response = interactive_sign_in(&oauth_client).await?;
    info!(
        "Successfully authenticated, token valid for {}",
        format_duration(Duration::seconds(token_response.expires_in as i64))
    );

    if let Some(cache) = cache {
        remember(config, cache, &token_response);
    }

    Ok(Zeroizing::new(token_response.access_token))
}

async fn try_cached_sign_in(
    config: &Config,
    oauth_client: &OAuth2Client,
    cache: &TokenCache,
) -> Option<Zeroizing<String>> {
    let record = match cache.load() {
        Ok(Some(record)) => record,
        Ok(None) => return None,
        Err(e) => {
            warn!("Failed to read authentication record: {}", e);
            discard(cache);
            return None;
        }
    };

    if !record.matches(&config.tenant, &config.oauth.client_id) {
        info!("Cached authentication record is for another tenant, signing in again");
        return None;
    }

    info!(
        "Using cached authentication record from {} ago",
        format_duration(record.age())
    );

    match oauth_client.refresh_token(record.refresh_token()).await {
        Ok(token_response) => {
            remember(config, cache, &token_response);
            Some(Zeroizing::new(token_response.access_token))
        }
        Err(e) => {
            warn!("Cached sign-in no longer valid: {}", e);
            discard(cache);
            None
        }
    }
}

/// Run the browser flow and exchange the code for tokens.
async fn interactive_sign_in(oauth_client: &OAuth2Client) -> Result<TokenResponse, AuthError> {
    let pkce = PkceChallenge::new();
    let (auth_url, expected_state) = oauth_client.generate_auth_url(&pkce)?;

    let server = CallbackServer::bind(oauth_client.redirect_uri()).await?;

    info!("Opening browser for Azure sign-in");
    if let Err(e) = open::that(auth_url.as_str()) {
        warn!("Failed to open browser: {}", e);
        eprintln!("Open this URL to sign in:\n\n  {}\n", auth_url);
    }

    debug!("Waiting for sign-in callback on port {}", server.port());
    let callback_url = server.wait_for_callback(SIGN_IN_TIMEOUT).await?;
    let (code, state) = parse_callback_url(&callback_url)?;

    if state != expected_state {
        return Err(AuthError::StateValidationFailed);
    }

    oauth_client.exchange_code(&code, &pkce.verifier).await
}

/// Store the (possibly rotated) refresh token. Failures only warn.
fn remember(config: &Config, cache: &TokenCache, token_response: &TokenResponse) {
    let Some(refresh_token) = &token_response.refresh_token else {
        return;
    };

    let record = AuthRecord::new(&config.tenant, &config.oauth.client_id, refresh_token);
    if let Err(e) = cache.store(&record) {
        warn!("Failed to store authentication record: {}", e);
    }
}

/// Remove a cached record that can no longer be used.
pub fn discard(cache: &TokenCache) {
    if let Err(e) = cache.clear() {
        warn!(
            "Failed to remove authentication record {:?}: {}",
            cache.path(),
            e
        );
    }
}

/// Format duration as human-readable string (e.g., "45 min", "1 hour").
pub fn format_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes();

    if total_minutes < 1 {
        "< 1 min".to_string()
    } else if total_minutes < 60 {
        format!("{} min", total_minutes)
    } else if total_minutes < 48 * 60 {
        let hours = total_minutes / 60;
        let mins = total_minutes % 60;
        if mins == 0 {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            format!("{}h {}m", hours, mins)
        }
    } else {
        format!("{} days", duration.num_days())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::seconds(30)), "< 1 min");
        assert_eq!(format_duration(Duration::minutes(5)), "5 min");
        assert_eq!(format_duration(Duration::minutes(45)), "45 min");
        assert_eq!(format_duration(Duration::hours(1)), "1 hour");
        assert_eq!(format_duration(Duration::hours(2)), "2 hours");
        assert_eq!(format_duration(Duration::minutes(90)), "1h 30m");
        assert_eq!(format_duration(Duration::days(3)), "3 days");
    }
}
