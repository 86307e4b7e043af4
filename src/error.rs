//! Error types for the autopim application.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Authentication-related errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Invalid authorization code")]
    InvalidAuthCode,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("State validation failed (possible CSRF attack)")]
    StateValidationFailed,

    #[error("OAuth callback timeout")]
    CallbackTimeout,

    #[error("Callback server error: {0}")]
    CallbackServer(String),
}

/// Credential cache errors.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Could not determine cache directory")]
    NoCacheDir,

    #[error("Failed to parse cached record: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors while listing and filtering role eligibility schedule instances.
///
/// Any of these aborts the run before a single activation is attempted.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    #[error("Scope id has no subscription segment: {0}")]
    InvalidScope(String),
}

/// Configuration loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

impl DiscoveryError {
    /// Returns a user-friendly hint for the most common failures.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Network(_) => "Network error. Check your connection.",
            Self::Status { status: 401, .. } => "Session expired. Run again with --nocache.",
            Self::Status { status: 403, .. } => "Insufficient permissions to list PIM roles.",
            Self::Status { .. } => "Azure rejected the role listing request.",
            Self::InvalidResponse(_) | Self::InvalidScope(_) => {
                "Unexpected response from Azure."
            }
        }
    }
}

impl AppError {
    /// Returns a user-friendly message for the final error line.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Auth(AuthError::OAuthFailed(_)) => "Sign-in failed. Please try again.",
            Self::Auth(AuthError::StateValidationFailed) => {
                "Security error. Please try signing in again."
            }
            Self::Auth(AuthError::CallbackTimeout) => "Sign-in timed out. Please try again.",
            Self::Auth(_) => "Authentication failed.",
            Self::Discovery(e) => e.user_message(),
            Self::Config(_) => "Configuration error. Please check pim.toml.",
        }
    }

    /// Returns true if the cached credential should be discarded.
    pub fn invalidates_cache(&self) -> bool {
        matches!(
            self,
            Self::Auth(AuthError::TokenRefreshFailed(_))
                | Self::Discovery(DiscoveryError::Status { status: 401, .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let err = AppError::Auth(AuthError::OAuthFailed("test".into()));
        assert_eq!(err.user_message(), "Sign-in failed. Please try again.");

        let err = AppError::Discovery(DiscoveryError::Status {
            status: 403,
            body: String::new(),
        });
        assert_eq!(
            err.user_message(),
            "Insufficient permissions to list PIM roles."
        );
    }

    #[test]
    fn test_invalidates_cache() {
        let err = AppError::Auth(AuthError::TokenRefreshFailed("HTTP 400".into()));
        assert!(err.invalidates_cache());

        let err = AppError::Discovery(DiscoveryError::Status {
            status: 401,
            body: String::new(),
        });
        assert!(err.invalidates_cache());

        let err = AppError::Discovery(DiscoveryError::InvalidScope("/x".into()));
        assert!(!err.invalidates_cache());
    }
}
