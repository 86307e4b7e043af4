//! Configuration loading and management.
//!
//! Loads the embedded config.toml, overlays `pim.toml` from the user config
//! directory and the working directory, then applies environment variable
//! overrides. The result is built once in `main` and passed down by reference.

use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Name of the user-editable configuration file.
pub const CONFIG_FILE: &str = "pim.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub tenant: String,
    pub subscriptions: Vec<String>,
    pub oauth: OAuthConfig,
    pub activation: ActivationConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    /// Config files that were found and applied, lowest layer first.
    #[serde(skip)]
    pub sources: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivationConfig {
    /// Justification text sent with every activation request.
    pub justification: String,
    /// ISO-8601 activation duration, e.g. `PT8H`.
    pub duration: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub management_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// A user config file. Every key is optional and overrides the embedded default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigOverlay {
    tenant: Option<String>,
    subscriptions: Option<Vec<String>>,
    #[serde(default)]
    oauth: OAuthOverlay,
    #[serde(default)]
    activation: ActivationOverlay,
    #[serde(default)]
    api: ApiOverlay,
    #[serde(default)]
    logging: LoggingOverlay,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OAuthOverlay {
    client_id: Option<String>,
    redirect_uri: Option<String>,
    scopes: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActivationOverlay {
    justification: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ApiOverlay {
    management_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingOverlay {
    level: Option<String>,
}

impl Config {
    /// Load configuration from all layers.
    ///
    /// Validation is left to [`Config::validate`] so the caller can apply
    /// command line overrides first.
    pub fn load() -> Result<Self, ConfigError> {
        let mut candidates = Vec::new();
        if let Some(dir) = config_dir() {
            candidates.push(dir.join(CONFIG_FILE));
        }
        candidates.push(PathBuf::from(CONFIG_FILE));

        let mut config = Self::load_from(&candidates)?;
        config.apply_env();
        Ok(config)
    }

    /// Embedded defaults overlaid by every existing file in `paths`, in order.
    fn load_from(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        let mut config = Self::embedded()?;

        for path in paths {
            if let Some(overlay) = read_overlay(path)? {
                config.apply(overlay);
                config.sources.push(path.clone());
            }
        }

        Ok(config)
    }

    /// Parse the embedded defaults.
    pub fn embedded() -> Result<Self, ConfigError> {
        toml::from_str(CONFIG_TOML).map_err(|source| ConfigError::Parse {
            path: "embedded config.toml".to_string(),
            source,
        })
    }

    fn apply(&mut self, overlay: ConfigOverlay) {
        if let Some(tenant) = overlay.tenant {
            self.tenant = tenant;
        }
        if let Some(subscriptions) = overlay.subscriptions {
            self.subscriptions = subscriptions;
        }
        if let Some(client_id) = overlay.oauth.client_id {
            self.oauth.client_id = client_id;
        }
        if let Some(redirect_uri) = overlay.oauth.redirect_uri {
            self.oauth.redirect_uri = redirect_uri;
        }
        if let Some(scopes) = overlay.oauth.scopes {
            self.oauth.scopes = scopes;
        }
        if let Some(justification) = overlay.activation.justification {
            self.activation.justification = justification;
        }
        if let Some(duration) = overlay.activation.duration {
            self.activation.duration = duration;
        }
        if let Some(base_url) = overlay.api.management_base_url {
            self.api.management_base_url = base_url;
        }
        if let Some(level) = overlay.logging.level {
            self.logging.level = level;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(tenant) = env::var("AZURE_TENANT_ID") {
            self.tenant = tenant;
        }

        if let Ok(client_id) = env::var("AZURE_CLIENT_ID") {
            self.oauth.client_id = client_id;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            self.logging.level = log_level;
        }
    }

    /// Validate the final configuration.
    ///
    /// A tenant is only needed when the tool has to sign in by itself.
    pub fn validate(&self, needs_sign_in: bool) -> Result<(), ConfigError> {
        if needs_sign_in && self.tenant.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Azure tenant not configured. Pass --tenant, set AZURE_TENANT_ID \
                 or add `tenant = \"...\"` to {}",
                CONFIG_FILE
            )));
        }

        if needs_sign_in && self.oauth.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "oauth.client_id must not be empty".to_string(),
            ));
        }

        if !is_iso8601_duration(&self.activation.duration) {
            return Err(ConfigError::Invalid(format!(
                "activation.duration `{}` is not an ISO-8601 duration (e.g. PT8H)",
                self.activation.duration
            )));
        }

        if self.activation.justification.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "activation.justification must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the authorization URL for Azure AD.
    pub fn auth_url(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/authorize",
            self.tenant
        )
    }

    /// Get the token URL for Azure AD.
    pub fn token_url(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.tenant
        )
    }
}

/// Get the per-user configuration directory, e.g. `~/.config/autopim` on Linux.
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "autopim").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Create the per-user configuration directory if missing.
///
/// Runs after logging is set up so failures are visible.
pub fn prepare_config_dir() {
    if let Some(dir) = config_dir() {
        ensure_private_dir(&dir);
    }
}

fn read_overlay(path: &Path) -> Result<Option<ConfigOverlay>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            })
        }
    };

    toml::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
}

/// Create a directory readable only by the current user. Failures are logged.
pub fn ensure_private_dir(dir: &Path) {
    if dir.exists() {
        return;
    }

    if let Err(e) = fs::create_dir_all(dir) {
        warn!("Failed to create directory {}: {}", dir.display(), e);
        return;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
            warn!("Failed to restrict permissions on {}: {}", dir.display(), e);
        }
    }
}

/// Loose check for an ISO-8601 duration such as `PT8H`, `PT30M` or `P1DT2H`.
fn is_iso8601_duration(value: &str) -> bool {
    let Some(rest) = value.strip_prefix('P') else {
        return false;
    };

    let mut saw_unit = false;
    let mut digits = 0;
    let mut in_time = false;

    for c in rest.chars() {
        match c {
            '0'..='9' => digits += 1,
            'T' if !in_time && digits == 0 => in_time = true,
            'Y' | 'W' | 'D' if !in_time && digits > 0 => {
                saw_unit = true;
                digits = 0;
            }
            'M' if digits > 0 => {
                saw_unit = true;
                digits = 0;
            }
            'H' | 'S' if in_time && digits > 0 => {
                saw_unit = true;
                digits = 0;
            }
            _ => return false,
        }
    }

    saw_unit && digits == 0
}
