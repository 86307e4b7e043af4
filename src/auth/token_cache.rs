//! On-disk cache of the refresh token between runs.
//!
//! The record lives in the per-user cache directory with permissions 0600.
//! Secrets are zeroed from memory when the record is dropped.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::ensure_private_dir;
use crate::error::CacheError;

/// Cache file name.
const RECORD_FILE: &str = "authrecord.json";

/// A cached sign-in for one tenant and client.
#[derive(Debug, Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct AuthRecord {
    tenant: String,
    client_id: String,
    refresh_token: String,
    #[zeroize(skip)]
    saved_at: DateTime<Utc>,
}

impl AuthRecord {
    pub fn new(tenant: &str, client_id: &str, refresh_token: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            client_id: client_id.to_string(),
            refresh_token: refresh_token.to_string(),
            saved_at: Utc::now(),
        }
    }

    /// Whether this record was issued for the given tenant and client.
    pub fn matches(&self, tenant: &str, client_id: &str) -> bool {
        self.tenant == tenant && self.client_id == client_id
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// Time since the record was written.
    pub fn age(&self) -> Duration {
        Utc::now() - self.saved_at
    }
}

/// File-backed credential cache.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    /// Cache in the platform cache directory, e.g. `~/.cache/autopim/authrecord.json`.
    pub fn default_location() -> Result<Self, CacheError> {
        let dirs = ProjectDirs::from("", "", "autopim").ok_or(CacheError::NoCacheDir)?;
        Ok(Self::at(dirs.cache_dir().join(RECORD_FILE)))
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached record. A missing file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<AuthRecord>, CacheError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No cached authentication record at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(CacheError::Io(e)),
        };

        let record: AuthRecord = serde_json::from_str(&content)?;
        debug!("Loaded cached authentication record from {:?}", self.path);
        Ok(Some(record))
    }

    /// Write the record, readable only by the current user.
    pub fn store(&self, record: &AuthRecord) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            ensure_private_dir(parent);
        }

        let content = serde_json::to_string(record)?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path)?;
        // `mode` only applies on creation; an older file may be looser.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(content.as_bytes())?;

        debug!("Saved authentication record to {:?}", self.path);
        Ok(())
    }

    /// Remove the cached record. Missing files are fine.
    pub fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_cache(name: &str) -> TokenCache {
        let dir = env::temp_dir().join(format!("autopim_test_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        TokenCache::at(dir.join(RECORD_FILE))
    }

    #[test]
    fn test_default_location() {
        let cache = TokenCache::default_location().unwrap();
        assert!(cache.path().ends_with("authrecord.json"));
    }

    #[test]
    fn test_missing_record_is_none() {
        let cache = temp_cache("missing");
        assert!(cache.load().unwrap().is_none());
        assert!(cache.clear().is_ok());
    }

    #[test]
    fn test_store_load_clear() {
        let cache = temp_cache("store");
        let record = AuthRecord::new("contoso", "client", "refresh-1");

        cache.store(&record).unwrap();
        let loaded = cache.load().unwrap().unwrap();
        assert!(loaded.matches("contoso", "client"));
        assert!(!loaded.matches("fabrikam", "client"));
        assert_eq!(loaded.refresh_token(), "refresh-1");
        assert!(loaded.age() < Duration::minutes(1));

        cache.clear().unwrap();
        assert!(cache.load().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_record_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let cache = temp_cache("perms");
        cache
            .store(&AuthRecord::new("contoso", "client", "refresh-1"))
            .unwrap();
        let mode = fs::metadata(cache.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_store_tightens_existing_file() {
        use std::os::unix::fs::PermissionsExt;

        let cache = temp_cache("loose");
        fs::create_dir_all(cache.path().parent().unwrap()).unwrap();
        fs::write(cache.path(), "{}").unwrap();
        fs::set_permissions(cache.path(), fs::Permissions::from_mode(0o644)).unwrap();

        cache
            .store(&AuthRecord::new("contoso", "client", "refresh-1"))
            .unwrap();

        let mode = fs::metadata(cache.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(cache.load().unwrap().unwrap().refresh_token(), "refresh-1");
    }

    #[test]
    fn test_corrupt_record_is_error() {
        let cache = temp_cache("corrupt");
        fs::create_dir_all(cache.path().parent().unwrap()).unwrap();
        fs::write(cache.path(), "not json").unwrap();
        assert!(matches!(cache.load(), Err(CacheError::Corrupt(_))));
    }
}
