use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigLocator;

use super::{StoreError, TokenStore};

/// Filesystem-backed storage located in the user configuration directory.
///
/// Each key lives in its own JSON file scoped by profile. Values are written
/// in plain text with user-only permissions.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    locator: ConfigLocator,
    profile: String,
}

impl FileTokenStore {
    pub fn new(locator: ConfigLocator, profile: impl Into<String>) -> Self {
        Self {
            locator,
            profile: profile.into(),
        }
    }

    pub fn with_default_locator(profile: impl Into<String>) -> Result<Self, StoreError> {
        Ok(Self::new(ConfigLocator::new()?, profile))
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if !is_file_name_safe(&self.profile) {
            return Err(StoreError::InvalidProfile(self.profile.clone()));
        }
        if !is_file_name_safe(key) {
            return Err(StoreError::InvalidKey(key.to_owned()));
        }
        Ok(self.locator.storage_file(&self.profile, key))
    }

    fn write_file(path: &Path, payload: &str) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(payload.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perm = file.metadata()?.permissions();
            perm.set_mode(0o600);
            fs::set_permissions(path, perm)?;
        }

        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)?;
        let entry: StoredEntry = serde_json::from_str(&raw)?;
        Ok(Some(entry.value))
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let entry = StoredEntry {
            version: 1,
            key: key.to_owned(),
            value: value.to_owned(),
            stored_at: Utc::now(),
        };
        let payload = serde_json::to_string_pretty(&entry)?;
        Self::write_file(&path, &payload)?;
        tracing::debug!(key, path = %path.display(), "stored value");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(path) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn is_file_name_safe(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    version: u32,
    key: String,
    value: String,
    stored_at: DateTime<Utc>,
}
