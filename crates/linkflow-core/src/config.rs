use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_PROFILE: &str = "default";

/// Locates the per-user storage directory backing the token store.
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    root: PathBuf,
}

impl ConfigLocator {
    /// Attempt to discover the persistent configuration directory, creating it if needed.
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("app", "linkflow", "linkflow")
            .ok_or(ConfigError::MissingProjectDirs)?;
        Self::with_root(dirs.config_dir().to_path_buf())
    }

    /// Use an explicit directory instead of the platform default.
    pub fn with_root(root: PathBuf) -> Result<Self, ConfigError> {
        fs::create_dir_all(&root).map_err(ConfigError::CreateDir)?;
        set_user_only_permissions(&root)?;
        Ok(Self { root })
    }

    /// Path of the storage file holding `key` for the given profile.
    pub fn storage_file(&self, profile: &str, key: &str) -> PathBuf {
        self.root.join(format!("storage-{profile}-{key}.json"))
    }
}

fn set_user_only_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let metadata = fs::metadata(path)?;
        let mut permissions = metadata.permissions();
        permissions.set_mode(0o700);
        fs::set_permissions(path, permissions)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}

/// Which backend route issues session tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenEndpoint {
    /// `/b_testing`, the route the linking page uses today.
    #[default]
    Testing,
    /// `/create_link_token`, the production issuance route.
    Create,
}

impl TokenEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            TokenEndpoint::Testing => "/b_testing",
            TokenEndpoint::Create => "/create_link_token",
        }
    }
}

impl std::str::FromStr for TokenEndpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "testing" | "b_testing" => Ok(TokenEndpoint::Testing),
            "create" | "create_link_token" => Ok(TokenEndpoint::Create),
            other => Err(ConfigError::InvalidTokenEndpoint(other.to_owned())),
        }
    }
}

impl std::fmt::Display for TokenEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            TokenEndpoint::Testing => "testing",
            TokenEndpoint::Create => "create",
        };
        write!(f, "{value}")
    }
}

/// Settings for one linking attempt against a backend.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub base_url: Url,
    pub token_endpoint: TokenEndpoint,
    pub session_cookie: Option<String>,
    pub profile: String,
}

impl FlowConfig {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            token_endpoint: TokenEndpoint::default(),
            session_cookie: None,
            profile: DEFAULT_PROFILE.to_owned(),
        })
    }

    pub fn with_token_endpoint(mut self, endpoint: TokenEndpoint) -> Self {
        self.token_endpoint = endpoint;
        self
    }

    pub fn with_session_cookie<S: Into<String>>(mut self, cookie: S) -> Self {
        self.session_cookie = Some(cookie.into());
        self
    }

    pub fn with_profile<S: Into<String>>(mut self, profile: S) -> Self {
        self.profile = profile.into();
        self
    }
}

/// Errors that can occur when working with configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine configuration directory for linkflow")]
    MissingProjectDirs,
    #[error("failed to create configuration directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("filesystem error: {0}")]
    Io(#[source] std::io::Error),
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("invalid token endpoint '{0}'")]
    InvalidTokenEndpoint(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}
